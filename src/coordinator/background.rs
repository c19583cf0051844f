//! Background task that pre-builds the next generation.
//!
//! Loop: make sure a generation exists, block until its loader sees a
//! change, retire it, repeat. Requests then find a fresh generation
//! already waiting instead of paying for the rebuild themselves.

use std::sync::atomic::Ordering;
use std::sync::Weak;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use super::{Inner, Lifecycle};
use crate::loader::ChangeWait;
use crate::AppError;

/// Spawn the watcher. It holds only a weak reference so an abandoned
/// coordinator is not kept alive by its own background task.
pub(super) fn spawn<L: Lifecycle>(inner: Weak<Inner<L>>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(inner, cancel).instrument(info_span!("reload_watcher")))
}

async fn run<L: Lifecycle>(inner: Weak<Inner<L>>, cancel: CancellationToken) {
    debug!("background reload watcher started");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(coordinator) = inner.upgrade() else {
            break;
        };

        let generation = match coordinator.set_up().await {
            Ok(generation) => generation,
            Err(AppError::ShutDown(_)) => break,
            Err(err) => {
                // Escalate: a silently dead watcher would disable reloads.
                error!(%err, "background rebuild failed; watcher stopped until the next request");
                coordinator.record_background_failure(err);
                return;
            }
        };
        drop(coordinator);

        match generation.loader().await_change(&cancel).await {
            ChangeWait::Changed => {
                let Some(coordinator) = inner.upgrade() else {
                    break;
                };
                debug!(generation = generation.id(), "retiring stale generation in background");
                coordinator.tear_down().await;
            }
            ChangeWait::Cancelled => break,
            ChangeWait::Closed => {
                // Closed without a change only happens on shutdown.
                break;
            }
        }
    }

    if let Some(coordinator) = inner.upgrade() {
        coordinator.background_running.store(false, Ordering::Release);
    }
    debug!("background reload watcher stopped");
}
