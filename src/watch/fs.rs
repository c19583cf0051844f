//! `notify`-backed file-system subscriptions.

use std::path::Path;
use std::sync::Arc;

use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{ChangeSignal, Subscription, WatchBackend, WatchOutcome};
use crate::{AppError, Result};

/// Returns `true` for events that mean a source file was written, created,
/// replaced or removed. Pure access-time updates are ignored.
fn is_source_change(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

fn is_missing_path(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Watch backend using the platform's recommended `notify` watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWatchBackend;

impl WatchBackend for FsWatchBackend {
    fn subscribe(&self, signal: Arc<ChangeSignal>) -> Result<Box<dyn Subscription>> {
        let watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_source_change(&event) => {
                    debug!(paths = ?event.paths, "source change observed");
                    signal.raise();
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "source watcher error");
                }
            },
        )
        .map_err(|err| AppError::Watch(format!("failed to create source watcher: {err}")))?;

        Ok(Box::new(FsSubscription {
            watcher: Some(watcher),
        }))
    }
}

/// Holds the `notify` watcher alive until closed.
struct FsSubscription {
    watcher: Option<RecommendedWatcher>,
}

impl Subscription for FsSubscription {
    fn watch(&mut self, dir: &Path) -> Result<WatchOutcome> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(WatchOutcome::Closed);
        };

        if !dir.is_dir() {
            return Ok(WatchOutcome::Missing);
        }

        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => Ok(WatchOutcome::Watching),
            // The directory vanished between the check and the registration.
            Err(err) if is_missing_path(&err) => Ok(WatchOutcome::Missing),
            Err(err) => Err(AppError::Watch(format!(
                "failed to watch '{}': {err}",
                dir.display()
            ))),
        }
    }

    fn close(&mut self) {
        // Dropping the watcher stops the OS-level watch.
        self.watcher = None;
    }
}
