//! Programmatic change source.
//!
//! Directories are recorded but never observed; [`ManualWatchBackend::trigger`]
//! raises every open subscription instead. Hosts that learn about rebuilds
//! from their own build pipeline can drive reloads this way.
//!
//! Only open subscriptions are retained: closing or dropping one removes
//! it, so a process that reloads indefinitely holds one entry per live
//! loader.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{ChangeSignal, Subscription, WatchBackend, WatchOutcome};
use crate::Result;

struct Entry {
    signal: Arc<ChangeSignal>,
    dirs: Mutex<Vec<PathBuf>>,
    closed: AtomicBool,
}

type Entries = Mutex<Vec<Arc<Entry>>>;

/// Watch backend whose events are injected by the caller.
///
/// Cloning yields a handle onto the same set of subscriptions.
#[derive(Clone, Default)]
pub struct ManualWatchBackend {
    entries: Arc<Entries>,
    created: Arc<AtomicUsize>,
}

impl ManualWatchBackend {
    /// Create a backend with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Vec<Arc<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raise a change event on every open subscription.
    ///
    /// Returns the number of subscriptions that were notified.
    pub fn trigger(&self) -> usize {
        let open = self.entries();
        for entry in &open {
            entry.signal.raise();
        }
        open.len()
    }

    /// Total number of subscriptions ever created.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of subscriptions not yet closed. Only these are retained.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.entries().len()
    }

    /// Every directory registered with an open subscription, in order.
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.entries()
            .iter()
            .flat_map(|entry| {
                entry
                    .dirs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .collect()
    }
}

impl WatchBackend for ManualWatchBackend {
    fn subscribe(&self, signal: Arc<ChangeSignal>) -> Result<Box<dyn Subscription>> {
        let entry = Arc::new(Entry {
            signal,
            dirs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&entry));
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ManualSubscription {
            entry,
            backend: Arc::downgrade(&self.entries),
        }))
    }
}

struct ManualSubscription {
    entry: Arc<Entry>,
    backend: Weak<Entries>,
}

impl ManualSubscription {
    fn detach(&self) {
        if self.entry.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(entries) = self.backend.upgrade() {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|other| !Arc::ptr_eq(other, &self.entry));
        }
    }
}

impl Subscription for ManualSubscription {
    fn watch(&mut self, dir: &Path) -> Result<WatchOutcome> {
        if self.entry.closed.load(Ordering::Acquire) {
            return Ok(WatchOutcome::Closed);
        }
        if !dir.is_dir() {
            return Ok(WatchOutcome::Missing);
        }
        self.entry
            .dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dir.to_path_buf());
        Ok(WatchOutcome::Watching)
    }

    fn close(&mut self) {
        self.detach();
    }
}

impl Drop for ManualSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}
