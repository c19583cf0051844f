//! Change-notification capability used by module loaders.
//!
//! A [`WatchBackend`] hands out one [`Subscription`] per loader. The
//! subscription registers directories; events are delivered through the
//! loader-owned [`ChangeSignal`], which is what request paths poll and the
//! background watcher awaits.
//!
//! Two backends ship with the crate:
//!
//! - [`FsWatchBackend`] observes the real file system through `notify`.
//! - [`ManualWatchBackend`] raises events on demand, for embedding hosts
//!   that have their own build pipeline and for tests.

mod fs;
mod manual;
mod signal;

use std::path::Path;
use std::sync::Arc;

pub use fs::FsWatchBackend;
pub use manual::ManualWatchBackend;
pub use signal::{ChangeSignal, SignalWait};

use crate::Result;

/// Outcome of registering a directory with a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The directory is now observed.
    Watching,
    /// The directory does not exist. Not an error: the units inside it
    /// simply go unobserved until a later generation finds it present.
    Missing,
    /// The subscription was already closed; nothing was registered.
    Closed,
}

/// A live registration with a change-notification source.
pub trait Subscription: Send {
    /// Start observing `dir` (non-recursively).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` for backend failures other than a missing
    /// directory, which is reported as [`WatchOutcome::Missing`].
    fn watch(&mut self, dir: &Path) -> Result<WatchOutcome>;

    /// Stop observing everything. Idempotent and irreversible.
    fn close(&mut self);
}

/// Factory for per-loader subscriptions.
pub trait WatchBackend: Send + Sync {
    /// Create a subscription that raises `signal` on every relevant event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if the underlying notification source
    /// cannot be created (for example when OS watch limits are exhausted).
    fn subscribe(&self, signal: Arc<ChangeSignal>) -> Result<Box<dyn Subscription>>;
}
