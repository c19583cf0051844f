//! Per-generation module loader.
//!
//! A [`ModuleLoader`] reads units from the source tree on demand, caches
//! them by name for the lifetime of its generation, and watches every
//! directory it personally loaded from. Names that have no local file, or
//! that are excluded, fall through to the delegate [`UnitResolver`] and are
//! neither cached nor watched.
//!
//! Change detection is sticky: once [`ModuleLoader::has_changed`] or
//! [`ModuleLoader::await_change`] observes an event, the loader closes its
//! subscription and reports `true` forever. The owning generation must then
//! be retired.

mod layout;
mod resolver;
mod unit;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use layout::{is_valid_unit_name, ExclusionSet, SourceLayout};
pub use resolver::{NoDelegate, StaticResolver, UnitResolver};
pub use unit::{Definition, TextDefiner, Unit, UnitDefiner, UnitOrigin};

use crate::watch::{
    ChangeSignal, FsWatchBackend, SignalWait, Subscription, WatchBackend, WatchOutcome,
};
use crate::{AppError, Result};

/// Outcome of [`ModuleLoader::await_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeWait {
    /// A backing file changed; the loader is now stale.
    Changed,
    /// The loader was closed without observing a change.
    Closed,
    /// The wait was cancelled; nothing was marked.
    Cancelled,
}

/// Everything a loader needs besides its generation number.
///
/// Shared by all generations of one coordinator. Cloning is cheap.
#[derive(Clone)]
pub struct LoaderContext {
    layout: Arc<SourceLayout>,
    exclusions: Arc<ExclusionSet>,
    definer: Arc<dyn UnitDefiner>,
    resolver: Arc<dyn UnitResolver>,
    backend: Arc<dyn WatchBackend>,
}

impl LoaderContext {
    /// Context with no delegate, no exclusions and file-system watching.
    #[must_use]
    pub fn new(layout: SourceLayout, definer: Arc<dyn UnitDefiner>) -> Self {
        Self {
            layout: Arc::new(layout),
            exclusions: Arc::new(ExclusionSet::empty()),
            definer,
            resolver: Arc::new(NoDelegate),
            backend: Arc::new(FsWatchBackend),
        }
    }

    /// Use `resolver` for non-local and excluded names.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn UnitResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Always delegate the names in `exclusions`.
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    /// Use `backend` for change notification.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Source tree layout.
    #[must_use]
    pub fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    /// Names that are always delegated.
    #[must_use]
    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }
}

struct LoaderState {
    units: HashMap<String, Arc<Unit>>,
    subscription: Option<Box<dyn Subscription>>,
    watched: BTreeSet<PathBuf>,
    closed: bool,
}

/// Loads, caches and watches the units of one generation.
pub struct ModuleLoader {
    generation: u64,
    context: LoaderContext,
    state: Mutex<LoaderState>,
    signal: Arc<ChangeSignal>,
    changed: AtomicBool,
    closed: AtomicBool,
    subscribed: AtomicBool,
    file_reads: AtomicU64,
}

impl ModuleLoader {
    /// Create an empty loader for `generation`. Nothing is watched until
    /// the first local load.
    #[must_use]
    pub fn new(generation: u64, context: LoaderContext) -> Self {
        Self {
            generation,
            context,
            state: Mutex::new(LoaderState {
                units: HashMap::new(),
                subscription: None,
                watched: BTreeSet::new(),
                closed: false,
            }),
            signal: Arc::new(ChangeSignal::new()),
            changed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            file_reads: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generation this loader belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Load `name`, from the cache, the source tree, or the delegate.
    ///
    /// Repeated calls for a locally loaded name return the same `Arc`
    /// without touching the file again.
    ///
    /// # Errors
    ///
    /// - `AppError::UnitUnavailable` if the located file cannot be read, or
    ///   the delegate has no such unit.
    /// - `AppError::UnitInvalid` if the definer rejects the bytes.
    /// - `AppError::Watch` if a subscription cannot be created at all.
    pub fn load(&self, name: &str) -> Result<Arc<Unit>> {
        let mut state = self.lock_state();
        if let Some(unit) = state.units.get(name) {
            debug!(generation = self.generation, unit = name, "unit cache hit");
            return Ok(Arc::clone(unit));
        }

        let local = self
            .context
            .layout
            .path_for(name)
            .filter(|path| path.is_file() && !self.context.exclusions.contains(name));
        let Some(path) = local else {
            drop(state);
            debug!(generation = self.generation, unit = name, "delegating unit");
            return self.context.resolver.resolve(name);
        };

        if !state.closed {
            self.watch_parent(&mut state, &path)?;
        }

        let bytes = std::fs::read(&path).map_err(|err| {
            AppError::UnitUnavailable(format!("{name} ({}): {err}", path.display()))
        })?;
        self.file_reads.fetch_add(1, Ordering::Relaxed);

        let unit = Arc::new(Unit::define(
            self.context.definer.as_ref(),
            name,
            UnitOrigin::Local { path },
            &bytes,
        )?);
        state.units.insert(name.to_owned(), Arc::clone(&unit));
        debug!(
            generation = self.generation,
            unit = name,
            digest = unit.digest(),
            "loaded local unit"
        );
        Ok(unit)
    }

    fn watch_parent(&self, state: &mut LoaderState, path: &Path) -> Result<()> {
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        if state.watched.contains(dir) {
            return Ok(());
        }

        if state.subscription.is_none() {
            state.subscription = Some(self.context.backend.subscribe(Arc::clone(&self.signal))?);
            self.subscribed.store(true, Ordering::Release);
            debug!(generation = self.generation, "created source subscription");
        }
        let Some(subscription) = state.subscription.as_mut() else {
            return Ok(());
        };

        match subscription.watch(dir)? {
            WatchOutcome::Watching => {
                debug!(generation = self.generation, dir = %dir.display(), "watching source directory");
                state.watched.insert(dir.to_path_buf());
            }
            WatchOutcome::Missing => {
                debug!(generation = self.generation, dir = %dir.display(), "source directory missing; not watched");
            }
            WatchOutcome::Closed => {}
        }
        Ok(())
    }

    fn mark_changed(&self) {
        if !self.changed.swap(true, Ordering::AcqRel) {
            info!(generation = self.generation, "source change detected");
        }
        self.close();
    }

    /// Non-blocking, sticky change check. Never waits on an in-progress
    /// [`load`](Self::load).
    #[must_use]
    pub fn has_changed(&self) -> bool {
        if self.changed.load(Ordering::Acquire) {
            return true;
        }
        if !self.is_closed() && self.signal.poll() {
            self.mark_changed();
        }
        self.changed.load(Ordering::Acquire)
    }

    /// Wait for a change, a close, or cancellation of `cancel`.
    ///
    /// Legal before the loader has subscribed to anything: the wait then
    /// lasts until a later subscription sees an event.
    pub async fn await_change(&self, cancel: &CancellationToken) -> ChangeWait {
        if self.has_changed() {
            return ChangeWait::Changed;
        }
        if self.is_closed() {
            return ChangeWait::Closed;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => ChangeWait::Cancelled,
            outcome = self.signal.wait() => {
                if outcome == SignalWait::Event && !self.is_closed() {
                    self.mark_changed();
                }
                if self.changed.load(Ordering::Acquire) {
                    ChangeWait::Changed
                } else {
                    ChangeWait::Closed
                }
            }
        }
    }

    /// Whether a subscription has ever been created for this loader.
    #[must_use]
    pub fn is_watching_anything(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the loader: release the subscription and wake any waiter.
    /// Idempotent. Cached units stay readable.
    pub fn close(&self) {
        let subscription = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            // Mirrored outside the mutex for lock-free polling.
            self.closed.store(true, Ordering::Release);
            state.subscription.take()
        };
        if let Some(mut subscription) = subscription {
            subscription.close();
        }
        self.signal.close();
        debug!(generation = self.generation, "loader closed");
    }

    /// Snapshot of every locally loaded unit, sorted by name.
    #[must_use]
    pub fn units(&self) -> Vec<Arc<Unit>> {
        let mut units: Vec<_> = self.lock_state().units.values().map(Arc::clone).collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));
        units
    }

    /// Directories currently registered with the subscription.
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.lock_state().watched.iter().cloned().collect()
    }

    /// Number of unit files read from disk by this loader.
    #[must_use]
    pub fn file_reads(&self) -> u64 {
        self.file_reads.load(Ordering::Relaxed)
    }

    /// Source tree layout.
    #[must_use]
    pub fn layout(&self) -> &SourceLayout {
        self.context.layout()
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("generation", &self.generation)
            .field("changed", &self.changed.load(Ordering::Relaxed))
            .field("watching", &self.is_watching_anything())
            .finish_non_exhaustive()
    }
}
