//! Reload coordination between in-flight work and generation swaps.
//!
//! The [`ReloadCoordinator`] owns a single active [`Generation`] behind a
//! readers-writer lock. Each unit of work holds shared access for its whole
//! duration via a [`Work`] guard, so a reload (which needs exclusive access)
//! can only proceed once every request using the old generation has
//! finished, and no request ever sees a half-built replacement.
//!
//! Staleness is detected lazily: [`ReloadCoordinator::begin_work`] polls the
//! current loader and, if it has changed, the first caller to notice pays
//! for the rebuild. A background task additionally waits on change events
//! and pre-builds the next generation so requests rarely wait at all.
//!
//! ## Lifecycle
//!
//! `Idle` (nothing built) → `Active` (a generation is live) → `ShutDown`
//! (terminal; every further call fails with `AppError::ShutDown`).

mod background;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::loader::{LoaderContext, ModuleLoader};
use crate::{AppError, Result};

/// The hosted application, as seen by the coordinator.
///
/// `start` builds an instance against a fresh loader; `stop` releases it.
/// The coordinator guarantees `start` is never called while a previously
/// started instance has not yet been stopped.
pub trait Lifecycle: Send + Sync + 'static {
    /// Whatever `start` produces: routers, handlers, rendered output.
    type Instance: Send + Sync + 'static;

    /// Build the application from units obtained through `loader`.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the generation being built and surfaces as
    /// `AppError::LifecycleStart`.
    fn start(
        &self,
        loader: Arc<ModuleLoader>,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Instance>> + Send + '_>>;

    /// Tear an instance down. Must not fail.
    fn stop<'a>(
        &'a self,
        instance: &'a Self::Instance,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// One consistent set of loaded units plus the instance built from them.
pub struct Generation<I> {
    id: u64,
    loader: Arc<ModuleLoader>,
    instance: I,
    started_at: DateTime<Utc>,
}

impl<I> Generation<I> {
    /// Monotonic generation number, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Loader that produced this generation's units.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// The hosted application instance.
    #[must_use]
    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// When `Lifecycle::start` completed.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    ShutDown,
}

struct Slot<I> {
    current: Option<Arc<Generation<I>>>,
    phase: Phase,
    background: Option<JoinHandle<()>>,
}

/// Shared access to the current generation for one unit of work.
///
/// Hand it back through [`ReloadCoordinator::end_work`]. Dropping it also
/// releases shared access but skips the background-task check.
pub struct Work<I> {
    _access: OwnedRwLockReadGuard<Slot<I>>,
    generation: Arc<Generation<I>>,
}

impl<I> Work<I> {
    /// The generation serving this unit of work.
    #[must_use]
    pub fn generation(&self) -> &Arc<Generation<I>> {
        &self.generation
    }

    /// Shorthand for `generation().instance()`.
    #[must_use]
    pub fn instance(&self) -> &I {
        &self.generation.instance
    }

    /// Shorthand for `generation().loader()`.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.generation.loader
    }

    fn release(self) -> Arc<Generation<I>> {
        self.generation
    }
}

struct Inner<L: Lifecycle> {
    lifecycle: L,
    context: LoaderContext,
    slot: Arc<RwLock<Slot<L::Instance>>>,
    next_generation: AtomicU64,
    background_running: AtomicBool,
    background_error: Mutex<Option<AppError>>,
    cancel: CancellationToken,
}

impl<L: Lifecycle> Inner<L> {
    async fn set_up(&self) -> Result<Arc<Generation<L::Instance>>> {
        let mut slot = self.slot.write().await;
        if slot.phase == Phase::ShutDown {
            return Err(AppError::ShutDown("reload coordinator is shut down".into()));
        }
        if let Some(current) = slot.current.as_ref() {
            return Ok(Arc::clone(current));
        }

        let id = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::new(ModuleLoader::new(id, self.context.clone()));
        let instance = match self.lifecycle.start(Arc::clone(&loader)).await {
            Ok(instance) => instance,
            Err(err) => {
                loader.close();
                warn!(generation = id, %err, "hosted application failed to start");
                return Err(match err {
                    AppError::LifecycleStart(_) => err,
                    other => AppError::LifecycleStart(format!("generation {id}: {other}")),
                });
            }
        };

        let generation = Arc::new(Generation {
            id,
            loader,
            instance,
            started_at: Utc::now(),
        });
        slot.current = Some(Arc::clone(&generation));
        slot.phase = Phase::Active;
        info!(
            generation = id,
            units = generation.loader.units().len(),
            watching = generation.loader.is_watching_anything(),
            "generation started"
        );
        Ok(generation)
    }

    async fn tear_down(&self) {
        let mut slot = self.slot.write().await;
        let stale = slot
            .current
            .as_ref()
            .is_some_and(|generation| generation.loader.has_changed());
        if !stale {
            return;
        }
        if let Some(generation) = slot.current.take() {
            self.retire(&generation).await;
        }
    }

    /// Stop then close. Callers hold the write lock.
    async fn retire(&self, generation: &Generation<L::Instance>) {
        self.lifecycle.stop(&generation.instance).await;
        generation.loader.close();
        info!(generation = generation.id, "generation retired");
    }

    fn record_background_failure(&self, err: AppError) {
        *self
            .background_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
        self.background_running.store(false, Ordering::Release);
    }
}

impl<L: Lifecycle> Drop for Inner<L> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hosts one generation of application code at a time and swaps it when
/// its sources change.
///
/// Cloning yields another handle onto the same coordinator.
pub struct ReloadCoordinator<L: Lifecycle> {
    inner: Arc<Inner<L>>,
}

impl<L: Lifecycle> Clone for ReloadCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Lifecycle> ReloadCoordinator<L> {
    /// Create an idle coordinator. Nothing is loaded until the first
    /// [`set_up`](Self::set_up) or [`begin_work`](Self::begin_work).
    #[must_use]
    pub fn new(lifecycle: L, context: LoaderContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                lifecycle,
                context,
                slot: Arc::new(RwLock::new(Slot {
                    current: None,
                    phase: Phase::Idle,
                    background: None,
                })),
                next_generation: AtomicU64::new(1),
                background_running: AtomicBool::new(false),
                background_error: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Build a generation unless one already exists, and return the
    /// current one. Concurrent callers other than the first do no work.
    ///
    /// # Errors
    ///
    /// - `AppError::LifecycleStart` if the hosted application fails to start.
    /// - `AppError::ShutDown` after [`shutdown`](Self::shutdown).
    pub async fn set_up(&self) -> Result<Arc<Generation<L::Instance>>> {
        self.inner.set_up().await
    }

    /// Retire the current generation if, and only if, its sources changed.
    pub async fn tear_down(&self) {
        self.inner.tear_down().await;
    }

    /// Acquire shared access to an up-to-date generation.
    ///
    /// Rebuilds first if there is no generation or the current one is
    /// stale, and repeats until a fresh generation is observed while
    /// holding shared access.
    ///
    /// # Errors
    ///
    /// Propagates `set_up` failures; the unit of work fails with them.
    pub async fn begin_work(&self) -> Result<Work<L::Instance>> {
        loop {
            let access = Arc::clone(&self.inner.slot).read_owned().await;
            if access.phase == Phase::ShutDown {
                return Err(AppError::ShutDown("reload coordinator is shut down".into()));
            }
            if let Some(generation) = access
                .current
                .as_ref()
                .filter(|generation| !generation.loader.has_changed())
            {
                let generation = Arc::clone(generation);
                return Ok(Work {
                    _access: access,
                    generation,
                });
            }
            drop(access);

            self.inner.tear_down().await;
            self.inner.set_up().await?;
        }
    }

    /// Release shared access, then make sure a background watcher is
    /// running if the generation just used watches anything.
    pub async fn end_work(&self, work: Work<L::Instance>) {
        let generation = work.release();
        if self.inner.background_running.load(Ordering::Acquire)
            || !generation.loader.is_watching_anything()
        {
            return;
        }

        let mut slot = self.inner.slot.write().await;
        if slot.phase == Phase::ShutDown || self.inner.background_running.load(Ordering::Acquire)
        {
            return;
        }
        self.inner.background_running.store(true, Ordering::Release);
        slot.background = Some(background::spawn(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
        ));
    }

    /// Stop any live generation, cancel the background watcher and refuse
    /// all further work. Safe to call repeatedly or before any set-up.
    pub async fn shutdown(&self) {
        let background = {
            let mut slot = self.inner.slot.write().await;
            slot.phase = Phase::ShutDown;
            if let Some(generation) = slot.current.take() {
                self.inner.retire(&generation).await;
            }
            self.inner.cancel.cancel();
            slot.background.take()
        };

        if let Some(handle) = background {
            if let Err(err) = handle.await {
                warn!(%err, "background reload watcher panicked");
            }
        }
        self.inner.background_running.store(false, Ordering::Release);
        info!("reload coordinator shut down");
    }

    /// The live generation, if any, without rechecking staleness.
    pub async fn current(&self) -> Option<Arc<Generation<L::Instance>>> {
        self.inner.slot.read().await.current.clone()
    }

    /// Whether a background watcher task is currently alive.
    #[must_use]
    pub fn is_background_running(&self) -> bool {
        self.inner.background_running.load(Ordering::Acquire)
    }

    /// The error that last terminated the background watcher, if any.
    #[must_use]
    pub fn last_background_error(&self) -> Option<AppError> {
        self.inner
            .background_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub async fn is_shut_down(&self) -> bool {
        self.inner.slot.read().await.phase == Phase::ShutDown
    }
}
