//! Level-triggered change signal shared between a subscription and its loader.
//!
//! The notify callback thread calls [`ChangeSignal::raise`]; request tasks
//! poll it without blocking and the background task awaits it. Closing the
//! signal wakes every waiter so nobody blocks on a retired loader.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Result of [`ChangeSignal::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalWait {
    /// At least one change event has been raised.
    Event,
    /// The signal was closed before any event arrived.
    Closed,
}

/// A sticky "something changed" flag with async wake-ups.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    pending: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
}

impl ChangeSignal {
    /// Create an idle, open signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change event and wake all waiters. Ignored once closed.
    pub fn raise(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.pending.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Non-blocking check for a pending event.
    #[must_use]
    pub fn poll(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until an event is raised or the signal is closed.
    ///
    /// Cancel-safe: dropping the future loses nothing because the pending
    /// flag is level-triggered.
    pub async fn wait(&self) -> SignalWait {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flags so a raise between the
            // check and the await cannot be lost.
            notified.as_mut().enable();

            if self.pending.load(Ordering::Acquire) {
                return SignalWait::Event;
            }
            if self.closed.load(Ordering::Acquire) {
                return SignalWait::Closed;
            }
            notified.await;
        }
    }

    /// Close the signal and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
