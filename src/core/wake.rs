//! # Wake-Up Pipe (C7)
//!
//! Cross-thread notification so an auxiliary thread (or a signal handler)
//! can interrupt the main loop's sleep without waiting for the next timer
//! tick. The original implementation is a self-pipe: a loopback socket pair
//! registered with the event multiplexer, written to from any thread,
//! drained on the main thread. `tokio::sync::Notify` gives the same
//! single-slot, coalescing wake-up semantics (multiple `notify()` calls
//! before a `notified().await` collapse into one wake) without needing an
//! actual file descriptor pair, so it replaces the self-pipe here.

use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable handle that can wake a waiting main loop from any thread.
#[derive(Clone, Default)]
pub struct WakeUp {
    notify: Arc<Notify>,
}

impl WakeUp {
    /// Creates a new wake-up handle.
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wakes one pending (or future) waiter. Safe to call from any thread,
    /// including from within a Unix signal handler's async-signal-safe
    /// deferral path (a flag set there should still go through a normal
    /// context before calling this, since `Notify` itself isn't
    /// signal-safe).
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Waits until [`WakeUp::notify`] is called. If a notification already
    /// arrived since the last wait, returns immediately.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
