//! # Mutex & Condition (C2)
//!
//! Thin wrappers around `parking_lot`'s mutex and condvar that add the
//! timed-acquire contract from §4.2: `try_lock_for` returns whether the
//! lock was acquired within the timeout, and `timedwait` returns whether
//! the condition was signalled (as opposed to timing out). `parking_lot`
//! already implements timed locking natively on every platform this crate
//! targets, so there's no spin-wait fallback to write — that fallback was
//! only ever needed for a mutex implementation without native timedlock.

use parking_lot::{Condvar as PlCondvar, Mutex as PlMutex, MutexGuard};
use std::time::Duration;

/// A mutex with a timed-acquire operation.
pub struct TimedMutex<T> {
    inner: PlMutex<T>,
}

impl<T> TimedMutex<T> {
    /// Wraps `value` in a new mutex.
    pub fn new(value: T) -> Self {
        Self {
            inner: PlMutex::new(value),
        }
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Attempts to acquire the lock within `timeout`, returning `None` on
    /// timeout rather than blocking indefinitely.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock_for(timeout)
    }
}

/// A condition variable paired with `TimedMutex`.
#[derive(Default)]
pub struct Condition {
    inner: PlCondvar,
}

impl Condition {
    /// Creates a new condition variable.
    pub fn new() -> Self {
        Self {
            inner: PlCondvar::new(),
        }
    }

    /// Wakes one waiter.
    pub fn signal(&self) {
        self.inner.notify_one();
    }

    /// Wakes all waiters.
    pub fn broadcast(&self) {
        self.inner.notify_all();
    }

    /// Waits until signalled, re-acquiring `guard`'s mutex on return.
    pub fn wait<'a, T>(&self, guard: &mut MutexGuard<'a, T>) {
        self.inner.wait(guard);
    }

    /// Waits until signalled or `timeout` elapses. Returns `true` if the
    /// wait was ended by a signal, `false` if it timed out.
    pub fn timedwait<'a, T>(&self, guard: &mut MutexGuard<'a, T>, timeout: Duration) -> bool {
        let result = self.inner.wait_for(guard, timeout);
        !result.timed_out()
    }
}
