//! # Clock & Sleep (C1)
//!
//! Monotonic microsecond timestamps and sub-second sleeps. Everything in
//! the timer wheel and main loop is built on `now_us()`; it must never go
//! backwards, which is why this wraps `std::time::Instant` rather than a
//! wall-clock source.

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Returns a monotonically increasing microsecond timestamp.
///
/// The origin is arbitrary (process start) — only differences between two
/// calls are meaningful.
pub fn now_us() -> u64 {
    epoch().elapsed().as_micros() as u64
}

/// Blocks the calling thread for at least `us` microseconds.
///
/// Unlike a bare `thread::sleep`, this restarts after spurious early
/// wake-ups by checking the elapsed time against a deadline.
pub fn sleep_us(us: u64) {
    let deadline = Instant::now() + Duration::from_micros(us);
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline - now);
    }
}

/// Returns a wall-clock deadline `ms` milliseconds in the future, suitable
/// for timed waits on a condition variable.
pub fn realtime_plus(ms: u64) -> SystemTime {
    SystemTime::now() + Duration::from_millis(ms)
}

/// Microseconds elapsed since the Unix epoch, for log timestamps and
/// interop with wall-clock-based protocols.
pub fn unix_time_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
