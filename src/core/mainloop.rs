//! # Main Loop (C8)
//!
//! Composes the event multiplexer, timer wheel, deferred job queue, and
//! wake-up pipe into the single cooperative loop the rest of the engine
//! runs inside. Also owns signal handling: `SIGHUP` triggers a
//! [`HostEnv::on_sighup`] callback (config/log reopen), `SIGINT`/`SIGTERM`
//! begin a graceful shutdown, and a third shutdown signal escalates to an
//! immediate `process::exit(3)` — the same three-strike ladder the
//! original main loop uses so an operator who sends `^C` three times
//! doesn't get stuck waiting on a wedged module.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use crate::config::HostEnv;
use crate::core::event::EventLoop;
use crate::core::job::JobQueue;
use crate::core::timer::TimerWheel;
use crate::core::wake::WakeUp;

const GC_TICK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_STRIKE_LIMIT: u32 = 3;

/// Reason the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A module requested shutdown via [`MainLoop::request_shutdown`].
    Requested,
    /// `SIGINT` or `SIGTERM` was received.
    Signal,
}

/// Shared shutdown/reload signal state, safe to clone into signal-handling
/// tasks.
#[derive(Clone)]
struct SignalState {
    shutdown_strikes: Arc<AtomicU32>,
    sighup_pending: Arc<std::sync::atomic::AtomicBool>,
}

impl SignalState {
    fn new() -> Self {
        Self {
            shutdown_strikes: Arc::new(AtomicU32::new(0)),
            sighup_pending: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

/// The cooperative main loop: owns the event multiplexer, timer wheel, job
/// queue, and wake-up handle, and drives them from a single async task.
pub struct MainLoop {
    events: EventLoop,
    timers: TimerWheel,
    jobs: JobQueue,
    wake: WakeUp,
    host: Box<dyn HostEnv>,
    signals: SignalState,
    last_gc: Instant,
    running: bool,
}

impl MainLoop {
    /// Creates a new main loop with an empty event registry, timer wheel,
    /// and job queue, driven by `host`'s lifecycle hooks.
    pub fn new(host: Box<dyn HostEnv>) -> Self {
        Self {
            events: EventLoop::new(),
            timers: TimerWheel::new(),
            jobs: JobQueue::new(),
            wake: WakeUp::new(),
            host,
            signals: SignalState::new(),
            last_gc: Instant::now(),
            running: true,
        }
    }

    /// Returns a handle that can be used to wake this loop from another
    /// thread or task.
    pub fn wake_handle(&self) -> WakeUp {
        self.wake.clone()
    }

    /// Mutable access to the event registry, for modules that register
    /// file descriptors during setup.
    pub fn events_mut(&mut self) -> &mut EventLoop {
        &mut self.events
    }

    /// Mutable access to the timer wheel.
    pub fn timers_mut(&mut self) -> &mut TimerWheel {
        &mut self.timers
    }

    /// Mutable access to the deferred job queue.
    pub fn jobs_mut(&mut self) -> &mut JobQueue {
        &mut self.jobs
    }

    /// Requests a graceful shutdown at the next loop iteration.
    pub fn request_shutdown(&mut self) {
        self.running = false;
    }

    /// Runs the loop until a shutdown is requested, `SIGINT`/`SIGTERM` is
    /// received, or the third shutdown signal forces an immediate exit.
    pub async fn run(&mut self) -> StopReason {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        let mut stop_reason = StopReason::Requested;

        while self.running {
            tokio::select! {
                biased;

                _ = sigint.recv() => {
                    if self.strike_shutdown() {
                        stop_reason = StopReason::Signal;
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    if self.strike_shutdown() {
                        stop_reason = StopReason::Signal;
                        break;
                    }
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    crate::config::EngineDefaults::reload();
                    self.host.on_sighup();
                }
                _ = self.wake.wait() => {}
                _ = self.events.core_loop(Duration::from_millis(self.timers.core_loop())) => {}
            }

            self.jobs.drain_all();
            self.maybe_gc_tick();
        }

        stop_reason
    }

    /// Registers a shutdown signal and returns whether the strike count has
    /// reached the escalation limit. On the third strike, exits the
    /// process immediately with code 3 rather than returning, matching the
    /// original's `_exit(EX_SOFTWARE)` shutdown-stuck escape hatch.
    fn strike_shutdown(&mut self) -> bool {
        let strikes = self.signals.shutdown_strikes.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("shutdown signal received ({}/{})", strikes, SHUTDOWN_STRIKE_LIMIT);

        if strikes >= SHUTDOWN_STRIKE_LIMIT {
            warn!("shutdown did not complete after {} signals, forcing exit", SHUTDOWN_STRIKE_LIMIT);
            std::process::exit(3);
        }

        self.running = false;
        true
    }

    fn maybe_gc_tick(&mut self) {
        if self.last_gc.elapsed() >= GC_TICK_INTERVAL {
            self.host.gc_tick();
            self.last_gc = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NullHost;

    #[test]
    fn request_shutdown_clears_running_flag() {
        let mut main_loop = MainLoop::new(Box::new(NullHost));
        assert!(main_loop.running);
        main_loop.request_shutdown();
        assert!(!main_loop.running);
    }

    #[test]
    fn strike_shutdown_counts_up_to_the_limit() {
        let mut main_loop = MainLoop::new(Box::new(NullHost));
        assert!(main_loop.strike_shutdown());
        assert_eq!(main_loop.signals.shutdown_strikes.load(Ordering::SeqCst), 1);
        assert!(!main_loop.running);
        // The third strike calls process::exit(3) rather than returning,
        // so it isn't exercised here.
    }

    #[test]
    fn gc_tick_is_not_invoked_before_the_interval_elapses() {
        struct CountingHost(Arc<AtomicU32>);
        impl HostEnv for CountingHost {
            fn on_sighup(&mut self) {}
            fn gc_tick(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let mut main_loop = MainLoop::new(Box::new(CountingHost(Arc::clone(&count))));
        main_loop.maybe_gc_tick();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
