//! # Event Multiplexer (C3)
//!
//! A registry of file descriptors with readiness callbacks, expressed over
//! `tokio::io::unix::AsyncFd` instead of a hand-rolled epoll wrapper. The
//! original multiplexer exposes `event_add`/`event_set_on_read`/
//! `event_set_on_write`/`event_set_on_error`/`event_close` plus a blocking
//! `core_loop`; this module keeps that exact surface so callers (the
//! child-process and graph-source modules) don't need to know the
//! multiplexer is backed by a reactor rather than a raw `poll()` call.
//!
//! `core_loop` drives every registered descriptor concurrently with
//! `futures::future::select_all` and a bounding sleep, which is the async
//! equivalent of a single `poll(2)` call with a timeout: one pass, then
//! control returns to the caller (normally the main loop, which also has
//! to service the timer wheel and job queue).

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::time::Duration;

use futures::future::{select_all, FutureExt};
use tokio::io::unix::AsyncFd;

use crate::error::{EngineError, Result};

/// Which readiness states a registration currently callbacks for.
#[derive(Debug, Default, Clone, Copy)]
struct Interest {
    read: bool,
    write: bool,
}

struct FdSource(RawFd);

impl std::os::unix::io::AsRawFd for FdSource {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct Registration {
    async_fd: AsyncFd<FdSource>,
    interest: Interest,
    on_read: Option<Box<dyn FnMut() + Send>>,
    on_write: Option<Box<dyn FnMut() + Send>>,
    on_error: Option<Box<dyn FnMut() + Send>>,
}

/// Registry of file descriptors and their readiness callbacks.
///
/// Mirrors `asc_socket`/`asc_event`'s add/set/close contract. All state
/// lives on the thread that owns the `EventLoop`; there is no internal
/// locking, matching the "module graph touched only from the main thread"
/// invariant the rest of the engine relies on.
#[derive(Default)]
pub struct EventLoop {
    registrations: HashMap<RawFd, Registration>,
}

impl EventLoop {
    /// Creates an empty event loop.
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Registers `fd` with the loop. The descriptor must be non-blocking;
    /// callers get one registration per descriptor — a second `event_add`
    /// for the same `fd` replaces the first.
    pub fn event_add(&mut self, fd: RawFd) -> Result<()> {
        let async_fd = AsyncFd::new(FdSource(fd)).map_err(EngineError::Io)?;

        self.registrations.insert(
            fd,
            Registration {
                async_fd,
                interest: Interest::default(),
                on_read: None,
                on_write: None,
                on_error: None,
            },
        );
        Ok(())
    }

    /// Sets (or clears, with `None`) the read-readiness callback for `fd`.
    pub fn event_set_on_read(&mut self, fd: RawFd, callback: Option<Box<dyn FnMut() + Send>>) {
        if let Some(reg) = self.registrations.get_mut(&fd) {
            reg.interest.read = callback.is_some();
            reg.on_read = callback;
        }
    }

    /// Sets (or clears, with `None`) the write-readiness callback for `fd`.
    pub fn event_set_on_write(&mut self, fd: RawFd, callback: Option<Box<dyn FnMut() + Send>>) {
        if let Some(reg) = self.registrations.get_mut(&fd) {
            reg.interest.write = callback.is_some();
            reg.on_write = callback;
        }
    }

    /// Sets (or clears, with `None`) the error callback for `fd`. Errors are
    /// detected as a readable descriptor that then fails to read/write, so
    /// this callback is invoked by the owning module, not by the loop
    /// itself — the loop has no way to distinguish a clean EOF from an
    /// error at the descriptor level alone.
    pub fn event_set_on_error(&mut self, fd: RawFd, callback: Option<Box<dyn FnMut() + Send>>) {
        if let Some(reg) = self.registrations.get_mut(&fd) {
            reg.on_error = callback;
        }
    }

    /// Removes `fd` from the loop. Any pending callbacks are dropped
    /// without being invoked.
    pub fn event_close(&mut self, fd: RawFd) {
        self.registrations.remove(&fd);
    }

    /// Whether `fd` is currently registered.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.registrations.contains_key(&fd)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no descriptors are registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Runs one pass: waits up to `timeout` for any registered descriptor
    /// to become ready, invoking the corresponding callback for every
    /// descriptor that is ready — not just the first. Returns immediately
    /// (without waiting the full timeout) as soon as at least one
    /// descriptor fires; any other descriptor that's *also* immediately
    /// ready at that point is serviced in the same pass, rather than
    /// losing the `select_all` race and waiting for the next `core_loop`
    /// call. A descriptor that isn't ready yet stays pending and is
    /// retried on the next call.
    ///
    /// A descriptor with no read or write interest registered is skipped
    /// entirely, the same way `asc_event` only polls for interests that
    /// have a callback attached.
    pub async fn core_loop(&mut self, timeout: Duration) {
        if self.registrations.is_empty() {
            tokio::time::sleep(timeout).await;
            return;
        }

        let mut futs: Vec<Pin<Box<dyn std::future::Future<Output = RawFd> + Send + '_>>> = Vec::new();

        for (&fd, reg) in self.registrations.iter() {
            if !reg.interest.read && !reg.interest.write {
                continue;
            }
            futs.push(Box::pin(async move {
                if reg.interest.read && reg.interest.write {
                    tokio::select! {
                        _ = wait_readable(&reg.async_fd) => {},
                        _ = wait_writable(&reg.async_fd) => {},
                    }
                } else if reg.interest.read {
                    wait_readable(&reg.async_fd).await;
                } else {
                    wait_writable(&reg.async_fd).await;
                }
                fd
            }));
        }

        if futs.is_empty() {
            tokio::time::sleep(timeout).await;
            return;
        }

        // The winner of `select_all` tells us at least one descriptor is
        // ready; `rest` holds every other still-pending future from the
        // same snapshot. A descriptor that became ready in the same
        // instant resolves immediately under `now_or_never`, so this
        // drains every descriptor ready *right now* rather than only the
        // one that happened to win the race.
        let ready_fds: Vec<RawFd> = tokio::select! {
            (fd, _idx, rest) = select_all(futs) => {
                let mut ready = vec![fd];
                for fut in rest {
                    if let Some(other_fd) = fut.now_or_never() {
                        ready.push(other_fd);
                    }
                }
                ready
            },
            _ = tokio::time::sleep(timeout) => Vec::new(),
        };

        for fd in ready_fds {
            if let Some(reg) = self.registrations.get_mut(&fd) {
                if reg.interest.read {
                    if let Some(cb) = reg.on_read.as_mut() {
                        cb();
                    }
                }
                if reg.interest.write {
                    if let Some(cb) = reg.on_write.as_mut() {
                        cb();
                    }
                }
            }
        }
    }
}

async fn wait_readable(async_fd: &AsyncFd<FdSource>) {
    if let Ok(mut guard) = async_fd.readable().await {
        guard.clear_ready();
    }
}

async fn wait_writable(async_fd: &AsyncFd<FdSource>) {
    if let Ok(mut guard) = async_fd.writable().await {
        guard.clear_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn add_and_close_tracks_registration() {
        let mut ev = EventLoop::new();
        let (r, w) = nonblocking_pipe();
        let fd = r.as_raw_fd();

        ev.event_add(fd).unwrap();
        assert!(ev.contains(fd));

        ev.event_close(fd);
        assert!(!ev.contains(fd));
        drop(w);
    }

    #[tokio::test]
    async fn core_loop_fires_read_callback() {
        let mut ev = EventLoop::new();
        let (r, mut w) = nonblocking_pipe();
        let fd = r.as_raw_fd();

        ev.event_add(fd).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        ev.event_set_on_read(fd, Some(Box::new(move || {
            f.store(true, Ordering::SeqCst);
        })));

        use std::io::Write;
        w.write_all(b"x").unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), ev.core_loop(Duration::from_millis(500)))
            .await
            .unwrap();

        assert!(fired.load(Ordering::SeqCst));
        let _ = r;
    }

    #[tokio::test]
    async fn core_loop_services_every_simultaneously_ready_descriptor() {
        let mut ev = EventLoop::new();
        let (r1, mut w1) = nonblocking_pipe();
        let (r2, mut w2) = nonblocking_pipe();
        let fd1 = r1.as_raw_fd();
        let fd2 = r2.as_raw_fd();

        ev.event_add(fd1).unwrap();
        ev.event_add(fd2).unwrap();

        let fired1 = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::new(AtomicBool::new(false));
        let f1 = Arc::clone(&fired1);
        let f2 = Arc::clone(&fired2);
        ev.event_set_on_read(fd1, Some(Box::new(move || {
            f1.store(true, Ordering::SeqCst);
        })));
        ev.event_set_on_read(fd2, Some(Box::new(move || {
            f2.store(true, Ordering::SeqCst);
        })));

        use std::io::Write;
        w1.write_all(b"x").unwrap();
        w2.write_all(b"y").unwrap();

        // Give the kernel a moment to mark both descriptors readable
        // before the pass starts, so both are ready at the same instant.
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(std::time::Duration::from_secs(1), ev.core_loop(Duration::from_millis(500)))
            .await
            .unwrap();

        assert!(fired1.load(Ordering::SeqCst), "first descriptor should have been serviced");
        assert!(fired2.load(Ordering::SeqCst), "second descriptor should have been serviced in the same pass, not dropped by losing the select race");
        let _ = (r1, r2);
    }

    fn nonblocking_pipe() -> (std::fs::File, std::fs::File) {
        use std::os::unix::io::FromRawFd;
        let mut fds = [0i32; 2];
        unsafe {
            libc::pipe(fds.as_mut_ptr());
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fds[1], libc::F_SETFL, libc::O_NONBLOCK);
            (std::fs::File::from_raw_fd(fds[0]), std::fs::File::from_raw_fd(fds[1]))
        }
    }
}
