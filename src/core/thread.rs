//! # Auxiliary Thread Supervisor (C5)
//!
//! Spawns worker threads for blocking work (disk I/O, blocking socket
//! connects) that would otherwise stall the single-threaded main loop, and
//! marshals their results back onto the main thread through a
//! [`JobQueue`](crate::core::job::JobQueue) rather than letting the worker
//! touch shared state directly. This mirrors `asc_thread_t`'s split: the
//! worker thread only produces a ring-buffer payload (here, any `T: Send`),
//! and a job posted back to the main loop is what actually calls into
//! module state.

use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::core::job::{JobOwner, JobQueue};

/// Job queue shared between the main loop and auxiliary threads.
///
/// The supervisor never locks this directly from a worker thread; workers
/// only produce values over a channel, and the main loop drains completed
/// workers each tick via [`Supervisor::poll`], posting callbacks to the
/// queue itself.
pub type SharedJobQueue = std::sync::Arc<parking_lot::Mutex<JobQueue>>;

struct Worker<T> {
    owner: JobOwner,
    join: Option<JoinHandle<()>>,
    rx: mpsc::Receiver<T>,
    on_done: Option<Box<dyn FnOnce(T) + Send>>,
}

/// Tracks a set of in-flight auxiliary threads and marshals their
/// completions onto a job queue.
#[derive(Default)]
pub struct Supervisor<T> {
    workers: Vec<Worker<T>>,
}

impl<T: Send + 'static> Supervisor<T> {
    /// Creates an empty supervisor.
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    /// Spawns `work` on a new thread tagged with `owner`. When it
    /// completes, `on_done` is queued onto `queue` rather than run
    /// in-thread.
    pub fn spawn<F, D>(&mut self, owner: JobOwner, work: F, on_done: D)
    where
        F: FnOnce() -> T + Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let join = std::thread::spawn(move || {
            let _ = tx.send(work());
        });

        self.workers.push(Worker {
            owner,
            join: Some(join),
            rx,
            on_done: Some(Box::new(on_done)),
        });
    }

    /// Checks every in-flight worker for a completed result and queues its
    /// callback. Finished workers are removed from the tracked set. Should
    /// be called once per main-loop iteration.
    pub fn poll(&mut self, queue: &mut JobQueue) {
        let mut finished_indices = Vec::new();

        for (i, worker) in self.workers.iter_mut().enumerate() {
            if let Ok(result) = worker.rx.try_recv() {
                if let Some(on_done) = worker.on_done.take() {
                    queue.push(worker.owner, move || on_done(result));
                }
                finished_indices.push(i);
            }
        }

        for i in finished_indices.into_iter().rev() {
            let worker = self.workers.remove(i);
            if let Some(join) = worker.join {
                let _ = join.join();
            }
        }
    }

    /// Drops (without running) the completion callback for every worker
    /// owned by `owner`. The underlying OS thread is still joined so it
    /// doesn't leak, but its result is discarded.
    pub fn cancel_owner(&mut self, owner: JobOwner) {
        self.workers.retain_mut(|worker| {
            if worker.owner == owner {
                worker.on_done = None;
                if let Some(join) = worker.join.take() {
                    let _ = join.join();
                }
                false
            } else {
                true
            }
        });
    }

    /// Number of workers still in flight.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether there are no in-flight workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn poll_marshals_result_into_job_queue() {
        let mut supervisor: Supervisor<u32> = Supervisor::new();
        let mut queue = JobQueue::new();

        supervisor.spawn(
            1,
            || {
                thread::sleep(Duration::from_millis(5));
                42
            },
            |value| assert_eq!(value, 42),
        );

        // Wait for the worker to actually finish before polling, since
        // poll() doesn't block.
        thread::sleep(Duration::from_millis(30));
        supervisor.poll(&mut queue);

        assert_eq!(supervisor.len(), 0);
        assert_eq!(queue.len(), 1);
        assert!(queue.run_one());
    }

    #[test]
    fn cancel_owner_discards_callback_without_running_it() {
        let mut supervisor: Supervisor<u32> = Supervisor::new();

        supervisor.spawn(
            7,
            || {
                thread::sleep(Duration::from_millis(5));
                1
            },
            |_| panic!("callback should never run after cancel"),
        );

        supervisor.cancel_owner(7);
        assert_eq!(supervisor.len(), 0);
    }
}
