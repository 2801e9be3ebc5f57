//! # Deferred Job Queue (C6)
//!
//! A bounded queue of boxed closures run from the main loop, one per
//! `core_loop` call. Mirrors `asc_job_queue`'s fixed-capacity ring: when
//! the queue is full, `push` flushes the whole queue by running every
//! pending job immediately rather than growing unbounded or dropping the
//! new job silently.
//!
//! Jobs are tagged with an opaque `owner` so a module being torn down can
//! prune its own still-pending jobs without running them.

use std::collections::VecDeque;

const JOB_QUEUE_CAPACITY: usize = 256;

/// Opaque identifier used to prune jobs belonging to a module that is
/// being destroyed before its jobs run.
pub type JobOwner = u64;

struct Job {
    owner: JobOwner,
    task: Box<dyn FnOnce() + Send>,
}

/// A fixed-capacity FIFO queue of deferred closures.
pub struct JobQueue {
    jobs: VecDeque<Job>,
    capacity: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Creates an empty queue with the default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(JOB_QUEUE_CAPACITY)
    }

    /// Creates an empty queue with an explicit capacity; mostly useful in
    /// tests that want to exercise the overflow path without queuing 256
    /// jobs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues `task` under `owner`. If the queue is already at capacity,
    /// every pending job is run synchronously (oldest first) before `task`
    /// is queued, so the queue never silently grows or drops work.
    pub fn push(&mut self, owner: JobOwner, task: impl FnOnce() + Send + 'static) {
        if self.jobs.len() >= self.capacity {
            self.drain_all();
        }
        self.jobs.push_back(Job {
            owner,
            task: Box::new(task),
        });
    }

    /// Removes every pending job belonging to `owner` without running
    /// them. Called when a module is destroyed to keep it from firing
    /// callbacks after teardown.
    pub fn prune_owner(&mut self, owner: JobOwner) {
        self.jobs.retain(|job| job.owner != owner);
    }

    /// Runs exactly one pending job, if any. Returns whether a job ran.
    pub fn run_one(&mut self) -> bool {
        match self.jobs.pop_front() {
            Some(job) => {
                (job.task)();
                true
            }
            None => false,
        }
    }

    /// Runs every job currently queued, oldest first. Jobs pushed by a job
    /// while draining are queued for the next call, not run in this pass.
    pub fn drain_all(&mut self) {
        let pending = std::mem::take(&mut self.jobs);
        for job in pending {
            (job.task)();
        }
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the queue has no pending jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn run_one_runs_in_fifo_order() {
        let mut queue = JobQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let o = Arc::clone(&order);
            queue.push(0, move || o.lock().unwrap().push(i));
        }

        while queue.run_one() {}
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn prune_owner_removes_only_matching_jobs() {
        let mut queue = JobQueue::new();
        let count = Arc::new(AtomicU32::new(0));

        let c1 = Arc::clone(&count);
        queue.push(1, move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        queue.push(2, move || {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        queue.prune_owner(1);
        queue.drain_all();

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn push_at_capacity_flushes_existing_jobs() {
        let mut queue = JobQueue::with_capacity(2);
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let c = Arc::clone(&count);
            queue.push(0, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(queue.len(), 2);

        // Queue is full; this push should flush the two pending jobs first.
        let c = Arc::clone(&count);
        queue.push(0, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn empty_queue_run_one_returns_false() {
        let mut queue = JobQueue::new();
        assert!(!queue.run_one());
    }
}
