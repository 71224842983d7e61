// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing job queues.
//!
//! Per-worker bounded FIFO + global injection queue. Workers steal from
//! each other when idle.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::Job;
use crate::sync::lock;

/// Max jobs in a single worker's local queue before overflow.
pub(crate) const CAPACITY: usize = 1024;

/// Per-worker local queue.
///
/// Owner pops from the front, stealers take from the back. Both paths go
/// through the same mutex.
pub(crate) struct LocalQueue {
    deque: Mutex<VecDeque<Job>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Push a job. Hands it back if the queue is full.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut q = lock(&self.deque);
        if q.len() >= CAPACITY {
            return Err(job);
        }
        q.push_back(job);
        Ok(())
    }

    /// Pop from the front (owner's fast path).
    pub fn pop(&self) -> Option<Job> {
        lock(&self.deque).pop_front()
    }

    /// Steal half the queue from the back, at least one job if any exist.
    pub fn steal_batch(&self) -> Vec<Job> {
        let mut q = lock(&self.deque);
        let count = (q.len() / 2).max(q.len().min(1));
        let mut stolen = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(job) = q.pop_back() {
                stolen.push(job);
            }
        }
        stolen
    }

    pub fn len(&self) -> usize {
        lock(&self.deque).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.deque).is_empty()
    }
}

/// Global injection queue. External submissions and overflow land here.
pub(crate) struct InjectorQueue {
    queue: Mutex<VecDeque<Job>>,
}

impl InjectorQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, job: Job) {
        lock(&self.queue).push_back(job);
    }

    pub fn pop(&self) -> Option<Job> {
        lock(&self.queue).pop_front()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_job(counter: &Arc<AtomicUsize>, value: usize) -> Job {
        let c = counter.clone();
        Box::new(move || {
            c.store(value, Ordering::SeqCst);
        })
    }

    #[test]
    fn local_queue_is_fifo() {
        let seen = Arc::new(AtomicUsize::new(0));
        let q = LocalQueue::new();
        q.push(counting_job(&seen, 1)).ok().unwrap();
        q.push(counting_job(&seen, 2)).ok().unwrap();
        (q.pop().unwrap())();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        (q.pop().unwrap())();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn local_queue_overflow() {
        let seen = Arc::new(AtomicUsize::new(0));
        let q = LocalQueue::new();
        for _ in 0..CAPACITY {
            assert!(q.push(counting_job(&seen, 0)).is_ok());
        }
        assert!(q.push(counting_job(&seen, 0)).is_err());
    }

    #[test]
    fn steal_takes_half_from_the_back() {
        let seen = Arc::new(AtomicUsize::new(0));
        let q = LocalQueue::new();
        for i in 0..10 {
            assert!(q.push(counting_job(&seen, i)).is_ok());
        }
        let stolen = q.steal_batch();
        assert_eq!(stolen.len(), 5);
        assert_eq!(q.len(), 5);
        (stolen.into_iter().next().unwrap())();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn steal_at_least_one() {
        let seen = Arc::new(AtomicUsize::new(0));
        let q = LocalQueue::new();
        assert!(q.steal_batch().is_empty());
        assert!(q.push(counting_job(&seen, 0)).is_ok());
        assert_eq!(q.steal_batch().len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn injector_push_pop() {
        let seen = Arc::new(AtomicUsize::new(0));
        let q = InjectorQueue::new();
        q.push(counting_job(&seen, 1));
        q.push(counting_job(&seen, 2));
        assert_eq!(q.len(), 2);
        assert!(q.pop().is_some());
        assert_eq!(q.len(), 1);
        assert!(!q.is_empty());
    }
}
