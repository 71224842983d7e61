// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing thread pool.
//!
//! N worker threads each own a local queue. Jobs submitted from a worker go
//! to its local queue; everything else goes to the global injector. Idle
//! workers steal from a random peer, then the injector, then sleep on a
//! condvar.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::queue::{InjectorQueue, LocalQueue};
use super::{Job, Pool};
use crate::config::PoolConfig;
use crate::error::{panic_message, PoolError};
use crate::interrupt;
use crate::sync::{lock, wait_timeout};

/// Source of pool identities, so a worker can tell whether a submission
/// comes from its own pool.
static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (pool id, worker index) for pool worker threads.
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// How long an idle worker sleeps before re-checking for steals / shutdown.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Fixed-size pool of worker threads executing submitted jobs.
pub struct ThreadPool {
    /// Worker handles for join-on-shutdown.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<SharedState>,
}

/// State shared between workers and submitters.
struct SharedState {
    id: usize,
    /// Per-worker local queues. Index = worker id.
    local_queues: Vec<LocalQueue>,
    /// Overflow / external submission queue.
    global_queue: InjectorQueue,
    shutdown: AtomicBool,
    worker_count: usize,
    /// Notify idle workers that new work is available.
    work_available: (Mutex<bool>, Condvar),
}

impl ThreadPool {
    /// Start a pool with `n` workers; 0 means one per CPU.
    pub fn new(n: usize) -> Self {
        Self::with_config(PoolConfig::new().with_workers(n))
    }

    pub fn with_config(config: PoolConfig) -> Self {
        let worker_count = config.resolved_workers();
        let shared = Arc::new(SharedState {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            local_queues: (0..worker_count).map(|_| LocalQueue::new()).collect(),
            global_queue: InjectorQueue::new(),
            shutdown: AtomicBool::new(false),
            worker_count,
            work_available: (Mutex::new(false), Condvar::new()),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || worker_loop(index, &shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(worker = index, error = %e, "failed to spawn worker"),
            }
        }
        tracing::debug!(pool = shared.id, workers = handles.len(), "thread pool started");

        Self {
            workers: Mutex::new(handles),
            shared,
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Jobs waiting in the queues, not counting ones already running.
    pub fn queued_jobs(&self) -> usize {
        self.shared.global_queue.len()
            + self.shared.local_queues.iter().map(LocalQueue::len).sum::<usize>()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let workers drain what is queued, and join them.
    ///
    /// Called from one of this pool's own workers, that worker is not joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.notify_all();

        let me = thread::current().id();
        let mut workers = lock(&self.workers);
        for handle in workers.drain(..) {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
        tracing::debug!(pool = self.shared.id, "thread pool shut down");
    }
}

impl Pool for ThreadPool {
    fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::trace!(pool = self.shared.id, "rejected job after shutdown");
            return Err(PoolError::Shutdown);
        }

        let local = WORKER.with(Cell::get).and_then(|(pool, index)| {
            (pool == self.shared.id).then_some(index)
        });
        match local {
            Some(index) => {
                if let Err(job) = self.shared.local_queues[index].push(job) {
                    self.shared.global_queue.push(job);
                }
            }
            None => self.shared.global_queue.push(job),
        }
        self.shared.notify_one();
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.worker_count)
            .field("queued", &self.queued_jobs())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl SharedState {
    fn notify_one(&self) {
        let (lock_, cvar) = &self.work_available;
        *lock(lock_) = true;
        cvar.notify_one();
    }

    fn notify_all(&self) {
        let (lock_, cvar) = &self.work_available;
        *lock(lock_) = true;
        cvar.notify_all();
    }

    fn has_queued_work(&self, index: usize) -> bool {
        !self.global_queue.is_empty() || !self.local_queues[index].is_empty()
    }
}

/// Simple xorshift64 for random victim selection.
fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn worker_loop(index: usize, shared: &SharedState) {
    WORKER.with(|w| w.set(Some((shared.id, index))));
    let local = &shared.local_queues[index];
    let mut rng = (index as u64).wrapping_add(0x9E3779B97F4A7C15);

    loop {
        // 1. Local queue.
        if let Some(job) = local.pop() {
            run_job(job);
            continue;
        }

        // 2. Steal from a random victim.
        if shared.worker_count > 1 {
            let victim = (xorshift64(&mut rng) as usize) % shared.worker_count;
            if victim != index {
                let mut stolen = shared.local_queues[victim].steal_batch().into_iter();
                if let Some(first) = stolen.next() {
                    for job in stolen {
                        if let Err(job) = local.push(job) {
                            shared.global_queue.push(job);
                        }
                    }
                    run_job(first);
                    continue;
                }
            }
        }

        // 3. Global queue.
        if let Some(job) = shared.global_queue.pop() {
            run_job(job);
            continue;
        }

        // 4. Exit once shut down and drained.
        if shared.shutdown.load(Ordering::Acquire) {
            while let Some(job) = local.pop().or_else(|| shared.global_queue.pop()) {
                run_job(job);
            }
            break;
        }

        // 5. Sleep until new work arrives.
        let (lock_, cvar) = &shared.work_available;
        let mut ready = lock(lock_);
        if shared.has_queued_work(index) || shared.shutdown.load(Ordering::Acquire) {
            continue;
        }
        ready = wait_timeout(cvar, ready, IDLE_WAIT);
        *ready = false;
    }
    WORKER.with(|w| w.set(None));
}

/// Run one job. Panics are logged and swallowed so the worker survives.
fn run_job(job: Job) {
    interrupt::clear();
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        tracing::warn!(panic = %panic_message(payload), "job panicked");
    }
}
