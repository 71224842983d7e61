// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool contract.
//!
//! Actors and dataflow callbacks only ever *submit* units of work; how many
//! threads run them, and in which order, is the pool's business.
//!
//! Components:
//! - `Pool`        — the submit contract
//! - `thread_pool` — default work-stealing implementation
//! - `scope`       — thread-local "active pool" for nested continuations
//! - `queue`       — local / injector job queues

mod queue;
mod scope;
mod thread_pool;

use std::sync::{Arc, OnceLock};

use crate::config::PoolConfig;
use crate::error::PoolError;

pub use scope::{current, current_or_default, PoolScope};
pub use thread_pool::ThreadPool;

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run submitted units of work asynchronously.
pub trait Pool: Send + Sync {
    /// Queue `job` for execution. Never blocks on the job itself.
    fn submit(&self, job: Job) -> Result<(), PoolError>;
}

impl<P: Pool + ?Sized> Pool for Arc<P> {
    fn submit(&self, job: Job) -> Result<(), PoolError> {
        (**self).submit(job)
    }
}

/// Process-wide pool, created on first use from `PoolConfig::from_env()`.
pub fn default_pool() -> Arc<dyn Pool> {
    static DEFAULT: OnceLock<Arc<ThreadPool>> = OnceLock::new();
    let pool = DEFAULT.get_or_init(|| {
        Arc::new(ThreadPool::with_config(
            PoolConfig::from_env().with_thread_name("weft-default"),
        ))
    });
    pool.clone()
}
