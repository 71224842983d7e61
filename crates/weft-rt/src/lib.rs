// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Weft runtime: dataflow variables and pooled actors.
//!
//! Both primitives run on a shared worker pool. A blocked dataflow read
//! parks the calling thread; an asynchronous read or a waiting actor holds
//! no thread at all and is resumed by submitting a unit of work.
//!
//! Components:
//! - dataflow — write-once variables, lock-free wait stack, callbacks
//! - actor — mailbox actors scheduled as continuations on the pool
//! - pool — submit contract and the default work-stealing pool
//! - interrupt — cooperative thread interruption for blocking waits
//! - timer — deadline callbacks for timed reactions
//! - config — pool settings from code or the environment

pub mod actor;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod interrupt;
pub mod pool;
mod sync;
pub mod timer;

pub use actor::{ActResult, Actor, ActorContext, ActorId, ActorRef, ActorState, Behavior, Step};
pub use config::PoolConfig;
pub use dataflow::{
    transform_all, Attached, DataflowReadChannel, DataflowVariable, MessageStream, VariableId,
};
pub use error::{ActorError, DataflowError, PoolError};
pub use pool::{default_pool, Pool, PoolScope, ThreadPool};
