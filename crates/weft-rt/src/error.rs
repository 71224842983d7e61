// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.
//!
//! Timeouts are not errors: timed operations return `Ok(None)`.

use thiserror::Error;

/// Errors raised by dataflow variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataflowError {
    /// A second, conflicting bind.
    #[error("a dataflow variable can only be bound once; only re-binding an equal value is allowed")]
    AlreadyBound,

    /// The waiting thread was interrupted before the variable was bound.
    #[error("interrupted while waiting for a dataflow variable")]
    Interrupted,

    /// An asynchronous read was registered without a callback.
    #[error("asynchronous read requires a callback")]
    MissingCallback,
}

/// Errors raised by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool is shutting down and no longer accepts work.
    #[error("worker pool is shut down")]
    Shutdown,
}

/// Errors raised by actors and their units of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorError {
    /// Operation not allowed in the actor's current lifecycle state.
    #[error("illegal actor state: {0}")]
    IllegalState(&'static str),

    /// A blocking receive was interrupted.
    #[error("interrupted while waiting for a message")]
    Interrupted,

    /// A blocking receive was cut short because the actor is stopping.
    #[error("actor is terminating")]
    Terminated,

    /// `reply` was called but the current message has no sender.
    #[error("cannot reply: the current message has no sender")]
    NoSender,

    /// `reply` was called but the sender has already stopped.
    #[error("cannot reply: the sender is no longer running")]
    SenderStopped,

    /// A unit of work panicked.
    #[error("unit of work panicked: {0}")]
    Panicked(String),

    /// A fault raised by the actor body.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Dataflow(#[from] DataflowError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ActorError {
    /// Build a body fault from any displayable error.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        ActorError::Failed(msg.to_string())
    }

    /// True for faults caused by thread interruption.
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            ActorError::Interrupted | ActorError::Dataflow(DataflowError::Interrupted)
        )
    }
}

/// Render a caught panic payload as a message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
