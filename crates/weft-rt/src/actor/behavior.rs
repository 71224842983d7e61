// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Actor bodies and continuation steps.
//!
//! A unit of work never blocks waiting for its own continuation. It returns
//! a [`Step`] describing what to run next, and the runtime schedules that as
//! a fresh unit on the pool, so no call stack grows across iterations.

use std::time::Duration;

use super::context::ActorContext;
use crate::error::ActorError;

/// Result of one unit of work.
pub type ActResult<B> = Result<Step<B>, ActorError>;

/// Body re-run by `Step::Loop`, one unit of work per iteration.
pub type LoopBody<B> = Box<dyn FnMut(&mut B, &mut ActorContext<B>) -> ActResult<B> + Send>;

type ReactHandler<B> = Box<
    dyn FnOnce(&mut B, &mut ActorContext<B>, Vec<Option<<B as Behavior>::Message>>) -> ActResult<B>
        + Send,
>;

/// The body of an actor plus its lifecycle hooks.
///
/// Hooks run inside the actor's own units of work, never concurrently with
/// `act` or with each other.
pub trait Behavior: Sized + Send + 'static {
    type Message: Send + 'static;

    /// First unit of work after `start`.
    fn act(&mut self, ctx: &mut ActorContext<Self>) -> ActResult<Self>;

    /// Runs before `act`.
    fn after_start(&mut self, _ctx: &mut ActorContext<Self>) {}

    /// Runs once the actor is stopped, with every message still queued.
    fn after_stop(&mut self, _undelivered: Vec<Self::Message>) {}

    /// A blocking wait was interrupted. The actor stops afterwards.
    fn on_interrupt(&mut self, _error: &ActorError) {}

    /// A timed receive expired.
    fn on_timeout(&mut self) {}

    /// A unit of work failed. Returning `Ok` keeps the actor alive (it
    /// carries on as if the unit had returned `Step::Done`); returning an
    /// error stops it. The default stops.
    fn on_exception(&mut self, error: ActorError) -> Result<(), ActorError> {
        Err(error)
    }
}

/// What the actor does after the current unit of work.
pub enum Step<B: Behavior> {
    /// Nothing more; inside a loop, run the next iteration.
    Done,
    /// Run the body repeatedly until the actor is stopped.
    Loop(LoopBody<B>),
    /// Release the pool thread until enough messages (or a timeout) arrive.
    React(Reaction<B>),
}

/// A pending message handler with a fixed arity.
pub struct Reaction<B: Behavior> {
    pub(crate) arity: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) handler: ReactHandler<B>,
}

impl<B: Behavior> Reaction<B> {
    /// Messages to wait for. Arity 0 still consumes one message.
    pub(crate) fn needed(&self) -> usize {
        self.arity.max(1)
    }
}

impl<B: Behavior> Step<B> {
    pub fn looping<F>(body: F) -> Self
    where
        F: FnMut(&mut B, &mut ActorContext<B>) -> ActResult<B> + Send + 'static,
    {
        Step::Loop(Box::new(body))
    }

    /// Handle the next message.
    pub fn react<F>(handler: F) -> Self
    where
        F: FnOnce(&mut B, &mut ActorContext<B>, B::Message) -> ActResult<B> + Send + 'static,
    {
        Self::reaction(1, None, move |b, ctx, mut slots| match slots.pop() {
            Some(Some(message)) => handler(b, ctx, message),
            _ => Err(ActorError::IllegalState("reaction resumed without a message")),
        })
    }

    /// Handle the next message, or `None` if none arrives within `timeout`.
    pub fn react_timeout<F>(timeout: Duration, handler: F) -> Self
    where
        F: FnOnce(&mut B, &mut ActorContext<B>, Option<B::Message>) -> ActResult<B>
            + Send
            + 'static,
    {
        Self::reaction(1, Some(timeout), move |b, ctx, mut slots| {
            handler(b, ctx, slots.pop().flatten())
        })
    }

    /// Handle the next `n` messages at once. With `n == 0` one message is
    /// consumed and discarded.
    pub fn react_n<F>(n: usize, handler: F) -> Self
    where
        F: FnOnce(&mut B, &mut ActorContext<B>, Vec<B::Message>) -> ActResult<B> + Send + 'static,
    {
        Self::reaction(n, None, move |b, ctx, slots| {
            handler(b, ctx, slots.into_iter().flatten().collect())
        })
    }

    /// Like `react_n`, but after `timeout` the missing slots are `None`.
    pub fn react_n_timeout<F>(n: usize, timeout: Duration, handler: F) -> Self
    where
        F: FnOnce(&mut B, &mut ActorContext<B>, Vec<Option<B::Message>>) -> ActResult<B>
            + Send
            + 'static,
    {
        Self::reaction(n, Some(timeout), handler)
    }

    fn reaction<F>(arity: usize, timeout: Option<Duration>, handler: F) -> Self
    where
        F: FnOnce(&mut B, &mut ActorContext<B>, Vec<Option<B::Message>>) -> ActResult<B>
            + Send
            + 'static,
    {
        Step::React(Reaction {
            arity,
            timeout,
            handler: Box::new(handler),
        })
    }
}

impl<B: Behavior> std::fmt::Debug for Step<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Done => f.write_str("Done"),
            Step::Loop(_) => f.write_str("Loop(..)"),
            Step::React(r) => f
                .debug_struct("React")
                .field("arity", &r.arity)
                .field("timeout", &r.timeout)
                .finish(),
        }
    }
}
