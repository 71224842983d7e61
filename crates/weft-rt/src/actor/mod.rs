// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pooled actors.
//!
//! An actor owns a mailbox and a [`Behavior`]. It never owns a thread: each
//! slice of its execution is a unit of work on a shared pool, and waiting
//! for messages via [`Step::React`] or [`Step::Loop`] releases the pool
//! thread between slices.
//!
//! Components:
//! - `behavior`  — the `Behavior` trait and `Step` continuations
//! - `context`   — receive / reply / send from inside a unit of work
//! - `handle`    — `Actor`, the owning handle
//! - `mailbox`   — FIFO queue with a parkable consumer
//! - `message`   — messages, `ActorRef`, `ActorId`
//! - `scheduler` — exclusivity token, scheduling, lifecycle

mod behavior;
mod context;
mod handle;
mod mailbox;
mod message;
mod scheduler;

pub use behavior::{ActResult, Behavior, LoopBody, Reaction, Step};
pub use context::ActorContext;
pub use handle::Actor;
pub use message::{ActorId, ActorRef, ActorState};
