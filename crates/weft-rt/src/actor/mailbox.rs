// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Actor mailbox: unbounded FIFO, many producers, one consumer.
//!
//! A blocked consumer parks its thread rather than waiting on a condvar, so
//! a thread interrupt wakes it as well as a new message does.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread::{self, Thread};
use std::time::Instant;

use super::message::ActorMessage;
use crate::interrupt;
use crate::sync::lock;

/// Outcome of a blocking take.
pub(crate) enum Taken<M> {
    Message(ActorMessage<M>),
    TimedOut,
    Interrupted,
    Closed,
}

struct Queue<M> {
    messages: VecDeque<ActorMessage<M>>,
    closed: bool,
}

pub(crate) struct Mailbox<M> {
    queue: Mutex<Queue<M>>,
    /// Thread currently blocked in `take`, if any.
    consumer: Mutex<Option<Thread>>,
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                messages: VecDeque::new(),
                closed: false,
            }),
            consumer: Mutex::new(None),
        }
    }

    /// Append `message`; hands it back if the mailbox is closed.
    pub fn push(&self, message: ActorMessage<M>) -> Result<(), ActorMessage<M>> {
        {
            let mut queue = lock(&self.queue);
            if queue.closed {
                return Err(message);
            }
            queue.messages.push_back(message);
        }
        if let Some(consumer) = lock(&self.consumer).as_ref() {
            consumer.unpark();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).messages.len()
    }

    /// Take exactly `n` messages, or none if fewer are queued.
    pub fn pop_n(&self, n: usize) -> Option<Vec<ActorMessage<M>>> {
        let mut queue = lock(&self.queue);
        if queue.messages.len() < n {
            return None;
        }
        Some(queue.messages.drain(..n).collect())
    }

    /// Take up to `n` queued messages.
    pub fn pop_up_to(&self, n: usize) -> Vec<ActorMessage<M>> {
        let mut queue = lock(&self.queue);
        let n = n.min(queue.messages.len());
        queue.messages.drain(..n).collect()
    }

    /// Block until a message arrives, `deadline` passes, the calling thread
    /// is interrupted, or the mailbox is closed.
    pub fn take(&self, deadline: Option<Instant>) -> Taken<M> {
        *lock(&self.consumer) = Some(thread::current());
        let taken = loop {
            {
                let mut queue = lock(&self.queue);
                if let Some(message) = queue.messages.pop_front() {
                    break Taken::Message(message);
                }
                if queue.closed {
                    break Taken::Closed;
                }
            }
            if interrupt::take() {
                break Taken::Interrupted;
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Taken::TimedOut;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        };
        *lock(&self.consumer) = None;
        taken
    }

    /// Refuse further messages and return whatever is still queued.
    pub fn close_and_drain(&self) -> Vec<ActorMessage<M>> {
        let drained: Vec<_> = {
            let mut queue = lock(&self.queue);
            queue.closed = true;
            queue.messages.drain(..).collect()
        };
        if let Some(consumer) = lock(&self.consumer).as_ref() {
            consumer.unpark();
        }
        drained
    }
}
