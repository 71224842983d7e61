// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! What a running unit of work can do: receive, reply, send, stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::behavior::Behavior;
use super::mailbox::Taken;
use super::message::{ActorId, ActorMessage, ActorRef, ActorState, MessageSink, SenderRef};
use super::scheduler::Core;
use crate::error::ActorError;

/// Handle given to `act`, loop bodies and reaction handlers.
///
/// Senders of the messages being processed are remembered for `reply`:
/// a plain receive replaces them, and the handler-taking variants forget
/// them once the handler returns.
pub struct ActorContext<B: Behavior> {
    core: Arc<Core<B>>,
    senders: Vec<Option<SenderRef<B::Message>>>,
    timed_out: bool,
}

impl<B: Behavior> ActorContext<B> {
    pub(crate) fn new(core: Arc<Core<B>>) -> Self {
        Self {
            core,
            senders: Vec::new(),
            timed_out: false,
        }
    }

    pub fn id(&self) -> ActorId {
        self.core.id()
    }

    pub fn state(&self) -> ActorState {
        self.core.state()
    }

    /// A sending handle to this actor.
    pub fn myself(&self) -> ActorRef<B::Message> {
        ActorRef {
            sink: self.core.clone(),
        }
    }

    /// Ask the actor to stop once the current unit of work returns.
    /// Blocking receives after this fail with `Terminated`.
    pub fn stop(&self) {
        self.core.stop(false);
    }

    // --- receiving ---------------------------------------------------------

    /// Block the current unit of work until a message arrives.
    pub fn receive(&mut self) -> Result<B::Message, ActorError> {
        self.senders.clear();
        let (message, sender) = self.take_one(None)?.ok_or(ActorError::Terminated)?;
        self.senders.push(sender);
        Ok(message)
    }

    /// Like [`receive`](Self::receive), but `Ok(None)` once `timeout`
    /// passes. `on_timeout` runs when the unit of work finishes.
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<B::Message>, ActorError> {
        self.senders.clear();
        match self.take_one(Some(Instant::now() + timeout))? {
            Some((message, sender)) => {
                self.senders.push(sender);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Receive one message and pass it to `handler`, with replies routed to
    /// its sender.
    pub fn receive_with<R>(
        &mut self,
        handler: impl FnOnce(&mut Self, B::Message) -> R,
    ) -> Result<R, ActorError> {
        let message = self.receive()?;
        let result = handler(self, message);
        self.senders.clear();
        Ok(result)
    }

    /// Receive `n` messages and pass them to `handler` together. With
    /// `n == 0` one message is still consumed and discarded.
    pub fn receive_n<R>(
        &mut self,
        n: usize,
        handler: impl FnOnce(&mut Self, Vec<B::Message>) -> R,
    ) -> Result<R, ActorError> {
        self.senders.clear();
        let mut messages = Vec::with_capacity(n);
        for _ in 0..n.max(1) {
            let (message, sender) = self.take_one(None)?.ok_or(ActorError::Terminated)?;
            self.senders.push(sender);
            messages.push(message);
        }
        if n == 0 {
            messages.clear();
        }
        let result = handler(self, messages);
        self.senders.clear();
        Ok(result)
    }

    /// Like [`receive_n`](Self::receive_n), but all `n` messages share one
    /// deadline `timeout` from now. The first slot that times out and every
    /// slot after it are `None`.
    pub fn receive_n_timeout<R>(
        &mut self,
        n: usize,
        timeout: Duration,
        handler: impl FnOnce(&mut Self, Vec<Option<B::Message>>) -> R,
    ) -> Result<R, ActorError> {
        self.senders.clear();
        let deadline = Instant::now() + timeout;
        let mut slots = Vec::with_capacity(n);
        let mut expired = false;
        for _ in 0..n.max(1) {
            if expired {
                slots.push(None);
                continue;
            }
            match self.take_one(Some(deadline))? {
                Some((message, sender)) => {
                    self.senders.push(sender);
                    slots.push(Some(message));
                }
                None => {
                    expired = true;
                    slots.push(None);
                }
            }
        }
        if n == 0 {
            slots.clear();
        }
        let result = handler(self, slots);
        self.senders.clear();
        Ok(result)
    }

    /// `Ok(None)` means the deadline passed.
    fn take_one(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<(B::Message, Option<SenderRef<B::Message>>)>, ActorError> {
        match self.core.state() {
            ActorState::Running => {}
            ActorState::Terminating => return Err(ActorError::Terminated),
            ActorState::NotStarted | ActorState::Stopped => {
                return Err(ActorError::IllegalState("receive requires a running actor"))
            }
        }
        match self.core.take_message(deadline) {
            Taken::Message(message) => Ok(Some((message.payload, message.sender))),
            Taken::TimedOut => {
                self.timed_out = true;
                Ok(None)
            }
            Taken::Interrupted if self.core.is_terminating() => Err(ActorError::Terminated),
            Taken::Interrupted => Err(ActorError::Interrupted),
            Taken::Closed => Err(ActorError::Terminated),
        }
    }

    // --- replying ----------------------------------------------------------

    /// Send `message` to the sender of every message currently being
    /// processed.
    ///
    /// Fails with `NoSender` if nothing is being processed or a message
    /// came from outside any actor, and with `SenderStopped` if a sender is
    /// gone. Every reachable sender is still served before the error is
    /// returned.
    pub fn reply(&self, message: B::Message) -> Result<(), ActorError>
    where
        B::Message: Clone,
    {
        if self.senders.is_empty() {
            return Err(ActorError::NoSender);
        }
        let mut first_error = None;
        for sender in &self.senders {
            let outcome = match sender {
                None => Err(ActorError::NoSender),
                Some(weak) => match weak.upgrade() {
                    Some(sink) if sink.is_active() => sink.deliver(ActorMessage {
                        payload: message.clone(),
                        sender: Some(self.core.sender_ref()),
                    }),
                    _ => Err(ActorError::SenderStopped),
                },
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// [`reply`](Self::reply), ignoring missing or stopped senders.
    pub fn reply_if_exists(&self, message: B::Message)
    where
        B::Message: Clone,
    {
        for sink in self.senders.iter().flatten().filter_map(|w| w.upgrade()) {
            if sink.is_active() {
                let _ = sink.deliver(ActorMessage {
                    payload: message.clone(),
                    sender: Some(self.core.sender_ref()),
                });
            }
        }
    }

    /// Send to another actor, recording this actor as the sender.
    pub fn send_to(
        &self,
        target: &ActorRef<B::Message>,
        message: B::Message,
    ) -> Result<(), ActorError> {
        target.send_from(message, self.core.sender_ref())
    }

    // --- runtime plumbing --------------------------------------------------

    pub(crate) fn set_senders(&mut self, senders: Vec<Option<SenderRef<B::Message>>>) {
        self.senders = senders;
    }

    pub(crate) fn clear_senders(&mut self) {
        self.senders.clear();
    }

    pub(crate) fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub(crate) fn take_timed_out(&mut self) -> bool {
        std::mem::take(&mut self.timed_out)
    }
}
