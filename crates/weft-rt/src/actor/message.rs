// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Messages, actor identities and type-erased actor references.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::dataflow::MessageStream;
use crate::error::ActorError;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique actor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Lifecycle state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    NotStarted,
    Running,
    Terminating,
    Stopped,
}

/// Weak back-reference to whoever sent a message.
pub(crate) type SenderRef<M> = Weak<dyn MessageSink<M>>;

/// A payload plus, for messages sent by an actor, a way back to it.
pub(crate) struct ActorMessage<M> {
    pub payload: M,
    pub sender: Option<SenderRef<M>>,
}

impl<M> ActorMessage<M> {
    pub fn anonymous(payload: M) -> Self {
        Self {
            payload,
            sender: None,
        }
    }
}

/// Receiving end of an actor, independent of its behavior type.
pub(crate) trait MessageSink<M>: Send + Sync {
    fn id(&self) -> ActorId;

    fn deliver(&self, message: ActorMessage<M>) -> Result<(), ActorError>;

    fn is_active(&self) -> bool;
}

/// Cloneable handle for sending messages to an actor.
///
/// Holding an `ActorRef` keeps the actor's mailbox alive but does not keep
/// it running.
pub struct ActorRef<M> {
    pub(crate) sink: Arc<dyn MessageSink<M>>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub fn id(&self) -> ActorId {
        self.sink.id()
    }

    /// Enqueue `message` without a sender. Fails once the actor has stopped.
    pub fn send(&self, message: M) -> Result<(), ActorError> {
        self.sink.deliver(ActorMessage::anonymous(message))
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_active()
    }

    pub(crate) fn send_from(&self, message: M, sender: SenderRef<M>) -> Result<(), ActorError> {
        self.sink.deliver(ActorMessage {
            payload: message,
            sender: Some(sender),
        })
    }
}

impl<M: Send + 'static> MessageStream<M> for ActorRef<M> {
    fn send(&self, value: M) {
        if let Err(e) = ActorRef::send(self, value) {
            tracing::debug!(actor = %self.id(), error = %e, "dropping message for stopped actor");
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorRef").field(&self.sink.id()).finish()
    }
}
