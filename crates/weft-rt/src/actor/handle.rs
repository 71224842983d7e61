// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Owning actor handle.

use std::sync::Arc;
use std::time::Duration;

use super::behavior::Behavior;
use super::message::{ActorId, ActorRef, ActorState};
use super::scheduler::Core;
use crate::error::ActorError;
use crate::pool::{self, Pool};

/// An actor whose units of work run on a shared pool.
///
/// Dropping the handle does not stop the actor; call [`stop`](Self::stop).
pub struct Actor<B: Behavior> {
    core: Arc<Core<B>>,
}

impl<B: Behavior> Actor<B> {
    /// New, not yet started actor on the active pool (or the default pool).
    pub fn new(behavior: B) -> Self {
        Self::with_pool(behavior, pool::current_or_default())
    }

    pub fn with_pool(behavior: B, pool: Arc<dyn Pool>) -> Self {
        Self {
            core: Core::new(behavior, pool),
        }
    }

    /// Schedule the first unit of work. Fails if already started or
    /// stopped.
    pub fn start(&self) -> Result<(), ActorError> {
        self.core.start()
    }

    /// Stop the actor. A unit of work blocked in a receive is woken and
    /// fails with `Terminated`. Messages still queued go to `after_stop`.
    pub fn stop(&self) {
        self.core.stop(true);
    }

    pub fn send(&self, message: B::Message) -> Result<(), ActorError> {
        self.actor_ref().send(message)
    }

    /// Block until the actor has stopped and `after_stop` has returned.
    pub fn join(&self) {
        self.core.join();
    }

    /// Like [`join`](Self::join); returns whether the actor stopped in time.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        self.core.join_timeout(timeout)
    }

    pub fn state(&self) -> ActorState {
        self.core.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ActorState::Running
    }

    pub fn actor_ref(&self) -> ActorRef<B::Message> {
        ActorRef {
            sink: self.core.clone(),
        }
    }

    pub fn id(&self) -> ActorId {
        self.core.id()
    }
}

impl<B: Behavior> std::fmt::Debug for Actor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
