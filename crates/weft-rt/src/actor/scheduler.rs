// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Actor scheduling core.
//!
//! At most one unit of work per actor exists at any time. The right to
//! submit one is the `token` flag: whoever flips it false → true owns the
//! actor until it either hands off to the next unit (keeping the token) or
//! parks a reaction and releases it. Senders, timers and `stop` only ever
//! try to take the token; the loser does nothing, because the holder
//! re-checks for runnable work after every release.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use super::behavior::{Behavior, LoopBody, Reaction, Step};
use super::context::ActorContext;
use super::mailbox::{Mailbox, Taken};
use super::message::{ActorId, ActorMessage, ActorState, MessageSink, SenderRef};
use crate::error::{panic_message, ActorError};
use crate::interrupt::{self, InterruptHandle};
use crate::pool::{Pool, PoolScope};
use crate::sync::{lock, wait, wait_timeout};
use crate::timer;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const TERMINATING: u8 = 2;
const STOPPED: u8 = 3;

fn decode(state: u8) -> ActorState {
    match state {
        NOT_STARTED => ActorState::NotStarted,
        RUNNING => ActorState::Running,
        TERMINATING => ActorState::Terminating,
        _ => ActorState::Stopped,
    }
}

/// One scheduled slice of an actor's execution.
enum Work<B: Behavior> {
    Start,
    Iterate,
    Resume {
        reaction: Reaction<B>,
        messages: Vec<ActorMessage<B::Message>>,
        timed_out: bool,
    },
    Terminate,
}

struct Waiting<B: Behavior> {
    reaction: Reaction<B>,
    generation: u64,
    timed_out: bool,
}

/// State touched only by the token holder, plus the parked reaction.
struct Slot<B: Behavior> {
    behavior: Option<B>,
    loop_body: Option<LoopBody<B>>,
    waiting: Option<Waiting<B>>,
    generation: u64,
}

pub(crate) struct Core<B: Behavior> {
    id: ActorId,
    state: AtomicU8,
    mailbox: Mailbox<B::Message>,
    token: AtomicBool,
    slot: Mutex<Slot<B>>,
    pool: Arc<dyn Pool>,
    /// Thread running the current unit, for interrupting blocking waits.
    running_on: Mutex<Option<InterruptHandle>>,
    stopped: (Mutex<bool>, Condvar),
    myself: Weak<Core<B>>,
}

impl<B: Behavior> Core<B> {
    pub fn new(behavior: B, pool: Arc<dyn Pool>) -> Arc<Self> {
        Arc::new_cyclic(|myself| Core {
            id: ActorId::next(),
            state: AtomicU8::new(NOT_STARTED),
            mailbox: Mailbox::new(),
            token: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                behavior: Some(behavior),
                loop_body: None,
                waiting: None,
                generation: 0,
            }),
            pool,
            running_on: Mutex::new(None),
            stopped: (Mutex::new(false), Condvar::new()),
            myself: myself.clone(),
        })
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn state(&self) -> ActorState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn is_terminating(&self) -> bool {
        self.state.load(Ordering::Acquire) == TERMINATING
    }

    pub fn sender_ref(&self) -> SenderRef<B::Message> {
        self.myself.clone()
    }

    pub fn arc(&self) -> Option<Arc<Self>> {
        self.myself.upgrade()
    }

    pub fn take_message(&self, deadline: Option<Instant>) -> Taken<B::Message> {
        self.mailbox.take(deadline)
    }

    // --- lifecycle ---------------------------------------------------------

    pub fn start(&self) -> Result<(), ActorError> {
        self.state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ActorError::IllegalState("actor has already been started"))?;
        // Nothing can hold the token before the first start.
        self.token.store(true, Ordering::Release);
        tracing::debug!(actor = %self.id, "actor started");
        self.submit(Work::Start);
        Ok(())
    }

    /// Request termination. With `interrupt`, a unit blocked in a receive
    /// or a dataflow read is woken up.
    pub fn stop(&self, interrupt: bool) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current != NOT_STARTED && current != RUNNING {
                return;
            }
            match self.state.compare_exchange(
                current,
                TERMINATING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        tracing::debug!(actor = %self.id, "actor stop requested");
        if interrupt {
            if let Some(handle) = lock(&self.running_on).as_ref() {
                handle.interrupt();
            }
        }
        self.try_schedule();
    }

    pub fn join(&self) {
        let (done, cvar) = &self.stopped;
        let mut stopped = lock(done);
        while !*stopped {
            stopped = wait(cvar, stopped);
        }
    }

    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (done, cvar) = &self.stopped;
        let mut stopped = lock(done);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = wait_timeout(cvar, stopped, deadline - now);
        }
        true
    }

    // --- scheduling --------------------------------------------------------

    /// Submit the next unit of work if there is one and nobody else holds
    /// the token.
    fn try_schedule(&self) {
        loop {
            if !self.has_runnable_work() {
                return;
            }
            if self
                .token
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            match self.take_work() {
                Some(work) => {
                    self.submit(work);
                    return;
                }
                None => self.token.store(false, Ordering::Release),
            }
        }
    }

    fn has_runnable_work(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            TERMINATING => true,
            RUNNING => {
                let slot = lock(&self.slot);
                match &slot.waiting {
                    Some(w) => w.timed_out || self.mailbox.len() >= w.reaction.needed(),
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Token held.
    fn take_work(&self) -> Option<Work<B>> {
        match self.state.load(Ordering::Acquire) {
            TERMINATING => return Some(Work::Terminate),
            RUNNING => {}
            _ => return None,
        }
        let mut slot = lock(&self.slot);
        let waiting = slot.waiting.as_ref()?;
        let needed = waiting.reaction.needed();
        let expired = waiting.timed_out;
        let (messages, timed_out) = match self.mailbox.pop_n(needed) {
            Some(messages) => (messages, false),
            None if expired => (self.mailbox.pop_up_to(needed), true),
            None => return None,
        };
        let waiting = slot.waiting.take()?;
        Some(Work::Resume {
            reaction: waiting.reaction,
            messages,
            timed_out,
        })
    }

    /// Token held. Hands `work` to the pool, or terminates inline if the
    /// pool refuses it.
    fn submit(&self, work: Work<B>) {
        let Some(core) = self.arc() else {
            return;
        };
        let job = Box::new(move || core.run(work));
        if let Err(e) = self.pool.submit(job) {
            tracing::warn!(actor = %self.id, error = %e, "cannot schedule actor, stopping it");
            let behavior = lock(&self.slot).behavior.take();
            if let Some(behavior) = behavior {
                self.terminate(behavior);
            }
        }
    }

    /// Park `reaction` until the mailbox can satisfy it or its timeout
    /// fires. Token held; released here.
    fn park(&self, reaction: Reaction<B>) {
        let timeout = reaction.timeout;
        let generation = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            let generation = slot.generation;
            slot.waiting = Some(Waiting {
                reaction,
                generation,
                timed_out: false,
            });
            generation
        };
        if let Some(timeout) = timeout {
            let core = self.myself.clone();
            timer::global().schedule(timeout, move || {
                if let Some(core) = core.upgrade() {
                    core.expire(generation);
                }
            });
        }
        self.token.store(false, Ordering::Release);
        self.try_schedule();
    }

    fn expire(&self, generation: u64) {
        {
            let mut slot = lock(&self.slot);
            match slot.waiting.as_mut() {
                Some(w) if w.generation == generation => w.timed_out = true,
                _ => return,
            }
        }
        tracing::trace!(actor = %self.id, "reaction timed out");
        self.try_schedule();
    }

    // --- running units -----------------------------------------------------

    fn run(self: Arc<Self>, work: Work<B>) {
        let _scope = PoolScope::enter(self.pool.clone());
        let Some(mut behavior) = lock(&self.slot).behavior.take() else {
            tracing::warn!(actor = %self.id, "unit of work found no behavior");
            return;
        };
        if let Work::Terminate = work {
            self.terminate(behavior);
            return;
        }

        *lock(&self.running_on) = Some(interrupt::current());
        let mut ctx = ActorContext::new(self.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.execute(&mut behavior, &mut ctx, work)
        }));
        *lock(&self.running_on) = None;
        interrupt::clear();

        if ctx.take_timed_out() {
            self.guard_hook(|| behavior.on_timeout());
        }
        let result = outcome.unwrap_or_else(|panic| Err(ActorError::Panicked(panic_message(panic))));
        match result {
            Ok(step) => self.advance(behavior, step),
            Err(e) => self.fail(behavior, e),
        }
    }

    fn execute(
        &self,
        behavior: &mut B,
        ctx: &mut ActorContext<B>,
        work: Work<B>,
    ) -> Result<Step<B>, ActorError> {
        match work {
            Work::Start => {
                behavior.after_start(ctx);
                if self.is_terminating() {
                    return Ok(Step::Done);
                }
                behavior.act(ctx)
            }
            Work::Iterate => {
                let Some(mut body) = lock(&self.slot).loop_body.take() else {
                    return Ok(Step::Done);
                };
                let step = body(behavior, ctx);
                let mut slot = lock(&self.slot);
                if slot.loop_body.is_none() {
                    slot.loop_body = Some(body);
                }
                step
            }
            Work::Resume {
                reaction,
                messages,
                timed_out,
            } => {
                if timed_out {
                    ctx.mark_timed_out();
                }
                let mut slots = Vec::with_capacity(reaction.needed());
                let mut senders = Vec::with_capacity(messages.len());
                for message in messages {
                    senders.push(message.sender);
                    slots.push(Some(message.payload));
                }
                if reaction.arity == 0 {
                    slots.clear();
                } else {
                    slots.resize_with(reaction.arity, || None);
                }
                ctx.set_senders(senders);
                let step = (reaction.handler)(behavior, ctx, slots);
                ctx.clear_senders();
                step
            }
            Work::Terminate => Ok(Step::Done),
        }
    }

    /// Token held; `behavior` is out of the slot.
    fn advance(&self, behavior: B, step: Step<B>) {
        if self.is_terminating() {
            self.terminate(behavior);
            return;
        }
        match step {
            Step::Done => {
                let mut slot = lock(&self.slot);
                if slot.loop_body.is_some() {
                    slot.behavior = Some(behavior);
                    drop(slot);
                    self.submit(Work::Iterate);
                } else {
                    drop(slot);
                    self.terminate(behavior);
                }
            }
            Step::Loop(body) => {
                {
                    let mut slot = lock(&self.slot);
                    slot.loop_body = Some(body);
                    slot.behavior = Some(behavior);
                }
                self.submit(Work::Iterate);
            }
            Step::React(reaction) => {
                lock(&self.slot).behavior = Some(behavior);
                self.park(reaction);
            }
        }
    }

    fn fail(&self, mut behavior: B, error: ActorError) {
        if self.is_terminating() || error == ActorError::Terminated {
            self.terminate(behavior);
            return;
        }
        if error.is_interrupt() {
            tracing::debug!(actor = %self.id, "actor interrupted");
            self.guard_hook(|| behavior.on_interrupt(&error));
            self.terminate(behavior);
            return;
        }
        let handled = catch_unwind(AssertUnwindSafe(|| behavior.on_exception(error)))
            .unwrap_or_else(|panic| Err(ActorError::Panicked(panic_message(panic))));
        match handled {
            Ok(()) => self.advance(behavior, Step::Done),
            Err(e) => {
                tracing::warn!(actor = %self.id, error = %e, "actor stopped by unhandled fault");
                self.terminate(behavior);
            }
        }
    }

    /// Token held. Closes the mailbox, runs `after_stop` and wakes joiners.
    /// The token is never released again.
    fn terminate(&self, mut behavior: B) {
        self.state.store(TERMINATING, Ordering::Release);
        let undelivered: Vec<_> = self
            .mailbox
            .close_and_drain()
            .into_iter()
            .map(|m| m.payload)
            .collect();
        {
            let mut slot = lock(&self.slot);
            slot.loop_body = None;
            slot.waiting = None;
        }
        self.state.store(STOPPED, Ordering::Release);
        tracing::debug!(actor = %self.id, undelivered = undelivered.len(), "actor stopped");

        self.guard_hook(|| behavior.after_stop(undelivered));
        drop(behavior);

        let (done, cvar) = &self.stopped;
        *lock(done) = true;
        cvar.notify_all();
    }

    fn guard_hook(&self, hook: impl FnOnce()) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(hook)) {
            tracing::warn!(actor = %self.id, panic = %panic_message(panic), "lifecycle hook panicked");
        }
    }
}

impl<B: Behavior> MessageSink<B::Message> for Core<B> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn deliver(&self, message: ActorMessage<B::Message>) -> Result<(), ActorError> {
        self.mailbox
            .push(message)
            .map_err(|_| ActorError::IllegalState("actor has stopped"))?;
        self.try_schedule();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }
}
