// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative thread interruption.
//!
//! Every thread owns an interrupt flag. `InterruptHandle::interrupt` sets it
//! and unparks the thread; blocking waits in this crate check the flag each
//! time they wake and fail with an interruption error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

/// Interrupt flag shared between a thread and its handles.
#[derive(Debug, Default)]
struct InterruptFlag {
    flag: AtomicBool,
}

impl InterruptFlag {
    fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

thread_local! {
    static CURRENT: Arc<InterruptFlag> = Arc::new(InterruptFlag::default());
}

/// Handle for interrupting one particular thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<InterruptFlag>,
    thread: Thread,
}

impl InterruptHandle {
    /// Interrupt the thread: set its flag and wake it if parked.
    pub fn interrupt(&self) {
        self.flag.set();
        self.thread.unpark();
    }

    /// Check the flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.flag.is_set()
    }

    /// The thread this handle interrupts.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

/// Handle for the calling thread.
pub fn current() -> InterruptHandle {
    InterruptHandle {
        flag: CURRENT.with(Arc::clone),
        thread: thread::current(),
    }
}

/// Check whether the calling thread has been interrupted.
pub fn is_interrupted() -> bool {
    CURRENT.with(|f| f.is_set())
}

/// Clear the calling thread's interrupt flag.
pub fn clear() {
    CURRENT.with(|f| {
        f.take();
    });
}

/// Consume a pending interrupt. Returns true if one was pending.
pub(crate) fn take() -> bool {
    CURRENT.with(|f| f.take())
}
