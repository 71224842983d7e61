// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lock-free wait stack for dataflow readers.
//!
//! Readers prepend nodes with CAS on `head`. The binder swaps `head` for the
//! `DRAINED` sentinel in one step, which both hands it the whole chain and
//! closes the stack: a reader that observes the sentinel reads the value
//! directly instead of linking. The chain is walked newest to oldest, so
//! notification order is LIFO relative to registration.
//!
//! Ownership: `head` and every `previous` link own one strong count of the
//! node they point at (`Arc::into_raw`). Each reader keeps its own clone, so
//! a node outlives the chain for as long as its reader still looks at it.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::Thread;

use crate::sync::lock;

/// Address of this static marks a drained (closed) stack. It is never
/// dereferenced and can never collide with a heap-allocated node.
static DRAINED: u8 = 0;

fn sentinel<T>() -> *mut WaitNode<T> {
    ptr::addr_of!(DRAINED) as *mut WaitNode<T>
}

pub(crate) type NodeCallback<T> = Box<dyn FnOnce(&T) + Send + 'static>;

/// One pending reader.
pub(crate) struct WaitNode<T> {
    previous: AtomicPtr<WaitNode<T>>,
    /// Set exactly once: by the binder before notifying, or by the reader
    /// when it gives up (timeout / interrupt) so it is never notified.
    consumed: AtomicBool,
    waiter: Waiter<T>,
}

pub(crate) enum Waiter<T> {
    /// A blocked thread to unpark.
    Thread(Thread),
    /// An asynchronous registration, run once with the bound value.
    Callback(Mutex<Option<NodeCallback<T>>>),
}

impl<T> WaitNode<T> {
    pub fn parked(thread: Thread) -> Arc<Self> {
        Self::with_waiter(Waiter::Thread(thread))
    }

    pub fn callback(callback: NodeCallback<T>) -> Arc<Self> {
        Self::with_waiter(Waiter::Callback(Mutex::new(Some(callback))))
    }

    fn with_waiter(waiter: Waiter<T>) -> Arc<Self> {
        Arc::new(Self {
            previous: AtomicPtr::new(ptr::null_mut()),
            consumed: AtomicBool::new(false),
            waiter,
        })
    }

    /// Mark consumed without notification (reader gave up).
    pub fn abandon(&self) {
        self.consumed.store(true, Ordering::Release);
    }

    /// Claim the right to notify this node. Succeeds at most once.
    pub fn claim(&self) -> bool {
        self.consumed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// Take back the callback of a node that never made it onto the stack.
    pub fn take_callback(&self) -> Option<NodeCallback<T>> {
        match &self.waiter {
            Waiter::Callback(slot) => lock(slot).take(),
            Waiter::Thread(_) => None,
        }
    }

    /// Wake the reader with the bound value. Caller must have claimed the node.
    pub fn notify(&self, value: &T) {
        match &self.waiter {
            // Unparking a thread that is not parked yet is fine: its next
            // park returns immediately.
            Waiter::Thread(thread) => thread.unpark(),
            Waiter::Callback(slot) => {
                let callback = lock(slot).take();
                if let Some(callback) = callback {
                    callback(value);
                }
            }
        }
    }
}

/// Outcome of one attempt to link a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    /// Node is on the stack; the binder is now responsible for it.
    Linked,
    /// Stack is drained; the value is already in place.
    Closed,
    /// Another reader won the CAS. Retry.
    Raced,
}

/// Prepend-only stack of wait nodes with a one-shot drain.
pub(crate) struct WaitStack<T> {
    head: AtomicPtr<WaitNode<T>>,
}

impl<T> WaitStack<T> {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.head.load(Ordering::Acquire) == sentinel()
    }

    /// One insertion attempt.
    pub fn try_push(&self, node: &Arc<WaitNode<T>>) -> Push {
        let head = self.head.load(Ordering::Acquire);
        if head == sentinel() {
            return Push::Closed;
        }
        // The old head is only stored, never dereferenced, so a concurrent
        // drain freeing it is harmless: the CAS below then fails.
        node.previous.store(head, Ordering::Relaxed);
        let raw = Arc::into_raw(Arc::clone(node)) as *mut WaitNode<T>;
        match self
            .head
            .compare_exchange(head, raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Push::Linked,
            Err(_) => {
                // SAFETY: `raw` came from `Arc::into_raw` above and was never published.
                unsafe { drop(Arc::from_raw(raw)) };
                Push::Raced
            }
        }
    }

    /// Close the stack and take every node linked so far, newest first.
    /// Must be called at most once.
    pub fn drain(&self) -> Drain<T> {
        let head = self.head.swap(sentinel(), Ordering::AcqRel);
        debug_assert!(head != sentinel(), "wait stack drained twice");
        Drain {
            next: if head == sentinel() { ptr::null_mut() } else { head },
        }
    }
}

impl<T> Drop for WaitStack<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if head != sentinel() {
            // Never bound: release the pending nodes.
            drop(Drain { next: head });
        }
    }
}

/// Owning iterator over a detached chain, newest to oldest.
pub(crate) struct Drain<T> {
    next: *mut WaitNode<T>,
}

impl<T> Iterator for Drain<T> {
    type Item = Arc<WaitNode<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: every non-null link in a detached chain is an owned
        // `Arc::into_raw` pointer, and the chain is no longer reachable from
        // `head`, so this iterator is its only owner.
        let node = unsafe { Arc::from_raw(self.next) };
        self.next = node.previous.load(Ordering::Acquire);
        Some(node)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
