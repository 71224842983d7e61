// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-assignment dataflow variable.
//!
//! State machine: NOT_INITIALIZED → INITIALIZING → INITIALIZED. The first
//! caller to CAS out of NOT_INITIALIZED owns the bind: it writes the value,
//! publishes INITIALIZED, then drains the wait stack. Readers never take a
//! lock; the wait stack head is the only contended word.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::callback::{Attached, DataCallback, MessageStream};
use super::remote::RemoteSubscribers;
use super::wait::{NodeCallback, Push, WaitNode, WaitStack};
use crate::error::{panic_message, DataflowError};
use crate::interrupt;
use crate::pool::{self, Pool};

const NOT_INITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a dataflow variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u64);

impl VariableId {
    fn next() -> Self {
        Self(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dfv-{}", self.0)
    }
}

pub(super) struct Inner<T> {
    pub(super) id: VariableId,
    state: AtomicU8,
    /// Written once by the bind winner before the flip to INITIALIZED.
    value: UnsafeCell<MaybeUninit<T>>,
    waiting: WaitStack<T>,
    pub(super) remote: Mutex<RemoteSubscribers<T>>,
}

// SAFETY: `value` is written exactly once, by the thread that won the
// NOT_INITIALIZED → INITIALIZING CAS, before the Release store of
// INITIALIZED. It is only read after an Acquire load observes INITIALIZED,
// and never mutated afterwards.
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn is_bound(&self) -> bool {
        self.state.load(Ordering::Acquire) == INITIALIZED
    }

    /// Caller must have observed INITIALIZED (directly, or through the
    /// drained wait stack, which is closed only after the flip).
    fn value(&self) -> &T {
        debug_assert!(self.is_bound());
        // SAFETY: see the `Sync` impl; the value is initialized and immutable.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == INITIALIZED {
            // SAFETY: INITIALIZED implies the value was written.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

/// A write-once variable. Readers block, or register callbacks, until the
/// first bind.
///
/// Cloning yields another handle to the same variable.
pub struct DataflowVariable<T> {
    pub(super) inner: Arc<Inner<T>>,
}

impl<T> Clone for DataflowVariable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for DataflowVariable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> DataflowVariable<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: VariableId::next(),
                state: AtomicU8::new(NOT_INITIALIZED),
                value: UnsafeCell::new(MaybeUninit::uninit()),
                waiting: WaitStack::new(),
                remote: Mutex::new(RemoteSubscribers::default()),
            }),
        }
    }

    pub fn id(&self) -> VariableId {
        self.inner.id
    }

    /// True once a value has been bound.
    pub fn is_bound(&self) -> bool {
        self.inner.is_bound()
    }

    /// The bound value, or `None` without blocking or registering.
    pub fn poll(&self) -> Option<&T> {
        self.is_bound().then(|| self.inner.value())
    }

    // --- bind side ---------------------------------------------------------

    /// Bind `value`. Re-binding an equal value is a no-op; a different value
    /// fails with `AlreadyBound`.
    ///
    /// A caller that loses the bind race blocks until the winner has stored
    /// its value, then compares.
    pub fn bind(&self, value: T) -> Result<(), DataflowError>
    where
        T: PartialEq,
    {
        if self.begin_bind() {
            self.complete_bind(value, None);
            return Ok(());
        }
        match self.get_val() {
            Ok(existing) if *existing == value => Ok(()),
            _ => Err(DataflowError::AlreadyBound),
        }
    }

    /// Bind `value`; any second bind fails, equal or not.
    pub fn bind_unique(&self, value: T) -> Result<(), DataflowError> {
        if !self.begin_bind() {
            return Err(DataflowError::AlreadyBound);
        }
        self.complete_bind(value, None);
        Ok(())
    }

    /// Bind `value` unless already bound. Returns whether this call bound it.
    pub fn bind_safely(&self, value: T) -> bool {
        if !self.begin_bind() {
            return false;
        }
        self.complete_bind(value, None);
        true
    }

    pub(super) fn begin_bind(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                NOT_INITIALIZED,
                INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Store the value, publish it, wake every registered reader and
    /// propagate to remote peers other than `origin`. Only the bind winner
    /// gets here.
    pub(super) fn complete_bind(&self, value: T, origin: Option<super::remote::HostId>) {
        let inner = &*self.inner;
        // SAFETY: we won the CAS out of NOT_INITIALIZED, so we are the only
        // writer, and no reader touches `value` before INITIALIZED.
        unsafe { (*inner.value.get()).write(value) };
        inner.state.store(INITIALIZED, Ordering::Release);

        let value = inner.value();
        let mut notified = 0usize;
        for node in inner.waiting.drain() {
            // Lost claims belong to readers that already timed out or were
            // interrupted.
            if !node.claim() {
                continue;
            }
            // A panicking stream must not strand the older waiters.
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| node.notify(value))) {
                tracing::warn!(
                    variable = %inner.id,
                    panic = %panic_message(panic),
                    "dataflow callback panicked"
                );
            }
            notified += 1;
        }
        tracing::trace!(variable = %inner.id, notified, "dataflow variable bound");

        self.notify_remote(origin);
    }

    // --- blocking reads ----------------------------------------------------

    /// Block until bound and return the value.
    pub fn get_val(&self) -> Result<&T, DataflowError> {
        let mut slot = None;
        while !self.is_bound() {
            let node = slot.get_or_insert_with(|| WaitNode::parked(thread::current()));
            match self.inner.waiting.try_push(node) {
                Push::Raced => continue,
                Push::Closed => break,
                Push::Linked => {
                    while !self.is_bound() {
                        if interrupt::take() {
                            node.abandon();
                            return Err(DataflowError::Interrupted);
                        }
                        thread::park();
                    }
                    break;
                }
            }
        }
        Ok(self.inner.value())
    }

    /// Block for at most `timeout`. `Ok(None)` means the timeout elapsed.
    pub fn get_val_timeout(&self, timeout: Duration) -> Result<Option<&T>, DataflowError> {
        let deadline = Instant::now() + timeout;
        let mut slot = None;
        while !self.is_bound() {
            let node = slot.get_or_insert_with(|| WaitNode::parked(thread::current()));
            match self.inner.waiting.try_push(node) {
                Push::Raced => continue,
                Push::Closed => break,
                Push::Linked => {
                    while !self.is_bound() {
                        if interrupt::take() {
                            node.abandon();
                            return Err(DataflowError::Interrupted);
                        }
                        let now = Instant::now();
                        if now >= deadline {
                            node.abandon();
                            return Ok(None);
                        }
                        thread::park_timeout(deadline - now);
                    }
                    break;
                }
            }
        }
        Ok(Some(self.inner.value()))
    }

    /// Block until bound, discarding the value.
    pub fn join(&self) -> Result<(), DataflowError> {
        self.get_val().map(|_| ())
    }

    /// Block for at most `timeout`. Returns whether the variable is bound.
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool, DataflowError> {
        self.get_val_timeout(timeout).map(|v| v.is_some())
    }

    // --- asynchronous reads ------------------------------------------------

    /// Run `callback` with the value once bound: from the binding thread if
    /// registered in time, otherwise right here.
    pub(super) fn register(&self, callback: NodeCallback<T>) {
        if self.is_bound() {
            callback(self.inner.value());
            return;
        }
        let node = WaitNode::callback(callback);
        while !self.is_bound() {
            match self.inner.waiting.try_push(&node) {
                Push::Linked => return,
                Push::Raced => continue,
                Push::Closed => break,
            }
        }
        if let Some(callback) = node.take_callback() {
            callback(self.inner.value());
        }
    }

    /// Send the value to `callback` once bound.
    pub fn get_val_async<S>(&self, callback: S) -> Result<(), DataflowError>
    where
        T: Clone,
        S: Into<Option<Arc<dyn MessageStream<T>>>>,
    {
        let stream = callback.into().ok_or(DataflowError::MissingCallback)?;
        self.register(Box::new(move |value: &T| stream.send(value.clone())));
        Ok(())
    }

    /// Send `Attached { attachment, result }` to `callback` once bound.
    pub fn get_val_async_with<A, S>(&self, attachment: A, callback: S) -> Result<(), DataflowError>
    where
        T: Clone,
        A: Send + 'static,
        S: Into<Option<Arc<dyn MessageStream<Attached<A, T>>>>>,
    {
        let stream = callback.into().ok_or(DataflowError::MissingCallback)?;
        self.register(Box::new(move |value: &T| {
            stream.send(Attached {
                attachment,
                result: value.clone(),
            })
        }));
        Ok(())
    }

    /// Run `handler` with the value on the active pool (or the default
    /// pool) once bound. Never runs inline, even if already bound.
    pub fn when_bound<F>(&self, handler: F)
    where
        T: Clone,
        F: FnOnce(T) + Send + 'static,
    {
        self.when_bound_on(pool::current_or_default(), handler);
    }

    /// Run `handler` with the value on `pool` once bound.
    pub fn when_bound_on<F>(&self, pool: Arc<dyn Pool>, handler: F)
    where
        T: Clone,
        F: FnOnce(T) + Send + 'static,
    {
        let bridge: Arc<dyn MessageStream<T>> = Arc::new(DataCallback::new(handler, pool));
        self.register(Box::new(move |value: &T| bridge.send(value.clone())));
    }

    /// Send the value to `stream` once bound.
    pub fn when_bound_stream(&self, stream: Arc<dyn MessageStream<T>>)
    where
        T: Clone,
    {
        self.register(Box::new(move |value: &T| stream.send(value.clone())));
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for DataflowVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.poll() {
            Some(v) => f
                .debug_struct("DataflowVariable")
                .field("id", &self.id())
                .field("value", v)
                .finish(),
            None => f
                .debug_struct("DataflowVariable")
                .field("id", &self.id())
                .field("bound", &false)
                .finish(),
        }
    }
}

impl<T: fmt::Display + Send + Sync + 'static> fmt::Display for DataflowVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.poll() {
            Some(v) => write!(f, "DataflowVariable(value={})", v),
            None => write!(f, "DataflowVariable(unbound)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ThreadPool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    /// Records values synchronously, in delivery order.
    struct Recorder<T>(Mutex<Vec<T>>);

    impl<T: Send> MessageStream<T> for Recorder<T> {
        fn send(&self, value: T) {
            crate::sync::lock(&self.0).push(value);
        }
    }

    #[test]
    fn bind_then_read() {
        let v = DataflowVariable::new();
        assert!(!v.is_bound());
        assert!(v.poll().is_none());
        v.bind(10).unwrap();
        assert!(v.is_bound());
        assert_eq!(v.poll(), Some(&10));
        assert_eq!(*v.get_val().unwrap(), 10);
    }

    #[test]
    fn first_bind_is_final() {
        let v = DataflowVariable::new();
        v.bind_safely(1);
        assert_eq!(v.bind(1), Ok(()));
        assert_eq!(v.bind(2), Err(DataflowError::AlreadyBound));
        assert_eq!(v.bind_unique(1), Err(DataflowError::AlreadyBound));
        assert!(!v.bind_safely(3));
        assert_eq!(*v.get_val().unwrap(), 1);
    }

    #[test]
    fn bind_accepts_equal_none() {
        let v: DataflowVariable<Option<i32>> = DataflowVariable::new();
        v.bind(None).unwrap();
        assert_eq!(v.bind(None), Ok(()));
        assert_eq!(v.bind(Some(1)), Err(DataflowError::AlreadyBound));
    }

    #[test]
    fn blocked_readers_wake_on_bind() {
        let v = DataflowVariable::new();
        let mut readers = Vec::new();
        for _ in 0..3 {
            let v = v.clone();
            readers.push(thread::spawn(move || *v.get_val().unwrap()));
        }
        thread::sleep(Duration::from_millis(20));
        v.bind(42).unwrap();
        for r in readers {
            assert_eq!(r.join().unwrap(), 42);
        }
    }

    struct Explode;

    impl MessageStream<i32> for Explode {
        fn send(&self, _value: i32) {
            panic!("stream failed");
        }
    }

    #[test]
    fn panicking_stream_does_not_strand_older_readers() {
        let v = DataflowVariable::new();
        let reader = {
            let v = v.clone();
            thread::spawn(move || v.get_val_timeout(Duration::from_secs(5)).map(|x| x.copied()))
        };
        thread::sleep(Duration::from_millis(30));
        let explode: Option<Arc<dyn MessageStream<i32>>> = Some(Arc::new(Explode));
        v.get_val_async(explode).unwrap();
        let later = Arc::new(Recorder::<i32>(Mutex::new(Vec::new())));
        let stream: Option<Arc<dyn MessageStream<i32>>> = Some(later.clone());
        v.get_val_async(stream).unwrap();

        v.bind(1).unwrap();
        assert_eq!(reader.join().unwrap(), Ok(Some(1)));
        assert_eq!(*crate::sync::lock(&later.0), vec![1]);
    }

    #[test]
    fn timed_read_expires() {
        let v: DataflowVariable<i32> = DataflowVariable::new();
        let start = Instant::now();
        assert_eq!(v.get_val_timeout(Duration::from_millis(30)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(29));
        assert_eq!(v.join_timeout(Duration::from_millis(1)), Ok(false));
        v.bind(5).unwrap();
        assert_eq!(v.get_val_timeout(Duration::from_millis(1)), Ok(Some(&5)));
    }

    #[test]
    fn timed_read_wakes_on_bind() {
        let v = DataflowVariable::new();
        let reader = {
            let v = v.clone();
            thread::spawn(move || v.get_val_timeout(Duration::from_secs(10)).map(|x| x.copied()))
        };
        thread::sleep(Duration::from_millis(20));
        v.bind(9).unwrap();
        assert_eq!(reader.join().unwrap(), Ok(Some(9)));
    }

    #[test]
    fn interrupt_fails_blocked_reader() {
        let v: DataflowVariable<i32> = DataflowVariable::new();
        let (tx, rx) = mpsc::channel();
        let reader = {
            let v = v.clone();
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                v.get_val().map(|x| *x)
            })
        };
        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.interrupt();
        assert_eq!(reader.join().unwrap(), Err(DataflowError::Interrupted));
        v.bind(1).unwrap();
    }

    #[test]
    fn losing_bind_waits_for_winner() {
        let v = DataflowVariable::new();
        assert!(v.begin_bind());
        let loser = {
            let v = v.clone();
            thread::spawn(move || v.bind(3))
        };
        thread::sleep(Duration::from_millis(20));
        v.complete_bind(3, None);
        assert_eq!(loser.join().unwrap(), Ok(()));
    }

    #[test]
    fn async_waiters_drain_lifo() {
        let v = DataflowVariable::new();
        let recorder: Arc<Recorder<Attached<&'static str, i32>>> =
            Arc::new(Recorder(Mutex::new(Vec::new())));
        for tag in ["w1", "w2", "w3"] {
            let stream: Arc<dyn MessageStream<Attached<&'static str, i32>>> = recorder.clone();
            v.get_val_async_with(tag, stream).unwrap();
        }
        v.bind(0).unwrap();
        let order: Vec<_> = crate::sync::lock(&recorder.0)
            .iter()
            .map(|a| a.attachment)
            .collect();
        assert_eq!(order, vec!["w3", "w2", "w1"]);
    }

    #[test]
    fn async_after_bind_is_immediate() {
        let v = DataflowVariable::new();
        v.bind(4).unwrap();
        let recorder: Arc<Recorder<i32>> = Arc::new(Recorder(Mutex::new(Vec::new())));
        let stream: Arc<dyn MessageStream<i32>> = recorder.clone();
        v.get_val_async(stream).unwrap();
        assert_eq!(*crate::sync::lock(&recorder.0), vec![4]);
    }

    #[test]
    fn missing_callback_fails_fast() {
        let v: DataflowVariable<i32> = DataflowVariable::new();
        let none: Option<Arc<dyn MessageStream<i32>>> = None;
        assert_eq!(v.get_val_async(none), Err(DataflowError::MissingCallback));
        let none: Option<Arc<dyn MessageStream<Attached<u8, i32>>>> = None;
        assert_eq!(
            v.get_val_async_with(1u8, none),
            Err(DataflowError::MissingCallback)
        );
    }

    #[test]
    fn when_bound_runs_on_pool() {
        let pool: Arc<dyn Pool> = Arc::new(ThreadPool::new(2));
        let v = DataflowVariable::new();
        let (tx, rx) = mpsc::channel();
        v.when_bound_on(pool, move |x: String| tx.send(x).unwrap());
        v.bind("ready".to_string()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "ready");
    }

    #[test]
    fn each_registration_notified_exactly_once() {
        let v = DataflowVariable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registrars = Vec::new();
        for _ in 0..8 {
            let v = v.clone();
            let hits = hits.clone();
            registrars.push(thread::spawn(move || {
                for _ in 0..50 {
                    let hits = hits.clone();
                    v.register(Box::new(move |_: &u32| {
                        hits.fetch_add(1, Ordering::Relaxed);
                    }));
                }
            }));
        }
        v.bind(1).unwrap();
        for r in registrars {
            r.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::Relaxed), 400);
    }

    #[test]
    fn timeout_racing_bind_never_double_notifies() {
        for _ in 0..50 {
            let v = DataflowVariable::new();
            let reader = {
                let v = v.clone();
                thread::spawn(move || v.get_val_timeout(Duration::from_millis(1)).map(|x| x.copied()))
            };
            v.bind(8).unwrap();
            match reader.join().unwrap() {
                Ok(Some(8)) | Ok(None) => {}
                other => panic!("unexpected read result: {:?}", other),
            }
        }
    }

    #[test]
    fn display_and_debug() {
        let v = DataflowVariable::new();
        assert_eq!(v.to_string(), "DataflowVariable(unbound)");
        v.bind(3).unwrap();
        assert_eq!(v.to_string(), "DataflowVariable(value=3)");
        assert!(format!("{:?}", v).contains("value: 3"));
    }

    #[test]
    fn ids_are_unique() {
        let a: DataflowVariable<i32> = DataflowVariable::new();
        let b: DataflowVariable<i32> = DataflowVariable::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn unbound_drop_releases_callbacks() {
        let marker = Arc::new(());
        {
            let v: DataflowVariable<i32> = DataflowVariable::new();
            let held = marker.clone();
            v.register(Box::new(move |_: &i32| drop(held)));
            assert_eq!(Arc::strong_count(&marker), 2);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
