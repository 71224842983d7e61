// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot timers.
//!
//! A single background thread fires callbacks at their deadlines. Callbacks
//! run on the timer thread and must be short: hand real work to a pool.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::panic_message;
use crate::sync::{lock, wait, wait_timeout};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    seq: u64,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest deadline first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

/// Timer service with one dedicated thread.
pub struct Timer {
    shared: Arc<(Mutex<TimerState>, Condvar)>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer {
    pub fn new() -> Self {
        let shared = Arc::new((Mutex::new(TimerState::default()), Condvar::new()));
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("weft-timer".to_string())
                .spawn(move || timer_loop(&shared))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn timer thread");
                None
            }
        };
        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// Run `callback` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, callback);
    }

    /// Run `callback` at `deadline`.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (state, cvar) = &*self.shared;
        let mut state = lock(state);
        if state.shutdown {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline,
            seq,
            callback: Box::new(callback),
        });
        cvar.notify_one();
    }

    /// Drop pending callbacks and stop the timer thread.
    pub fn shutdown(&self) {
        {
            let (state, cvar) = &*self.shared;
            let mut state = lock(state);
            state.shutdown = true;
            state.heap.clear();
            cvar.notify_all();
        }
        if let Some(handle) = lock(&self.worker).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Process-wide timer.
pub fn global() -> &'static Timer {
    static GLOBAL: OnceLock<Timer> = OnceLock::new();
    GLOBAL.get_or_init(Timer::new)
}

fn timer_loop(shared: &(Mutex<TimerState>, Condvar)) {
    let (state, cvar) = shared;
    let mut guard = lock(state);
    loop {
        if guard.shutdown {
            break;
        }
        let now = Instant::now();
        match guard.heap.peek().map(|e| e.deadline) {
            None => guard = wait(cvar, guard),
            Some(deadline) if deadline > now => {
                guard = wait_timeout(cvar, guard, deadline - now);
            }
            Some(_) => {
                let Some(entry) = guard.heap.pop() else { continue };
                drop(guard);
                if let Err(payload) =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry.callback))
                {
                    tracing::warn!(panic = %panic_message(payload), "timer callback panicked");
                }
                guard = lock(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        timer.schedule(Duration::from_millis(20), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn fires_in_deadline_order() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel();
        for (delay, tag) in [(30, "c"), (10, "a"), (20, "b")] {
            let tx = tx.clone();
            timer.schedule(Duration::from_millis(delay), move || tx.send(tag).unwrap());
        }
        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn shutdown_drops_pending() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel::<()>();
        timer.schedule(Duration::from_millis(50), move || tx.send(()).unwrap());
        timer.shutdown();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn panicking_callback_keeps_timer_alive() {
        let timer = Timer::new();
        timer.schedule(Duration::ZERO, || panic!("boom"));
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(5), move || tx.send(1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
