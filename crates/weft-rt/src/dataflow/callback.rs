// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Callback bridge: "variable became bound" → "a unit of work is submitted".

use std::sync::{mpsc, Arc, Mutex};

use crate::pool::{Pool, PoolScope};
use crate::sync::lock;

/// A destination for bound values: callback bridges, actor references,
/// channels.
pub trait MessageStream<T>: Send + Sync {
    fn send(&self, value: T);
}

impl<T: Send> MessageStream<T> for mpsc::Sender<T> {
    fn send(&self, value: T) {
        let _ = mpsc::Sender::send(self, value);
    }
}

/// Bound value delivered together with the attachment supplied at
/// registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached<A, T> {
    pub attachment: A,
    pub result: T,
}

/// Runs a handler on a pool once a value is sent to it.
///
/// The handler runs inside a [`PoolScope`] for its pool, so whatever it
/// registers without naming a pool inherits this one. Only the first value
/// sent is delivered.
pub struct DataCallback<F> {
    handler: Mutex<Option<F>>,
    pool: Arc<dyn Pool>,
}

impl<F> DataCallback<F> {
    pub fn new(handler: F, pool: Arc<dyn Pool>) -> Self {
        Self {
            handler: Mutex::new(Some(handler)),
            pool,
        }
    }
}

impl<T, F> MessageStream<T> for DataCallback<F>
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    fn send(&self, value: T) {
        let Some(handler) = lock(&self.handler).take() else {
            tracing::trace!("data callback already delivered");
            return;
        };
        let pool = self.pool.clone();
        let job = Box::new(move || {
            let _scope = PoolScope::enter(pool);
            handler(value);
        });
        if let Err(e) = self.pool.submit(job) {
            tracing::warn!(error = %e, "dropping data callback");
        }
    }
}
