// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Active pool context.
//!
//! Callbacks and actor units of work run inside a `PoolScope`, so
//! continuations they register without naming a pool land on the same one.

use std::cell::RefCell;
use std::sync::Arc;

use super::{default_pool, Pool};

thread_local! {
    static ACTIVE: RefCell<Option<Arc<dyn Pool>>> = const { RefCell::new(None) };
}

/// RAII guard marking a pool as active on this thread. Restores the
/// previously active pool on drop.
pub struct PoolScope {
    previous: Option<Arc<dyn Pool>>,
}

impl PoolScope {
    pub fn enter(pool: Arc<dyn Pool>) -> Self {
        let previous = ACTIVE.with(|cell| cell.borrow_mut().replace(pool));
        Self { previous }
    }
}

impl Drop for PoolScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// The pool active on this thread, if any.
pub fn current() -> Option<Arc<dyn Pool>> {
    ACTIVE.with(|cell| cell.borrow().clone())
}

/// The active pool, else the process-wide default.
pub fn current_or_default() -> Arc<dyn Pool> {
    current().unwrap_or_else(default_pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ThreadPool;

    #[test]
    fn scope_sets_and_restores() {
        assert!(current().is_none());
        let outer: Arc<dyn Pool> = Arc::new(ThreadPool::new(1));
        let inner: Arc<dyn Pool> = Arc::new(ThreadPool::new(1));
        {
            let _outer = PoolScope::enter(outer.clone());
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
            {
                let _inner = PoolScope::enter(inner.clone());
                assert!(Arc::ptr_eq(&current().unwrap(), &inner));
            }
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
        }
        assert!(current().is_none());
    }

    #[test]
    fn falls_back_to_default() {
        assert!(Arc::ptr_eq(&current_or_default(), &default_pool()));
    }
}
