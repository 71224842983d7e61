// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Derived variables: bind a result once the inputs are bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::variable::DataflowVariable;
use crate::sync::lock;

impl<T: Send + Sync + 'static> DataflowVariable<T> {
    /// A variable bound to `f(value)` once this one is bound.
    ///
    /// `f` runs on whichever thread completes the bind (or here, if already
    /// bound).
    pub fn transform<U, F>(&self, f: F) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let result = DataflowVariable::new();
        let out = result.clone();
        self.register(Box::new(move |value: &T| {
            out.bind_safely(f(value));
        }));
        result
    }
}

/// Joins several inputs into one result.
struct Collector<T, U, F> {
    /// Inputs still unbound, plus one for the registration pass itself.
    remaining: AtomicUsize,
    slots: Mutex<Vec<Option<T>>>,
    compute: Mutex<Option<F>>,
    result: DataflowVariable<U>,
}

impl<T, U, F> Collector<T, U, F>
where
    U: Send + Sync + 'static,
    F: FnOnce(Vec<T>) -> U,
{
    fn count_down(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let Some(compute) = lock(&self.compute).take() else {
            return;
        };
        let values: Vec<T> = lock(&self.slots).drain(..).flatten().collect();
        self.result.bind_safely(compute(values));
    }
}

/// A variable bound to `f(values)` once every input is bound, with values
/// in input order. With no inputs, `f` runs immediately.
pub fn transform_all<T, U, F>(inputs: &[DataflowVariable<T>], f: F) -> DataflowVariable<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(Vec<T>) -> U + Send + 'static,
{
    let collector = Arc::new(Collector {
        remaining: AtomicUsize::new(inputs.len() + 1),
        slots: Mutex::new(vec![None; inputs.len()]),
        compute: Mutex::new(Some(f)),
        result: DataflowVariable::new(),
    });

    for (index, input) in inputs.iter().enumerate() {
        let collector = collector.clone();
        input.register(Box::new(move |value: &T| {
            lock(&collector.slots)[index] = Some(value.clone());
            collector.count_down();
        }));
    }
    collector.count_down();
    collector.result.clone()
}
