// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Readable dataflow channels.

use std::sync::Arc;
use std::time::Duration;

use super::callback::{Attached, MessageStream};
use super::variable::DataflowVariable;
use crate::error::DataflowError;

/// Read side of anything that eventually yields one value.
///
/// Object-safe apart from the closure-taking helpers.
pub trait DataflowReadChannel<T>: Send + Sync {
    fn is_bound(&self) -> bool;

    fn poll(&self) -> Option<&T>;

    fn get_val(&self) -> Result<&T, DataflowError>;

    fn get_val_timeout(&self, timeout: Duration) -> Result<Option<&T>, DataflowError>;

    fn get_val_async(&self, callback: Option<Arc<dyn MessageStream<T>>>) -> Result<(), DataflowError>;

    fn when_bound_stream(&self, stream: Arc<dyn MessageStream<T>>);

    fn get_val_async_with<A>(
        &self,
        attachment: A,
        callback: Option<Arc<dyn MessageStream<Attached<A, T>>>>,
    ) -> Result<(), DataflowError>
    where
        Self: Sized,
        A: Send + 'static;

    fn when_bound<F>(&self, handler: F)
    where
        Self: Sized,
        F: FnOnce(T) + Send + 'static;
}

impl<T> DataflowReadChannel<T> for DataflowVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_bound(&self) -> bool {
        DataflowVariable::is_bound(self)
    }

    fn poll(&self) -> Option<&T> {
        DataflowVariable::poll(self)
    }

    fn get_val(&self) -> Result<&T, DataflowError> {
        DataflowVariable::get_val(self)
    }

    fn get_val_timeout(&self, timeout: Duration) -> Result<Option<&T>, DataflowError> {
        DataflowVariable::get_val_timeout(self, timeout)
    }

    fn get_val_async(&self, callback: Option<Arc<dyn MessageStream<T>>>) -> Result<(), DataflowError> {
        DataflowVariable::get_val_async(self, callback)
    }

    fn when_bound_stream(&self, stream: Arc<dyn MessageStream<T>>) {
        DataflowVariable::when_bound_stream(self, stream)
    }

    fn get_val_async_with<A>(
        &self,
        attachment: A,
        callback: Option<Arc<dyn MessageStream<Attached<A, T>>>>,
    ) -> Result<(), DataflowError>
    where
        A: Send + 'static,
    {
        DataflowVariable::get_val_async_with(self, attachment, callback)
    }

    fn when_bound<F>(&self, handler: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        DataflowVariable::when_bound(self, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn first_bound<'a>(channels: &'a [&'a dyn DataflowReadChannel<i32>]) -> Option<&'a i32> {
        channels.iter().find_map(|c| c.poll())
    }

    #[test]
    fn usable_as_trait_object() {
        let a = DataflowVariable::new();
        let b = DataflowVariable::new();
        assert_eq!(first_bound(&[&a, &b]), None);
        b.bind(2).unwrap();
        assert_eq!(first_bound(&[&a, &b]), Some(&2));
    }

    #[test]
    fn stream_registration_through_trait() {
        let v = DataflowVariable::new();
        let (tx, rx) = mpsc::channel();
        let channel: &dyn DataflowReadChannel<i32> = &v;
        channel.when_bound_stream(Arc::new(tx));
        v.bind(6).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 6);
        assert_eq!(channel.get_val_timeout(Duration::from_millis(1)), Ok(Some(&6)));
    }
}
