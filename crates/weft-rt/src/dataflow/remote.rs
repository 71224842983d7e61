// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bind propagation to remote hosts.
//!
//! The transport belongs to the caller. A variable only knows a list of
//! peers, tells each of them about a local bind, and accepts binds arriving
//! from a peer without echoing them back.

use std::sync::Arc;

use super::variable::{DataflowVariable, VariableId};
use crate::pool;
use crate::sync::lock;

/// Identity of a participating host.
pub type HostId = uuid::Uuid;

/// A bind to forward to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct BindEvent<T> {
    pub variable: VariableId,
    pub value: T,
    /// The host the event is sent from.
    pub origin: HostId,
}

/// Transport endpoint for one remote host.
pub trait RemotePeer<T>: Send + Sync {
    /// The remote host this endpoint writes to.
    fn peer_id(&self) -> HostId;

    /// This side's host id, stamped into outgoing events.
    fn local_id(&self) -> HostId;

    fn write(&self, event: BindEvent<T>);
}

pub(super) struct RemoteSubscribers<T> {
    peers: Vec<Arc<dyn RemotePeer<T>>>,
    clone_value: Option<fn(&T) -> T>,
    /// Set once the bind has snapshotted `peers`; holds the host the value
    /// came from, if any. Later subscribers are told directly instead.
    published: Option<Option<HostId>>,
}

impl<T> Default for RemoteSubscribers<T> {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            clone_value: None,
            published: None,
        }
    }
}

impl<T: Send + Sync + 'static> DataflowVariable<T> {
    /// Forward future binds of this variable to `peer`.
    ///
    /// If the variable is already bound, `peer` is told right away.
    pub fn subscribe_remote(&self, peer: Arc<dyn RemotePeer<T>>)
    where
        T: Clone,
    {
        let mut remote = lock(&self.inner.remote);
        let Some(origin) = remote.published else {
            remote.clone_value = Some(T::clone);
            remote.peers.push(peer);
            return;
        };
        drop(remote);

        if origin == Some(peer.peer_id()) {
            return;
        }
        if let Some(value) = self.poll() {
            peer.write(BindEvent {
                variable: self.id(),
                value: value.clone(),
                origin: peer.local_id(),
            });
        }
    }

    /// Apply a bind received from `origin`.
    ///
    /// Returns whether it took effect. A variable that is already bound
    /// keeps its value and nothing is re-emitted.
    pub fn bind_remote(&self, origin: HostId, value: T) -> bool {
        if !self.begin_bind() {
            tracing::trace!(variable = %self.id(), %origin, "ignoring remote bind of a bound variable");
            return false;
        }
        self.complete_bind(value, Some(origin));
        true
    }

    /// Called by the bind winner once the value is published.
    pub(super) fn notify_remote(&self, skip: Option<HostId>) {
        let (peers, clone_value) = {
            let mut remote = lock(&self.inner.remote);
            remote.published = Some(skip);
            match remote.clone_value {
                Some(clone_value) if !remote.peers.is_empty() => {
                    (remote.peers.clone(), clone_value)
                }
                _ => return,
            }
        };

        let variable = self.clone();
        let job = Box::new(move || {
            let Some(value) = variable.poll() else {
                return;
            };
            for peer in peers.iter().filter(|p| Some(p.peer_id()) != skip) {
                tracing::trace!(variable = %variable.id(), peer = %peer.peer_id(), "propagating bind");
                peer.write(BindEvent {
                    variable: variable.id(),
                    value: clone_value(value),
                    origin: peer.local_id(),
                });
            }
        });
        if let Err(e) = pool::current_or_default().submit(job) {
            tracing::warn!(variable = %self.id(), error = %e, "remote bind notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolScope;
    use crate::pool::ThreadPool;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ChannelPeer {
        local: HostId,
        remote: HostId,
        events: Mutex<mpsc::Sender<BindEvent<i32>>>,
    }

    impl RemotePeer<i32> for ChannelPeer {
        fn peer_id(&self) -> HostId {
            self.remote
        }

        fn local_id(&self) -> HostId {
            self.local
        }

        fn write(&self, event: BindEvent<i32>) {
            let _ = lock(&self.events).send(event);
        }
    }

    fn peer(local: HostId) -> (Arc<ChannelPeer>, mpsc::Receiver<BindEvent<i32>>) {
        let (tx, rx) = mpsc::channel();
        let peer = Arc::new(ChannelPeer {
            local,
            remote: HostId::new_v4(),
            events: Mutex::new(tx),
        });
        (peer, rx)
    }

    #[test]
    fn local_bind_reaches_every_peer() {
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(1));
        let _scope = PoolScope::enter(pool);
        let me = HostId::new_v4();
        let v = DataflowVariable::new();
        let (a, rx_a) = peer(me);
        let (b, rx_b) = peer(me);
        v.subscribe_remote(a);
        v.subscribe_remote(b);
        v.bind(11).unwrap();

        for rx in [rx_a, rx_b] {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(event.value, 11);
            assert_eq!(event.origin, me);
            assert_eq!(event.variable, v.id());
        }
    }

    #[test]
    fn remote_bind_is_not_echoed_to_origin() {
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(1));
        let _scope = PoolScope::enter(pool);
        let me = HostId::new_v4();
        let v = DataflowVariable::new();
        let (from, rx_from) = peer(me);
        let (other, rx_other) = peer(me);
        let origin = from.peer_id();
        v.subscribe_remote(from);
        v.subscribe_remote(other);

        assert!(v.bind_remote(origin, 5));
        assert_eq!(*v.get_val().unwrap(), 5);
        assert_eq!(rx_other.recv_timeout(Duration::from_secs(5)).unwrap().value, 5);
        assert!(rx_from.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn remote_bind_on_bound_variable_is_ignored() {
        let v = DataflowVariable::new();
        v.bind(1).unwrap();
        assert!(!v.bind_remote(HostId::new_v4(), 2));
        assert_eq!(*v.get_val().unwrap(), 1);
    }

    #[test]
    fn late_subscriber_is_not_sent_its_own_bind() {
        let v = DataflowVariable::new();
        let (from, rx) = peer(HostId::new_v4());
        assert!(v.bind_remote(from.peer_id(), 8));
        v.subscribe_remote(from);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn subscriber_racing_bind_is_written_once() {
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(2));
        let _scope = PoolScope::enter(pool);
        for _ in 0..200 {
            let v = DataflowVariable::new();
            let (p, rx) = peer(HostId::new_v4());
            let binder = {
                let v = v.clone();
                std::thread::spawn(move || v.bind(4).unwrap())
            };
            v.subscribe_remote(p);
            binder.join().unwrap();
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().value, 4);
            assert!(rx.recv_timeout(Duration::from_millis(5)).is_err());
        }
    }

    #[test]
    fn late_subscriber_sees_existing_value() {
        let v = DataflowVariable::new();
        v.bind(3).unwrap();
        let (p, rx) = peer(HostId::new_v4());
        v.subscribe_remote(p);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().value, 3);
    }
}
