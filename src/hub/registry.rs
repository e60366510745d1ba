//! Hub registry state
//!
//! Owns the live-connection set and the identity index. Every mutation
//! happens on the hub's event loop task, so none of this needs locking.
//! A connection appears in the identity index only while it is in the
//! live set; removal from the live set also clears its index entries and
//! fires its close signal exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ConnHandle;

/// Registry entry for one live connection.
struct ConnEntry {
    /// Outbound frame queue feeding the connection's write loop
    outbound: tokio::sync::mpsc::Sender<Bytes>,
    /// Close signal observed by the write loop
    closed: tokio::sync::watch::Sender<bool>,
    /// Identity bound by a successful heartbeat, immutable once set
    identity: Option<String>,
    /// Timestamp of the last accepted heartbeat
    last_heartbeat: i64,
}

/// Outcome of an identity-bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// First heartbeat: connection is now authenticated
    Bound,
    /// Repeated heartbeat for the same identity: keepalive refresh
    Refreshed,
    /// Heartbeat claimed a different identity than the established one
    Rejected,
    /// Connection is not in the live set
    Unknown,
}

pub(crate) struct Registry {
    connections: HashMap<Uuid, ConnEntry>,
    identities: HashMap<String, Vec<Uuid>>,
    /// Live-connection gauge shared with the health endpoint
    gauge: Arc<AtomicUsize>,
}

impl Registry {
    pub(crate) fn new(gauge: Arc<AtomicUsize>) -> Self {
        Self {
            connections: HashMap::new(),
            identities: HashMap::new(),
            gauge,
        }
    }

    /// Add a connection to the live set. Immediately visible to
    /// subsequent broadcasts.
    pub(crate) fn register(&mut self, conn: ConnHandle) {
        let id = conn.id;
        self.connections.insert(
            id,
            ConnEntry {
                outbound: conn.outbound,
                closed: conn.closed,
                identity: None,
                last_heartbeat: 0,
            },
        );
        self.gauge.store(self.connections.len(), Ordering::Relaxed);
        info!(conn = %id, clients = self.connections.len(), "connection registered");
    }

    /// Remove a connection from the live set and every identity bucket,
    /// closing its outbound path exactly once. Safe no-op when already
    /// removed.
    pub(crate) fn unregister(&mut self, id: &Uuid) -> bool {
        let Some(entry) = self.connections.remove(id) else {
            debug!(conn = %id, "unregister for unknown connection ignored");
            return false;
        };

        if let Some(identity) = &entry.identity {
            if let Some(bucket) = self.identities.get_mut(identity) {
                bucket.retain(|c| c != id);
                if bucket.is_empty() {
                    self.identities.remove(identity);
                }
            }
        }

        // Signals the write loop to send a close frame and stop; the
        // entry (and with it the hub's queue sender) drops right after.
        let _ = entry.closed.send(true);

        self.gauge.store(self.connections.len(), Ordering::Relaxed);
        info!(
            conn = %id,
            identity = entry.identity.as_deref().unwrap_or("-"),
            last_heartbeat = entry.last_heartbeat,
            clients = self.connections.len(),
            "connection unregistered"
        );
        true
    }

    /// Bind an authenticated identity to a connection.
    ///
    /// An established identity is immutable for the connection lifetime:
    /// the same identity refreshes the heartbeat timestamp, a different
    /// one is rejected. Repeated binds never duplicate index entries.
    pub(crate) fn bind(&mut self, id: &Uuid, identity: &str, ts: i64) -> BindOutcome {
        let Some(entry) = self.connections.get_mut(id) else {
            debug!(conn = %id, "bind for unknown connection ignored");
            return BindOutcome::Unknown;
        };

        match &entry.identity {
            None => {
                entry.identity = Some(identity.to_string());
                entry.last_heartbeat = ts;
                self.identities
                    .entry(identity.to_string())
                    .or_default()
                    .push(*id);
                info!(
                    conn = %id,
                    identity = %identity,
                    fanout = self.identities[identity].len(),
                    "identity bound"
                );
                BindOutcome::Bound
            }
            Some(bound) if bound == identity => {
                entry.last_heartbeat = ts;
                debug!(conn = %id, identity = %identity, "heartbeat refresh");
                BindOutcome::Refreshed
            }
            Some(bound) => {
                warn!(
                    conn = %id,
                    bound = %bound,
                    claimed = %identity,
                    "heartbeat for different identity rejected"
                );
                BindOutcome::Rejected
            }
        }
    }

    /// Deliver a frame to every live connection.
    ///
    /// Enqueue is non-blocking; a connection whose queue is full is a
    /// slow consumer and gets evicted rather than stalling the loop or
    /// silently losing the frame.
    pub(crate) fn broadcast(&mut self, frame: &Bytes) {
        let targets: Vec<Uuid> = self.connections.keys().copied().collect();
        debug!(clients = targets.len(), "broadcast");
        self.deliver(&targets, frame);
    }

    /// Deliver a frame to every connection bound to an identity.
    /// Zero matches is a silent no-op: the identity may simply be offline.
    pub(crate) fn unicast(&mut self, identity: &str, frame: &Bytes) {
        let Some(bucket) = self.identities.get(identity) else {
            debug!(identity = %identity, "unicast to offline identity dropped");
            return;
        };
        let targets = bucket.clone();
        debug!(identity = %identity, fanout = targets.len(), "unicast");
        self.deliver(&targets, frame);
    }

    fn deliver(&mut self, targets: &[Uuid], frame: &Bytes) {
        let mut evicted = Vec::new();
        for id in targets {
            let Some(entry) = self.connections.get(id) else {
                continue;
            };
            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn = %id, "outbound queue full, evicting slow consumer");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn = %id, "outbound queue closed, evicting");
                    evicted.push(*id);
                }
            }
        }
        for id in &evicted {
            self.unregister(id);
        }
    }

    /// Close every live connection and clear the registry.
    pub(crate) fn close_all(&mut self) {
        let ids: Vec<Uuid> = self.connections.keys().copied().collect();
        info!(clients = ids.len(), "closing all connections");
        for id in &ids {
            self.unregister(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub(crate) fn identity_fanout(&self, identity: &str) -> usize {
        self.identities.get(identity).map_or(0, |b| b.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, watch};

    struct TestConn {
        id: Uuid,
        outbound: mpsc::Receiver<Bytes>,
        closed: watch::Receiver<bool>,
    }

    fn connect(registry: &mut Registry, capacity: usize) -> TestConn {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = watch::channel(false);
        let id = Uuid::new_v4();
        registry.register(ConnHandle {
            id,
            outbound: outbound_tx,
            closed: closed_tx,
        });
        TestConn {
            id,
            outbound: outbound_rx,
            closed: closed_rx,
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn broadcast_reaches_every_live_connection() {
        let mut reg = registry();
        let mut a = connect(&mut reg, 4);
        let mut b = connect(&mut reg, 4);

        reg.broadcast(&Bytes::from_static(b"hello"));

        assert_eq!(a.outbound.try_recv().unwrap(), "hello");
        assert_eq!(b.outbound.try_recv().unwrap(), "hello");
    }

    #[test]
    fn slow_consumer_is_evicted_not_blocked() {
        let mut reg = registry();
        let mut slow = connect(&mut reg, 1);
        let mut fast = connect(&mut reg, 4);

        reg.broadcast(&Bytes::from_static(b"one"));
        // slow's queue (capacity 1) is now full and undrained
        reg.broadcast(&Bytes::from_static(b"two"));

        assert_eq!(reg.connection_count(), 1);
        assert!(*slow.closed.borrow());
        assert_eq!(slow.outbound.try_recv().unwrap(), "one");

        // fast keeps receiving; slow receives nothing further
        reg.broadcast(&Bytes::from_static(b"three"));
        assert_eq!(fast.outbound.try_recv().unwrap(), "one");
        assert_eq!(fast.outbound.try_recv().unwrap(), "two");
        assert_eq!(fast.outbound.try_recv().unwrap(), "three");
        assert!(slow.outbound.try_recv().is_err());
    }

    #[test]
    fn bind_is_idempotent_and_identity_immutable() {
        let mut reg = registry();
        let conn = connect(&mut reg, 4);

        assert_eq!(reg.bind(&conn.id, "u1", 100), BindOutcome::Bound);
        assert_eq!(reg.bind(&conn.id, "u1", 200), BindOutcome::Refreshed);
        assert_eq!(reg.identity_fanout("u1"), 1);

        // an established identity cannot be replaced
        assert_eq!(reg.bind(&conn.id, "u2", 300), BindOutcome::Rejected);
        assert_eq!(reg.identity_fanout("u1"), 1);
        assert_eq!(reg.identity_fanout("u2"), 0);
    }

    #[test]
    fn bind_unknown_connection_is_ignored() {
        let mut reg = registry();
        assert_eq!(reg.bind(&Uuid::new_v4(), "u1", 100), BindOutcome::Unknown);
        assert_eq!(reg.identity_fanout("u1"), 0);
    }

    #[test]
    fn unicast_fans_out_to_bound_connections_only() {
        let mut reg = registry();
        let mut a = connect(&mut reg, 4);
        let mut b = connect(&mut reg, 4);
        let mut c = connect(&mut reg, 4);
        reg.bind(&a.id, "u1", 1);
        reg.bind(&b.id, "u1", 1);
        reg.bind(&c.id, "u2", 1);

        reg.unicast("u1", &Bytes::from_static(b"direct"));

        assert_eq!(a.outbound.try_recv().unwrap(), "direct");
        assert_eq!(b.outbound.try_recv().unwrap(), "direct");
        assert!(c.outbound.try_recv().is_err());
    }

    #[test]
    fn unicast_to_offline_identity_is_a_no_op() {
        let mut reg = registry();
        let mut a = connect(&mut reg, 4);
        reg.unicast("ghost", &Bytes::from_static(b"direct"));
        assert!(a.outbound.try_recv().is_err());
    }

    #[test]
    fn unregister_twice_closes_once() {
        let mut reg = registry();
        let conn = connect(&mut reg, 4);
        reg.bind(&conn.id, "u1", 1);

        assert!(reg.unregister(&conn.id));
        assert!(*conn.closed.borrow());
        assert_eq!(reg.identity_fanout("u1"), 0);

        // second call is a safe no-op
        assert!(!reg.unregister(&conn.id));
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn unregister_clears_identity_bucket_for_fanout_sibling() {
        let mut reg = registry();
        let a = connect(&mut reg, 4);
        let mut b = connect(&mut reg, 4);
        reg.bind(&a.id, "u1", 1);
        reg.bind(&b.id, "u1", 1);

        reg.unregister(&a.id);
        assert_eq!(reg.identity_fanout("u1"), 1);

        reg.unicast("u1", &Bytes::from_static(b"still here"));
        assert_eq!(b.outbound.try_recv().unwrap(), "still here");
    }

    #[test]
    fn close_all_empties_the_registry() {
        let mut reg = registry();
        let a = connect(&mut reg, 4);
        let b = connect(&mut reg, 4);

        reg.close_all();

        assert_eq!(reg.connection_count(), 0);
        assert!(*a.closed.borrow());
        assert!(*b.closed.borrow());
    }
}
