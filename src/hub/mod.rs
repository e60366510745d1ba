//! Connection hub
//!
//! One hub instance per process, constructed explicitly at startup and
//! handed to every connection by handle. The hub is an actor: a single
//! loop task exclusively owns the live-connection set and the identity
//! index, and every mutation arrives as an event on its inbound channel.
//! Register, unregister, bind and delivery therefore apply in a total
//! order with no locking.

mod registry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::packet::{codec, Packet};
use crate::types::{HeraldError, Result};

use registry::Registry;

/// Everything the hub needs to deliver to one connection.
pub struct ConnHandle {
    /// Connection id, unique per accepted socket
    pub id: Uuid,
    /// Sender half of the connection's bounded outbound queue
    pub outbound: mpsc::Sender<Bytes>,
    /// Close signal; the registry fires it when the connection is removed
    pub closed: watch::Sender<bool>,
}

/// Registry mutation requests consumed by the hub loop.
enum HubEvent {
    Register(ConnHandle),
    Unregister(Uuid),
    Bind {
        conn: Uuid,
        identity: String,
        ts: i64,
    },
    Broadcast(Bytes),
    Unicast {
        identity: String,
        frame: Bytes,
    },
    Shutdown,
}

/// The hub actor. Create once, then [`Hub::start`] the loop and hand out
/// [`HubHandle`]s.
pub struct Hub {
    events: Option<mpsc::UnboundedReceiver<HubEvent>>,
    handle: HubHandle,
}

impl Hub {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events: Some(events_rx),
            handle: HubHandle {
                events: events_tx,
                connections: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// A cheap clone-able handle for producers.
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Spawn the event loop. Idempotent: a second call logs and returns
    /// `None` without spawning anything.
    pub fn start(&mut self) -> Option<JoinHandle<()>> {
        let Some(events) = self.events.take() else {
            info!("hub already running, start ignored");
            return None;
        };
        info!("hub started");
        let gauge = Arc::clone(&self.handle.connections);
        Some(tokio::spawn(run(events, gauge)))
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// The hub's sequential event loop. Sole owner and sole mutator of the
/// registry; no blocking or fallible I/O happens here.
async fn run(mut events: mpsc::UnboundedReceiver<HubEvent>, gauge: Arc<AtomicUsize>) {
    let mut registry = Registry::new(gauge);

    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Register(conn) => registry.register(conn),
            HubEvent::Unregister(id) => {
                registry.unregister(&id);
            }
            HubEvent::Bind { conn, identity, ts } => {
                registry.bind(&conn, &identity, ts);
            }
            HubEvent::Broadcast(frame) => registry.broadcast(&frame),
            HubEvent::Unicast { identity, frame } => registry.unicast(&identity, &frame),
            HubEvent::Shutdown => {
                registry.close_all();
                break;
            }
        }
    }

    info!("hub stopped");
}

/// Producer-side handle to the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    connections: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Add a connection to the live set.
    pub fn register(&self, conn: ConnHandle) -> Result<()> {
        self.send(HubEvent::Register(conn))
    }

    /// Remove a connection; repeated calls for the same id are a no-op.
    pub fn unregister(&self, conn: Uuid) -> Result<()> {
        self.send(HubEvent::Unregister(conn))
    }

    /// Bind an authenticated identity to a connection. Call only after
    /// the heartbeat signature has been validated.
    pub fn bind(&self, conn: Uuid, identity: String, ts: i64) -> Result<()> {
        self.send(HubEvent::Bind { conn, identity, ts })
    }

    /// Encode once and deliver to every live connection.
    pub fn push_to_all(&self, packet: &Packet) -> Result<()> {
        let frame = Bytes::from(codec::encode(packet)?);
        self.send(HubEvent::Broadcast(frame))
    }

    /// Encode once and deliver to every connection bound to `identity`.
    pub fn push_to_identity(&self, identity: &str, packet: &Packet) -> Result<()> {
        let frame = Bytes::from(codec::encode(packet)?);
        self.send(HubEvent::Unicast {
            identity: identity.to_string(),
            frame,
        })
    }

    /// Stop the hub loop, closing every live connection.
    pub fn shutdown(&self) -> Result<()> {
        self.send(HubEvent::Shutdown)
    }

    /// Current size of the live-connection set.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    fn send(&self, event: HubEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| HeraldError::Internal("hub is not running".into()))
    }
}
