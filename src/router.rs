//! Instruction routing
//!
//! Decides where a decoded instruction goes: to every live connection
//! ("ALL"), to the connections bound to one identity, or, when the
//! instruction names no destination, off the hub entirely onto the
//! downstream queue for asynchronous business processing.
//!
//! Client-originated and server-originated packets take different empty-
//! target paths: a client instruction with no target is forwarded to the
//! queue, while a queue-originated instruction with no target is dropped
//! so it can never loop back into the queue.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hub::HubHandle;
use crate::packet::{Instruction, Packet};
use crate::types::Result;

/// Producer side of the downstream message queue.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Enqueue a payload under a subject. Delivery is fire-and-forget at
    /// this layer: callers log failures and never retry.
    async fn enqueue(&self, subject: &str, payload: Bytes) -> Result<()>;
}

/// Routes instructions between the hub and the downstream queue.
pub struct Router {
    hub: HubHandle,
    downstream: Option<Arc<dyn Downstream>>,
    forward_subject: String,
}

impl Router {
    pub fn new(
        hub: HubHandle,
        downstream: Option<Arc<dyn Downstream>>,
        forward_subject: impl Into<String>,
    ) -> Self {
        Self {
            hub,
            downstream,
            forward_subject: forward_subject.into(),
        }
    }

    /// Route an instruction received from a client connection.
    pub async fn route_client(&self, instruction: Instruction) {
        if instruction.is_untargeted() {
            self.forward_downstream(instruction).await;
        } else if instruction.is_broadcast() {
            if let Err(e) = self.hub.push_to_all(&Packet::Instruction(instruction)) {
                warn!(error = %e, "broadcast failed");
            }
        } else {
            let identity = instruction.to_id.clone();
            if let Err(e) = self
                .hub
                .push_to_identity(&identity, &Packet::Instruction(instruction))
            {
                warn!(error = %e, identity = %identity, "unicast failed");
            }
        }
    }

    /// Route a packet that arrived from the downstream queue (server-
    /// originated, destined back to clients).
    pub fn route_server(&self, packet: Packet) {
        let instruction = match packet {
            Packet::Heartbeat(_) => {
                debug!("heartbeat from downstream ignored");
                return;
            }
            Packet::Instruction(instruction) => instruction,
        };

        if instruction.is_untargeted() {
            debug!("untargeted downstream instruction dropped");
        } else if instruction.is_broadcast() {
            if let Err(e) = self.hub.push_to_all(&Packet::Instruction(instruction)) {
                warn!(error = %e, "downstream broadcast failed");
            }
        } else {
            let identity = instruction.to_id.clone();
            if let Err(e) = self
                .hub
                .push_to_identity(&identity, &Packet::Instruction(instruction))
            {
                warn!(error = %e, identity = %identity, "downstream unicast failed");
            }
        }
    }

    async fn forward_downstream(&self, instruction: Instruction) {
        let Some(queue) = &self.downstream else {
            warn!("no downstream queue configured, untargeted instruction dropped");
            return;
        };
        if let Err(e) = queue
            .enqueue(&self.forward_subject, Bytes::from(instruction.payload))
            .await
        {
            // fire-and-forget: log, no retry, connection unaffected
            warn!(error = %e, subject = %self.forward_subject, "downstream enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ConnHandle, Hub};
    use crate::packet::codec;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use tokio::time::timeout;
    use uuid::Uuid;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    struct QueueProbe {
        sent: mpsc::UnboundedSender<(String, Bytes)>,
    }

    #[async_trait]
    impl Downstream for QueueProbe {
        async fn enqueue(&self, subject: &str, payload: Bytes) -> Result<()> {
            self.sent.send((subject.to_string(), payload)).unwrap();
            Ok(())
        }
    }

    struct Fixture {
        handle: HubHandle,
        router: Router,
        queue: mpsc::UnboundedReceiver<(String, Bytes)>,
    }

    fn fixture() -> Fixture {
        let mut hub = Hub::new();
        hub.start();
        let handle = hub.handle();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let probe = Arc::new(QueueProbe { sent: queue_tx });
        let router = Router::new(handle.clone(), Some(probe), "herald.instruct.c2s");
        Fixture {
            handle,
            router,
            queue: queue_rx,
        }
    }

    struct TestConn {
        id: Uuid,
        outbound: mpsc::Receiver<Bytes>,
    }

    fn connect(handle: &HubHandle) -> TestConn {
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let (closed_tx, _closed_rx) = watch::channel(false);
        let id = Uuid::new_v4();
        handle
            .register(ConnHandle {
                id,
                outbound: outbound_tx,
                closed: closed_tx,
            })
            .unwrap();
        TestConn {
            id,
            outbound: outbound_rx,
        }
    }

    fn instruction(to_id: &str, payload: &[u8]) -> Instruction {
        Instruction {
            to_id: to_id.to_string(),
            payload: payload.to_vec(),
        }
    }

    async fn expect_instruction(conn: &mut TestConn, payload: &[u8]) {
        let frame = timeout(RECV_TIMEOUT, conn.outbound.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        match codec::decode(&frame).unwrap() {
            Packet::Instruction(ins) => assert_eq!(ins.payload, payload),
            other => panic!("expected instruction, got {other:?}"),
        }
    }

    fn expect_silent(conn: &mut TestConn) {
        assert!(conn.outbound.try_recv().is_err());
    }

    /// Connections A and B authenticate as "u1", C as "u2": targeted,
    /// broadcast and untargeted instructions land exactly where they
    /// should.
    #[tokio::test]
    async fn routing_example_scenario() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);
        let mut b = connect(&fx.handle);
        let mut c = connect(&fx.handle);
        fx.handle.bind(a.id, "u1".into(), 1).unwrap();
        fx.handle.bind(b.id, "u1".into(), 1).unwrap();
        fx.handle.bind(c.id, "u2".into(), 1).unwrap();

        fx.router.route_client(instruction("u1", b"to-u1")).await;
        expect_instruction(&mut a, b"to-u1").await;
        expect_instruction(&mut b, b"to-u1").await;

        fx.router.route_client(instruction("ALL", b"to-all")).await;
        expect_instruction(&mut a, b"to-all").await;
        expect_instruction(&mut b, b"to-all").await;
        expect_instruction(&mut c, b"to-all").await;

        fx.router.route_client(instruction("", b"to-queue")).await;
        let (subject, payload) = fx.queue.recv().await.unwrap();
        assert_eq!(subject, "herald.instruct.c2s");
        assert_eq!(payload, Bytes::from_static(b"to-queue"));
        assert!(fx.queue.try_recv().is_err(), "forwarded more than once");

        expect_silent(&mut a);
        expect_silent(&mut b);
        expect_silent(&mut c);
    }

    #[tokio::test]
    async fn broadcast_target_is_case_insensitive() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);

        fx.router.route_client(instruction("all", b"lower")).await;
        expect_instruction(&mut a, b"lower").await;
    }

    #[tokio::test]
    async fn unicast_to_offline_identity_is_silent() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);
        fx.handle.bind(a.id, "u1".into(), 1).unwrap();

        fx.router.route_client(instruction("ghost", b"lost")).await;

        expect_silent(&mut a);
        assert!(fx.queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_untargeted_instruction_never_reenters_queue() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);

        fx.router
            .route_server(Packet::Instruction(instruction("", b"loop")));

        expect_silent(&mut a);
        assert!(fx.queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_heartbeat_is_ignored() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);

        fx.router.route_server(Packet::Heartbeat(crate::packet::Heartbeat {
            id: "u1".into(),
            ts: 1,
            sign: String::new(),
        }));

        expect_silent(&mut a);
    }

    #[tokio::test]
    async fn server_broadcast_reaches_clients() {
        let mut fx = fixture();
        let mut a = connect(&fx.handle);
        let mut b = connect(&fx.handle);

        fx.router
            .route_server(Packet::Instruction(instruction("ALL", b"announce")));

        expect_instruction(&mut a, b"announce").await;
        expect_instruction(&mut b, b"announce").await;
    }
}
