//! Downstream subscriber
//!
//! Consumes server-originated packets from the deliver subject and hands
//! them to the router, closing the loop from asynchronous business
//! processing back to connected clients.

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::packet::codec;
use crate::router::Router;

use super::NatsClient;

/// Spawn the subscription task for server-originated packets.
pub fn spawn_subscriber(
    nats: NatsClient,
    subject: String,
    router: Arc<Router>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscription = match nats.subscribe(&subject).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(subject = %subject, error = %e, "downstream subscription failed");
                return;
            }
        };

        info!(subject = %subject, "downstream subscriber started");

        while let Some(message) = subscription.next().await {
            match codec::decode(&message.payload) {
                Ok(packet) => router.route_server(packet),
                Err(e) => {
                    warn!(subject = %subject, error = %e, "undecodable downstream message dropped");
                }
            }
        }

        warn!(subject = %subject, "downstream subscription ended");
    })
}
