//! Herald - realtime WebSocket connection hub
//!
//! Herald accepts persistent bidirectional WebSocket connections,
//! authenticates each connection's identity with a signed heartbeat, and
//! routes instruction packets to one identity (fanned out across its live
//! connections), to every connected client, or onto a NATS queue when no
//! destination is known.
//!
//! ## Components
//!
//! - **Hub**: single registry actor owning the live-connection set and
//!   the identity index
//! - **Connection**: per-socket read/write loops over a bounded outbound
//!   queue
//! - **Packet/Codec**: MessagePack-primary, JSON-fallback wire format
//! - **Auth**: shared-secret heartbeat signature validation
//! - **Router**: unicast / broadcast / downstream-queue dispatch

pub mod auth;
pub mod config;
pub mod connection;
pub mod hub;
pub mod nats;
pub mod packet;
pub mod router;
pub mod server;
pub mod types;

pub use config::Args;
pub use hub::{Hub, HubHandle};
pub use server::{run, AppState};
pub use types::{HeraldError, Result};
