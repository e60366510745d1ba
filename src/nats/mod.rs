//! NATS messaging for Herald
//!
//! The downstream queue: untargeted client instructions are published
//! here, and a subscription delivers server-originated packets back into
//! the hub.

mod client;
mod subscriber;

pub use client::NatsClient;
pub use subscriber::spawn_subscriber;
