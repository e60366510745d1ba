//! Configuration for Herald
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Herald - realtime WebSocket connection hub
#[derive(Parser, Debug, Clone)]
#[command(name = "herald")]
#[command(about = "Realtime connection hub with signed-heartbeat identity routing")]
pub struct Args {
    /// Unique node identifier for this hub instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (insecure default secret, NATS optional)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Shared secret for heartbeat signatures (required in production)
    #[arg(long, env = "HUB_SECRET")]
    pub hub_secret: Option<String>,

    /// Heartbeat timestamp freshness window in seconds
    #[arg(long, env = "HEARTBEAT_WINDOW_SECS", default_value = "3600")]
    pub heartbeat_window_secs: i64,

    /// Maximum inbound frame size in bytes
    #[arg(long, env = "MAX_FRAME_BYTES", default_value = "65536")]
    pub max_frame_bytes: usize,

    /// Read deadline in seconds; a silent peer is dropped after this long
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value = "60")]
    pub read_timeout_secs: u64,

    /// Write deadline in seconds for each transport write
    #[arg(long, env = "WRITE_TIMEOUT_SECS", default_value = "10")]
    pub write_timeout_secs: u64,

    /// Per-connection outbound queue capacity; a connection whose queue
    /// overflows is evicted as a slow consumer
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "256")]
    pub queue_capacity: usize,

    /// Subject for client instructions with no destination identity
    #[arg(long, env = "FORWARD_SUBJECT", default_value = "herald.instruct.c2s")]
    pub forward_subject: String,

    /// Subject carrying server-originated packets back to clients
    #[arg(long, env = "DELIVER_SUBJECT", default_value = "herald.instruct.s2c")]
    pub deliver_subject: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Get the effective heartbeat secret (uses a default in dev mode)
    pub fn hub_secret(&self) -> String {
        if self.dev_mode {
            self.hub_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.hub_secret
                .clone()
                .expect("HUB_SECRET is required in production mode")
        }
    }

    /// Read deadline for the connection read loop
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Write deadline for every transport write
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Keepalive ping period: 9/10 of the read deadline, so at least one
    /// ping lands inside every peer read-timeout window
    pub fn ping_period(&self) -> Duration {
        self.read_deadline() * 9 / 10
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.hub_secret.is_none() {
            return Err("HUB_SECRET is required in production mode".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("QUEUE_CAPACITY must be at least 1".to_string());
        }

        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err("timeouts must be non-zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["herald"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn production_requires_secret() {
        let parsed = args(&[]);
        assert!(parsed.validate().is_err());

        let parsed = args(&["--hub-secret", "s3cret"]);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn dev_mode_falls_back_to_default_secret() {
        let parsed = args(&["--dev-mode"]);
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.hub_secret(), "dev-only-insecure-secret");
    }

    #[test]
    fn ping_period_fits_inside_read_deadline() {
        let parsed = args(&["--dev-mode"]);
        assert!(parsed.ping_period() < parsed.read_deadline());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let parsed = args(&["--dev-mode", "--queue-capacity", "0"]);
        assert!(parsed.validate().is_err());
    }
}
