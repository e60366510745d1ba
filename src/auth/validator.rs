//! Heartbeat signature validation
//!
//! A heartbeat proves an identity claim with a shared-secret signature:
//! `sign = hex(sha256(id + ts + secret))`. The timestamp must fall inside
//! a freshness window around the server clock, so captured heartbeats age
//! out instead of replaying forever.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::packet::Heartbeat;
use crate::types::{HeraldError, Result};

/// Compute the expected signature for an identity claim.
pub fn sign(id: &str, ts: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(ts.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validates heartbeat identity claims against the shared secret.
pub struct SignatureValidator {
    secret: String,
    window_secs: i64,
}

impl SignatureValidator {
    /// Create a validator with the given shared secret and freshness
    /// window (seconds either side of the server clock).
    pub fn new(secret: impl Into<String>, window_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            window_secs,
        }
    }

    /// Validate a heartbeat against the current server clock.
    pub fn validate(&self, heartbeat: &Heartbeat) -> Result<()> {
        self.validate_at(heartbeat, Utc::now().timestamp())
    }

    /// Validate a heartbeat against an explicit clock reading.
    pub fn validate_at(&self, heartbeat: &Heartbeat, now: i64) -> Result<()> {
        if (now - heartbeat.ts).abs() > self.window_secs {
            return Err(HeraldError::Auth(format!(
                "stale heartbeat: ts={} now={}",
                heartbeat.ts, now
            )));
        }

        let expected = sign(&heartbeat.id, heartbeat.ts, &self.secret);
        if expected != heartbeat.sign {
            return Err(HeraldError::Auth(format!(
                "signature mismatch for identity {}",
                heartbeat.id
            )));
        }

        Ok(())
    }
}
