//! Packet model and wire codec
//!
//! A frame carries exactly one [`Packet`], encoded either as MessagePack
//! (the primary encoding, always used for outbound frames) or as JSON
//! (accepted inbound as a textual fallback). The `type` field is the
//! discriminant selecting the variant.

pub mod codec;

use serde::{Deserialize, Serialize};

/// Broadcast target accepted in [`Instruction::to_id`] (matched
/// case-insensitively).
pub const BROADCAST_TARGET: &str = "ALL";

/// Signed liveness and identity-claim packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Client-asserted identity key
    pub id: String,
    /// Unix timestamp (seconds) the heartbeat was signed at
    pub ts: i64,
    /// Hex sha256 over `id + ts + secret`
    pub sign: String,
}

/// Application payload packet, optionally addressed to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Destination identity; `""` means no known destination,
    /// [`BROADCAST_TARGET`] means every live connection
    pub to_id: String,
    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl Instruction {
    /// Whether this instruction addresses every live connection.
    pub fn is_broadcast(&self) -> bool {
        self.to_id.eq_ignore_ascii_case(BROADCAST_TARGET)
    }

    /// Whether this instruction carries no destination identity.
    pub fn is_untargeted(&self) -> bool {
        self.to_id.is_empty()
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    Heartbeat(Heartbeat),
    Instruction(Instruction),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_target_is_case_insensitive() {
        for to_id in ["ALL", "all", "All"] {
            let ins = Instruction {
                to_id: to_id.to_string(),
                payload: vec![],
            };
            assert!(ins.is_broadcast(), "{to_id} should be a broadcast target");
        }

        let ins = Instruction {
            to_id: "u1".to_string(),
            payload: vec![],
        };
        assert!(!ins.is_broadcast());
    }

    #[test]
    fn empty_target_is_untargeted() {
        let ins = Instruction {
            to_id: String::new(),
            payload: b"job".to_vec(),
        };
        assert!(ins.is_untargeted());
        assert!(!ins.is_broadcast());
    }
}
