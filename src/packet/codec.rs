//! Dual-encoding frame codec
//!
//! Decoding tries MessagePack first, then falls back to JSON so that
//! browser and script clients can speak the protocol without a MessagePack
//! library. Encoding always emits MessagePack with named fields (the JSON
//! fallback is an inbound convenience only).

use crate::packet::Packet;
use crate::types::{HeraldError, Result};

/// Encode a packet to the primary binary encoding.
///
/// Fields are written as named map entries so the discriminant survives
/// the round trip.
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(packet)?)
}

/// Decode a frame, trying MessagePack then JSON.
///
/// Returns a [`HeraldError::Decode`] carrying both failures when neither
/// encoding matches.
pub fn decode(frame: &[u8]) -> Result<Packet> {
    let primary = match rmp_serde::from_slice::<Packet>(frame) {
        Ok(packet) => return Ok(packet),
        Err(e) => e,
    };

    match serde_json::from_slice::<Packet>(frame) {
        Ok(packet) => Ok(packet),
        Err(fallback) => Err(HeraldError::Decode(format!(
            "not MessagePack ({primary}) nor JSON ({fallback})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Heartbeat, Instruction};

    fn heartbeat() -> Packet {
        Packet::Heartbeat(Heartbeat {
            id: "u1".to_string(),
            ts: 1_700_000_000,
            sign: "ab".repeat(32),
        })
    }

    #[test]
    fn primary_encoding_round_trips() {
        let packet = heartbeat();
        let frame = encode(&packet).unwrap();
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn json_fallback_is_accepted() {
        let frame = br#"{"type":"instruction","to_id":"u2","payload":[1,2,3]}"#;
        let packet = decode(frame).unwrap();
        assert_eq!(
            packet,
            Packet::Instruction(Instruction {
                to_id: "u2".to_string(),
                payload: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn json_heartbeat_decodes() {
        let frame = br#"{"type":"heartbeat","id":"u1","ts":1700000000,"sign":"deadbeef"}"#;
        match decode(frame).unwrap() {
            Packet::Heartbeat(hb) => {
                assert_eq!(hb.id, "u1");
                assert_eq!(hb.ts, 1_700_000_000);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn garbage_fails_both_decoders() {
        let err = decode(b"\x00\x01 not a packet").unwrap_err();
        assert!(matches!(err, HeraldError::Decode(_)));
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let frame = br#"{"type":"telemetry","data":[]}"#;
        assert!(decode(frame).is_err());
    }
}
