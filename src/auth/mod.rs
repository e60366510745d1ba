//! Authentication for Herald
//!
//! Connections start anonymous; a signed heartbeat packet binds an
//! identity to the connection. The validator checks the shared-secret
//! signature and timestamp freshness; the hub enforces identity
//! immutability once bound.

mod validator;

pub use validator::{sign, SignatureValidator};
