//! HTTP/WebSocket server for Herald

pub mod http;
pub mod websocket;

pub use http::{run, AppState};
