//! WebSocket upgrade handling
//!
//! Upgrades `/ws` requests and hands the established stream to the
//! connection module. The maximum frame size is enforced here, at the
//! protocol layer, so oversized frames fail the read before any decode.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{error, info};

use crate::connection;
use crate::server::AppState;

/// Handle a WebSocket upgrade request for the hub.
pub async fn handle_upgrade(
    state: Arc<AppState>,
    mut req: Request<Incoming>,
    addr: SocketAddr,
) -> Response<Full<Bytes>> {
    let config = WebSocketConfig {
        max_message_size: Some(state.args.max_frame_bytes),
        max_frame_size: Some(state.args.max_frame_bytes),
        ..Default::default()
    };

    match hyper_tungstenite::upgrade(&mut req, Some(config)) {
        Ok((response, websocket)) => {
            info!("WebSocket upgrade from {}", addr);

            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => connection::serve(state, ws).await,
                    Err(e) => error!("WebSocket handshake failed for {}: {:?}", addr, e),
                }
            });

            response.map(|_| Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error for {}: {:?}", addr, e);
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from(format!(
                    "WebSocket upgrade failed: {e}"
                ))))
                .unwrap()
        }
    }
}
