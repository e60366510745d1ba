//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. The only upgrade
//! path is `/ws`; everything else is liveness/version probes.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::SignatureValidator;
use crate::config::Args;
use crate::hub::HubHandle;
use crate::nats::NatsClient;
use crate::router::Router;
use crate::server::websocket;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub nats: Option<NatsClient>,
    pub hub: HubHandle,
    pub validator: SignatureValidator,
    pub router: Arc<Router>,
}

impl AppState {
    pub fn new(args: Args, nats: Option<NatsClient>, hub: HubHandle, router: Arc<Router>) -> Self {
        let validator = SignatureValidator::new(args.hub_secret(), args.heartbeat_window_secs);
        Self {
            args,
            nats,
            hub,
            validator,
            router,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Herald listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure default secret in use");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // The hub entry point: WebSocket upgrade only
        (Method::GET, "/ws") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                websocket::handle_upgrade(state, req, addr).await
            } else {
                bad_request_response("WebSocket upgrade required")
            }
        }

        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => health_check(&state),

        // Version info for deployment verification
        (Method::GET, "/version") => version_info(),

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Liveness information for probes
#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    status: &'static str,
    version: &'static str,
    mode: String,
    node_id: String,
    /// Current size of the live-connection set
    clients: usize,
    /// Whether the downstream queue is wired up
    downstream_connected: bool,
    timestamp: String,
}

/// Handle liveness probe (/health, /healthz)
fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        mode: if state.args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: state.args.node_id.to_string(),
        clients: state.hub.connection_count(),
        downstream_connected: state.nats.is_some(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    json_response(StatusCode::OK, body)
}

/// Version information for deployment verification
#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    commit: &'static str,
    build_time: &'static str,
    service: &'static str,
}

/// Handle version endpoint (/version)
fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "herald",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown"}"#.to_string());

    json_response(StatusCode::OK, body)
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn bad_request_response(msg: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::BAD_REQUEST,
        format!(r#"{{"error":"{msg}"}}"#),
    )
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        format!(r#"{{"error":"Not found: {path}"}}"#),
    )
}
