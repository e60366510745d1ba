//! Herald - realtime WebSocket connection hub

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::{
    config::Args,
    hub::Hub,
    nats::{spawn_subscriber, NatsClient},
    router::{Downstream, Router},
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("herald={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Herald - realtime connection hub");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("Forward subject: {}", args.forward_subject);
    info!("Deliver subject: {}", args.deliver_subject);
    info!("Read deadline: {}s, queue capacity: {}", args.read_timeout_secs, args.queue_capacity);
    info!("======================================");

    // Connect to NATS (optional in dev mode)
    let nats = match NatsClient::new(&args.nats, &format!("herald-{}", args.node_id)).await {
        Ok(client) => {
            info!("NATS connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, continuing without): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // One hub per process, started once; everything else holds handles
    let mut hub = Hub::new();
    let hub_task = hub.start().expect("hub started twice at bootstrap");
    let handle = hub.handle();

    let downstream = nats
        .clone()
        .map(|client| Arc::new(client) as Arc<dyn Downstream>);
    let router = Arc::new(Router::new(
        handle.clone(),
        downstream,
        args.forward_subject.clone(),
    ));

    // Deliver server-originated packets from the queue back to clients
    let _subscriber_handle = if let Some(ref client) = nats {
        Some(spawn_subscriber(client.clone(), args.deliver_subject.clone(), Arc::clone(&router)))
    } else {
        warn!("Downstream subscriber not started (no NATS connection)");
        None
    };

    // Create application state
    let state = Arc::new(server::AppState::new(args, nats, handle.clone(), router));

    // Run the server until a shutdown signal arrives
    tokio::select! {
        result = server::run(Arc::clone(&state)) => {
            if let Err(e) = result {
                error!("Server error: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, closing connections");
            let _ = handle.shutdown();
            let _ = hub_task.await;
        }
    }

    Ok(())
}
