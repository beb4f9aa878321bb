//! Exchange Stream - Streaming API Client
//!
//! Connects to the exchange stream, keeps market (and optionally order and
//! race) subscriptions alive, and drains reconstructed books from the output
//! queue. Health and Prometheus metrics are served over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use crossbeam::channel::Receiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use exchange_stream::{
    metrics, Batch, Config, Listener, OutputQueue, Resource, SharedListener, StreamManager, StreamSettings,
    SubscriptionKind,
};

/// Application state shared with the HTTP handlers
struct AppState {
    listener: SharedListener,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    init_logging(&config);

    info!("Starting Exchange Stream client");
    info!(
        host = %config.host,
        market_ids = ?config.market_ids,
        data_fields = ?config.data_fields,
        lightweight = config.lightweight,
        "Configuration loaded"
    );

    let (publisher, receiver) = OutputQueue::unbounded();
    let listener = Listener::new(publisher, StreamSettings::from(config.as_ref())).into_shared();

    // Consumer thread draining the output queue
    thread::spawn(move || consume(receiver));

    let state = Arc::new(AppState {
        listener: listener.clone(),
    });
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(state, health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    let mut manager = StreamManager::new(config, listener);
    let shutdown = manager.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    manager.run().await?;
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .init();
    }
}

/// Log a summary of every published batch
fn consume(receiver: Receiver<Batch>) {
    for batch in receiver.iter() {
        for resource in &batch {
            match resource {
                Resource::MarketBook(book) => debug!(
                    market_id = %book.market_id,
                    status = ?book.status,
                    total_matched = ?book.total_matched,
                    runners = book.runners.len(),
                    "Market book"
                ),
                Resource::CurrentOrders(orders) => debug!(
                    market_id = %orders.market_id,
                    orders = orders.current_orders.len(),
                    "Current orders"
                ),
                Resource::Race(race) => debug!(market_id = %race.market_id, "Race"),
                Resource::Raw(_) => debug!(market_id = ?resource.market_id(), "Raw update"),
            }
        }
    }
    info!("Output queue closed");
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let listener = state.listener.read();
    let streams: serde_json::Map<String, serde_json::Value> = [
        SubscriptionKind::Market,
        SubscriptionKind::Order,
        SubscriptionKind::Race,
    ]
    .into_iter()
    .filter(|kind| listener.has_stream(*kind))
    .map(|kind| {
        (
            kind.to_string(),
            serde_json::json!({
                "uniqueId": listener.unique_id(kind),
                "clk": listener.clk(kind),
                "caches": listener.cache_count(kind),
                "updatesProcessed": listener.updates_processed(kind),
            }),
        )
    })
    .collect();

    Json(serde_json::json!({
        "status": if listener.status().is_some() { "degraded" } else { "healthy" },
        "component": "exchange-stream",
        "connectionId": listener.connection_id(),
        "connectionsAvailable": listener.connections_available(),
        "streams": streams,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}
