// HTTP server for the relay endpoint
//
// Routes:
// - GET /api/proxies/list  whitelisted, quota-gated upstream relay
// - GET /metrics           Prometheus text
// - GET /health            liveness

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::relay::RelayHandler;

/// Path of the relay route
pub const RELAY_PATH: &str = "/api/proxies/list";

/// Build the relay router
pub fn router(handler: Arc<RelayHandler>) -> Router {
    Router::new()
        .route(RELAY_PATH, get(relay_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Serve the relay on `addr` until Ctrl-C
pub async fn start_relay_server(addr: SocketAddr, handler: Arc<RelayHandler>) -> Result<()> {
    metrics::init();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind relay server on {}", addr))?;

    info!("Relay listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(handler).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Relay server error")?;

    info!("Relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Relay endpoint handler
async fn relay_handler(
    State(handler): State<Arc<RelayHandler>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    match handler.handle(&peer.to_string()).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
