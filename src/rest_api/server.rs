//! Axum HTTP server for metrics and probes

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::SchedulerState;
use crate::{Error, Result};

use super::handlers;

/// Shared state handed to the handlers
#[derive(Clone)]
pub struct ServerState {
    pub scheduler: watch::Receiver<SchedulerState>,
}

impl ServerState {
    pub fn new(scheduler: watch::Receiver<SchedulerState>) -> Self {
        Self { scheduler }
    }
}

pub fn router(metrics_path: &str, state: ServerState) -> Result<Router> {
    if !metrics_path.starts_with('/') {
        return Err(Error::ConfigError(format!(
            "Metrics path must start with '/', got {:?}",
            metrics_path
        )));
    }

    Ok(Router::new()
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::ready))
        .route(metrics_path, get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Serve metrics and probes until `shutdown` is cancelled
pub async fn run_server(
    addr: SocketAddr,
    metrics_path: &str,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(metrics_path, state)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Metrics server listening on {} (metrics at {})", addr, metrics_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    info!("Metrics server stopped");
    Ok(())
}
