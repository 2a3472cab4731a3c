//! HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use kaas_engine::Engine;

use crate::error::Error;
use crate::handlers::{app_status, deploy_app, deploy_database, list_apps};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// The engine every route calls into
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Wrap an engine for sharing across requests
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// Build the API router
///
/// Collection routes answer with and without the trailing slash.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/apps/", post(deploy_app).get(list_apps))
        .route("/api/apps", post(deploy_app).get(list_apps))
        .route("/api/apps/{name}", get(app_status))
        .route("/api/dbs/", post(deploy_database))
        .route("/api/dbs", post(deploy_database))
        .with_state(state)
}

/// Serve the API on `addr` until ctrl-c
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, namespace = %state.engine.config().namespace, "Starting KaaS API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Server(format!("server error: {}", e)))?;

    info!("KaaS API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
}
