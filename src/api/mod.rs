//! HTTP API for starting runs and polling their progress

pub mod error;
mod handlers;

pub use error::{ApiError, ErrorBody};
pub use handlers::{RunAccepted, RunRequest, StatusUpdateRequest};

use crate::credentials::CredentialVault;
use crate::workflow::WorkflowEngine;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared handler state
pub struct AppState {
    pub engine: WorkflowEngine,
    pub credentials: Arc<CredentialVault>,
}

/// Build the API router
pub fn router(engine: WorkflowEngine, credentials: Arc<CredentialVault>) -> Router {
    let state = Arc::new(AppState {
        engine,
        credentials,
    });

    Router::new()
        .route("/health", get(handlers::health))
        .route("/runs", post(handlers::start_run).get(handlers::list_runs))
        .route("/runs/{run_id}", get(handlers::get_run))
        .route("/runs/{run_id}/status", post(handlers::update_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API server bound to one address
pub struct ApiServer {
    addr: SocketAddr,
    router: Router,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, engine: WorkflowEngine, credentials: Arc<CredentialVault>) -> Self {
        Self {
            addr,
            router: router(engine, credentials),
        }
    }

    /// Serve until the process is stopped
    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Starting patchpilot API on {}", listener.local_addr()?);
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}
