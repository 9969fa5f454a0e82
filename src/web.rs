//! HTTP collaborator
//!
//! The dashboard, templates, authentication, and the aggregate query layer
//! live outside this service; what remains here is the listen socket the
//! deployment expects plus liveness and ingest-status endpoints. The query
//! layer's contract with the core is the store's read pool, the hour string
//! convention, and the "unrouted" router sentinel.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::Store;
use crate::metrics::{MetricsSnapshot, SharedMetrics};

pub struct AppState {
    pub store: Store,
    pub metrics: SharedMetrics,
    pub log_format: &'static str,
}

/// Binds the listen address and serves until the token fires. A bind
/// failure or premature server exit is returned so the caller can trip the
/// root cancellation.
pub async fn serve(listen: &str, state: AppState, token: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(status))
        .with_state(Arc::new(state));

    let addr = normalize_listen_addr(listen);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("http server failed")
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct StatusResponse {
    log_format: &'static str,
    total_requests: i64,
    ingest: MetricsSnapshot,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let total_requests = state.store.total_requests().await.unwrap_or(0);
    Json(StatusResponse {
        log_format: state.log_format,
        total_requests,
        ingest: state.metrics.snapshot(),
    })
}

/// Accepts the conventional `:8080` shorthand as well as a full address.
fn normalize_listen_addr(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}
