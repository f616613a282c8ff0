// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the daemon: Prometheus scrape endpoint and the current
//! reconciled view as JSON.

use crate::orchestrator::{SyncOrchestrator, SyncView};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const METRICS_PATH: &str = "/metrics";
pub const VIEW_PATH: &str = "/proposals";

#[derive(Clone)]
pub struct ServerState {
    registry: Registry,
    orchestrator: Arc<SyncOrchestrator>,
}

impl ServerState {
    pub fn new(registry: Registry, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .route(VIEW_PATH, get(view_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<ServerState>) -> (StatusCode, String) {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn view_handler(State(state): State<ServerState>) -> Json<SyncView> {
    Json(state.orchestrator.view())
}

/// Bind `addr` and serve until `cancel` fires
pub async fn start_server(
    addr: SocketAddr,
    state: ServerState,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Server] Listening on {}", addr);

    let app = router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!("[Server] Server error: {:?}", e);
        }
    }))
}
