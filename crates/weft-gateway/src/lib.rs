// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP/SSE gateway — a thin adapter over the bus.
//!
//! # Routes
//!
//! | Route | Role |
//! |---|---|
//! | `POST /send` | Validate an envelope and fan it out per the routing rules |
//! | `GET /stream/:conversation_id` | SSE subscription to `stream:<id>` |
//! | `GET /health` | Liveness |
//! | `GET /ready` | Bus probe read; 503 when the transport is down |
//! | `GET /conversations`, `/agents`, `/graph/:id` | Observer index summaries |
//!
//! The gateway owns no state beyond the shared bus handle and the observer
//! index; everything user-visible flows through bus topics so any number
//! of gateway replicas can serve the same deployment.

mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use weft_bus::{Bus, ObserverIndex};

#[derive(Clone)]
pub struct GatewayState {
    pub bus: Arc<dyn Bus>,
    pub index: ObserverIndex,
    /// SSE frames above this size are replaced by a `truncated` marker.
    pub max_event_bytes: usize,
}

impl GatewayState {
    pub fn new(bus: Arc<dyn Bus>, index: ObserverIndex, max_event_bytes: usize) -> Self {
        Self {
            bus,
            index,
            max_event_bytes,
        }
    }
}

/// Assemble the router.
pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/send", post(routes::send))
        .route("/stream/:conversation_id", get(routes::stream))
        .route("/conversations", get(routes::conversations))
        .route("/agents", get(routes::agents))
        .route("/graph/:conversation_id", get(routes::graph))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(bind: &str, state: GatewayState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "starting HTTP gateway");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
