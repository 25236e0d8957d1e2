//! Parley server library logic.

pub mod accumulator;
pub mod api;
pub mod api_sse;
pub mod config;
pub mod queue;
pub mod session;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use session::{SessionCollaborators, SessionSettings};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Vendor and agent collaborators every session is composed from.
    pub collaborators: SessionCollaborators,
    /// Per-session streaming settings.
    pub settings: SessionSettings,
    /// Flips to `true` when the server begins shutting down.
    pub shutdown: watch::Receiver<bool>,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stream", get(api_sse::get_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
