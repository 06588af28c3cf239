//! HTTP routing for the SPA server.
//!
//! The routing table is tiny by design: a liveness endpoint at `/ping`, and
//! everything else falls through to the SPA static-file handler. Permissive
//! CORS headers are applied to all responses, and a request-ID middleware
//! wraps the whole stack for log correlation.

pub mod ping;
pub mod spa;

use axum::{middleware, routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Creates the Axum router: liveness endpoint plus SPA fallback.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping::ping))
        .fallback(get(spa::serve))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_layer))
}
