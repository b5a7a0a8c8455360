//! API Routes
//!
//! Configures the Axum router for the operator endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, health_handler, persist_handler, reset_stats_handler, restore_handler,
    stats_handler, AppState,
};

/// Creates the operator router.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler).delete(reset_stats_handler))
        .route("/entries", delete(clear_handler))
        .route("/persist", post(persist_handler))
        .route("/restore", post(restore_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
