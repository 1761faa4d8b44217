//! Router configuration for the web server.

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = cors_layer(cors_origins);

    // Leave headroom above the upload cap for multipart framing so the
    // controller's size check is the one that rejects oversized files.
    let body_limit = state.max_upload_size as usize + 64 * 1024;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/statements/upload", post(handlers::upload_statement))
        .route("/statements", get(handlers::list_statements))
        .route("/statements/:id", get(handlers::get_statement))
        .route("/statements/:id", delete(handlers::delete_statement))
        .route("/statements/:id/status", get(handlers::get_status))
        .route("/statements/:id/csv", get(handlers::export_csv))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
}
