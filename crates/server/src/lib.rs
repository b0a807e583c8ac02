//! s3gate - HTTP file gateway in front of an S3-compatible object store

pub mod dto;
pub mod error;
mod handlers;
pub mod logging;
pub mod progress;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use s3gate_core::config::ServerConfig;
use s3gate_core::FileGateway;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State shared by every request
pub struct AppState {
    pub gateway: FileGateway,
    /// Draw a terminal progress bar for each upload
    pub show_progress: bool,
}

/// Build the HTTP application.
///
/// File and bucket routes are mounted under `server.api_path` and
/// `server.api_version` when those are set; `/` and `/health` always stay
/// at the root.
pub fn router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route(
            "/files",
            post(handlers::upload_file).get(handlers::list_files),
        )
        .route(
            "/files/{*name}",
            get(handlers::download_file).delete(handlers::delete_file),
        )
        .route("/buckets", post(handlers::create_bucket))
        .with_state(state);

    let base = server.base_path();
    let api = if base.is_empty() {
        api
    } else {
        Router::new().nest(&base, api)
    };

    Router::new()
        .route("/", get(handlers::home))
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(build_cors(&server.cors_allowed_clients))
        .layer(TraceLayer::new_for_http())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|val| val == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let list = origins
            .iter()
            .filter_map(|val| HeaderValue::from_str(val).ok())
            .collect::<Vec<_>>();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
