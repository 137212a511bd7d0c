//! Router assembly: analyze endpoint, health probe, CORS, body limit and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, Method,
    },
    routing::{get, post, MethodRouter},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// CORS policy applied to every response, errors included. Preflight
/// (`OPTIONS`) requests are answered here and never reach a handler.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            CONTENT_TYPE,
        ])
}

fn analyze_route() -> MethodRouter<Arc<AppState>> {
    post(http::analyze_file).fallback(http::method_not_allowed)
}

/// Build the application router with:
/// - `POST /analyze-file` (also under `/functions/v1/`, the hosted-function path)
/// - `GET /api/v1/health`
/// - `{"error": ...}` 405 for any other verb on the analyze routes
/// - request body ceiling derived from the max content length
/// - CORS + HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit_bytes();

    Router::new()
        .route("/analyze-file", analyze_route())
        .route("/functions/v1/analyze-file", analyze_route())
        .route("/api/v1/health", get(http::http_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(cors_layer())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
