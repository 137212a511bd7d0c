//! Kewen · lesson generation backend
//!
//! - Axum HTTP API: `POST /analyze-file`, `GET /api/v1/health`
//! - Gemini and/or OpenAI backends with retry + fallback
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   GEMINI_API_KEY     : enables Gemini backends
//!   OPENAI_API_KEY     : enables OpenAI backends
//!   GEMINI_BASE_URL    : default "https://generativelanguage.googleapis.com/v1beta"
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   KEWEN_CONFIG_PATH  : path to TOML config (limits, rate limit, retry, backend order, prompts)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::info;

use kewen_backend::config::AppConfig;
use kewen_backend::routes::build_router;
use kewen_backend::state::AppState;
use kewen_backend::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = AppConfig::load();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

  let state = Arc::new(AppState::new(config));
  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "kewen_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "kewen_backend", "HTTP server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "kewen_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "kewen_backend", "Shutdown signal received");
}
