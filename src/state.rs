//! Application state shared by all handlers.
//!
//! This module owns:
//!   - the loaded configuration
//!   - the rate limiter (the only mutable cross-request state)
//!   - the optional lesson proxy (absent when no backend has a credential)

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::backend::{build_generators, TextGenerator};
use crate::config::AppConfig;
use crate::ingress::RateLimiter;
use crate::proxy::LessonProxy;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub limiter: RateLimiter,
    pub proxy: Option<LessonProxy>,
}

impl AppState {
    /// Build state from config: rate limiter plus real HTTP backends.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: AppConfig) -> Self {
        let generators = match build_generators(&config) {
            Ok(g) => g,
            Err(e) => {
                error!(target: "kewen_backend", error = %e, "Failed to initialize backends");
                Vec::new()
            }
        };
        Self::with_generators(config, generators)
    }

    /// Same as `new` but with caller-supplied generators.
    pub fn with_generators(config: AppConfig, generators: Vec<Arc<dyn TextGenerator>>) -> Self {
        let limiter = RateLimiter::in_memory(config.rate_window(), config.rate_limit.max_requests);
        Self::with_parts(config, limiter, generators)
    }

    pub fn with_parts(config: AppConfig, limiter: RateLimiter, generators: Vec<Arc<dyn TextGenerator>>) -> Self {
        let proxy = LessonProxy::new(&config, generators);
        match &proxy {
            Some(p) => info!(target: "kewen_backend", backends = ?p.backend_labels(), max_backoff = ?p.max_backoff(), "Lesson generation enabled"),
            None => error!(target: "kewen_backend", "No backend configured (set GEMINI_API_KEY or OPENAI_API_KEY); analyze requests will fail"),
        }
        info!(
            target: "kewen_backend",
            max_content_chars = config.limits.max_content_chars,
            prompt_budget_chars = config.limits.prompt_budget_chars,
            rate_window_secs = config.rate_limit.window_secs,
            rate_max_requests = config.rate_limit.max_requests,
            retry_max_attempts = config.retry.max_attempts,
            "Service limits"
        );
        Self { config: Arc::new(config), limiter, proxy }
    }
}
