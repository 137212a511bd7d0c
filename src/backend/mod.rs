//! Text-generation backends behind one adapter trait.
//!
//! Each configured `[[backends]]` entry becomes one `TextGenerator` bound to a
//! provider + model. The proxy walks them in order; see `proxy.rs`.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{AppConfig, Provider};
use crate::prompt::LessonPrompt;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiGenerator;
pub use openai::OpenAiGenerator;

const USER_AGENT_VALUE: &str = concat!("kewen-backend/", env!("CARGO_PKG_VERSION"));

/// Failure of one backend call. `status` is the upstream HTTP status when there was one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
  pub status: Option<u16>,
  pub message: String,
}

impl BackendError {
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self { status: Some(status), message: message.into() }
  }

  pub fn transport(message: impl Into<String>) -> Self {
    Self { status: None, message: message.into() }
  }
}

impl fmt::Display for BackendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(s) => write!(f, "HTTP {}: {}", s, self.message),
      None => f.write_str(&self.message),
    }
  }
}

impl std::error::Error for BackendError {}

/// The only retryable class: HTTP 503 whose message says the model is overloaded.
pub fn is_overloaded(e: &BackendError) -> bool {
  e.status == Some(503) && e.message.to_ascii_lowercase().contains("overload")
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
  /// `provider/model`, for logs.
  fn label(&self) -> String;

  /// One JSON-mode completion; returns the raw model text.
  async fn generate(&self, prompt: &LessonPrompt) -> Result<String, BackendError>;
}

/// Build the ordered generator list. Targets without a credential are skipped.
pub fn build_generators(cfg: &AppConfig) -> Result<Vec<Arc<dyn TextGenerator>>, String> {
  let client = reqwest::Client::builder()
    .timeout(cfg.upstream_timeout())
    .user_agent(USER_AGENT_VALUE)
    .build()
    .map_err(|e| format!("failed to build HTTP client: {}", e))?;

  let mut out: Vec<Arc<dyn TextGenerator>> = Vec::new();
  for target in &cfg.backends {
    let Some(key) = cfg.secrets.key_for(target.provider) else {
      warn!(target: "kewen_backend", provider = %target.provider, model = %target.model, "No API key for backend; skipping");
      continue;
    };
    let generator: Arc<dyn TextGenerator> = match target.provider {
      Provider::Openai => Arc::new(OpenAiGenerator::new(
        client.clone(),
        key,
        &cfg.upstream.openai_base_url,
        &target.model,
      )),
      Provider::Gemini => Arc::new(GeminiGenerator::new(
        client.clone(),
        key,
        &cfg.upstream.gemini_base_url,
        &target.model,
      )),
    };
    info!(target: "kewen_backend", backend = %generator.label(), "Backend enabled");
    out.push(generator);
  }
  Ok(out)
}

/// Try to extract a clean error message from `{"error": {"message": ...}}`,
/// the shape both OpenAI and Gemini use.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

/// Map a non-success upstream response to a `BackendError`.
pub(crate) async fn error_from_response(res: reqwest::Response) -> BackendError {
  let status = res.status().as_u16();
  let body = res.text().await.unwrap_or_default();
  let msg = extract_error_message(&body).unwrap_or(body);
  BackendError::http(status, msg)
}
