//! Lesson generation pipeline: compose prompt → call backends with retry and
//! fallback → salvage JSON → schema check.
//!
//! Backend order is the configured `[[backends]]` order. Each target gets the
//! full retry budget for overload errors; any other failure stops the whole
//! pipeline without trying the next target. Bad model output is never retried
//! here, since every regeneration costs quota.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::backend::{is_overloaded, BackendError, TextGenerator};
use crate::config::{AppConfig, Prompts};
use crate::domain::LessonDocument;
use crate::error::{ApiError, ApiResult};
use crate::prompt::{compose, LessonPrompt};
use crate::protocol::AnalyzeRequest;
use crate::retry::{retry, RetryPolicy};
use crate::util::trunc_for_log;

/// `Retry-After` suggested to callers once every backend stayed overloaded.
pub const OVERLOADED_RETRY_AFTER_SECS: u64 = 30;

/// Raw model output longer than this is cut in error logs.
pub const RAW_LOG_MAX_CHARS: usize = 8_000;

#[derive(Clone)]
pub struct LessonProxy {
  generators: Vec<Arc<dyn TextGenerator>>,
  policy: RetryPolicy<BackendError>,
  prompts: Prompts,
  prompt_budget_chars: usize,
}

impl LessonProxy {
  /// Returns `None` when there is nothing to call.
  pub fn new(cfg: &AppConfig, generators: Vec<Arc<dyn TextGenerator>>) -> Option<Self> {
    if generators.is_empty() {
      return None;
    }
    Some(Self {
      generators,
      policy: RetryPolicy::from_cfg(&cfg.retry, is_overloaded),
      prompts: cfg.prompts.clone(),
      prompt_budget_chars: cfg.limits.prompt_budget_chars,
    })
  }

  pub fn backend_count(&self) -> usize {
    self.generators.len()
  }

  pub fn backend_labels(&self) -> Vec<String> {
    self.generators.iter().map(|g| g.label()).collect()
  }

  /// Longest a request can spend in backoff sleeps when every target stays overloaded.
  pub fn max_backoff(&self) -> std::time::Duration {
    self.policy.max_total_delay().saturating_mul(self.generators.len() as u32)
  }

  #[instrument(level = "info", skip(self, req), fields(content_chars = req.content_text.chars().count(), has_prompt = req.user_prompt.is_some()))]
  pub async fn generate_lesson(&self, req: &AnalyzeRequest) -> ApiResult<LessonDocument> {
    let prompt = compose(&self.prompts, &req.content_text, req.user_prompt.as_deref(), self.prompt_budget_chars);
    if prompt.truncated {
      info!(target: "lesson", budget = self.prompt_budget_chars, "Source text truncated to prompt budget");
    }
    let raw = self.call_backends(&prompt).await?;
    parse_lesson(&raw)
  }

  async fn call_backends(&self, prompt: &LessonPrompt) -> ApiResult<String> {
    for generator in &self.generators {
      let label = generator.label();
      match retry(&self.policy, &label, |_| generator.generate(prompt)).await {
        Ok(text) => {
          info!(target: "lesson", backend = %label, text_len = text.len(), "Backend produced output");
          return Ok(text);
        }
        Err(e) if e.exhausted => {
          warn!(target: "lesson", backend = %label, attempts = e.attempts, error = %e.error, "Backend stayed overloaded; falling back");
        }
        Err(e) => {
          error!(target: "lesson", backend = %label, attempts = e.attempts, error = %e.error, "Backend call failed");
          return Err(ApiError::UpstreamError);
        }
      }
    }
    error!(target: "lesson", backends = self.generators.len(), "All backends overloaded");
    Err(ApiError::UpstreamOverloaded { retry_after_secs: OVERLOADED_RETRY_AFTER_SECS })
  }
}

/// Parse model text as JSON. If strict parsing fails, retry on the span from the
/// first `{` to the last `}` to drop commentary or code fences around the object.
pub fn salvage_json(raw: &str) -> Option<Value> {
  let trimmed = raw.trim();
  if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
    return Some(v);
  }
  let start = trimmed.find('{')?;
  let end = trimmed.rfind('}')?;
  if end <= start {
    return None;
  }
  serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

/// Raw model text → validated lesson. The raw text is logged on failure and
/// never placed in the returned error.
pub fn parse_lesson(raw: &str) -> ApiResult<LessonDocument> {
  let Some(value) = salvage_json(raw) else {
    error!(target: "lesson", raw_len = raw.len(), raw = %trunc_for_log(raw, RAW_LOG_MAX_CHARS), "Model output is not JSON");
    return Err(ApiError::UpstreamBadOutput);
  };
  match LessonDocument::from_value(value) {
    Ok(doc) => {
      let incomplete = doc.incomplete_vocab_count();
      if incomplete > 0 {
        warn!(target: "lesson", incomplete, "Vocabulary entries missing translations");
      }
      Ok(doc)
    }
    Err(reason) => {
      error!(target: "lesson", %reason, raw_len = raw.len(), raw = %trunc_for_log(raw, RAW_LOG_MAX_CHARS), "Model output failed schema check");
      Err(ApiError::UpstreamBadOutput)
    }
  }
}
