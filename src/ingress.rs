//! Ingress guard: client identity, fixed-window rate limiting and body validation.
//!
//! All checks here run before any backend call is made.
//!
//! The in-memory store counts per process. Behind a load balancer each instance
//! keeps its own windows, so the effective ceiling is `max_requests * instances`.
//! Swap in a shared `RateLimitStore` to lift that.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::protocol::AnalyzeRequest;
use crate::util::char_len;

/// Client key headers, in priority order. The first non-empty value wins.
const CLIENT_KEY_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limit key from proxy headers. `x-forwarded-for` may carry a
/// chain; only its first entry (the original client) is used.
pub fn client_key(headers: &HeaderMap) -> String {
  CLIENT_KEY_HEADERS
    .iter()
    .filter_map(|h| headers.get(*h))
    .filter_map(|v| v.to_str().ok())
    .map(|s| s.split(',').next().unwrap_or(s).trim())
    .find(|s| !s.is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Validate the raw JSON body into an `AnalyzeRequest`. Pure, no side effects.
pub fn validate_body(body: &Value, max_chars: usize) -> Result<AnalyzeRequest, ApiError> {
  let obj = body
    .as_object()
    .ok_or_else(|| ApiError::BadRequest("Request body must be a JSON object".into()))?;

  let content = match obj.get("content_text") {
    None | Some(Value::Null) => {
      let msg = if obj.contains_key("file_url") {
        "Missing content_text (file_url is not supported; extract the text before uploading)"
      } else {
        "Missing content_text"
      };
      return Err(ApiError::BadRequest(msg.into()));
    }
    Some(Value::String(s)) => s.trim(),
    Some(_) => return Err(ApiError::BadRequest("content_text must be a string".into())),
  };
  if content.is_empty() {
    return Err(ApiError::BadRequest("content_text is empty".into()));
  }
  let len = char_len(content);
  if len > max_chars {
    return Err(ApiError::BadRequest(format!(
      "content_text is too long ({} characters, maximum is {})",
      len, max_chars
    )));
  }

  let user_prompt = match obj.get("user_prompt") {
    None | Some(Value::Null) => None,
    Some(Value::String(s)) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
    Some(_) => return Err(ApiError::BadRequest("user_prompt must be a string".into())),
  };

  Ok(AnalyzeRequest { content_text: content.to_string(), user_prompt })
}

/// Count within the current window after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
  pub count: u32,
  pub resets_in: Duration,
}

/// Counter backend for the rate limiter. Implementations may be approximate
/// under concurrent increments of the same key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
  async fn increment(&self, key: &str) -> WindowCount;
}

struct Window {
  started: Instant,
  count: u32,
}

/// Process-local fixed-window store.
pub struct MemoryRateLimitStore {
  window: Duration,
  entries: Mutex<HashMap<String, Window>>,
  prune_above: usize,
}

impl MemoryRateLimitStore {
  pub fn new(window: Duration) -> Self {
    Self::with_prune_threshold(window, 10_000)
  }

  /// Expired windows are swept whenever the table holds more than `prune_above` keys.
  pub fn with_prune_threshold(window: Duration, prune_above: usize) -> Self {
    Self { window, entries: Mutex::new(HashMap::new()), prune_above }
  }

  #[cfg(test)]
  async fn tracked_keys(&self) -> usize {
    self.entries.lock().await.len()
  }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
  async fn increment(&self, key: &str) -> WindowCount {
    let now = Instant::now();
    let mut entries = self.entries.lock().await;

    if entries.len() > self.prune_above {
      let window = self.window;
      let before = entries.len();
      entries.retain(|_, w| now.duration_since(w.started) < window);
      debug!(target: "ingress", before, after = entries.len(), "Pruned expired rate-limit windows");
    }

    let w = entries
      .entry(key.to_string())
      .or_insert(Window { started: now, count: 0 });
    if now.duration_since(w.started) >= self.window {
      w.started = now;
      w.count = 0;
    }
    w.count = w.count.saturating_add(1);

    WindowCount {
      count: w.count,
      resets_in: self.window.saturating_sub(now.duration_since(w.started)),
    }
  }
}

/// Applies the ceiling to whatever store is plugged in.
#[derive(Clone)]
pub struct RateLimiter {
  store: Arc<dyn RateLimitStore>,
  max_requests: u32,
}

impl RateLimiter {
  pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u32) -> Self {
    Self { store, max_requests }
  }

  pub fn in_memory(window: Duration, max_requests: u32) -> Self {
    Self::new(Arc::new(MemoryRateLimitStore::new(window)), max_requests)
  }

  /// Count this request; fails with `RateLimited` once the ceiling is passed.
  pub async fn check(&self, key: &str) -> Result<WindowCount, ApiError> {
    let wc = self.store.increment(key).await;
    if wc.count > self.max_requests {
      let retry_after_secs = ceil_secs(wc.resets_in);
      warn!(target: "ingress", client = %key, count = wc.count, max = self.max_requests, retry_after_secs, "Rate limit exceeded");
      return Err(ApiError::RateLimited { retry_after_secs });
    }
    debug!(target: "ingress", client = %key, count = wc.count, max = self.max_requests, "Rate limit ok");
    Ok(wc)
  }
}

fn ceil_secs(d: Duration) -> u64 {
  let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
  secs.max(1)
}
