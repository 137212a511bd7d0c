//! Service configuration: limits, rate limit, retry policy, backend targets and prompts.
//!
//! Loaded from the TOML file at KEWEN_CONFIG_PATH (optional), then overlaid with
//! environment variables. API keys are only ever read from the environment.
//!
//! ```toml
//! [limits]
//! max_content_chars = 50000
//! prompt_budget_chars = 20000
//!
//! [rate_limit]
//! window_secs = 60
//! max_requests = 5
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! backoff_exponent = 2
//! jitter_max_ms = 500
//!
//! [[backends]]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::prompt::TRUNCATION_MARKER;
use crate::util::char_len;

/// Longest JSON spelling of a single char: an escaped UTF-16 surrogate pair.
pub const MAX_JSON_BYTES_PER_CHAR: usize = 12;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub server: ServerCfg,
  pub limits: LimitsCfg,
  pub rate_limit: RateLimitCfg,
  pub retry: RetryCfg,
  pub upstream: UpstreamCfg,
  pub backends: Vec<BackendTargetCfg>,
  pub prompts: Prompts,
  #[serde(skip)]
  pub secrets: Secrets,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
  pub port: u16,
}
impl Default for ServerCfg {
  fn default() -> Self { Self { port: 3000 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LimitsCfg {
  /// Requests whose trimmed `content_text` exceeds this many chars are rejected.
  pub max_content_chars: usize,
  /// Text forwarded to the model is cut to at most this many chars (marker included).
  pub prompt_budget_chars: usize,
}
impl Default for LimitsCfg {
  fn default() -> Self { Self { max_content_chars: 50_000, prompt_budget_chars: 20_000 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitCfg {
  pub window_secs: u64,
  pub max_requests: u32,
}
impl Default for RateLimitCfg {
  fn default() -> Self { Self { window_secs: 60, max_requests: 5 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryCfg {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub backoff_exponent: u32,
  pub jitter_max_ms: u64,
}
impl Default for RetryCfg {
  fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 1000, backoff_exponent: 2, jitter_max_ms: 500 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamCfg {
  pub timeout_secs: u64,
  pub openai_base_url: String,
  pub gemini_base_url: String,
}
impl Default for UpstreamCfg {
  fn default() -> Self {
    Self {
      timeout_secs: 120,
      openai_base_url: "https://api.openai.com/v1".into(),
      gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
    }
  }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
  Openai,
  Gemini,
}
impl std::fmt::Display for Provider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Provider::Openai => f.write_str("openai"),
      Provider::Gemini => f.write_str("gemini"),
    }
  }
}

/// One entry of the ordered fallback list.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BackendTargetCfg {
  pub provider: Provider,
  pub model: String,
}

/// Operator-tunable prompt pieces. The system instruction and output schema are
/// fixed in `prompt.rs` and cannot be overridden here.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Used when the caller omits `user_prompt` or sends only whitespace.
  pub default_instruction: String,
  /// User message layout; `{instruction}` and `{content}` are substituted.
  pub user_template: String,
}
impl Default for Prompts {
  fn default() -> Self {
    Self {
      default_instruction: "Please summarize and extract teaching points.".into(),
      user_template: "User Instruction:\n{instruction}\n\nFile Content:\n{content}".into(),
    }
  }
}

/// Provider credentials. Never logged, never deserialized from TOML.
#[derive(Clone, Default)]
pub struct Secrets {
  pub openai_api_key: Option<String>,
  pub gemini_api_key: Option<String>,
}
impl std::fmt::Debug for Secrets {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Secrets")
      .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
      .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<set>"))
      .finish()
  }
}

impl Secrets {
  pub fn key_for(&self, provider: Provider) -> Option<&str> {
    match provider {
      Provider::Openai => self.openai_api_key.as_deref(),
      Provider::Gemini => self.gemini_api_key.as_deref(),
    }
  }
}

impl AppConfig {
  /// Full startup load: optional TOML file, environment overlay, then sanitizing.
  pub fn load() -> Self {
    let mut cfg = load_config_file_from_env().unwrap_or_default();
    cfg.apply_env(|k| std::env::var(k).ok());
    cfg.sanitize();
    cfg
  }

  pub fn from_toml_str(s: &str) -> Result<Self, String> {
    toml::from_str::<AppConfig>(s).map_err(|e| e.to_string())
  }

  /// Overlay environment values. `lookup` is injectable for tests.
  pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(port) = non_empty("PORT") {
      match port.parse::<u16>() {
        Ok(p) => self.server.port = p,
        Err(_) => warn!(target: "kewen_backend", %port, "Ignoring unparseable PORT"),
      }
    }
    if let Some(url) = non_empty("OPENAI_BASE_URL") { self.upstream.openai_base_url = url; }
    if let Some(url) = non_empty("GEMINI_BASE_URL") { self.upstream.gemini_base_url = url; }
    self.secrets.openai_api_key = non_empty("OPENAI_API_KEY");
    self.secrets.gemini_api_key = non_empty("GEMINI_API_KEY");

    if self.backends.is_empty() {
      self.backends = default_backends(&self.secrets);
    }
  }

  /// Clamp values that would make the service unusable.
  pub fn sanitize(&mut self) {
    if self.limits.max_content_chars == 0 {
      warn!(target: "kewen_backend", "limits.max_content_chars = 0; using default");
      self.limits.max_content_chars = LimitsCfg::default().max_content_chars;
    }
    let min_budget = char_len(TRUNCATION_MARKER) + 1;
    if self.limits.prompt_budget_chars < min_budget {
      warn!(target: "kewen_backend", budget = self.limits.prompt_budget_chars, min_budget, "limits.prompt_budget_chars too small; clamping");
      self.limits.prompt_budget_chars = min_budget;
    }
    if self.rate_limit.window_secs == 0 {
      warn!(target: "kewen_backend", "rate_limit.window_secs = 0; using 1");
      self.rate_limit.window_secs = 1;
    }
    if self.rate_limit.max_requests == 0 {
      warn!(target: "kewen_backend", "rate_limit.max_requests = 0; using 1");
      self.rate_limit.max_requests = 1;
    }
    if self.retry.max_attempts == 0 {
      warn!(target: "kewen_backend", "retry.max_attempts = 0; using 1");
      self.retry.max_attempts = 1;
    }
  }

  pub fn rate_window(&self) -> Duration { Duration::from_secs(self.rate_limit.window_secs) }

  pub fn upstream_timeout(&self) -> Duration { Duration::from_secs(self.upstream.timeout_secs) }

  /// Request body ceiling in bytes. The worst JSON encoding of one char is an
  /// escaped surrogate pair (`\uD83D\uDE00`, 12 bytes); 64 KiB covers the prompt and keys.
  pub fn body_limit_bytes(&self) -> usize {
    self.limits.max_content_chars
      .saturating_mul(MAX_JSON_BYTES_PER_CHAR)
      .saturating_add(64 * 1024)
  }
}

/// Fallback order when `[[backends]]` is not configured: every model of every provider
/// whose key is present, Gemini first.
pub fn default_backends(secrets: &Secrets) -> Vec<BackendTargetCfg> {
  let mut out = Vec::new();
  if secrets.gemini_api_key.is_some() {
    for model in ["gemini-2.5-flash", "gemini-2.0-flash"] {
      out.push(BackendTargetCfg { provider: Provider::Gemini, model: model.into() });
    }
  }
  if secrets.openai_api_key.is_some() {
    out.push(BackendTargetCfg { provider: Provider::Openai, model: "gpt-4o-mini".into() });
  }
  out
}

/// Attempt to load `AppConfig` from KEWEN_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_file_from_env() -> Option<AppConfig> {
  let path = std::env::var("KEWEN_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match AppConfig::from_toml_str(&s) {
      Ok(cfg) => {
        info!(target: "kewen_backend", %path, "Loaded service config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "kewen_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "kewen_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
