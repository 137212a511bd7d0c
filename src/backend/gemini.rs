//! Google Gemini `generateContent` adapter.
//!
//! JSON output is requested via `generationConfig.responseMimeType`. The system
//! instruction travels in `systemInstruction`, the composed user message as the
//! single user turn.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{error_from_response, BackendError, TextGenerator};
use crate::prompt::LessonPrompt;

#[derive(Clone)]
pub struct GeminiGenerator {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl GeminiGenerator {
  pub fn new(client: reqwest::Client, api_key: &str, base_url: &str, model: &str) -> Self {
    Self {
      client,
      api_key: api_key.to_string(),
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
    }
  }

  fn request_body(prompt: &LessonPrompt) -> GenerateContentRequest {
    GenerateContentRequest {
      system_instruction: Content { role: None, parts: vec![Part { text: prompt.system.clone() }] },
      contents: vec![Content { role: Some("user".into()), parts: vec![Part { text: prompt.user.clone() }] }],
      generation_config: GenerationConfig { response_mime_type: "application/json".into(), temperature: 0.7 },
    }
  }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
  fn label(&self) -> String {
    format!("gemini/{}", self.model)
  }

  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, user_len = prompt.user.len()))]
  async fn generate(&self, prompt: &LessonPrompt) -> Result<String, BackendError> {
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&Self::request_body(prompt)).send().await
      .map_err(|e| BackendError::transport(e.to_string()))?;

    if !res.status().is_success() {
      return Err(error_from_response(res).await);
    }

    let body: GenerateContentResponse = res.json().await
      .map_err(|e| BackendError::transport(format!("invalid Gemini response body: {}", e)))?;
    if let Some(usage) = &body.usage_metadata {
      info!(target: "lesson", prompt_tokens = ?usage.prompt_token_count, completion_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Gemini usage");
    }
    let text = extract_text(body)?;
    info!(target: "lesson", elapsed = ?start.elapsed(), text_len = text.len(), "Gemini response received");
    Ok(text)
  }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: GenerateContentResponse) -> Result<String, BackendError> {
  match body.candidates.into_iter().next() {
    Some(c) => Ok(c.content.map(|ct| ct.parts.into_iter().map(|p| p.text).collect::<String>()).unwrap_or_default()),
    None => {
      let reason = body.prompt_feedback
        .and_then(|f| f.block_reason)
        .unwrap_or_else(|| "no candidates".into());
      warn!(target: "lesson", %reason, "Gemini returned no candidates");
      Err(BackendError::transport(format!("Gemini returned no candidates: {}", reason)))
    }
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  system_instruction: Content,
  contents: Vec<Content>,
  generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
  #[serde(default)]
  text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  response_mime_type: String,
  temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  prompt_feedback: Option<PromptFeedback>,
  #[serde(default)]
  usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
  #[serde(default)]
  content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
  #[serde(default)]
  block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}
