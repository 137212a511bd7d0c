//! OpenAI chat.completions adapter.
//!
//! Requests a strict JSON object (`response_format = json_object`) and returns the
//! message content as-is. Calls are instrumented and log model names, latencies and
//! token usage (not contents). The API key is never logged.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{error_from_response, BackendError, TextGenerator};
use crate::prompt::LessonPrompt;

#[derive(Clone)]
pub struct OpenAiGenerator {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl OpenAiGenerator {
  pub fn new(client: reqwest::Client, api_key: &str, base_url: &str, model: &str) -> Self {
    Self {
      client,
      api_key: api_key.to_string(),
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
    }
  }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
  fn label(&self) -> String {
    format!("openai/{}", self.model)
  }

  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, user_len = prompt.user.len()))]
  async fn generate(&self, prompt: &LessonPrompt) -> Result<String, BackendError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: prompt.system.clone() },
        ChatMessageReq { role: "user".into(), content: prompt.user.clone() },
      ],
      temperature: 0.7,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| BackendError::transport(e.to_string()))?;

    if !res.status().is_success() {
      return Err(error_from_response(res).await);
    }

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| BackendError::transport(format!("invalid OpenAI response body: {}", e)))?;
    if let Some(usage) = &body.usage {
      info!(target: "lesson", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();
    info!(target: "lesson", elapsed = ?start.elapsed(), text_len = text.len(), "OpenAI response received");
    Ok(text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}
