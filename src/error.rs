//! Caller-facing error taxonomy. Every variant renders as `{"error": "..."}` with
//! its HTTP status; CORS headers are added by the router layer.

use axum::{
  http::{header, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
  Json,
};

use crate::protocol::ErrorOut;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// Caller sent missing, invalid or oversized input. Not retryable as-is.
  BadRequest(String),
  MethodNotAllowed,
  RateLimited { retry_after_secs: u64 },
  /// Operator problem, e.g. no backend credential configured.
  ServiceMisconfigured(String),
  /// Every backend stayed overloaded through the retry budget.
  UpstreamOverloaded { retry_after_secs: u64 },
  /// Backend text was not a usable lesson document, even after salvage.
  UpstreamBadOutput,
  /// Backend failed for a reason other than overload.
  UpstreamError,
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
      ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
      ApiError::ServiceMisconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::UpstreamOverloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::UpstreamBadOutput => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::UpstreamError => StatusCode::BAD_GATEWAY,
    }
  }

  pub fn message(&self) -> String {
    match self {
      ApiError::BadRequest(m) => m.clone(),
      ApiError::MethodNotAllowed => "Method not allowed".into(),
      ApiError::RateLimited { retry_after_secs } => {
        format!("Too many requests. Please retry in {} seconds.", retry_after_secs)
      }
      ApiError::ServiceMisconfigured(m) => m.clone(),
      ApiError::UpstreamOverloaded { retry_after_secs } => format!(
        "The language model is overloaded. Please retry in about {} seconds.",
        retry_after_secs
      ),
      ApiError::UpstreamBadOutput => "The language model returned an unusable lesson. Please try again.".into(),
      ApiError::UpstreamError => "The language model request failed.".into(),
    }
  }

  fn retry_after(&self) -> Option<u64> {
    match self {
      ApiError::RateLimited { retry_after_secs } | ApiError::UpstreamOverloaded { retry_after_secs } => {
        Some((*retry_after_secs).max(1))
      }
      _ => None,
    }
  }
}

impl std::fmt::Display for ApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.message(), self.status().as_u16())
  }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let mut res = (status, Json(ErrorOut { error: self.message() })).into_response();
    if let Some(secs) = self.retry_after() {
      res.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    if matches!(self, ApiError::MethodNotAllowed) {
      res.headers_mut().insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
    }
    res
  }
}

pub type ApiResult<T> = Result<T, ApiError>;
