//! Public protocol structs for the HTTP endpoints (serde ready).
//! The success body of the analyze route is `domain::LessonDocument` itself.

use serde::{Deserialize, Serialize};

/// Validated analyze request. Built by `ingress::validate_body`, never
/// deserialized directly, so type errors map to our own 400 messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    /// Trimmed, non-empty, within the configured max length.
    pub content_text: String,
    /// Trimmed; `None` when absent, null, or blank.
    pub user_prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthOut {
    pub ok: bool,
    pub backends: usize,
}
