//! HTTP endpoint handlers. The analyze handler runs the ingress checks in order
//! (rate limit, backend availability, body) and then hands off to the proxy.
//!
//! If the client disconnects, axum drops this future, which also drops the
//! in-flight backend request and any pending backoff sleep.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::LessonDocument;
use crate::error::{ApiError, ApiResult};
use crate::ingress::{client_key, validate_body};
use crate::protocol::HealthOut;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backends = state.proxy.as_ref().map(|p| p.backend_count()).unwrap_or(0);
    Json(HealthOut { ok: true, backends })
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

#[instrument(
    level = "info",
    skip(state, headers, body),
    fields(request_id = %Uuid::new_v4(), client = tracing::field::Empty)
)]
pub async fn analyze_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<LessonDocument>> {
    let client = client_key(&headers);
    tracing::Span::current().record("client", client.as_str());

    state.limiter.check(&client).await?;

    let proxy = state.proxy.as_ref().ok_or_else(|| {
        ApiError::ServiceMisconfigured("Missing language model API key".into())
    })?;

    let bytes = body.map_err(|rejection| {
        warn!(target: "ingress", error = %rejection, "Failed to read request body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::BadRequest("Request body too large".into())
        } else {
            ApiError::BadRequest("Failed to read request body".into())
        }
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        warn!(target: "ingress", error = %e, body_len = bytes.len(), "Request body is not valid JSON");
        ApiError::BadRequest("Request body must be valid JSON".into())
    })?;
    let req = validate_body(&value, state.config.limits.max_content_chars).map_err(|e| {
        warn!(target: "ingress", error = %e, "Rejected analyze request");
        e
    })?;

    let lesson = proxy.generate_lesson(&req).await?;
    info!(
        target: "lesson",
        main_level = %lesson.main_level,
        dialogue_lines = lesson.dialogue.lines.len(),
        essay_paragraphs = lesson.essay.paragraphs.len(),
        activities = lesson.activities.len(),
        "Lesson generated"
    );
    Ok(Json(lesson))
}
