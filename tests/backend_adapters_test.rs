mod common;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    routing::post,
    Json, Router,
};
use kewen_backend::{
    backend::{is_overloaded, GeminiGenerator, OpenAiGenerator, TextGenerator},
    config::{BackendTargetCfg, Provider, Secrets},
    prompt::LessonPrompt,
    routes::build_router,
    state::AppState,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use common::*;

/// What the fake provider saw, and what it should answer.
#[derive(Default)]
struct Fake {
    /// Responses replayed in order; the last one repeats.
    replies: Mutex<Vec<(StatusCode, Value)>>,
    calls: AtomicUsize,
    last_body: Mutex<Option<Value>>,
    last_headers: Mutex<Option<HeaderMap>>,
    last_path: Mutex<Option<String>>,
}

impl Fake {
    fn new(replies: Vec<(StatusCode, Value)>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies), ..Default::default() })
    }

    fn record(&self, headers: HeaderMap, body: Value, path: Option<String>) -> (StatusCode, Json<Value>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_headers.lock().unwrap() = Some(headers);
        *self.last_body.lock().unwrap() = Some(body);
        *self.last_path.lock().unwrap() = path;
        let mut replies = self.replies.lock().unwrap();
        let (status, body) = if replies.len() > 1 { replies.remove(0) } else { replies[0].clone() };
        (status, Json(body))
    }

    fn header(&self, name: &str) -> Option<String> {
        self.last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn body(&self) -> Value {
        self.last_body.lock().unwrap().clone().unwrap_or(Value::Null)
    }
}

async fn openai_handler(State(fake): State<Arc<Fake>>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.record(headers, body, None)
}

async fn gemini_handler(
    State(fake): State<Arc<Fake>>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.record(headers, body, Some(call))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn fake_openai(fake: Arc<Fake>) -> String {
    let app = Router::new().route("/v1/chat/completions", post(openai_handler)).with_state(fake);
    format!("http://{}/v1", serve(app).await)
}

async fn fake_gemini(fake: Arc<Fake>) -> String {
    let app = Router::new().route("/v1beta/models/:call", post(gemini_handler)).with_state(fake);
    format!("http://{}/v1beta", serve(app).await)
}

fn prompt() -> LessonPrompt {
    LessonPrompt { system: "SYSTEM".into(), user: "USER".into(), truncated: false }
}

fn openai_ok(content: &str) -> Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
    })
}

fn gemini_ok(content: &str) -> Value {
    json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": content }] }, "finishReason": "STOP" }],
        "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 20, "totalTokenCount": 30 }
    })
}

#[tokio::test]
async fn openai_adapter_sends_json_mode_request() {
    let fake = Fake::new(vec![(StatusCode::OK, openai_ok("{\"ok\":true}"))]);
    let base = fake_openai(fake.clone()).await;
    let gen = OpenAiGenerator::new(reqwest::Client::new(), "sk-test", &base, "gpt-4o-mini");

    let text = gen.generate(&prompt()).await.unwrap();

    assert_eq!(text, "{\"ok\":true}");
    assert_eq!(fake.header("authorization").as_deref(), Some("Bearer sk-test"));
    let body = fake.body();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "SYSTEM");
    assert_eq!(body["messages"][1]["content"], "USER");
    assert!(body.get("max_tokens").is_none());
}

#[tokio::test]
async fn openai_overload_is_classified_retryable() {
    let fake = Fake::new(vec![(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "error": { "message": "The engine is currently overloaded, please try again later", "type": "server_error" } }),
    )]);
    let base = fake_openai(fake).await;
    let gen = OpenAiGenerator::new(reqwest::Client::new(), "sk-test", &base, "gpt-4o-mini");

    let err = gen.generate(&prompt()).await.unwrap_err();
    assert_eq!(err.status, Some(503));
    assert!(err.message.contains("overloaded"));
    assert!(is_overloaded(&err));
}

#[tokio::test]
async fn openai_auth_failure_is_not_retryable() {
    let fake = Fake::new(vec![(
        StatusCode::UNAUTHORIZED,
        json!({ "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" } }),
    )]);
    let base = fake_openai(fake).await;
    let gen = OpenAiGenerator::new(reqwest::Client::new(), "bad", &base, "gpt-4o-mini");

    let err = gen.generate(&prompt()).await.unwrap_err();
    assert_eq!(err.status, Some(401));
    assert_eq!(err.message, "Incorrect API key provided");
    assert!(!is_overloaded(&err));
}

#[tokio::test]
async fn gemini_adapter_targets_model_and_sends_key_header() {
    let fake = Fake::new(vec![(StatusCode::OK, gemini_ok("{\"ok\":true}"))]);
    let base = fake_gemini(fake.clone()).await;
    let gen = GeminiGenerator::new(reqwest::Client::new(), "g-key", &base, "gemini-test");

    let text = gen.generate(&prompt()).await.unwrap();

    assert_eq!(text, "{\"ok\":true}");
    assert_eq!(fake.header("x-goog-api-key").as_deref(), Some("g-key"));
    assert_eq!(fake.last_path.lock().unwrap().as_deref(), Some("gemini-test:generateContent"));
    let body = fake.body();
    assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "SYSTEM");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "USER");
}

#[tokio::test]
async fn gemini_overload_is_classified_retryable() {
    let fake = Fake::new(vec![(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "error": { "code": 503, "message": "The model is overloaded. Please try again later.", "status": "UNAVAILABLE" } }),
    )]);
    let base = fake_gemini(fake).await;
    let gen = GeminiGenerator::new(reqwest::Client::new(), "g-key", &base, "gemini-test");

    let err = gen.generate(&prompt()).await.unwrap_err();
    assert!(is_overloaded(&err));
}

#[tokio::test]
async fn full_service_falls_back_from_gemini_to_openai() {
    let overloaded_body = json!({ "error": { "code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE" } });
    let gemini = Fake::new(vec![(StatusCode::SERVICE_UNAVAILABLE, overloaded_body)]);
    let openai = Fake::new(vec![(StatusCode::OK, openai_ok(&dialogue_lesson().to_string()))]);

    let mut cfg = test_config();
    cfg.retry.base_delay_ms = 1;
    cfg.retry.jitter_max_ms = 1;
    cfg.upstream.gemini_base_url = fake_gemini(gemini.clone()).await;
    cfg.upstream.openai_base_url = fake_openai(openai.clone()).await;
    cfg.secrets = Secrets { openai_api_key: Some("sk-test".into()), gemini_api_key: Some("g-key".into()) };
    cfg.backends = vec![
        BackendTargetCfg { provider: Provider::Gemini, model: "gemini-test".into() },
        BackendTargetCfg { provider: Provider::Openai, model: "gpt-4o-mini".into() },
    ];

    let app = build_router(Arc::new(AppState::new(cfg)));
    let req = Request::builder()
        .method("POST")
        .uri("/analyze-file")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({ "content_text": "這是一段很短的測試文字。" }).to_string()))
        .unwrap();
    let (status, _, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["main_level"], "Level 3");
    assert_eq!(gemini.calls.load(Ordering::SeqCst), 3);
    assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
}
