#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use kewen_backend::{
    backend::{BackendError, TextGenerator},
    config::AppConfig,
    prompt::LessonPrompt,
    routes::build_router,
    state::AppState,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

/// Scripted backend: replays `script` in order, then repeats the last entry.
pub struct StubGenerator {
    label: String,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    last: Mutex<Option<Result<String, BackendError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<LessonPrompt>>,
}

impl StubGenerator {
    pub fn new(label: &str, script: Vec<Result<String, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(label: &str, out: Result<String, BackendError>) -> Arc<Self> {
        Self::new(label, vec![out])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<LessonPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn generate(&self, prompt: &LessonPrompt) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(r) => {
                *self.last.lock().unwrap() = Some(r.clone());
                r
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(BackendError::transport("empty script"))),
        }
    }
}

pub fn overloaded() -> BackendError {
    BackendError::http(503, "The model is overloaded. Please try again later.")
}

/// Config with a roomy rate limit so only rate-limit tests hit it.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.max_requests = 1_000;
    cfg.retry.base_delay_ms = 10;
    cfg.retry.jitter_max_ms = 5;
    cfg
}

pub fn app_with(cfg: AppConfig, gens: Vec<Arc<StubGenerator>>) -> Router {
    let gens: Vec<Arc<dyn TextGenerator>> = gens.into_iter().map(|g| g as Arc<dyn TextGenerator>).collect();
    build_router(Arc::new(AppState::with_generators(cfg, gens)))
}

pub fn dialogue_lesson() -> Value {
    json!({
        "main_level": "Level 3",
        "summary": "A short exchange about a test.",
        "warm_up": ["你喜歡考試嗎？", "你怎麼準備考試？"],
        "dialogue": {
            "title": "測試",
            "lines": [
                { "speaker": "A", "text": "這是一段很短的測試文字。" },
                { "speaker": "B", "text": "對，很短。" }
            ],
            "vocabulary": [{
                "word": "測試", "pinyin": "cè shì", "level": 4, "english": "test",
                "japanese": "テスト", "korean": "테스트", "vietnamese": "kiểm tra",
                "partOfSpeech": "Verb", "example": "這是一段很短的測試文字。"
            }],
            "grammar": [],
            "references": []
        },
        "essay": { "title": "", "paragraphs": [], "vocabulary": [], "grammar": [], "references": [] },
        "activities": [
            { "title": "角色扮演", "description": "兩人一組練習對話。" },
            { "title": "造句", "description": "用生詞造三個句子。" }
        ]
    })
}

pub fn analyze_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze-file")
        .header("Content-Type", "application/json")
        .header("x-forwarded-for", "203.0.113.10")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send one request; the body is parsed as JSON (`Value::Null` when empty).
pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, headers, body)
}
