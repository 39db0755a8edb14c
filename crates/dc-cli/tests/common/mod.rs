#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{json, Value};

use dc_cli::bootstrap::{into_runtime, ExternalSettings, RuntimeConfig};
use dc_cli::config::AppConfig;

// ---------------------------------------------------------------------------
// MockChatServer — OpenAI-compatible completions endpoint
// ---------------------------------------------------------------------------

struct MockConfig {
    response_body: String,
    status_code: u16,
    calls: AtomicUsize,
}

pub struct MockChatServer {
    addr: SocketAddr,
    config: Arc<MockConfig>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockChatServer {
    pub async fn start(response_body: &str) -> Self {
        Self::start_with_status(response_body, 200).await
    }

    pub async fn start_with_status(response_body: &str, status: u16) -> Self {
        let config = Arc::new(MockConfig {
            response_body: response_body.to_owned(),
            status_code: status,
            calls: AtomicUsize::new(0),
        });

        let app = axum::Router::new()
            .route("/v1/chat/completions", post(mock_completion_handler))
            .with_state(config.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            config,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.config.calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

async fn mock_completion_handler(State(config): State<Arc<MockConfig>>) -> Response {
    config.calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(config.status_code).unwrap_or(StatusCode::OK);
    (
        status,
        [("content-type", "application/json")],
        config.response_body.clone(),
    )
        .into_response()
}

/// Chat completion whose content is a two-turn dialogue.
pub fn completion_with_dialogue() -> String {
    let content = json!({
        "messages": [
            {"role": "user", "text": "I keep replaying the argument with my sister."},
            {
                "role": "assistant",
                "text": "That sounds exhausting. What part keeps coming back?",
                "intent": "probe_story",
                "sentiment": "negative"
            }
        ]
    })
    .to_string();
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }
        ]
    })
    .to_string()
}

pub fn external_settings(base_url: &str) -> ExternalSettings {
    ExternalSettings {
        base_url: base_url.to_owned(),
        model: "mock-model".to_owned(),
        api_key_env: None,
        timeout: Duration::from_secs(5),
        temperature: 0.7,
        max_tokens: 800,
    }
}

// ---------------------------------------------------------------------------
// Runtime and files
// ---------------------------------------------------------------------------

/// Default runtime with the annotation store inside `dir`.
pub fn runtime_in(dir: &Path) -> RuntimeConfig {
    let mut config = AppConfig::default();
    config.store.database = dir.join("labels.db");
    into_runtime(config).expect("default config is valid")
}

pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).expect("write fixture");
    path
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).expect("read output")).expect("valid JSON")
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A well-formed dialogue with one assistant turn at message index 1.
pub fn dialogue(id: &str, session_type: &str, opening: &str) -> Value {
    json!({
        "dialogue_id": id,
        "session_type": session_type,
        "user_profile": {"age_range": "26-30", "concern": "stress", "mood_score": 4},
        "messages": [
            {"role": "user", "text": opening, "timestamp": "2026-02-01T10:00:00Z"},
            {
                "role": "assistant",
                "text": "That sounds like a lot to carry.",
                "timestamp": "2026-02-01T10:00:05Z",
                "intent": "validate",
                "sentiment": "negative",
                "risk_level": "none"
            }
        ],
        "labels": {
            "primary_intent": "validate",
            "overall_sentiment": "negative",
            "max_risk_level": "none",
            "synthetic": false
        }
    })
}

pub fn corpus(dialogues: Vec<Value>) -> Value {
    json!({"version": "1.0", "description": "fixture", "dialogues": dialogues})
}

/// `(item_id, intent, sentiment, risk_level)` rows.
pub fn label_file(annotator: &str, rows: &[(&str, &str, &str, &str)]) -> Value {
    let labels: Vec<Value> = rows
        .iter()
        .map(|(item, intent, sentiment, risk)| {
            json!({
                "item_id": item,
                "intent": intent,
                "sentiment": sentiment,
                "risk_level": risk,
                "labeled_at": "2026-03-01T09:00:00Z"
            })
        })
        .collect();
    json!({
        "annotator": annotator,
        "session_id": format!("{annotator}-pass"),
        "source_file": "seed.json",
        "total_items": labels.len(),
        "total_labels": labels.len(),
        "labels": labels
    })
}
