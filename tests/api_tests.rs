//! End-to-end tests of the JSON API.
//!
//! The real router is driven in-process with `tower::ServiceExt::oneshot`
//! against an in-memory database and a canned language model, so no network
//! or API key is needed.
//!
//! Run with: cargo test --test api_tests

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use docsphere::config::AppConfig;
use docsphere::doctor::AiDoctorService;
use docsphere::llm::{ChatModel, Completion, LlmError, PromptMessage};
use docsphere::routes::create_router;
use docsphere::state::AppState;
use docsphere::storage::{ConversationStore, Database, KnowledgeStore, NewKnowledgeEntry};

const CONFIG: &str = r#"
[http]
host = "127.0.0.1"
port = 0

[openai]
api_key = "sk-test-0123456789abcdef"

[conversation]
max_history = 10
timeout_minutes = 30
"#;

/// Answers with queued replies, then fails.
#[derive(Default)]
struct CannedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl CannedModel {
    fn with(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatModel for CannedModel {
    async fn complete(&self, _messages: &[PromptMessage]) -> Result<Completion, LlmError> {
        *self.calls.lock().unwrap() += 1;
        match self.replies.lock().unwrap().pop_front() {
            Some(content) => Ok(Completion {
                content,
                tokens_used: Some(21),
                model: "canned".to_string(),
            }),
            None => Err(LlmError::EmptyResponse),
        }
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

struct TestApp {
    router: Router,
    db: Database,
}

async fn test_app(model: Arc<CannedModel>) -> TestApp {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let db = Database::in_memory().await.unwrap();
    let doctor = AiDoctorService::new(&config, ConversationStore::new(db.clone()), model);
    let router = create_router(AppState::new(config, doctor, db.clone()));
    TestApp { router, db }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, text) = self.send_raw(method, uri, body.map(|b| b.to_string())).await;
        let json = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, json)
    }

    async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        body: Option<String>,
    ) -> (StatusCode, axum::http::HeaderMap, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn chat(&self, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, "/api/v1/chat", Some(body)).await
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = test_app(CannedModel::with(&[])).await;

    let (status, _, body) = app.send_raw(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _, body) = app.send_raw(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_greeting() {
    let app = test_app(CannedModel::with(&[])).await;
    let (status, body) = app.send(Method::GET, "/api/v1/chat/greeting", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().starts_with("Hello, I'm Dr. Sarah Chen"));
}

#[tokio::test]
async fn test_api_responses_are_not_cached_and_carry_request_id() {
    let app = test_app(CannedModel::with(&[])).await;
    let (_, headers, _) = app
        .send_raw(Method::GET, "/api/v1/chat/greeting", None)
        .await;
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    let request_id = headers["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn test_chat_conversation_flow() {
    let model = CannedModel::with(&[
        "Headaches are often caused by tension or dehydration.",
        "Ibuprofen can help; discuss any medication with your doctor.",
    ]);
    let app = test_app(model.clone()).await;

    let (status, first) = app
        .chat(json!({
            "message": "Why do I get headaches?",
            "patient_age": 29,
            "patient_gender": "Female"
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(first["message"]
        .as_str()
        .unwrap()
        .contains("I want to remind you that I'm an AI assistant"));
    assert_eq!(first["emergency_detected"], false);
    assert_eq!(first["safety_score"], 100);
    assert_eq!(first["tokens_used"], 21);
    assert_eq!(first["model_used"], "canned");
    let conversation_id = first["conversation_id"].as_i64().unwrap();
    let session_id = first["session_id"].as_str().unwrap().to_string();
    assert!(conversation_id > 0);

    let (status, second) = app
        .chat(json!({
            "message": "What can I take for it?",
            "conversation_id": conversation_id,
            "session_id": session_id
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["conversation_id"], conversation_id);
    assert_eq!(
        second["message"],
        "Ibuprofen can help; discuss any medication with your doctor."
    );
    let steps: Vec<&str> = second["suggested_next_steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert!(steps.contains(&"Discuss any current medications with your healthcare provider"));
    assert_eq!(model.calls(), 2);

    let uri = format!("/api/v1/conversations/{}", conversation_id);
    let (status, history) = app.send(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["messages"].as_array().unwrap().len(), 4);
    assert_eq!(history["messages"][0]["role"], "user");
    assert_eq!(history["patient_gender"], "female");
    assert_eq!(history["chief_complaint"], "Why do I get headaches?");

    let (status, summary) = app.send(Method::GET, &format!("{}/summary", uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["key_topics"], json!(["headache", "medication"]));
    assert_eq!(summary["patient_concerns"].as_array().unwrap().len(), 2);

    let (status, ended) = app.send(Method::POST, &format!("{}/end", uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended, json!({"conversation_id": conversation_id, "ended": true}));

    let (status, body) = app
        .chat(json!({"message": "One more thing", "conversation_id": conversation_id}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn test_emergency_message_skips_model() {
    let model = CannedModel::with(&["never sent"]);
    let app = test_app(model.clone()).await;

    let (status, body) = app
        .chat(json!({"message": "I am having thoughts of SUICIDE"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emergency_detected"], true);
    assert_eq!(body["flagged_content"], true);
    assert_eq!(body["conversation_id"], 0);
    assert_eq!(body["message_id"], 0);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("call emergency services"));
    assert_eq!(model.calls(), 0);

    let (logged,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM safety_logs WHERE severity = 'critical'")
        .fetch_one(app.db.pool())
        .await
        .unwrap();
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn test_model_failure_still_answers() {
    let app = test_app(CannedModel::with(&[])).await;
    let (status, body) = app.chat(json!({"message": "Is a cold contagious?"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("I understand you have health-related questions"));
    assert!(body["conversation_id"].as_i64().unwrap() > 0);
    assert!(body["tokens_used"].is_null());
}

#[tokio::test]
async fn test_validation_errors_are_422() {
    let app = test_app(CannedModel::with(&[])).await;

    let (status, body) = app
        .chat(json!({"message": "", "patient_age": 150}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"].as_array().unwrap().len(), 2);

    let (status, _, _) = app
        .send_raw(Method::POST, "/api/v1/chat", Some("{not json".to_string()))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app.chat(json!({"session_id": "abc"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let app = test_app(CannedModel::with(&["unused"])).await;

    let (status, body) = app.send(Method::GET, "/api/v1/conversations/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found: 999");

    let (status, _) = app
        .chat(json!({"message": "hello", "conversation_id": 999}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(Method::POST, "/api/v1/conversations/999/end", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ended"], false);
}

#[tokio::test]
async fn test_foreign_session_cannot_continue_conversation() {
    let app = test_app(CannedModel::with(&["Hi there.", "unused"])).await;
    let (_, first) = app
        .chat(json!({"message": "Hello", "session_id": "owner-session"}))
        .await;

    let (status, _) = app
        .chat(json!({
            "message": "Let me in",
            "session_id": "intruder-session",
            "conversation_id": first["conversation_id"]
        }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_knowledge_search() {
    let app = test_app(CannedModel::with(&[])).await;
    let knowledge = KnowledgeStore::new(app.db.clone());
    for (topic, category) in [
        ("Type 2 diabetes", "endocrinology"),
        ("Hypothyroidism", "endocrinology"),
        ("Asthma", "pulmonology"),
    ] {
        knowledge
            .insert_entry(&NewKnowledgeEntry {
                topic: topic.to_string(),
                category: category.to_string(),
                content: format!("Overview of {}", topic),
                source: None,
            })
            .await
            .unwrap();
    }

    let (status, body) = app
        .send(Method::GET, "/api/v1/knowledge?category=endocrinology", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = app
        .send(Method::GET, "/api/v1/knowledge?topic=ASTH", None)
        .await;
    assert_eq!(body[0]["topic"], "Asthma");

    let (_, body) = app.send(Method::GET, "/api/v1/knowledge?limit=1", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[test]
fn test_config_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[http]
host = "0.0.0.0"
port = 9000

[openai]
api_key = "sk-from-file-0000000000"

[logging]
format = "json"
"#
    )
    .unwrap();

    let config = AppConfig::load_with(file.path(), |_| None).unwrap();
    assert_eq!(config.http.port, 9000);
    assert!(config.logging.is_json());
    assert_eq!(config.openai.api_key, "sk-from-file-0000000000");
}
