use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chatrelay::config::settings::Environment;
use chatrelay::modules::chat::crud::{MemoryMessageStore, MessageStore};
use chatrelay::modules::chat::model::Role;
use chatrelay::modules::chat::routes::MAX_CHAT_BODY_BYTES;
use chatrelay::security::image::{
    estimated_decoded_size, MAX_ENCODED_IMAGE_LEN, MAX_IMAGES_PER_MESSAGE, MAX_IMAGE_SIZE,
};
use chatrelay::security::rate_limit::{RateLimitConfig, RateLimiter};
use chatrelay::services::content::{ContentBlock, MessageContent};
use chatrelay::services::llm::{ChatProvider, ConversationMessage, LlmError};
use chatrelay::services::pipeline::ChatPipeline;
use chatrelay::{app, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedProvider {
    reply: Result<String, String>,
    calls: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl ScriptedProvider {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<ConversationMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, conversation: &[ConversationMessage]) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(conversation.to_vec());
        self.reply.clone().map_err(LlmError::ApiError)
    }
}

struct Harness {
    server: TestServer,
    store: Arc<MemoryMessageStore>,
    provider: Arc<ScriptedProvider>,
}

fn setup(provider: Arc<ScriptedProvider>, max_requests: u32, environment: Environment) -> Harness {
    let store = Arc::new(MemoryMessageStore::new());
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window: Duration::from_secs(60),
        max_requests,
    }));
    let pipeline = ChatPipeline::new(limiter, store.clone(), provider.clone(), 50);
    let state = AppState {
        pipeline: Arc::new(pipeline),
        store: store.clone(),
        environment,
    };

    Harness {
        server: TestServer::new(app(state)).unwrap(),
        store,
        provider,
    }
}

fn default_setup() -> Harness {
    setup(ScriptedProvider::replying("hi there"), 10, Environment::Test)
}

fn forwarded_for() -> HeaderName {
    HeaderName::from_static("x-forwarded-for")
}

fn png_base64_of(len: usize) -> String {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.resize(len, 0);
    STANDARD.encode(bytes)
}

fn png_base64() -> String {
    png_base64_of(96)
}

#[tokio::test]
async fn test_chat_plain_message() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .add_header(forwarded_for(), HeaderValue::from_static("203.0.113.7"))
        .json(&json!({ "message": "hello" }))
        .await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["userMessage"]["role"], "user");
    assert_eq!(body["userMessage"]["content"], "hello");
    assert_eq!(body["assistantMessage"]["role"], "assistant");
    assert_eq!(body["assistantMessage"]["content"], "hi there");
    assert!(!body["userMessage"]["id"].as_str().unwrap().is_empty());

    let stored = h.store.list_messages(None).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content, "hello");
    assert_eq!(stored[1].role, Role::Assistant);

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        vec![ConversationMessage {
            role: Role::User,
            content: MessageContent::Text("hello".to_string()),
        }]
    );
}

#[tokio::test]
async fn test_chat_sanitizes_before_storing() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "  <b>bold</b> move  " }))
        .await;

    response.assert_status(StatusCode::OK);
    let stored = h.store.list_messages(None).await.unwrap();
    assert_eq!(stored[0].content, "bold move");
}

#[tokio::test]
async fn test_chat_empty_message_never_reaches_store() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Message cannot be empty");

    assert!(h.store.list_messages(None).await.unwrap().is_empty());
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_chat_requires_message_or_images() {
    let h = default_setup();

    let response = h.server.post("/api/chat").json(&json!({})).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Message or images are required");
}

#[tokio::test]
async fn test_chat_markup_only_message_is_rejected() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "<b></b>" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(h.store.list_messages(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_malformed_body_is_invalid_input() {
    let h = default_setup();

    let response = h.server.post("/api/chat").text("not json").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_chat_dangerous_message_is_rejected() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "<script>alert(1)</script>" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Message contains potentially dangerous content");
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_chat_with_images() {
    let h = default_setup();
    let data = png_base64();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "message": "what is this?",
            "images": [
                { "data": data, "mimeType": "image/png", "fileName": "../x.png", "size": 96 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(
        body["userMessage"]["content"],
        json!([
            { "type": "text", "text": "what is this?" },
            {
                "type": "image",
                "source": { "type": "base64", "media_type": "image/png", "data": data }
            }
        ])
    );

    let calls = h.provider.calls();
    match &calls[0][0].content {
        MessageContent::Blocks(blocks) => {
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0], ContentBlock::text("what is this?"));
        }
        other => panic!("expected blocks, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chat_images_without_caption() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "message": "",
            "images": [
                { "data": png_base64(), "mimeType": "image/png", "fileName": "x.png", "size": 96 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["userMessage"]["content"][0]["type"], "image");
}

#[tokio::test]
async fn test_chat_spoofed_image_is_rejected() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "message": "see",
            "images": [
                { "data": png_base64(), "mimeType": "image/jpeg", "fileName": "x.jpg", "size": 96 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(
        body["error"],
        "Image 1: Image file type does not match its content"
    );
    assert!(h.store.list_messages(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_too_many_images() {
    let h = default_setup();
    let image = json!({ "data": png_base64(), "mimeType": "image/png", "fileName": "x.png", "size": 96 });

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "images": vec![image; 6] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(
        body["error"],
        "Too many images. Maximum 5 images allowed per message"
    );
}

#[tokio::test]
async fn test_chat_accepts_multi_megabyte_image() {
    let h = default_setup();
    let data = png_base64_of(3 * 1024 * 1024);

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "message": "large photo",
            "images": [
                { "data": data, "mimeType": "image/png", "fileName": "big.png", "size": 3145728 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::OK);
    let calls = h.provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].content.image_count(), 1);
}

#[tokio::test]
async fn test_chat_accepts_full_batch_at_size_limit() {
    let h = default_setup();
    // Largest whole-group encoding whose estimate stays within the limit.
    let data = png_base64_of(MAX_IMAGE_SIZE - 2);
    assert!(data.len() <= MAX_ENCODED_IMAGE_LEN);
    assert!(estimated_decoded_size(&data) <= MAX_IMAGE_SIZE);

    let images: Vec<Value> = (0..MAX_IMAGES_PER_MESSAGE)
        .map(|i| {
            json!({
                "data": data,
                "mimeType": "image/png",
                "fileName": format!("photo{}.png", i),
                "size": MAX_IMAGE_SIZE - 2
            })
        })
        .collect();
    let request = json!({ "message": "five photos", "images": images });
    assert!(serde_json::to_vec(&request).unwrap().len() <= MAX_CHAT_BODY_BYTES);

    let response = h.server.post("/api/chat").json(&request).await;

    response.assert_status(StatusCode::OK);
    let calls = h.provider.calls();
    assert_eq!(calls[0][0].content.image_count(), MAX_IMAGES_PER_MESSAGE);
}

#[tokio::test]
async fn test_chat_oversized_image_is_rejected_by_validation() {
    let h = default_setup();
    let data = png_base64_of(MAX_IMAGE_SIZE + 3);

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "images": [
                { "data": data, "mimeType": "image/png", "fileName": "huge.png", "size": 0 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Image 1: Image size exceeds 5MB limit");
    assert!(h.store.list_messages(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_file_names_are_not_persisted() {
    let h = default_setup();

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({
            "message": "see attached",
            "images": [
                { "data": png_base64(), "mimeType": "image/png", "fileName": "holiday-beach.png", "size": 96 }
            ]
        }))
        .await;

    response.assert_status(StatusCode::OK);
    let stored = h.store.list_messages(None).await.unwrap();
    assert!(!stored[0].content.contains("holiday-beach"));
    assert!(!format!("{:?}", h.provider.calls()).contains("holiday-beach"));
}

#[tokio::test]
async fn test_chat_rate_limit() {
    let h = setup(ScriptedProvider::replying("ok"), 2, Environment::Test);
    let client = HeaderValue::from_static("198.51.100.1");

    for _ in 0..2 {
        h.server
            .post("/api/chat")
            .add_header(forwarded_for(), client.clone())
            .json(&json!({ "message": "hi" }))
            .await
            .assert_status(StatusCode::OK);
    }

    let limited = h
        .server
        .post("/api/chat")
        .add_header(forwarded_for(), client.clone())
        .json(&json!({ "message": "hi" }))
        .await;

    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let headers = limited.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    let reset = headers.get("x-ratelimit-reset").unwrap().to_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    assert!(headers.get("retry-after").is_some());

    let body: Value = limited.json();
    assert_eq!(body["success"], false);

    // Rejected before validation, so even a bad body counts as limited.
    h.server
        .post("/api/chat")
        .add_header(forwarded_for(), client)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    h.server
        .post("/api/chat")
        .add_header(forwarded_for(), HeaderValue::from_static("198.51.100.2"))
        .json(&json!({ "message": "hi" }))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(h.provider.calls().len(), 3);
}

#[tokio::test]
async fn test_provider_failure_in_development_shows_detail() {
    let h = setup(
        ScriptedProvider::failing("quota exhausted"),
        10,
        Environment::Development,
    );

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "hello" }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "API error: quota exhausted");

    // The user turn is persisted before the provider is called.
    assert_eq!(h.store.list_messages(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_provider_failure_in_production_hides_detail() {
    let h = setup(
        ScriptedProvider::failing("quota exhausted"),
        10,
        Environment::Production,
    );

    let response = h
        .server
        .post("/api/chat")
        .json(&json!({ "message": "hello" }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(
        body["error"],
        "An error occurred while processing your request"
    );
}

#[tokio::test]
async fn test_history_is_replayed_in_order() {
    let h = default_setup();

    for message in ["first", "second"] {
        h.server
            .post("/api/chat")
            .json(&json!({ "message": message }))
            .await
            .assert_status(StatusCode::OK);
    }

    let calls = h.provider.calls();
    let roles: Vec<Role> = calls[1].iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(
        calls[1][2].content,
        MessageContent::Text("second".to_string())
    );
}

#[tokio::test]
async fn test_list_and_reset_messages() {
    let h = default_setup();

    h.server
        .post("/api/chat")
        .json(&json!({ "message": "hello" }))
        .await
        .assert_status(StatusCode::OK);

    let list = h.server.get("/api/messages").await;
    list.assert_status(StatusCode::OK);
    let body: Value = list.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["messages"][0]["content"], "hello");
    assert!(body["messages"][0]["createdAt"].is_string());

    let reset = h.server.post("/api/reset").await;
    reset.assert_status(StatusCode::OK);
    let body: Value = reset.json();
    assert_eq!(body["deletedCount"], 2);

    let body: Value = h.server.get("/api/messages").await.json();
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_sets_security_headers() {
    let h = default_setup();

    let response = h.server.get("/api/health").await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
}
