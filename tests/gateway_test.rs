use llm_gateway::config::{GatewayConfig, ModelConfig, ProviderConfig};
use llm_gateway::credits::Credits;
use llm_gateway::{build_router, AppState, Gateway, SharedAuditLog};

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const KEY_ENV: &str = "LLM_GATEWAY_IT_KEY";
const MISSING_KEY_ENV: &str = "LLM_GATEWAY_IT_MISSING_KEY";

const OPENAI_STREAM_FRAMES: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
    "data: [DONE]\n\n",
);

const STALL_FIRST_FRAME: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n";

const ANTHROPIC_STREAM_FRAMES: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":42}}}\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
    "event: message_delta\n",
    "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n\n",
    "event: message_stop\n",
    "data: {\"type\":\"message_stop\"}\n\n",
);

fn mock_completion_body() -> serde_json::Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": "mock-chat",
        "choices": [
            {"index": 0,
             "message": {"role": "assistant", "content": "Hello from the mock provider."},
             "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 667, "completion_tokens": 500, "total_tokens": 1167}
    })
}

// ────────────────────────────────────────────────────────────────
// Mock upstream provider
// ────────────────────────────────────────────────────────────────

async fn mock_openai_chat(body: Bytes) -> Response {
    let req: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let model = req["model"].as_str().unwrap_or_default();
    let stream = req["stream"].as_bool().unwrap_or(false);

    if model == "fail-chat" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "mock provider exploded"}})),
        )
            .into_response();
    }

    if stream && model == "stall-chat" {
        // One frame, then hang until the peer goes away.
        let frames = async_stream::stream! {
            yield Ok::<Bytes, std::io::Error>(Bytes::from(STALL_FIRST_FRAME));
            futures::future::pending::<()>().await;
        };
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(Body::from_stream(frames))
            .unwrap();
    }

    if stream {
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(Body::from(OPENAI_STREAM_FRAMES))
            .unwrap();
    }

    Json(mock_completion_body()).into_response()
}

async fn mock_anthropic_messages() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(Body::from(ANTHROPIC_STREAM_FRAMES))
        .unwrap()
}

async fn spawn_mock_provider() -> String {
    let app = Router::new()
        .route("/chat/completions", post(mock_openai_chat))
        .route("/v1/messages", post(mock_anthropic_messages));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ────────────────────────────────────────────────────────────────
// Gateway harness
// ────────────────────────────────────────────────────────────────

struct Harness {
    base: String,
    client: reqwest::Client,
    _audit_dir: TempDir,
}

fn provider(base_url: &str, key_env: &str, format: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: Some(base_url.to_string()),
        api_key_env: Some(key_env.to_string()),
        format: Some(format.to_string()),
    }
}

fn model(provider: &str, input_price: f64, output_price: f64) -> ModelConfig {
    ModelConfig {
        provider: provider.to_string(),
        input_price: Credits::from_f64(input_price),
        output_price: Credits::from_f64(output_price),
        upstream_model: None,
    }
}

async fn spawn_gateway(initial_credits: f64) -> Harness {
    std::env::set_var(KEY_ENV, "itest");
    let mock_base = spawn_mock_provider().await;

    let mut providers = HashMap::new();
    providers.insert("mock".to_string(), provider(&mock_base, KEY_ENV, "openai"));
    providers.insert(
        "mockclaude".to_string(),
        provider(&mock_base, KEY_ENV, "anthropic"),
    );
    providers.insert(
        "dark".to_string(),
        provider(&mock_base, MISSING_KEY_ENV, "openai"),
    );

    let mut models = HashMap::new();
    models.insert("mock-chat".to_string(), model("mock", 0.001, 0.002));
    models.insert("stall-chat".to_string(), model("mock", 0.001, 0.002));
    models.insert("fail-chat".to_string(), model("mock", 0.001, 0.002));
    models.insert("mock-claude".to_string(), model("mockclaude", 0.003, 0.015));
    models.insert("dark-model".to_string(), model("dark", 0.001, 0.002));

    let config = GatewayConfig {
        port: 0,
        safety_factor: 2,
        initial_credits: Credits::from_f64(initial_credits),
        providers,
        models,
    };

    let audit_dir = TempDir::new().unwrap();
    let audit = SharedAuditLog::new(audit_dir.path().join("audit.jsonl")).unwrap();
    let client = reqwest::Client::new();
    let gateway = Arc::new(Gateway::new(&config, audit, client.clone()).unwrap());

    let state = Arc::new(AppState { config, gateway });
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://{addr}"),
        client,
        _audit_dir: audit_dir,
    }
}

fn chat_body(model: &str, content: &str, stream: bool) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
        "stream": stream,
    })
}

impl Harness {
    async fn post_chat(&self, caller: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/api/llm/chat", self.base))
            .header("authorization", format!("Bearer {caller}"))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    async fn credits(&self, caller: &str) -> String {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/api/llm/credits", self.base))
            .header("authorization", format!("Bearer {caller}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["credits"].as_str().unwrap().to_string()
    }

    async fn usage_records(&self, caller: &str) -> Vec<serde_json::Value> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/api/llm/usage", self.base))
            .header("authorization", format!("Bearer {caller}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["records"].as_array().unwrap().clone()
    }
}

// ────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let h = spawn_gateway(10.0).await;
    let resp = h
        .client
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_model_catalog_ordered_with_availability() {
    let h = spawn_gateway(10.0).await;
    let body: serde_json::Value = h
        .client
        .get(format!("{}/api/llm/models", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let models = body["models"].as_array().unwrap();
    let ids: Vec<&str> = models.iter().map(|m| m["model"].as_str().unwrap()).collect();
    // provider then model name
    assert_eq!(
        ids,
        vec![
            "dark-model",
            "fail-chat",
            "mock-chat",
            "stall-chat",
            "mock-claude"
        ]
    );

    let dark = &models[0];
    assert_eq!(dark["available"], false);
    let mock_chat = &models[2];
    assert_eq!(mock_chat["available"], true);
    assert_eq!(mock_chat["input_price"], "0.001");
}

#[tokio::test]
async fn test_zero_balance_rejected_with_402() {
    let h = spawn_gateway(0.0).await;

    let resp = h
        .post_chat("broke", &chat_body("mock-chat", "hello", false))
        .await;
    assert_eq!(resp.status(), 402);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "insufficient_credits");

    // balance unchanged, no usage record written
    assert_eq!(h.credits("broke").await, "0");
    assert!(h.usage_records("broke").await.is_empty());
}

#[tokio::test]
async fn test_validation_and_auth_errors() {
    let h = spawn_gateway(10.0).await;

    // missing bearer token
    let resp = h
        .client
        .post(format!("{}/api/llm/chat", h.base))
        .json(&chat_body("mock-chat", "hi", false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // empty messages
    let resp = h
        .post_chat(
            "alice",
            &json!({"model": "mock-chat", "messages": [], "stream": false}),
        )
        .await;
    assert_eq!(resp.status(), 400);

    // unknown model
    let resp = h
        .post_chat("alice", &chat_body("ghost-model", "hi", false))
        .await;
    assert_eq!(resp.status(), 400);

    // model without a configured credential
    let resp = h
        .post_chat("alice", &chat_body("dark-model", "hi", false))
        .await;
    assert_eq!(resp.status(), 503);

    // none of the above touched the ledger or the audit log
    assert_eq!(h.credits("alice").await, "10");
    assert!(h.usage_records("alice").await.is_empty());
}

#[tokio::test]
async fn test_non_streaming_billing_matches_provider_usage() {
    let h = spawn_gateway(10.0).await;

    let resp = h
        .post_chat("alice", &chat_body("mock-chat", &"x".repeat(2000), false))
        .await;
    assert_eq!(resp.status(), 200);

    // provider body relayed unmodified
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, mock_completion_body());

    // (667/1000)*0.001 + (500/1000)*0.002 = 0.001667
    assert_eq!(h.credits("alice").await, "9.998333");

    let records = h.usage_records("alice").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "success");
    assert_eq!(records[0]["input_tokens"], 667);
    assert_eq!(records[0]["output_tokens"], 500);
    assert_eq!(records[0]["cost"], "0.001667");
}

#[tokio::test]
async fn test_streaming_relay_is_byte_identical() {
    let h = spawn_gateway(10.0).await;

    let resp = h.post_chat("alice", &chat_body("mock-chat", "Hi", true)).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let relayed = resp.bytes().await.unwrap();
    assert_eq!(relayed, Bytes::from(OPENAI_STREAM_FRAMES));

    // "Hi" -> 1 input token; "Hello world" (11 chars) -> 4 output tokens.
    // 1*0.001/1K + 4*0.002/1K = 0.000009
    assert_eq!(h.credits("alice").await, "9.999991");

    let records = h.usage_records("alice").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "success");
    assert_eq!(records[0]["output_tokens"], 4);
}

#[tokio::test]
async fn test_anthropic_stream_bills_authoritative_usage() {
    let h = spawn_gateway(10.0).await;

    let resp = h
        .post_chat("alice", &chat_body("mock-claude", "Hi", true))
        .await;
    assert_eq!(resp.status(), 200);

    let relayed = resp.bytes().await.unwrap();
    assert_eq!(relayed, Bytes::from(ANTHROPIC_STREAM_FRAMES));

    // authoritative usage: 42 in / 7 out at 0.003 / 0.015 per 1K
    // 42*3 + 7*15 = 231 micro-credits
    assert_eq!(h.credits("alice").await, "9.999769");

    let records = h.usage_records("alice").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["input_tokens"], 42);
    assert_eq!(records[0]["output_tokens"], 7);
}

#[tokio::test]
async fn test_upstream_error_passthrough_without_charge() {
    let h = spawn_gateway(10.0).await;

    let resp = h
        .post_chat("alice", &chat_body("fail-chat", "hi", false))
        .await;
    assert_eq!(resp.status(), 500);

    assert_eq!(h.credits("alice").await, "10");
    let records = h.usage_records("alice").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "failed");
    assert_eq!(records[0]["cost"], "0");

    // same failure surfaces identically on the streaming path
    let resp = h.post_chat("alice", &chat_body("fail-chat", "hi", true)).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(h.credits("alice").await, "10");
}

#[tokio::test]
async fn test_cancellation_bills_partial_output() {
    let h = spawn_gateway(10.0).await;

    let mut resp = h
        .post_chat("alice", &chat_body("stall-chat", "Hi", true))
        .await;
    assert_eq!(resp.status(), 200);

    // read the first frame, then disconnect mid-generation
    let first = resp.chunk().await.unwrap().expect("first frame");
    assert!(!first.is_empty());
    drop(resp);

    // the drop-guard settlement runs when the relay is torn down
    let mut records = Vec::new();
    for _ in 0..50 {
        records = h.usage_records("alice").await;
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(records.len(), 1, "cancellation must still settle and log");
    assert_eq!(records[0]["status"], "failed");
    // "Hello" (5 chars) -> 2 estimated output tokens, billed cost > 0
    assert_eq!(records[0]["output_tokens"], 2);
    let cost: f64 = records[0]["cost"].as_str().unwrap().parse().unwrap();
    assert!(cost > 0.0);
    assert_ne!(h.credits("alice").await, "10");
}
