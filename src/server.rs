use crate::error::GatewayError;
use crate::session::Gateway;
use crate::types::ChatRequest;
use crate::GatewayConfig;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: GatewayConfig,
    pub gateway: Arc<Gateway>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/llm/chat", post(handle_chat))
        .route("/api/llm/models", get(handle_models))
        .route("/api/llm/credits", get(handle_credits))
        .route("/api/llm/usage", get(handle_usage))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Identity is delegated to the platform's auth service; by the time a
/// request reaches the gateway the bearer token is an opaque caller id.
fn bearer_caller(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn error_response(status: u16, kind: &str, message: impl Into<String>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "error": { "type": kind, "message": message.into() }
    });
    (status, Json(body)).into_response()
}

fn gateway_error_response(err: &GatewayError) -> Response {
    error_response(err.status_code(), err.kind(), err.to_string())
}

fn unauthorized() -> Response {
    error_response(401, "authentication_error", "Missing bearer token")
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(caller_id) = bearer_caller(&headers) else {
        return unauthorized();
    };

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                400,
                "invalid_request_error",
                format!("Invalid request body: {e}"),
            );
        }
    };

    let streaming = request.stream;

    tracing::info!(
        caller = %caller_id,
        model = %request.model,
        streaming,
        messages = request.messages.len(),
        "Chat request"
    );

    let session = match state.gateway.admit(&caller_id, request) {
        Ok(s) => s,
        Err(e) => {
            tracing::info!(caller = %caller_id, error = %e, "Request not admitted");
            return gateway_error_response(&e);
        }
    };

    if streaming {
        match session.run_streaming(state.gateway.clone()).await {
            Ok(stream) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            Err(e) => {
                tracing::error!(caller = %caller_id, error = %e, "Streaming dispatch failed");
                gateway_error_response(&e)
            }
        }
    } else {
        match session.run_buffered(&state.gateway).await {
            Ok(call) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(call.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            Err(e) => {
                tracing::error!(caller = %caller_id, error = %e, "Non-streaming call failed");
                gateway_error_response(&e)
            }
        }
    }
}

/// Read-only model catalog, driven entirely by the registry.
async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .gateway
        .registry
        .list_models()
        .iter()
        .map(|profile| {
            serde_json::json!({
                "provider": profile.provider_id,
                "model": profile.model_id,
                "available": profile.available(),
                "input_price": profile.input_price_per_ktok,
                "output_price": profile.output_price_per_ktok,
            })
        })
        .collect();

    Json(serde_json::json!({ "models": models }))
}

async fn handle_credits(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(caller_id) = bearer_caller(&headers) else {
        return unauthorized();
    };

    let balance = state.gateway.ledger.balance(&caller_id);
    Json(serde_json::json!({ "caller_id": caller_id, "credits": balance })).into_response()
}

const USAGE_PAGE: usize = 100;

async fn handle_usage(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(caller_id) = bearer_caller(&headers) else {
        return unauthorized();
    };

    let records = state.gateway.audit.recent_for(&caller_id, USAGE_PAGE);
    let totals = state.gateway.audit.totals_for(&caller_id);
    Json(serde_json::json!({ "records": records, "totals": totals })).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
