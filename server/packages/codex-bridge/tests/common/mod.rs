#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use codex_bridge::session_store::SessionStore;
use codex_bridge::{build_router_with_state, AppState, BridgeConfig};
use codex_bridge_backend::{Agent, MockBackend, MockConfig};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

pub const API_KEY: &str = "test-key";

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn new(mock: MockConfig) -> Self {
        Self::with_config(BridgeConfig::default(), mock)
    }

    pub fn with_config(config: BridgeConfig, mock: MockConfig) -> Self {
        Self::with_store(config, mock, SessionStore::in_memory())
    }

    pub fn with_store(config: BridgeConfig, mock: MockConfig, store: SessionStore) -> Self {
        let state = Arc::new(AppState::new(config, Agent::mock(mock), store));
        Self {
            app: build_router_with_state(state.clone()),
            state,
        }
    }

    pub fn backend(&self) -> &Arc<MockBackend> {
        self.state
            .registry
            .agent()
            .mock_backend()
            .expect("mock backend")
    }

    pub async fn chat(&self, body: Value) -> (StatusCode, Value) {
        send_json(&self.app, Method::POST, "/v1/chat/completions", Some(body), &[]).await
    }
}

pub async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, headers, bytes)
}

pub async fn send_json(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = if let Some(body) = body {
        builder = builder.header("content-type", "application/json");
        Body::from(body.to_string())
    } else {
        Body::empty()
    };
    let request = builder.body(body).expect("request");
    let (status, _, bytes) = send_request(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, value)
}

/// Posts a streaming completion and returns the SSE `data:` payloads.
pub async fn send_stream(app: &Router, body: Value) -> (StatusCode, HeaderMap, Vec<String>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let (status, headers, bytes) = send_request(app, request).await;
    let text = String::from_utf8(bytes.to_vec()).expect("utf8 body");
    (status, headers, parse_sse_data(&text))
}

pub fn parse_sse_data(text: &str) -> Vec<String> {
    text.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .collect()
}

pub fn user(text: &str) -> Value {
    serde_json::json!({ "role": "user", "content": text })
}
