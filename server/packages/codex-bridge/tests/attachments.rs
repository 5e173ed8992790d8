mod common;

use std::path::{Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use codex_bridge::BridgeConfig;
use codex_bridge_backend::{MockConfig, UserInput};
use serde_json::{json, Value};

use common::{send_stream, TestApp};

const PIXEL_B64: &str = "aGVsbG8=";

fn image_message(url: &str) -> Value {
    json!({
        "role": "user",
        "content": [
            { "type": "text", "text": "what is in this picture?" },
            { "type": "image_url", "image_url": { "url": url } }
        ]
    })
}

fn sent_images(test: &TestApp) -> Vec<PathBuf> {
    test.backend()
        .last_input()
        .expect("input")
        .into_iter()
        .filter_map(|input| match input {
            UserInput::LocalImage { path } => Some(path),
            UserInput::Text { .. } => None,
        })
        .collect()
}

/// App whose image directories are created under `root`.
fn app_with_attachment_dir(root: &Path, mock: MockConfig) -> TestApp {
    TestApp::with_config(
        BridgeConfig {
            attachment_dir: Some(root.to_path_buf()),
            ..BridgeConfig::default()
        },
        mock,
    )
}

fn assert_no_leftovers(root: &Path) {
    let leftovers: Vec<PathBuf> = match std::fs::read_dir(root) {
        Ok(entries) => entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()).collect(),
        Err(_) => Vec::new(),
    };
    assert!(leftovers.is_empty(), "leftover image dirs: {leftovers:?}");
}

fn failing_turns() -> MockConfig {
    MockConfig {
        fail_turns_with: Some("sandbox denied".to_string()),
        ..MockConfig::default()
    }
}

async fn serve_images() -> String {
    let app = Router::new()
        .route(
            "/cat.gif",
            get(|| async { ([(header::CONTENT_TYPE, "image/gif")], "GIF89a") }),
        )
        .route(
            "/missing.png",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind image server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn data_url_is_materialized_then_removed() {
    let test = TestApp::new(MockConfig::default());
    let url = format!("data:image/png;base64,{PIXEL_B64}");
    let (status, _) = test
        .chat(json!({ "session_id": "s", "messages": [image_message(&url)] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let images = sent_images(&test);
    assert_eq!(images.len(), 1);
    let image = &images[0];
    assert_eq!(
        image.file_name().and_then(|name| name.to_str()),
        Some("attachment.png")
    );
    let dir = image.parent().expect("temp dir");
    assert!(dir
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("codex-bridge-image-")));
    assert!(!dir.exists(), "temp dir should be gone after the response");

    assert_eq!(
        test.backend().last_prompt().as_deref(),
        Some("what is in this picture?")
    );
}

#[tokio::test]
async fn http_image_is_downloaded() {
    let base = serve_images().await;
    let test = TestApp::new(MockConfig::default());
    let (status, _) = test
        .chat(json!({
            "session_id": "s",
            "messages": [image_message(&format!("{base}/cat.gif"))]
        }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let images = sent_images(&test);
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].file_name().and_then(|name| name.to_str()),
        Some("attachment.gif")
    );
    assert!(!images[0].exists());
}

#[tokio::test]
async fn failed_download_is_bad_request() {
    let base = serve_images().await;
    let test = TestApp::new(MockConfig::default());
    let url = format!("{base}/missing.png");
    let (status, body) = test
        .chat(json!({ "session_id": "s", "messages": [image_message(&url)] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        format!("Message 1: Failed to download image from {url} (status 404).")
    );
    assert_eq!(test.backend().turns_run(), 0);
}

#[tokio::test]
async fn image_block_without_url_is_rejected() {
    let test = TestApp::new(MockConfig::default());
    let (status, body) = test
        .chat(json!({
            "messages": [
                { "role": "system", "content": "Describe images." },
                { "role": "user", "content": [{ "type": "image_url", "image_url": {} }] }
            ]
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "Message 2 image_url block is missing url."
    );
}

#[tokio::test]
async fn local_image_path_is_passed_through() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("diagram.png");
    std::fs::write(&image, b"png").expect("write image");

    let test = TestApp::new(MockConfig::default());
    let (status, _) = test
        .chat(json!({
            "session_id": "s",
            "messages": [{
                "role": "user",
                "content": [{ "type": "local_image", "path": image.to_string_lossy() }]
            }]
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent_images(&test), vec![image.clone()]);
    // Caller-owned files are never cleaned up.
    assert!(image.exists());
}

#[tokio::test]
async fn streamed_attachment_is_removed_after_stream() {
    let test = TestApp::new(MockConfig::default());
    let url = format!("data:image/jpeg;base64,{PIXEL_B64}");
    let (status, _, payloads) = send_stream(
        &test.app,
        json!({ "stream": true, "session_id": "s", "messages": [image_message(&url)] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let images = sent_images(&test);
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].file_name().and_then(|name| name.to_str()),
        Some("attachment.jpg")
    );
    assert!(!images[0].parent().expect("temp dir").exists());
}

#[tokio::test]
async fn attachment_dir_holds_images_during_the_turn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("images");
    let test = app_with_attachment_dir(&root, MockConfig::default());
    let url = format!("data:image/png;base64,{PIXEL_B64}");
    let (status, _) = test
        .chat(json!({ "session_id": "s", "messages": [image_message(&url)] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let images = sent_images(&test);
    assert!(images[0].starts_with(&root));
    assert_no_leftovers(&root);
}

#[tokio::test]
async fn failed_turn_still_removes_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("images");
    let test = app_with_attachment_dir(&root, failing_turns());
    let url = format!("data:image/png;base64,{PIXEL_B64}");
    let (status, body) = test
        .chat(json!({ "session_id": "s", "messages": [image_message(&url)] }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "codex_execution_error");
    assert_eq!(sent_images(&test).len(), 1);
    assert_no_leftovers(&root);
}

#[tokio::test]
async fn failed_stream_still_removes_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("images");
    let test = app_with_attachment_dir(&root, failing_turns());
    let url = format!("data:image/png;base64,{PIXEL_B64}");
    let (status, _, payloads) = send_stream(
        &test.app,
        json!({ "stream": true, "session_id": "s", "messages": [image_message(&url)] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
    let failed: Value = serde_json::from_str(&payloads[0]).expect("chunk json");
    assert_eq!(failed["choices"][0]["finish_reason"], "error");
    assert_eq!(sent_images(&test).len(), 1);
    assert_no_leftovers(&root);
}

#[tokio::test]
async fn rejected_response_format_removes_written_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("images");
    let test = app_with_attachment_dir(&root, MockConfig::default());
    let url = format!("data:image/png;base64,{PIXEL_B64}");
    let (status, body) = test
        .chat(json!({
            "session_id": "s",
            "messages": [image_message(&url)],
            "response_format": "json_schema"
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "response_format \"json_schema\" requires an accompanying schema."
    );
    // The image was written before the schema was checked.
    assert!(root.exists());
    assert_no_leftovers(&root);
    assert_eq!(test.backend().turns_run(), 0);
}
