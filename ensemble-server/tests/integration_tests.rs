//! Integration tests for the ensemble server: REST validation through the
//! router directly, and the full WebSocket flow against a scripted mock
//! backend process.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ensemble_core::{AgentNetworkManager, ManagerConfig, NetworkStore};
use ensemble_server::{router, AppState, NetworkCache};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

const WS_TIMEOUT: Duration = Duration::from_secs(10);

/// A stand-in backend: replies to every stdin line with one assistant
/// message and a result event, or dies mid-turn when the message contains
/// `die-now`. The pause keeps the first turn from finishing before a test
/// client has attached its stream.
const MOCK_BACKEND: &str = r#"#!/bin/sh
echo '{"type":"system","subtype":"init"}'
while IFS= read -r line; do
  sleep 1
  case "$line" in
    *die-now*)
      echo '{"type":"assistant","message":{"content":[{"type":"text","text":"about to go"}]}}'
      exit 1
      ;;
  esac
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"mock reply 4"}]}}'
  echo '{"type":"result","subtype":"success","usage":{"input_tokens":3,"output_tokens":7}}'
done
"#;

struct TestApp {
    app: Router,
    dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("mock_backend.sh");
    std::fs::write(&script, MOCK_BACKEND).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let store = NetworkStore::at_path(dir.path().join("agent_networks.json"));
    let mut config = ManagerConfig::new(dir.path(), store.clone());
    config.backend_binary = script.to_string_lossy().into_owned();
    let manager = AgentNetworkManager::new(config);
    let cache = Arc::new(NetworkCache::new(store));
    let app = router(AppState::new(manager, cache));
    TestApp { app, dir }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = test_app();
    let response = test
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_create_network_returns_ids() {
    let test = test_app();
    let working_dir = test.dir.path().to_string_lossy().into_owned();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({
                "initialMessage": "What is 2+2? Reply with just the number.",
                "workingDirectory": working_dir,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert!(body["networkId"].is_string());
    assert!(body["mainAgentId"].is_string());
    assert!(body["createdAt"].is_string());
}

#[tokio::test]
async fn test_create_network_rejects_missing_working_directory() {
    let test = test_app();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({"initialMessage": "hi", "workingDirectory": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "workingDirectory is required");
}

#[tokio::test]
async fn test_create_network_rejects_nonexistent_working_directory() {
    let test = test_app();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({
                "initialMessage": "hi",
                "workingDirectory": "/definitely/not/a/real/path",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(
        body["error"],
        "workingDirectory does not exist: /definitely/not/a/real/path"
    );
}

#[tokio::test]
async fn test_create_network_rejects_missing_initial_message() {
    let test = test_app();
    let working_dir = test.dir.path().to_string_lossy().into_owned();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({"initialMessage": "", "workingDirectory": working_dir}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "initialMessage is required");
}

#[tokio::test]
async fn test_message_to_unknown_network_is_404() {
    let test = test_app();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks/no-such-network/messages",
            serde_json::json!({"content": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_requires_content() {
    let test = test_app();
    let response = test
        .app
        .oneshot(post_json(
            "/api/v1/networks/some-network/messages",
            serde_json::json!({"content": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// WebSocket flow
// ============================================================================

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn next_frame(stream: &mut WsClient) -> Value {
    loop {
        let frame = timeout(WS_TIMEOUT, stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Collect frames until (and including) the next `done`.
async fn frames_until_done(stream: &mut WsClient) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(stream).await;
        let is_done = frame["type"] == "done";
        frames.push(frame);
        if is_done {
            return frames;
        }
    }
}

/// Collect every text frame until the server closes the socket.
async fn frames_until_close(stream: &mut WsClient) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let next = timeout(WS_TIMEOUT, stream.next())
            .await
            .expect("timed out waiting for frame");
        match next {
            Some(Ok(WsMessage::Text(text))) => frames.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return frames,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_full_stream_flow_with_multi_turn() {
    let test = test_app();
    let working_dir = test.dir.path().to_string_lossy().into_owned();

    // Serve the same state over a real listener for the WebSocket side.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = test.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });

    let response = test
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({
                "initialMessage": "What is 2+2? Reply with just the number.",
                "workingDirectory": working_dir,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = response_json(response).await;
    let network_id = created["networkId"].as_str().unwrap().to_string();
    let agent_id = created["mainAgentId"].as_str().unwrap().to_string();

    let url = format!("ws://{addr}/api/v1/networks/{network_id}/agents/{agent_id}/stream");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // Bootstrap frame first.
    let connected = next_frame(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["networkId"], network_id.as_str());
    assert_eq!(connected["agentId"], agent_id.as_str());

    // Then the structured stream: status, then the first turn up to done.
    let status = next_frame(&mut ws).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["data"]["status"], "connected");
    assert_eq!(status["agentType"], "main");

    let first_turn = frames_until_done(&mut ws).await;
    let assistant_content: String = first_turn
        .iter()
        .filter(|f| f["type"] == "message" && f["data"]["role"] == "assistant")
        .filter_map(|f| f["data"]["content"].as_str())
        .collect();
    let deltas: String = first_turn
        .iter()
        .filter(|f| f["type"] == "message_delta")
        .filter_map(|f| f["data"]["delta"].as_str())
        .collect();
    assert!(
        format!("{assistant_content}{deltas}").contains('4'),
        "assistant content should contain the answer"
    );

    // Second turn via REST; same socket sees a second done.
    let response = test
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/networks/{network_id}/messages"),
            serde_json::json!({"content": "And what is 3+3?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sent = response_json(response).await;
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["agentId"], agent_id.as_str());

    let second_turn = frames_until_done(&mut ws).await;
    assert!(second_turn.iter().any(|f| f["type"] == "done"));

    // Every frame carries the envelope fields.
    for frame in first_turn.iter().chain(second_turn.iter()) {
        assert_eq!(frame["agentId"], agent_id.as_str());
        assert!(frame["agentType"].is_string());
        assert!(frame.get("data").is_some());
    }
}

#[tokio::test]
async fn test_backend_crash_streams_error_without_done() {
    let test = test_app();
    let working_dir = test.dir.path().to_string_lossy().into_owned();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = test.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });

    // The first turn dies mid-stream: no result event ever arrives.
    let response = test
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({
                "initialMessage": "please die-now",
                "workingDirectory": working_dir,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = response_json(response).await;
    let network_id = created["networkId"].as_str().unwrap();
    let agent_id = created["mainAgentId"].as_str().unwrap();

    let url = format!("ws://{addr}/api/v1/networks/{network_id}/agents/{agent_id}/stream");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let frames = frames_until_close(&mut ws).await;

    // The failure surfaces as an error event, and an errored turn emits
    // zero done frames.
    assert!(
        frames.iter().any(|f| f["type"] == "error"),
        "expected an error frame, got: {frames:?}"
    );
    assert!(
        !frames.iter().any(|f| f["type"] == "done"),
        "an errored turn must not emit done, got: {frames:?}"
    );
}

#[tokio::test]
async fn test_stream_for_unknown_agent_rejects_upgrade() {
    let test = test_app();
    let working_dir = test.dir.path().to_string_lossy().into_owned();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = test.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });

    let response = test
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/networks",
            serde_json::json!({"initialMessage": "hi", "workingDirectory": working_dir}),
        ))
        .await
        .unwrap();
    let created = response_json(response).await;
    let network_id = created["networkId"].as_str().unwrap();

    let url = format!("ws://{addr}/api/v1/networks/{network_id}/agents/ghost/stream");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}
