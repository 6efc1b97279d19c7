// ABOUTME: Integration tests for the Streamable HTTP endpoint, health, and admin routes
// ABOUTME: Drives the axum router against an in-memory fake worker via tower oneshot
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mcp_bridge::testing::{default_reply, FakeAction, FakeLauncher};
use mcp_bridge::{LifecycleState, SessionManager, Supervisor, SupervisorConfig, WorkerLauncher};
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_bridge_server::router;
use mcp_bridge_server::state::ServerState;

struct TestBridge {
    app: axum::Router,
    supervisor: Arc<Supervisor>,
    launcher: Arc<FakeLauncher>,
}

async fn start_bridge(launcher: FakeLauncher, config: SupervisorConfig) -> TestBridge {
    let launcher = Arc::new(launcher);
    let supervisor = Supervisor::new(
        Arc::clone(&launcher) as Arc<dyn WorkerLauncher>,
        config,
        Arc::new(SessionManager::new()),
    );
    supervisor.start().await.expect("worker starts");

    let state = ServerState::new(Arc::clone(&supervisor))
        .with_sse_upgrade_after(Duration::from_millis(50));
    TestBridge {
        app: router::build(Arc::new(state)),
        supervisor,
        launcher,
    }
}

async fn test_bridge() -> TestBridge {
    start_bridge(FakeLauncher::new(), SupervisorConfig::default()).await
}

/// Build a POST /mcp request from a JSON body
fn post_mcp(body: &Value) -> Request<Body> {
    post_raw(serde_json::to_vec(body).expect("serialize"), &[])
}

fn post_raw(body: Vec<u8>, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).expect("build request")
}

fn tool_call(id: Value, text: &str, delay_ms: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": "echo", "arguments": { "text": text, "delay_ms": delay_ms } }
    })
}

/// Send a request and parse the response body as JSON
async fn send_and_parse(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("send request");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn initialize(app: axum::Router) -> String {
    let response = app
        .oneshot(post_mcp(&json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
        })))
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .expect("session header")
        .to_owned()
}

// ============================================================================
// Health and admin
// ============================================================================

#[tokio::test]
async fn health_reports_worker_state() {
    let bridge = test_bridge().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let (status, json) = send_and_parse(bridge.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "mcp-bridge");
    assert_eq!(json["worker"], "ready");
    assert_eq!(json["generation"], 1);
}

#[tokio::test]
async fn admin_restart_launches_fresh_worker() {
    let bridge = test_bridge().await;
    let request = Request::builder()
        .method("POST")
        .uri("/admin/restart")
        .body(Body::empty())
        .expect("build request");

    let (status, json) = send_and_parse(bridge.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["worker"], "ready");
    assert_eq!(bridge.launcher.launches(), 2);
}

// ============================================================================
// POST /mcp
// ============================================================================

#[tokio::test]
async fn unparseable_body_is_400_parse_error() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(bridge.app, post_raw(b"{not json".to_vec(), &[])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], -32_700);
    assert!(json["id"].is_null());
    assert_eq!(json["jsonrpc"], "2.0");
}

#[tokio::test]
async fn wrong_envelope_shape_is_400_invalid_request() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(
        bridge.app,
        post_raw(br#"{"jsonrpc":"2.0","id":1}"#.to_vec(), &[]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], -32_600);
    assert!(json["id"].is_null());
}

#[tokio::test]
async fn initialize_opens_session_with_cached_result() {
    let bridge = test_bridge().await;
    let response = bridge
        .app
        .clone()
        .oneshot(post_mcp(&json!({
            "jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": {}
        })))
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::OK);
    let session = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .expect("session header")
        .to_owned();
    assert!(bridge.supervisor.sessions().contains(&session));

    let bytes = response.into_body().collect().await.expect("collect").to_bytes();
    let json: Value = serde_json::from_slice(&bytes).expect("parse json");
    assert_eq!(json["id"], "init-1");
    assert_eq!(json["result"]["serverInfo"]["name"], "fake-worker");

    // Only the bridge's own handshake reached the worker
    let initializes = bridge
        .launcher
        .received()
        .iter()
        .filter(|e| e.method() == Some("initialize"))
        .count();
    assert_eq!(initializes, 1);
}

#[tokio::test]
async fn client_initialized_notification_is_absorbed() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(
        bridge.app,
        post_mcp(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json, json!({}));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let forwarded = bridge
        .launcher
        .received()
        .iter()
        .filter(|e| e.method() == Some("notifications/initialized"))
        .count();
    assert_eq!(forwarded, 1);
}

#[tokio::test]
async fn notifications_are_forwarded_with_202() {
    let bridge = test_bridge().await;
    let (status, _) = send_and_parse(
        bridge.app,
        post_mcp(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 3 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bridge
        .launcher
        .received()
        .iter()
        .any(|e| e.method() == Some("notifications/cancelled")));
}

#[tokio::test]
async fn request_reply_carries_caller_id() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(bridge.app, post_mcp(&tool_call(json!(42), "hi", 0))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 42);
    assert_eq!(json["result"]["content"][0]["text"], "hi");
}

#[tokio::test]
async fn worker_errors_pass_through_with_200() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(
        bridge.app,
        post_mcp(&json!({ "jsonrpc": "2.0", "id": 5, "method": "no/such/method" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 5);
    assert_eq!(json["error"]["code"], -32_601);
}

#[tokio::test]
async fn concurrent_clients_reusing_an_id_get_their_own_replies() {
    let bridge = test_bridge().await;

    // Both clients use id 1; the slow one is sent first
    let slow = send_and_parse(bridge.app.clone(), post_mcp(&tool_call(json!(1), "slow", 200)));
    let fast = send_and_parse(bridge.app.clone(), post_mcp(&tool_call(json!(1), "fast", 0)));
    let ((slow_status, slow_json), (fast_status, fast_json)) = tokio::join!(slow, fast);

    assert_eq!(slow_status, StatusCode::OK);
    assert_eq!(fast_status, StatusCode::OK);
    assert_eq!(slow_json["id"], 1);
    assert_eq!(fast_json["id"], 1);
    assert_eq!(slow_json["result"]["content"][0]["text"], "slow");
    assert_eq!(fast_json["result"]["content"][0]["text"], "fast");
}

#[tokio::test]
async fn unknown_session_is_404() {
    let bridge = test_bridge().await;
    let body = serde_json::to_vec(&tool_call(json!(1), "x", 0)).expect("serialize");
    let (status, json) = send_and_parse(
        bridge.app,
        post_raw(body, &[("mcp-session-id", "does-not-exist")]),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], -32_600);
    assert_eq!(json["id"], 1);
}

#[tokio::test]
async fn known_session_is_accepted() {
    let bridge = test_bridge().await;
    let session = initialize(bridge.app.clone()).await;
    let body = serde_json::to_vec(&tool_call(json!(2), "x", 0)).expect("serialize");
    let (status, _) = send_and_parse(
        bridge.app,
        post_raw(
            body,
            &[("mcp-session-id", session.as_str()), ("mcp-protocol-version", "2025-03-26")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unsupported_protocol_version_is_400() {
    let bridge = test_bridge().await;
    let body = serde_json::to_vec(&tool_call(json!(1), "x", 0)).expect("serialize");
    let (status, json) = send_and_parse(
        bridge.app,
        post_raw(body, &[("mcp-protocol-version", "1999-01-01")]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], -32_600);
}

#[tokio::test]
async fn fast_call_from_sse_client_is_plain_json() {
    let bridge = test_bridge().await;
    let body = serde_json::to_vec(&tool_call(json!("a"), "quick", 0)).expect("serialize");
    let response = bridge
        .app
        .oneshot(post_raw(
            body,
            &[("accept", "application/json, text/event-stream")],
        ))
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("application/json"), "{content_type}");
}

#[tokio::test]
async fn slow_call_from_sse_client_is_streamed() {
    let bridge = test_bridge().await;
    let body = serde_json::to_vec(&tool_call(json!("req-9"), "later", 300)).expect("serialize");
    let response = bridge
        .app
        .oneshot(post_raw(
            body,
            &[("accept", "application/json, text/event-stream")],
        ))
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let bytes = response.into_body().collect().await.expect("collect").to_bytes();
    let text = String::from_utf8(bytes.to_vec()).expect("utf-8");
    let events = mcp_bridge::codec::decode_sse_events(&text);
    assert_eq!(events.len(), 1, "{text}");
    assert!(text.contains("event: message"));

    let reply: Value = serde_json::from_str(&events[0]).expect("parse event");
    assert_eq!(reply["id"], "req-9");
    assert_eq!(reply["result"]["content"][0]["text"], "later");
}

#[tokio::test]
async fn call_timeout_is_504() {
    let config = SupervisorConfig::default().with_request_timeout(Duration::from_millis(100));
    let bridge = start_bridge(FakeLauncher::new(), config).await;
    let (status, json) =
        send_and_parse(bridge.app, post_mcp(&tool_call(json!(3), "late", 2000))).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["id"], 3);
    assert_eq!(json["error"]["code"], -32_603);
    assert_eq!(bridge.supervisor.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn fatal_bridge_answers_503() {
    let bridge = start_bridge(
        FakeLauncher::new().fail_launches_after(1),
        SupervisorConfig::default(),
    )
    .await;

    let mut states = bridge.supervisor.watch_state();
    bridge.launcher.crash();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == LifecycleState::Failed),
    )
    .await
    .expect("reaches failed")
    .expect("state channel open");

    let (status, json) = send_and_parse(bridge.app, post_mcp(&tool_call(json!(4), "x", 0))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], -32_603);
    assert_eq!(json["error"]["data"]["kind"], "fatal");
}

// ============================================================================
// GET and DELETE /mcp
// ============================================================================

fn get_mcp(headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/mcp");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("build request")
}

fn delete_mcp(session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri("/mcp");
    if let Some(session) = session {
        builder = builder.header("mcp-session-id", session);
    }
    builder.body(Body::empty()).expect("build request")
}

#[tokio::test]
async fn get_requires_event_stream_accept() {
    let bridge = test_bridge().await;
    let (status, _) = send_and_parse(bridge.app, get_mcp(&[("mcp-session-id", "x")])).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn get_without_session_is_400_and_unknown_is_404() {
    let bridge = test_bridge().await;
    let (status, _) =
        send_and_parse(bridge.app.clone(), get_mcp(&[("accept", "text/event-stream")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send_and_parse(
        bridge.app,
        get_mcp(&[("accept", "text/event-stream"), ("mcp-session-id", "gone")]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], -32_600);
}

#[tokio::test]
async fn session_stream_delivers_worker_events_until_terminated() {
    let bridge = test_bridge().await;
    let session = initialize(bridge.app.clone()).await;

    let response = bridge
        .app
        .clone()
        .oneshot(get_mcp(&[
            ("accept", "text/event-stream"),
            ("mcp-session-id", session.as_str()),
        ]))
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);

    bridge.launcher.emit(mcp_bridge::Envelope::notification(
        "notifications/tools/list_changed",
        None,
    ));

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("event in time")
        .expect("stream open")
        .expect("frame ok");
    let data = frame.into_data().expect("data frame");
    let text = String::from_utf8(data.to_vec()).expect("utf-8");
    assert!(text.contains("event: message"), "{text}");
    assert!(text.contains("notifications/tools/list_changed"), "{text}");

    // DELETE ends the stream
    let (status, json) = send_and_parse(bridge.app, delete_mcp(Some(&session))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["terminated"], true);

    let rest = tokio::time::timeout(Duration::from_secs(2), body.collect())
        .await
        .expect("stream ends");
    assert!(rest.is_ok());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let bridge = test_bridge().await;
    let session = initialize(bridge.app.clone()).await;

    let (status, json) = send_and_parse(bridge.app.clone(), delete_mcp(Some(&session))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["terminated"], true);

    let (status, json) = send_and_parse(bridge.app.clone(), delete_mcp(Some(&session))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["terminated"], false);

    let (status, _) = send_and_parse(bridge.app, delete_mcp(None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// initialize while the worker is not ready
// ============================================================================

fn initialize_request() -> Request<Body> {
    post_mcp(&json!({
        "jsonrpc": "2.0", "id": "init", "method": "initialize", "params": {}
    }))
}

#[tokio::test]
async fn initialize_after_stop_issues_no_session() {
    let bridge = test_bridge().await;
    let earlier = initialize(bridge.app.clone()).await;
    bridge.supervisor.stop(Duration::from_millis(100)).await;
    assert!(!bridge.supervisor.sessions().contains(&earlier));

    let response = bridge
        .app
        .clone()
        .oneshot(initialize_request())
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get("mcp-session-id").is_none());
    assert!(bridge.supervisor.sessions().is_empty());
}

#[tokio::test]
async fn initialize_during_restart_waits_then_fails_without_session() {
    // The restarted worker never answers its handshake
    let handshakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handshakes);
    let launcher = FakeLauncher::new().with_handler(move |request| {
        if request.method() == Some("initialize") && counter.fetch_add(1, Ordering::SeqCst) > 0 {
            return FakeAction::Ignore;
        }
        default_reply(request)
    });
    let config = SupervisorConfig::default()
        .with_init_timeout(Duration::from_secs(3))
        .with_request_timeout(Duration::from_millis(200));
    let bridge = start_bridge(launcher, config).await;

    let mut states = bridge.supervisor.watch_state();
    bridge.launcher.crash();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == LifecycleState::Starting),
    )
    .await
    .expect("restart begins")
    .expect("state channel open");

    let response = bridge
        .app
        .clone()
        .oneshot(initialize_request())
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(response.headers().get("mcp-session-id").is_none());
    assert_eq!(bridge.supervisor.sessions().len(), 0);
    assert_eq!(handshakes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_reports_oldest_session_age() {
    let bridge = test_bridge().await;
    initialize(bridge.app.clone()).await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let (_, json) = send_and_parse(bridge.app, request).await;
    assert_eq!(json["sessions"], 1);
    assert_eq!(json["oldest_session_secs"], 0);
}

// ============================================================================
// REST shortcuts
// ============================================================================

fn rest(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let body = body.map_or_else(Body::empty, |b| {
        Body::from(serde_json::to_vec(&b).expect("serialize"))
    });
    builder.body(body).expect("build request")
}

#[tokio::test]
async fn rest_initialize_returns_handshake_without_session() {
    let bridge = test_bridge().await;
    let response = bridge
        .app
        .clone()
        .oneshot(rest("POST", "/mcp/initialize", None))
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("mcp-session-id").is_none());

    let bytes = response.into_body().collect().await.expect("collect").to_bytes();
    let json: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(json["result"]["serverInfo"]["name"], "fake-worker");
    assert!(bridge.supervisor.sessions().is_empty());
}

#[tokio::test]
async fn rest_tools_list_and_call() {
    let bridge = test_bridge().await;

    let (status, json) =
        send_and_parse(bridge.app.clone(), rest("GET", "/mcp/tools/list", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["tools"][0]["name"], "echo");

    let (status, json) = send_and_parse(
        bridge.app,
        rest(
            "POST",
            "/mcp/tools/call",
            Some(json!({ "name": "echo", "arguments": { "text": "over rest" } })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["content"][0]["text"], "over rest");
}

#[tokio::test]
async fn rest_tools_call_without_name_is_400() {
    let bridge = test_bridge().await;
    let (status, json) = send_and_parse(
        bridge.app,
        rest("POST", "/mcp/tools/call", Some(json!({ "arguments": {} }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], -32_600);
}

#[tokio::test]
async fn rest_resource_routes_relay_worker_answers() {
    let bridge = test_bridge().await;

    // The fake worker has no resources; its error passes through
    let (status, json) =
        send_and_parse(bridge.app.clone(), rest("GET", "/mcp/resources/list", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"]["code"], -32_601);

    let (status, _) = send_and_parse(
        bridge.app,
        rest("POST", "/mcp/resources/read", Some(json!({ "uri": "file:///notes.txt" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let read = bridge
        .launcher
        .received()
        .into_iter()
        .find(|e| e.method() == Some("resources/read"))
        .expect("worker saw resources/read");
    let read = serde_json::to_value(read).expect("serialize");
    assert_eq!(read["params"]["uri"], "file:///notes.txt");
}

#[tokio::test]
async fn rest_calls_fail_with_503_when_worker_is_stopped() {
    let bridge = test_bridge().await;
    bridge.supervisor.stop(Duration::from_millis(100)).await;

    let (status, json) =
        send_and_parse(bridge.app, rest("GET", "/mcp/tools/list", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], -32_603);
}
