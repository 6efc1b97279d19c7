// ABOUTME: Integration tests driving the supervisor against real shell workers and the fake worker
// ABOUTME: Covers out-of-order replies, garbage on worker stdout, and real process handshakes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::testing::FakeLauncher;
use mcp_bridge::{
    Envelope, ErrorKind, LifecycleState, ProcessLauncher, RequestId, SessionManager, Supervisor,
    SupervisorConfig, WorkerConfig, WorkerLauncher,
};
use serde_json::{json, Value};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn echo_call(id: impl Into<RequestId>, text: &str, delay_ms: u64) -> Envelope {
    Envelope::request(
        id,
        "tools/call",
        Some(json!({ "name": "echo", "arguments": { "text": text, "delay_ms": delay_ms } })),
    )
}

fn echoed_text(reply: &Envelope) -> Value {
    serde_json::to_value(reply).expect("serialize")["result"]["content"][0]["text"].clone()
}

async fn fake_supervisor() -> (Arc<Supervisor>, Arc<FakeLauncher>) {
    let launcher = Arc::new(FakeLauncher::new());
    let supervisor = Supervisor::new(
        Arc::clone(&launcher) as Arc<dyn WorkerLauncher>,
        SupervisorConfig::default(),
        Arc::new(SessionManager::new()),
    );
    supervisor.start().await.expect("worker starts");
    (supervisor, launcher)
}

fn shell_supervisor(script: &str, init_timeout: Duration) -> Arc<Supervisor> {
    let worker = WorkerConfig::new("sh").with_args(vec!["-c".to_owned(), script.to_owned()]);
    Supervisor::new(
        Arc::new(ProcessLauncher::new(worker)),
        SupervisorConfig::default()
            .with_init_timeout(init_timeout)
            .with_shutdown_grace(Duration::from_millis(200)),
        Arc::new(SessionManager::new()),
    )
}

#[tokio::test]
async fn replies_arriving_out_of_order_reach_their_callers() {
    let (supervisor, _launcher) = fake_supervisor().await;

    let slow = supervisor.call(echo_call(1, "slow", 150), CALL_TIMEOUT);
    let fast = supervisor.call(echo_call(2, "fast", 0), CALL_TIMEOUT);
    let (slow, fast) = tokio::join!(slow, fast);

    let slow = slow.expect("slow call");
    let fast = fast.expect("fast call");
    assert_eq!(slow.id(), Some(&RequestId::Number(1)));
    assert_eq!(echoed_text(&slow), "slow");
    assert_eq!(fast.id(), Some(&RequestId::Number(2)));
    assert_eq!(echoed_text(&fast), "fast");
}

#[tokio::test]
async fn garbage_from_the_worker_is_skipped() {
    let (supervisor, launcher) = fake_supervisor().await;

    launcher.emit_raw("this is not json");
    launcher.emit_raw("{\"jsonrpc\":\"2.0\"}");

    let reply = supervisor
        .call(echo_call("after-garbage", "still alive", 0), CALL_TIMEOUT)
        .await
        .expect("call after garbage");
    assert_eq!(reply.id(), Some(&RequestId::from("after-garbage")));
    assert_eq!(echoed_text(&reply), "still alive");
    assert_eq!(supervisor.state(), LifecycleState::Ready);
    assert_eq!(supervisor.generation(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn shell_worker_handshakes_and_answers() {
    // Reads initialize, initialized, then one call with bridge-assigned id 2
    let script = r#"
read line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"sh-worker","version":"0"}}}'
read line
read line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"answer":42}}'
cat > /dev/null
"#;
    let supervisor = shell_supervisor(script, Duration::from_secs(5));
    supervisor.start().await.expect("shell worker starts");

    let result = supervisor.initialize_result().expect("cached handshake");
    assert_eq!(result["serverInfo"]["name"], "sh-worker");

    let reply = supervisor
        .call(Envelope::request("caller-7", "ping", None), CALL_TIMEOUT)
        .await
        .expect("call");
    assert_eq!(reply.id(), Some(&RequestId::from("caller-7")));
    assert_eq!(
        serde_json::to_value(&reply).expect("serialize")["result"]["answer"],
        42
    );

    supervisor.stop(Duration::from_millis(200)).await;
    assert_eq!(supervisor.state(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn silent_worker_fails_the_handshake() {
    let supervisor = shell_supervisor("cat > /dev/null", Duration::from_millis(300));

    let err = supervisor.start().await.expect_err("handshake times out");
    assert_eq!(err.kind, ErrorKind::Init);
    assert!(err.message.contains("INIT_TIMEOUT"));
    assert_eq!(supervisor.state(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn worker_exiting_before_handshake_fails_start() {
    let supervisor = shell_supervisor("exit 3", Duration::from_secs(5));

    let err = supervisor.start().await.expect_err("worker exits");
    assert_eq!(err.kind, ErrorKind::Init);
    assert_eq!(supervisor.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn missing_worker_binary_fails_start() {
    let worker = WorkerConfig::new("definitely-not-an-mcp-worker-binary");
    let supervisor = Supervisor::new(
        Arc::new(ProcessLauncher::new(worker)),
        SupervisorConfig::default(),
        Arc::new(SessionManager::new()),
    );

    let err = supervisor.start().await.expect_err("binary is missing");
    assert_eq!(err.kind, ErrorKind::Init);
    assert!(err.message.contains("failed to launch worker"));
}
