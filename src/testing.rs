// ABOUTME: Scriptable in-memory MCP worker for tests, launched over tokio duplex pipes
// ABOUTME: Answers the handshake, echoes tools, and can crash, stall, or emit events on demand
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec;
use crate::envelope::{Envelope, INITIALIZE_METHOD, PROTOCOL_VERSION};
use crate::launcher::{WorkerIo, WorkerLauncher};
use crate::types::BridgeError;

/// Pipe buffer between the bridge and a fake worker
const PIPE_CAPACITY: usize = 64 * 1024;

/// What the fake worker does with one request
#[derive(Debug, Clone)]
pub enum FakeAction {
    /// Write this response immediately
    Reply(Envelope),
    /// Write this response after a delay
    ReplyAfter(Duration, Envelope),
    /// Never answer
    Ignore,
    /// Close both pipes as if the process died
    Crash,
}

type Handler = Arc<dyn Fn(&Envelope) -> FakeAction + Send + Sync>;

enum Control {
    Emit(String),
    Crash,
}

/// Launcher producing fake workers
///
/// Every launch creates a fresh instance; `crash` and `emit` act on the most
/// recent one. Everything the bridge writes is recorded in `received`.
pub struct FakeLauncher {
    handler: Handler,
    launches: AtomicUsize,
    launch_limit: AtomicUsize,
    received: Arc<Mutex<Vec<Envelope>>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

impl FakeLauncher {
    /// Fake worker with the default behavior of [`default_reply`]
    pub fn new() -> Self {
        Self {
            handler: Arc::new(default_reply),
            launches: AtomicUsize::new(0),
            launch_limit: AtomicUsize::new(usize::MAX),
            received: Arc::new(Mutex::new(Vec::new())),
            control: Mutex::new(None),
        }
    }

    /// Replace the request handler
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Envelope) -> FakeAction + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Refuse every launch after the first `count`
    #[must_use]
    pub fn fail_launches_after(self, count: usize) -> Self {
        self.launch_limit.store(count, Ordering::SeqCst);
        self
    }

    /// Lift a launch limit set with [`Self::fail_launches_after`]
    pub fn allow_launches(&self) {
        self.launch_limit.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of successful launches so far
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every envelope the bridge has written to any instance
    pub fn received(&self) -> Vec<Envelope> {
        lock(&self.received).clone()
    }

    /// Make the current instance send a worker-originated message
    pub fn emit(&self, envelope: Envelope) {
        self.send_control(Control::Emit(codec::encode_line(&envelope)));
    }

    /// Make the current instance write a raw line (for malformed output)
    pub fn emit_raw(&self, line: &str) {
        self.send_control(Control::Emit(format!("{}\n", line.trim_end())));
    }

    /// Kill the current instance
    pub fn crash(&self) {
        self.send_control(Control::Crash);
    }

    fn send_control(&self, control: Control) {
        if let Some(tx) = lock(&self.control).as_ref() {
            let _ = tx.send(control);
        }
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<WorkerIo, BridgeError> {
        if self.launches.load(Ordering::SeqCst) >= self.launch_limit.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("fake worker refused to launch"));
        }
        let instance = self.launches.fetch_add(1, Ordering::SeqCst) + 1;

        let (bridge_end, worker_end) = tokio::io::duplex(PIPE_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *lock(&self.control) = Some(control_tx);

        tokio::spawn(serve(
            instance,
            worker_end,
            Arc::clone(&self.handler),
            Arc::clone(&self.received),
            control_rx,
        ));

        let (reader, writer) = tokio::io::split(bridge_end);
        Ok(WorkerIo {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        })
    }

    fn describe(&self) -> String {
        "fake-worker".to_owned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one fake worker instance until it crashes or its input closes
async fn serve(
    instance: usize,
    stream: DuplexStream,
    handler: Handler,
    received: Arc<Mutex<Vec<Envelope>>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = write_half.flush().await;
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(envelope) = codec::decode(&line) else { continue };
                lock(&received).push(envelope.clone());

                if !matches!(envelope, Envelope::Request { .. }) {
                    continue;
                }
                match handler(&envelope) {
                    FakeAction::Reply(reply) => {
                        let _ = out_tx.send(codec::encode_line(&reply));
                    }
                    FakeAction::ReplyAfter(delay, reply) => {
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = out_tx.send(codec::encode_line(&reply));
                        });
                    }
                    FakeAction::Ignore => {}
                    FakeAction::Crash => break,
                }
            }
            control = control.recv() => match control {
                Some(Control::Emit(line)) => {
                    let _ = out_tx.send(line);
                }
                Some(Control::Crash) | None => break,
            },
        }
    }

    debug!(instance, "Fake worker exiting");
    writer.abort();
}

/// Default fake worker behavior
///
/// - `initialize`: success echoing the requested protocol version
/// - `ping`: empty result
/// - `tools/list`: a single `echo` tool
/// - `tools/call`: echoes `arguments.text`, waiting `arguments.delay_ms` first
/// - `crash`: dies without answering
/// - anything else: method-not-found error
pub fn default_reply(request: &Envelope) -> FakeAction {
    let Envelope::Request { id, method, params } = request else {
        return FakeAction::Ignore;
    };
    let id = Some(id.clone());
    let params = params.clone().unwrap_or(Value::Null);

    match method.as_str() {
        INITIALIZE_METHOD => {
            let version = params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            FakeAction::Reply(Envelope::success(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "fake-worker", "version": "0.0.0" }
                }),
            ))
        }
        "ping" => FakeAction::Reply(Envelope::success(id, json!({}))),
        "tools/list" => FakeAction::Reply(Envelope::success(
            id,
            json!({
                "tools": [{
                    "name": "echo",
                    "description": "Echo the given text",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } }
                    }
                }]
            }),
        )),
        "tools/call" => {
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            let text = arguments
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let reply = Envelope::success(
                id,
                json!({ "content": [{ "type": "text", "text": text }], "isError": false }),
            );
            match arguments.get("delay_ms").and_then(Value::as_u64) {
                Some(ms) if ms > 0 => FakeAction::ReplyAfter(Duration::from_millis(ms), reply),
                _ => FakeAction::Reply(reply),
            }
        }
        "crash" => FakeAction::Crash,
        other => FakeAction::Reply(Envelope::error_response(
            id,
            -32_601,
            format!("Method not found: {other}"),
        )),
    }
}
