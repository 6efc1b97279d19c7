// ABOUTME: Process supervisor owning the worker lifecycle, handshake, and crash recovery
// ABOUTME: Single bridge-instance object holding all mutable state: streams, correlator, sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::correlator::{Correlator, Submission};
use crate::envelope::{
    ClientInfo, Envelope, InitializeParams, ResponsePayload, INITIALIZED_NOTIFICATION,
    INITIALIZE_METHOD,
};
use crate::launcher::{BoxedReader, WorkerLauncher};
use crate::process::WorkerProcess;
use crate::session::SessionManager;
use crate::stdio::{read_loop, ReadOutcome, StdioWriter};
use crate::types::{BridgeError, ErrorKind, LifecycleState};

/// Connection to one live worker instance
///
/// Each instance gets its own correlator, so ids restart at 1 per worker
/// and a stale caller can never collide with the next instance's ids.
#[derive(Clone)]
struct Link {
    generation: u64,
    writer: Arc<StdioWriter>,
    correlator: Arc<Correlator>,
}

/// Lifecycle bookkeeping, guarded by the lifecycle lock
struct Inner {
    next_generation: u64,
    process: Option<WorkerProcess>,
    reader: Option<JoinHandle<()>>,
    last_auto_restart: Option<Instant>,
}

/// How the worker process is brought down during teardown
#[derive(Clone, Copy)]
enum Shutdown {
    /// SIGTERM, wait, then SIGKILL
    Graceful(Duration),
    /// The worker is already gone; collect its status
    Reap,
}

/// Supervises one worker process and relays calls to it
///
/// All lifecycle transitions are serialized by one async lock. Calls never
/// take that lock: they read the current link and wait on the state watch
/// while the worker is starting or restarting.
pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    config: SupervisorConfig,
    sessions: Arc<SessionManager>,
    state_tx: watch::Sender<LifecycleState>,
    link: RwLock<Option<Link>>,
    init_result: RwLock<Option<Value>>,
    inner: Mutex<Inner>,
    weak_self: Weak<Self>,
}

impl Supervisor {
    /// Create a stopped supervisor
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        config: SupervisorConfig,
        sessions: Arc<SessionManager>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LifecycleState::Stopped);
        Arc::new_cyclic(|weak_self| Self {
            launcher,
            config,
            sessions,
            state_tx,
            link: RwLock::new(None),
            init_result: RwLock::new(None),
            inner: Mutex::new(Inner {
                next_generation: 1,
                process: None,
                reader: None,
                last_auto_restart: None,
            }),
            weak_self: weak_self.clone(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Session registry shared with the HTTP side
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Supervisor configuration
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The worker's `initialize` result from the last successful handshake
    pub fn initialize_result(&self) -> Option<Value> {
        self.init_result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation number of the live worker instance (0 when none)
    pub fn generation(&self) -> u64 {
        self.current_link().map_or(0, |link| link.generation)
    }

    /// Requests awaiting a worker response on the live instance
    pub fn pending_count(&self) -> usize {
        self.current_link()
            .map_or(0, |link| link.correlator.pending_count())
    }

    fn current_link(&self) -> Option<Link> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_link(&self, link: Option<Link>) -> Option<Link> {
        let mut slot = self.link.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, link)
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Worker state changed");
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Launch the worker and complete the handshake
    ///
    /// On failure the worker is torn down, the state returns to `Stopped`,
    /// and an `Init` error is returned.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().await;
        if self.state() == LifecycleState::Ready {
            return Ok(());
        }

        inner.last_auto_restart = None;
        self.set_state(LifecycleState::Starting);

        match self.bring_up(&mut inner).await {
            Ok(()) => {
                self.set_state(LifecycleState::Ready);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, worker = %self.launcher.describe(), "Worker failed to start");
                self.teardown(&mut inner, &e, Shutdown::Graceful(self.config.shutdown_grace))
                    .await;
                self.set_state(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    /// Stop the worker: close its input, SIGTERM, wait `graceful_timeout`, kill
    ///
    /// Pending calls fail with a transport error and every session ends.
    /// Stopping an already stopped bridge is a no-op.
    pub async fn stop(&self, graceful_timeout: Duration) {
        let mut inner = self.inner.lock().await;
        if self.state() == LifecycleState::Stopped && inner.process.is_none() {
            return;
        }

        self.set_state(LifecycleState::Stopped);
        let reason = BridgeError::transport("bridge is shutting down");
        self.teardown(&mut inner, &reason, Shutdown::Graceful(graceful_timeout))
            .await;
        info!("Supervisor stopped");
    }

    /// Operator-triggered restart, also clearing the `Failed` state
    pub async fn restart(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().await;
        info!(from = %self.state(), "Operator restart requested");

        self.set_state(LifecycleState::Starting);
        let reason = BridgeError::transport("worker is restarting");
        self.teardown(&mut inner, &reason, Shutdown::Graceful(self.config.shutdown_grace))
            .await;
        inner.last_auto_restart = None;

        match self.bring_up(&mut inner).await {
            Ok(()) => {
                self.set_state(LifecycleState::Ready);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Operator restart failed");
                self.teardown(&mut inner, &e, Shutdown::Graceful(self.config.shutdown_grace))
                    .await;
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Perform the MCP handshake on a freshly launched worker
    ///
    /// Sends `initialize` with the declared capabilities and client info,
    /// requires a `result` within `init_timeout`, then sends
    /// `notifications/initialized`. Returns the worker's `initialize` result.
    async fn ensure_ready(&self, link: &Link) -> Result<Value, BridgeError> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
            client_info: ClientInfo {
                name: self.config.client_name.clone(),
                version: self.config.client_version.clone(),
            },
        };
        let params = serde_json::to_value(params)
            .map_err(|e| BridgeError::internal(format!("Serialization error: {e}")))?;

        let Submission {
            envelope, handle, ..
        } = link.correlator.submit(
            Envelope::request(0, INITIALIZE_METHOD, Some(params)),
            self.config.init_timeout,
        )?;

        link.writer
            .send(&envelope)
            .await
            .map_err(|e| BridgeError::init(format!("could not send initialize: {}", e.message)))?;

        let result = match handle.wait().await {
            Ok(Envelope::Response {
                payload: ResponsePayload::Result(result),
                ..
            }) => result,
            Ok(Envelope::Response {
                payload: ResponsePayload::Error(err),
                ..
            }) => {
                return Err(BridgeError::init(format!(
                    "worker rejected initialize ({}): {}",
                    err.code, err.message
                )))
            }
            Ok(other) => {
                return Err(BridgeError::init(format!(
                    "unexpected {} in reply to initialize",
                    other.kind()
                )))
            }
            Err(e) if e.kind == ErrorKind::Timeout => {
                return Err(BridgeError::init(format!(
                    "INIT_TIMEOUT: worker did not answer initialize within {:?}",
                    self.config.init_timeout
                )))
            }
            Err(e) => {
                return Err(BridgeError::init(format!("handshake failed: {}", e.message)));
            }
        };

        link.writer
            .send(&Envelope::notification(INITIALIZED_NOTIFICATION, None))
            .await
            .map_err(|e| {
                BridgeError::init(format!("could not send initialized notification: {}", e.message))
            })?;

        Ok(result)
    }

    /// Launch a new worker instance, start its reader, and handshake
    async fn bring_up(&self, inner: &mut Inner) -> Result<(), BridgeError> {
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let io = self.launcher.launch().await.map_err(|e| {
            BridgeError::init(format!("failed to launch worker: {}", e.message))
        })?;

        let link = Link {
            generation,
            writer: Arc::new(StdioWriter::new(io.writer)),
            correlator: Arc::new(Correlator::new()),
        };
        inner.process = io.process;
        inner.reader = Some(self.spawn_reader(generation, io.reader, Arc::clone(&link.correlator)));

        let result = self.ensure_ready(&link).await?;

        *self
            .init_result
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.install_link(Some(link));
        self.sessions.retain_generation(generation);

        info!(
            generation,
            pid = ?inner.process.as_ref().and_then(WorkerProcess::id),
            worker = %self.launcher.describe(),
            "Worker ready"
        );
        Ok(())
    }

    /// Spawn the single reader task for one worker instance
    fn spawn_reader(
        &self,
        generation: u64,
        reader: BoxedReader,
        correlator: Arc<Correlator>,
    ) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let weak = self.weak_self.clone();

        tokio::spawn(async move {
            let outcome = read_loop(reader, &correlator, sessions.as_ref()).await;
            let reason = match outcome {
                ReadOutcome::Eof => "closed its output".to_owned(),
                ReadOutcome::Failed(e) => format!("output failed: {e}"),
            };

            // Callers must not wait for a reader that is gone
            correlator.fail_all(&BridgeError::transport(format!("worker {reason}")));

            if let Some(supervisor) = weak.upgrade() {
                tokio::spawn(async move { supervisor.on_worker_exit(generation, reason).await });
            }
        })
    }

    /// Close the current instance: streams, reader, process, pending calls, sessions
    async fn teardown(&self, inner: &mut Inner, reason: &BridgeError, shutdown: Shutdown) {
        if let Some(link) = self.install_link(None) {
            link.writer.close().await;
            link.correlator.fail_all(reason);
        }
        // The handshake belonged to the instance going away
        *self
            .init_result
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;

        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }

        if let Some(process) = inner.process.take() {
            match shutdown {
                Shutdown::Graceful(grace) => {
                    if let Err(e) = process.terminate(grace).await {
                        warn!(error = %e, "Worker did not terminate cleanly");
                    }
                }
                Shutdown::Reap => {
                    let code = process.reap().await;
                    info!(code = ?code, "Collected exit status of crashed worker");
                }
            }
        }

        self.sessions.terminate_all();
    }

    /// React to a worker instance going away
    ///
    /// A crash while `Ready` degrades the bridge and triggers one automatic
    /// restart. A failed restart, or a second crash within
    /// `restart_window` of the last automatic restart, is fatal.
    async fn on_worker_exit(self: Arc<Self>, generation: u64, reason: String) {
        let mut inner = self.inner.lock().await;

        let is_current = self
            .current_link()
            .is_some_and(|link| link.generation == generation);
        if !is_current || self.state() != LifecycleState::Ready {
            debug!(generation, reason = %reason, "Ignoring exit of a retired worker instance");
            return;
        }

        error!(generation, reason = %reason, "Worker exited unexpectedly");
        self.set_state(LifecycleState::Degraded);
        let failure = BridgeError::transport(format!("worker {reason}"));
        self.teardown(&mut inner, &failure, Shutdown::Reap).await;

        let now = Instant::now();
        if inner
            .last_auto_restart
            .is_some_and(|last| now.duration_since(last) < self.config.restart_window)
        {
            error!(
                window = ?self.config.restart_window,
                "Worker crashed again shortly after a restart; refusing new work until an operator restart"
            );
            self.set_state(LifecycleState::Failed);
            return;
        }

        inner.last_auto_restart = Some(now);
        self.set_state(LifecycleState::Starting);
        info!(worker = %self.launcher.describe(), "Restarting worker");

        match self.bring_up(&mut inner).await {
            Ok(()) => {
                info!("Worker restarted");
                self.set_state(LifecycleState::Ready);
            }
            Err(e) => {
                error!(error = %e, "Worker restart failed; refusing new work until an operator restart");
                let fatal = BridgeError::fatal(format!("worker restart failed: {}", e.message));
                self.teardown(&mut inner, &fatal, Shutdown::Graceful(self.config.shutdown_grace))
                    .await;
                self.set_state(LifecycleState::Failed);
            }
        }
    }

    /// Handle a write failure on the live instance like a worker exit
    fn report_broken_pipe(&self, generation: u64, err: &BridgeError) {
        warn!(generation, error = %err, "Worker input is broken");
        if let Some(supervisor) = self.weak_self.upgrade() {
            let reason = format!("input failed: {}", err.message);
            tokio::spawn(async move { supervisor.on_worker_exit(generation, reason).await });
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Wait until the worker is `Ready`, bounded by `deadline`
    async fn await_ready(&self, deadline: Instant) -> Result<Link, BridgeError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                LifecycleState::Ready => {
                    if let Some(link) = self.current_link() {
                        return Ok(link);
                    }
                }
                LifecycleState::Failed => {
                    return Err(BridgeError::fatal(
                        "bridge is in a fatal state; an operator restart is required",
                    ))
                }
                LifecycleState::Stopped => {
                    return Err(BridgeError::transport("worker is not running"))
                }
                LifecycleState::Starting | LifecycleState::Degraded => {}
            }

            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(BridgeError::internal("supervisor state channel closed")),
                Err(_) => {
                    return Err(BridgeError::timeout(format!(
                        "worker not ready before deadline (state: {state})"
                    )))
                }
            }
        }
    }

    /// Forward a request to the worker and await its response
    ///
    /// The request's id is swapped for a worker-side id on the way in and
    /// restored on the way out, so callers may reuse ids freely.
    pub async fn call(&self, request: Envelope, timeout: Duration) -> Result<Envelope, BridgeError> {
        let deadline = Instant::now() + timeout;
        let link = self.await_ready(deadline).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());

        let Submission {
            envelope,
            original_id,
            handle,
        } = link.correlator.submit(request, remaining)?;

        if let Err(e) = link.writer.send(&envelope).await {
            self.report_broken_pipe(link.generation, &e);
            return Err(e);
        }

        let response = handle.wait().await?;
        Ok(response.with_id(original_id))
    }

    /// The live worker's `initialize` result, waiting up to `timeout` for readiness
    pub async fn handshake(&self, timeout: Duration) -> Result<Value, BridgeError> {
        self.ready_handshake(timeout).await.map(|(_, result)| result)
    }

    async fn ready_handshake(&self, timeout: Duration) -> Result<(u64, Value), BridgeError> {
        let link = self.await_ready(Instant::now() + timeout).await?;
        let result = self
            .initialize_result()
            .ok_or_else(|| BridgeError::transport("worker has not completed its handshake"))?;
        Ok((link.generation, result))
    }

    /// Open a client session against the live worker instance
    ///
    /// Waits (bounded by `timeout`) while the worker is starting or
    /// restarting, then returns the new session id together with the
    /// worker's cached `initialize` result. The session is bound to the
    /// instance's generation and never survives it.
    pub async fn open_session(&self, timeout: Duration) -> Result<(String, Value), BridgeError> {
        let (generation, result) = self.ready_handshake(timeout).await?;
        let session_id = self.sessions.create(generation);

        // A teardown may have run since the handshake was read
        if self.generation() != generation {
            self.sessions.terminate(&session_id);
            return Err(BridgeError::transport(
                "worker went away while the session was being opened",
            ));
        }
        Ok((session_id, result))
    }

    /// Forward a notification or a client response without correlation
    pub async fn notify(&self, envelope: Envelope) -> Result<(), BridgeError> {
        if matches!(envelope, Envelope::Request { .. }) {
            return Err(BridgeError::internal("requests must go through call()"));
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let link = self.await_ready(deadline).await?;

        if let Err(e) = link.writer.send(&envelope).await {
            self.report_broken_pipe(link.generation, &e);
            return Err(e);
        }
        Ok(())
    }
}
