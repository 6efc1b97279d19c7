// ABOUTME: Request correlator mapping worker-side request ids to the callers awaiting them
// ABOUTME: Guarantees at-most-once resolution with per-call deadlines and drop-based cancellation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::envelope::{Envelope, RequestId};
use crate::types::BridgeError;

type Outcome = Result<Envelope, BridgeError>;

/// Bookkeeping for one request forwarded to the worker
struct PendingRequest {
    method: String,
    submitted_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Tracks in-flight requests for one worker connection
///
/// Worker-side ids come from a monotonic counter starting at 1 and are never
/// reused for the life of the correlator. Responses are dispatched purely by
/// id, so the worker may answer in any order.
pub struct Correlator {
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

/// A request rewritten for the worker plus the handle to await its answer
pub struct Submission {
    /// Request carrying the worker-side id, ready to be written
    pub envelope: Envelope,
    /// Id the caller originally used
    pub original_id: RequestId,
    /// Wait handle for the response
    pub handle: PendingHandle,
}

/// Caller-side handle of a pending request
///
/// Dropping the handle (client disconnect) removes the pending entry; a
/// late response for it is then discarded as unknown.
pub struct PendingHandle {
    id: RequestId,
    deadline: Instant,
    rx: Option<oneshot::Receiver<Outcome>>,
    correlator: Arc<Correlator>,
}

impl Correlator {
    /// Create an empty correlator whose first id is 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and rewrite its id to the next worker-side id
    pub fn submit(self: &Arc<Self>, request: Envelope, timeout: Duration) -> Result<Submission, BridgeError> {
        let (original_id, method, params) = match request {
            Envelope::Request { id, method, params } => (id, method, params),
            other => {
                return Err(BridgeError::internal(format!(
                    "only requests can be correlated, got a {}",
                    other.kind()
                )));
            }
        };

        let worker_id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        self.table().insert(
            worker_id.clone(),
            PendingRequest {
                method: method.clone(),
                submitted_at: now,
                tx,
            },
        );

        debug!(id = %worker_id, caller_id = %original_id, method = %method, "Registered pending request");

        Ok(Submission {
            envelope: Envelope::Request {
                id: worker_id.clone(),
                method,
                params,
            },
            original_id,
            handle: PendingHandle {
                id: worker_id,
                deadline: now + timeout,
                rx: Some(rx),
                correlator: Arc::clone(self),
            },
        })
    }

    /// Deliver a response to the caller waiting on its id
    ///
    /// Returns `false` when nobody is waiting (unknown, already resolved, or
    /// timed out); the response is then logged and discarded.
    pub fn resolve(&self, response: Envelope) -> bool {
        let id = match &response {
            Envelope::Response { id: Some(id), .. } => id.clone(),
            Envelope::Response { id: None, .. } => {
                warn!("Discarding worker response without an id");
                return false;
            }
            other => {
                warn!(kind = other.kind(), "Refusing to resolve a non-response envelope");
                return false;
            }
        };

        let Some(entry) = self.table().remove(&id) else {
            warn!(id = %id, "Discarding response for unknown or expired request");
            return false;
        };

        debug!(
            id = %id,
            method = %entry.method,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "Resolved pending request"
        );

        if entry.tx.send(Ok(response)).is_err() {
            debug!(id = %id, "Caller stopped waiting before the response arrived");
        }
        true
    }

    /// Resolve every pending request with the given error
    pub fn fail_all(&self, error: &BridgeError) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.table().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(id = %id, method = %entry.method, "Failing pending request");
            let _ = entry.tx.send(Err(error.clone()));
        }
        if count > 0 {
            warn!(count, error = %error, "Failed all pending requests");
        }
        count
    }

    /// Number of requests currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn forget(&self, id: &RequestId) -> bool {
        self.table().remove(id).is_some()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingHandle {
    /// Worker-side id of the request
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response until the deadline
    ///
    /// On deadline the entry is removed and a timeout error returned. The
    /// worker is not told; its eventual answer is discarded by `resolve`.
    pub async fn wait(mut self) -> Result<Envelope, BridgeError> {
        let Some(rx) = self.rx.take() else {
            return Err(BridgeError::internal("pending handle awaited twice"));
        };

        match tokio::time::timeout_at(self.deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::transport(
                "pending request dropped without a response",
            )),
            Err(_) => {
                self.correlator.forget(&self.id);
                warn!(id = %self.id, "Request timed out waiting for worker response");
                Err(BridgeError::timeout(format!(
                    "no response for request {} before deadline",
                    self.id
                )))
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.correlator.forget(&self.id) {
            debug!(id = %self.id, "Caller abandoned pending request");
        }
    }
}
