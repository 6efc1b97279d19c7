// ABOUTME: Streamable HTTP handlers for POST, GET, and DELETE on the /mcp endpoint
// ABOUTME: Validates headers and sessions, relays envelopes to the supervisor, picks JSON or SSE
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcp_bridge::codec::{self, DecodeErrorKind};
use mcp_bridge::envelope::{
    INITIALIZED_NOTIFICATION, INITIALIZE_METHOD, INVALID_REQUEST, PARSE_ERROR,
    SUPPORTED_PROTOCOL_VERSIONS,
};
pub use mcp_bridge::envelope::{PROTOCOL_VERSION_HEADER, SESSION_HEADER};
use mcp_bridge::{BridgeError, Envelope, ErrorKind, RequestId};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::state::SharedState;
use crate::streaming;

const EVENT_STREAM: &str = "text/event-stream";

// ============================================================================
// POST /mcp
// ============================================================================

/// Handle POST /mcp
///
/// One JSON-RPC envelope per body. Requests are answered with JSON, or over
/// SSE when the client accepts it and the call outlives the upgrade delay.
/// Notifications and client responses are acknowledged with 202.
pub async fn handle_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match codec::decode_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Failed to parse HTTP JSON-RPC body");
            let code = match e.kind {
                DecodeErrorKind::Syntax => PARSE_ERROR,
                DecodeErrorKind::Malformed => INVALID_REQUEST,
            };
            return rpc_error(StatusCode::BAD_REQUEST, None, code, e.to_string());
        }
    };

    if let Some(version) = header_str(&headers, PROTOCOL_VERSION_HEADER) {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                envelope.id().cloned(),
                INVALID_REQUEST,
                format!("Unsupported protocol version: {version}"),
            );
        }
    }

    if let Some(session_id) = header_str(&headers, SESSION_HEADER) {
        if !state.sessions().contains(session_id) {
            return rpc_error(
                StatusCode::NOT_FOUND,
                envelope.id().cloned(),
                INVALID_REQUEST,
                format!("Unknown session: {session_id}"),
            );
        }
    }

    debug!(kind = envelope.kind(), method = ?envelope.method(), "Handling HTTP MCP message");

    match envelope {
        Envelope::Request { id, method, .. } if method == INITIALIZE_METHOD => {
            handle_initialize(&state, id).await
        }
        // The bridge already completed the worker handshake
        Envelope::Notification { method, .. } if method == INITIALIZED_NOTIFICATION => accepted(),
        request @ Envelope::Request { .. } => forward_call(&state, &headers, request).await,
        other => match state.supervisor().notify(other).await {
            Ok(()) => accepted(),
            Err(e) => bridge_error(None, &e),
        },
    }
}

/// Answer `initialize` from the worker's cached handshake and open a session
///
/// Waits for a restarting worker up to the request timeout; no session is
/// issued unless a live worker instance completed its handshake.
async fn handle_initialize(state: &SharedState, id: RequestId) -> Response {
    let (session_id, result) = match state
        .supervisor()
        .open_session(state.request_timeout())
        .await
    {
        Ok(opened) => opened,
        Err(e) => return bridge_error(Some(id), &e),
    };
    info!(session_id = %session_id, "HTTP client initialized");

    (
        [(SESSION_HEADER, session_id)],
        Json(Envelope::success(Some(id), result)),
    )
        .into_response()
}

/// Relay a request to the worker and pick the response framing
async fn forward_call(state: &SharedState, headers: &HeaderMap, request: Envelope) -> Response {
    let original_id = request.id().cloned();
    let supervisor = Arc::clone(state.supervisor());
    let timeout = state.request_timeout();

    if !accepts_event_stream(headers) {
        let outcome = supervisor.call(request, timeout).await;
        return reply(original_id, outcome);
    }

    // Dropping this future (client gone) cancels the pending call
    let mut pending = Box::pin(async move { supervisor.call(request, timeout).await });

    match tokio::time::timeout(state.sse_upgrade_after(), &mut pending).await {
        Ok(outcome) => reply(original_id, outcome),
        Err(_) => {
            debug!(id = ?original_id, "Call still running, answering over SSE");
            streaming::deferred_reply(pending, original_id)
        }
    }
}

fn reply(original_id: Option<RequestId>, outcome: Result<Envelope, BridgeError>) -> Response {
    match outcome {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => bridge_error(original_id, &e),
    }
}

// ============================================================================
// GET /mcp
// ============================================================================

/// Handle GET /mcp: open the session's event stream
pub async fn handle_get(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if !accepts_event_stream(&headers) {
        return rpc_error(
            StatusCode::NOT_ACCEPTABLE,
            None,
            INVALID_REQUEST,
            "GET /mcp requires Accept: text/event-stream",
        );
    }

    let Some(session_id) = header_str(&headers, SESSION_HEADER) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            INVALID_REQUEST,
            "Missing Mcp-Session-Id header",
        );
    };

    match state.sessions().subscribe(session_id) {
        Ok(subscription) => streaming::session_stream(subscription),
        Err(e) => rpc_error(StatusCode::NOT_FOUND, None, e.jsonrpc_code(), e.message),
    }
}

// ============================================================================
// DELETE /mcp
// ============================================================================

/// Handle DELETE /mcp: terminate the session (idempotent)
pub async fn handle_delete(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, SESSION_HEADER) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            INVALID_REQUEST,
            "Missing Mcp-Session-Id header",
        );
    };

    let terminated = state.sessions().terminate(session_id);
    Json(json!({ "terminated": terminated })).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    header_str(headers, "accept").is_some_and(|accept| accept.contains(EVENT_STREAM))
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Json(json!({}))).into_response()
}

/// Build a JSON-RPC error response with an explicit HTTP status
pub(crate) fn rpc_error(
    status: StatusCode,
    id: Option<RequestId>,
    code: i64,
    message: impl Into<String>,
) -> Response {
    (status, Json(Envelope::error_response(id, code, message))).into_response()
}

/// Map a bridge failure to an HTTP status and JSON-RPC error envelope
pub fn bridge_error(id: Option<RequestId>, error: &BridgeError) -> Response {
    let status = match error.kind {
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Transport | ErrorKind::Fatal => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Decode => StatusCode::BAD_REQUEST,
        ErrorKind::Session => StatusCode::NOT_FOUND,
        ErrorKind::Init
        | ErrorKind::Config
        | ErrorKind::BinaryNotFound
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %error, "Call failed");
    (status, Json(error.to_envelope(id))).into_response()
}
