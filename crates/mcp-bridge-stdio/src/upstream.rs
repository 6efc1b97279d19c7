// ABOUTME: Streamable HTTP client posting envelopes to a remote MCP endpoint
// ABOUTME: Captures the session id from `initialize`, replays it, and decodes JSON or SSE replies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use mcp_bridge::codec;
use mcp_bridge::envelope::{
    INITIALIZE_METHOD, INTERNAL_ERROR, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
};
use mcp_bridge::{BridgeError, Envelope, ErrorObject, RequestId, ResponsePayload};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Upstream used when no URL is given
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:3008";

/// Per-request HTTP timeout used when none is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a message could not be relayed upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The server answered with a non-success status
    Status {
        /// HTTP status code
        status: u16,
        /// Response body text
        body: String,
    },
    /// Connection failure, timeout, or an unreadable reply
    Transport(String),
}

impl UpstreamError {
    /// JSON-RPC error answer for the stdio client
    ///
    /// Status failures carry the body text as `data` so the client sees
    /// what the server said.
    pub fn to_envelope(&self, id: Option<RequestId>) -> Envelope {
        let (message, data) = match self {
            Self::Status { status, body } => (format!("HTTP error {status}"), body.clone()),
            Self::Transport(detail) => ("Internal error".to_owned(), detail.clone()),
        };
        Envelope::error(
            id,
            ErrorObject {
                code: INTERNAL_ERROR,
                message,
                data: Some(Value::String(data)),
            },
        )
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Transport(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Client for one remote Streamable HTTP MCP endpoint
pub struct Upstream {
    http: reqwest::Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
}

impl Upstream {
    /// Create a client for `base_url` (with or without a trailing `/mcp`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: mcp_endpoint(base_url),
            session_id: Mutex::new(None),
            protocol_version: Mutex::new(None),
        })
    }

    /// Full URL of the MCP endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Session id issued by the server, once `initialize` went through
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn protocol_version(&self) -> Option<String> {
        self.protocol_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// POST one envelope
    ///
    /// Returns the reply for requests and `None` for notifications and
    /// client responses, which the server only acknowledges.
    pub async fn send(&self, envelope: &Envelope) -> Result<Option<Envelope>, UpstreamError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("accept", "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(codec::encode(envelope));

        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(version) = self.protocol_version() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(format!("Request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        let issued_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(format!("Failed to read reply: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "Upstream rejected message");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if !matches!(envelope, Envelope::Request { .. }) {
            debug!(status = status.as_u16(), "Upstream acknowledged message");
            return Ok(None);
        }
        if status == StatusCode::ACCEPTED {
            return Err(UpstreamError::Transport(
                "server accepted a request without answering it".to_owned(),
            ));
        }

        let reply = if content_type.starts_with("text/event-stream") {
            reply_from_sse(&body)?
        } else {
            codec::decode(&body)
                .map_err(|e| UpstreamError::Transport(format!("Unreadable reply: {e}")))?
        };

        if envelope.method() == Some(INITIALIZE_METHOD) {
            self.remember_session(issued_session, &reply);
        }
        Ok(Some(reply))
    }

    fn remember_session(&self, session_id: Option<String>, reply: &Envelope) {
        if let Some(session_id) = session_id {
            info!(session_id = %session_id, "Upstream session established");
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(session_id);
        }

        if let Envelope::Response {
            payload: ResponsePayload::Result(result),
            ..
        } = reply
        {
            if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
                *self
                    .protocol_version
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(version.to_owned());
            }
        }
    }

    /// End the upstream session, if one was established
    ///
    /// Returns whether a session was terminated. Failures are only logged;
    /// the server expires abandoned sessions on its own.
    pub async fn close(&self) -> bool {
        let Some(session_id) = self
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        match self
            .http
            .delete(&self.endpoint)
            .header(SESSION_HEADER, session_id.as_str())
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = response.status().as_u16(), session_id = %session_id, "Upstream session closed");
                response.status().is_success()
            }
            Err(e) => {
                warn!(error = %e, session_id = %session_id, "Failed to close upstream session");
                false
            }
        }
    }
}

/// Append `/mcp` to a base URL unless it already names the endpoint
fn mcp_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/mcp") {
        base.to_owned()
    } else {
        format!("{base}/mcp")
    }
}

/// Take the first response carried by an SSE body
fn reply_from_sse(body: &str) -> Result<Envelope, UpstreamError> {
    codec::decode_sse_events(body)
        .iter()
        .filter_map(|data| codec::decode(data).ok())
        .find(Envelope::is_response)
        .ok_or_else(|| UpstreamError::Transport("SSE reply carried no response".to_owned()))
}
