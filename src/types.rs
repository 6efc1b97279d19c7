// ABOUTME: Core types for the MCP bridge: error taxonomy and worker lifecycle states
// ABOUTME: Provides BridgeError with JSON-RPC code mapping and the LifecycleState machine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Core Types
//!
//! Error and lifecycle definitions shared by every bridge component.
//! Failures cross every I/O boundary as explicit [`BridgeError`] values;
//! the [`ErrorKind`] decides how a failure is surfaced to callers.

use std::fmt;

use serde::Serialize;

use crate::envelope::{Envelope, ErrorObject, RequestId, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};

// ============================================================================
// Error Type
// ============================================================================

/// Error type for bridge operations
#[derive(Debug, Clone)]
pub struct BridgeError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// Categories of errors produced by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed envelope (bad JSON or wrong shape)
    Decode,
    /// Broken pipe, worker exited, connection refused
    Transport,
    /// No response within the caller's deadline
    Timeout,
    /// Worker handshake failed or did not finish in time
    Init,
    /// Unknown or expired session on a session-bound call
    Session,
    /// Restart budget exhausted; new work is refused until an operator restart
    Fatal,
    /// Configuration error
    Config,
    /// Worker binary not found or not executable
    BinaryNotFound,
    /// Internal bridge error (bug, unexpected state)
    Internal,
}

impl BridgeError {
    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create a handshake/initialization error
    pub fn init(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Init, message)
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    /// Create a fatal bridge error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create a binary-not-found error
    pub fn binary_not_found(binary: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BinaryNotFound,
            message: format!("Binary not found: {}", binary.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// JSON-RPC error code surfaced to callers for this error
    pub const fn jsonrpc_code(&self) -> i64 {
        match self.kind {
            ErrorKind::Decode => PARSE_ERROR,
            ErrorKind::Session => INVALID_REQUEST,
            _ => INTERNAL_ERROR,
        }
    }

    /// Build the JSON-RPC error response a caller receives for this error
    pub fn to_envelope(&self, id: Option<RequestId>) -> Envelope {
        Envelope::error(
            id,
            ErrorObject {
                code: self.jsonrpc_code(),
                message: self.message.clone(),
                data: Some(serde_json::json!({ "kind": self.kind.as_str() })),
            },
        )
    }
}

impl ErrorKind {
    /// Stable lowercase name used in logs and error payloads
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Init => "init",
            Self::Session => "session",
            Self::Fatal => "fatal",
            Self::Config => "config",
            Self::BinaryNotFound => "binary_not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

// ============================================================================
// Worker Lifecycle
// ============================================================================

/// Lifecycle state of the supervised worker
///
/// `Stopped → Starting → Ready → (Degraded) → Stopped`, with `Failed`
/// reached when the automatic restart budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No worker process is running
    Stopped,
    /// Worker spawned, handshake in progress
    Starting,
    /// Handshake completed, accepting calls
    Ready,
    /// Worker crashed or a pipe broke; a restart is pending
    Degraded,
    /// Restart failed; new work is refused until an operator restart
    Failed,
}

impl LifecycleState {
    /// Whether the state can still become `Ready` without operator action
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Degraded)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_map_to_parse_error() {
        let err = BridgeError::decode("bad json");
        assert_eq!(err.jsonrpc_code(), -32_700);
    }

    #[test]
    fn transport_and_timeout_map_to_internal_error() {
        assert_eq!(BridgeError::transport("pipe").jsonrpc_code(), -32_603);
        assert_eq!(BridgeError::timeout("slow").jsonrpc_code(), -32_603);
        assert_eq!(BridgeError::fatal("dead").jsonrpc_code(), -32_603);
    }

    #[test]
    fn to_envelope_keeps_caller_id() {
        let err = BridgeError::timeout("no reply");
        let envelope = err.to_envelope(Some(RequestId::Number(7)));
        let json = crate::codec::encode(&envelope);
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("-32603"));
        assert!(json.contains("\"kind\":\"timeout\""));
    }

    #[test]
    fn lifecycle_display_is_snake_case() {
        assert_eq!(LifecycleState::Degraded.to_string(), "degraded");
        assert!(LifecycleState::Starting.is_transient());
        assert!(!LifecycleState::Failed.is_transient());
    }
}
