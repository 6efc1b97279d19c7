// ABOUTME: JSON-RPC envelope types shared by the stdio and HTTP bindings of MCP
// ABOUTME: Tagged union for request, notification, and response plus MCP handshake payloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// JSON-RPC version marker carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version the bridge announces to the worker by default
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP protocol versions accepted in the `MCP-Protocol-Version` header
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Handshake request method
pub const INITIALIZE_METHOD: &str = "initialize";

/// Notification that completes the handshake
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// HTTP header carrying the session id issued on `initialize`
pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP header carrying the negotiated protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

// ============================================================================
// JSON-RPC Error Codes
// ============================================================================

/// JSON-RPC parse error: invalid JSON received
pub const PARSE_ERROR: i64 = -32_700;

/// JSON-RPC invalid request (wrong shape, unknown session, bad protocol version)
pub const INVALID_REQUEST: i64 = -32_600;

/// JSON-RPC internal error (worker unreachable, crashed, or timed out)
pub const INTERNAL_ERROR: i64 = -32_603;

// ============================================================================
// Envelope
// ============================================================================

/// Correlation identifier of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier
    Number(i64),
    /// String identifier
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome carried by a response: exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Success payload
    Result(Value),
    /// Failure payload
    Error(ErrorObject),
}

/// One protocol message
///
/// Validated once when decoded by [`crate::codec`]; call sites match on the
/// variant instead of probing for field presence.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Call expecting a response with the same id
    Request {
        /// Correlation identifier
        id: RequestId,
        /// Method name
        method: String,
        /// Opaque parameters
        params: Option<Value>,
    },
    /// Fire-and-forget message without an id
    Notification {
        /// Method name
        method: String,
        /// Opaque parameters
        params: Option<Value>,
    },
    /// Answer to a request (`id` is `None` only when the request was unreadable)
    Response {
        /// Identifier of the request being answered
        id: Option<RequestId>,
        /// Result or error
        payload: ResponsePayload,
    },
}

impl Envelope {
    /// Build a request envelope
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build a notification envelope
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a success response
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self::Response {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Build an error response from an error object
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self::Response {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Build an error response from a code and message
    pub fn error_response(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self::error(
            id,
            ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        )
    }

    /// Correlation identifier, if the envelope carries one
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } => Some(id),
            Self::Response { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Whether this envelope is a response
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response { .. })
    }

    /// Return a copy of this envelope addressed to a different id
    ///
    /// Notifications have no id and are returned unchanged.
    #[must_use]
    pub fn with_id(self, new_id: RequestId) -> Self {
        match self {
            Self::Request { method, params, .. } => Self::Request {
                id: new_id,
                method,
                params,
            },
            Self::Response { payload, .. } => Self::Response {
                id: Some(new_id),
                payload,
            },
            notification @ Self::Notification { .. } => notification,
        }
    }

    /// Short label for logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Notification { .. } => "notification",
            Self::Response { .. } => "response",
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        match self {
            Self::Request { id, method, params } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("method", method)?;
                if let Some(params) = params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Notification { method, params } => {
                map.serialize_entry("method", method)?;
                if let Some(params) = params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Response { id, payload } => {
                // A response always carries an id, `null` when unknown
                map.serialize_entry("id", id)?;
                match payload {
                    ResponsePayload::Result(result) => map.serialize_entry("result", result)?,
                    ResponsePayload::Error(error) => map.serialize_entry("error", error)?,
                }
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        crate::codec::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// MCP Initialize
// ============================================================================

/// Parameters of the `initialize` request the bridge sends to its worker
#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    /// Protocol version requested by the bridge
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Declared client capabilities
    pub capabilities: Value,
    /// Client identification
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Client identification sent during initialization
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}
