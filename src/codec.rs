// ABOUTME: Message codec turning envelopes into newline-delimited JSON and SSE frames
// ABOUTME: Validates decoded documents once so malformed frames never reach routing code
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde_json::{Map, Value};

use crate::envelope::{Envelope, ErrorObject, RequestId, ResponsePayload, JSONRPC_VERSION};
use crate::types::BridgeError;

/// Why a frame could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Not valid JSON
    Syntax,
    /// Valid JSON that is not a JSON-RPC envelope
    Malformed,
}

/// A frame that could not be turned into an [`Envelope`]
#[derive(Debug, Clone)]
pub struct DecodeError {
    /// Failure category
    pub kind: DecodeErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DecodeError {
    fn syntax(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Syntax,
            message: message.into(),
        }
    }

    fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Malformed,
            message: message.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DecodeErrorKind::Syntax => write!(f, "Parse error: {}", self.message),
            DecodeErrorKind::Malformed => write!(f, "Malformed envelope: {}", self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        Self::decode(err.to_string())
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one envelope from a text frame (one stdio line or one HTTP body)
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| DecodeError::syntax(e.to_string()))?;
    from_value(value)
}

/// Decode one envelope from raw bytes
pub fn decode_slice(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::syntax(e.to_string()))?;
    from_value(value)
}

/// Validate a parsed JSON document as an envelope
pub fn from_value(value: Value) -> Result<Envelope, DecodeError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(DecodeError::malformed("batch messages are not supported")),
        other => {
            return Err(DecodeError::malformed(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            )))
        }
    };

    match obj.remove("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(DecodeError::malformed(format!(
                "unsupported jsonrpc version: {other}"
            )))
        }
        None => return Err(DecodeError::malformed("missing jsonrpc field")),
    }

    let id = take_id(&mut obj)?;
    let params = obj.remove("params");
    let result = obj.remove("result");
    let error = obj.remove("error");

    match obj.remove("method") {
        Some(Value::String(method)) => {
            if result.is_some() || error.is_some() {
                return Err(DecodeError::malformed(
                    "message carries both a method and a result/error",
                ));
            }
            match id {
                IdField::Present(id) => Ok(Envelope::Request { id, method, params }),
                IdField::Absent => Ok(Envelope::Notification { method, params }),
                IdField::Null => Err(DecodeError::malformed("request id must not be null")),
            }
        }
        Some(other) => Err(DecodeError::malformed(format!(
            "method must be a string, got {}",
            json_type(&other)
        ))),
        None => {
            let payload = match (result, error) {
                (Some(result), None) => ResponsePayload::Result(result),
                (None, Some(error)) => {
                    let error: ErrorObject = serde_json::from_value(error)
                        .map_err(|e| DecodeError::malformed(format!("invalid error object: {e}")))?;
                    ResponsePayload::Error(error)
                }
                (Some(_), Some(_)) => {
                    return Err(DecodeError::malformed(
                        "response carries both result and error",
                    ))
                }
                (None, None) => {
                    return Err(DecodeError::malformed(
                        "message lacks both method and result/error",
                    ))
                }
            };
            let id = match id {
                IdField::Present(id) => Some(id),
                IdField::Absent | IdField::Null => None,
            };
            Ok(Envelope::Response { id, payload })
        }
    }
}

/// Presence of the `id` member, keeping `null` distinct from absent
enum IdField {
    Absent,
    Null,
    Present(RequestId),
}

fn take_id(obj: &mut Map<String, Value>) -> Result<IdField, DecodeError> {
    match obj.remove("id") {
        None => Ok(IdField::Absent),
        Some(Value::Null) => Ok(IdField::Null),
        Some(Value::String(s)) => Ok(IdField::Present(RequestId::String(s))),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| IdField::Present(RequestId::Number(n)))
            .ok_or_else(|| DecodeError::malformed(format!("request id must be an integer: {n}"))),
        Some(other) => Err(DecodeError::malformed(format!(
            "request id must be a string or integer, got {}",
            json_type(&other)
        ))),
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode an envelope as compact JSON (no trailing newline)
pub fn encode(envelope: &Envelope) -> String {
    // Envelope serialization only emits strings, integers, and serde_json values
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32603,"message":"Serialization failed: {e}"}}}}"#
        )
    })
}

/// Encode an envelope as one stdio frame (JSON terminated by `\n`)
pub fn encode_line(envelope: &Envelope) -> String {
    let mut line = encode(envelope);
    line.push('\n');
    line
}

// ============================================================================
// Server-Sent Events
// ============================================================================

/// Render an envelope as one SSE event, optionally named
pub fn sse_frame(event: Option<&str>, envelope: &Envelope) -> String {
    let mut frame = String::new();
    if let Some(name) = event {
        frame.push_str("event: ");
        frame.push_str(name);
        frame.push('\n');
    }
    frame.push_str("data: ");
    frame.push_str(&encode(envelope));
    frame.push_str("\n\n");
    frame
}

/// Extract the `data:` payload of each blank-line-delimited SSE event
///
/// Comments and unknown fields are ignored; multi-line data is joined with `\n`.
pub fn decode_sse_events(buf: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in buf.split('\n') {
        let l = line.trim_end_matches('\r');

        if l.is_empty() {
            if !data_lines.is_empty() {
                out.push(data_lines.join("\n"));
                data_lines.clear();
            }
            continue;
        }

        if l.starts_with(':') {
            continue;
        }

        if let Some(rest) = l.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if !data_lines.is_empty() {
        out.push(data_lines.join("\n"));
    }

    out
}
