// ABOUTME: Optional bearer token authentication middleware for the HTTP bridge
// ABOUTME: Enforces MCP_BRIDGE_API_KEY when set, allows unauthenticated access otherwise
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Environment variable name for the API key
pub const API_KEY_ENV: &str = "MCP_BRIDGE_API_KEY";

/// Middleware that validates the bearer token against `MCP_BRIDGE_API_KEY`
///
/// The variable is read on every request so the key can be rotated without
/// a restart. Unset or empty means every request is let through.
pub async fn require_auth(request: Request, next: Next) -> Response {
    let expected_key = match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => key,
        _ => return next.run(request).await,
    };

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected_key.as_bytes())) => {
            next.run(request).await
        }
        Some(_) => auth_error("Invalid API key"),
        None if auth_header.is_some() => {
            auth_error("Authorization header must use Bearer scheme")
        }
        None => auth_error("Missing Authorization header"),
    }
}

/// Build a 401 error response
fn auth_error(message: &str) -> Response {
    debug!(reason = message, "Rejected unauthenticated request");
    let body = json!({ "error": { "type": "authentication_error", "message": message } });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_env_is_correct() {
        assert_eq!(API_KEY_ENV, "MCP_BRIDGE_API_KEY");
    }

    #[test]
    fn constant_time_compare_rejects_prefixes() {
        let expected = b"secret-key";
        assert!(bool::from(b"secret-key".ct_eq(expected)));
        assert!(!bool::from(b"secret".ct_eq(expected)));
    }
}
