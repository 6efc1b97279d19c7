// ABOUTME: REST shortcuts wrapping single MCP calls for clients without JSON-RPC framing
// ABOUTME: /mcp/initialize, /mcp/tools/{list,call}, /mcp/resources/{list,read} return the worker's envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcp_bridge::envelope::INVALID_REQUEST;
use mcp_bridge::{Envelope, RequestId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::mcp::{bridge_error, rpc_error};
use crate::state::SharedState;

/// Body of POST /mcp/tools/call
#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    /// Tool name
    pub name: String,
    /// Tool arguments, `{}` when absent
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Body of POST /mcp/resources/read
#[derive(Debug, Deserialize)]
pub struct ResourceReadBody {
    /// Resource URI
    pub uri: String,
}

/// Handle POST /mcp/initialize: the worker's cached handshake, no session
pub async fn initialize(State(state): State<SharedState>) -> Response {
    let id = RequestId::Number(state.next_shortcut_id());
    match state.supervisor().handshake(state.request_timeout()).await {
        Ok(result) => Json(Envelope::success(Some(id), result)).into_response(),
        Err(e) => bridge_error(Some(id), &e),
    }
}

/// Handle GET /mcp/tools/list
pub async fn tools_list(State(state): State<SharedState>) -> Response {
    call(&state, "tools/list", None).await
}

/// Handle POST /mcp/tools/call with `{name, arguments}`
pub async fn tools_call(State(state): State<SharedState>, body: Bytes) -> Response {
    let body: ToolCallBody = match parse_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let arguments = body.arguments.unwrap_or_else(|| json!({}));
    call(
        &state,
        "tools/call",
        Some(json!({ "name": body.name, "arguments": arguments })),
    )
    .await
}

/// Handle GET /mcp/resources/list
pub async fn resources_list(State(state): State<SharedState>) -> Response {
    call(&state, "resources/list", None).await
}

/// Handle POST /mcp/resources/read with `{uri}`
pub async fn resources_read(State(state): State<SharedState>, body: Bytes) -> Response {
    let body: ResourceReadBody = match parse_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    call(&state, "resources/read", Some(json!({ "uri": body.uri }))).await
}

async fn call(state: &SharedState, method: &str, params: Option<Value>) -> Response {
    let id = RequestId::Number(state.next_shortcut_id());
    debug!(method, "REST shortcut call");

    let request = Envelope::request(id.clone(), method, params);
    match state
        .supervisor()
        .call(request, state.request_timeout())
        .await
    {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => bridge_error(Some(id), &e),
    }
}

#[allow(clippy::result_large_err)]
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            INVALID_REQUEST,
            format!("Invalid request body: {e}"),
        )
    })
}
