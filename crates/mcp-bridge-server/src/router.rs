// ABOUTME: Axum router wiring the Streamable HTTP endpoint, health, and admin routes
// ABOUTME: Mounts /mcp (POST, GET, DELETE), /health, and /admin/restart behind optional auth
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::admin;
use crate::auth;
use crate::health;
use crate::mcp;
use crate::rest;
use crate::state::SharedState;

/// Build the application router with all endpoints
///
/// Routes:
/// - `POST /mcp`: one JSON-RPC message, answered with JSON or SSE
/// - `GET /mcp`: session event stream
/// - `DELETE /mcp`: terminate a session
/// - `/mcp/initialize`, `/mcp/tools/*`, `/mcp/resources/*`: REST shortcuts
/// - `GET /health`: bridge liveness and worker state
/// - `POST /admin/restart`: operator restart of the worker
///
/// The auth middleware only enforces a key when `MCP_BRIDGE_API_KEY` is set.
pub fn build(state: SharedState) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(mcp::handle_post)
                .get(mcp::handle_get)
                .delete(mcp::handle_delete),
        )
        .route("/mcp/initialize", post(rest::initialize))
        .route("/mcp/tools/list", get(rest::tools_list))
        .route("/mcp/tools/call", post(rest::tools_call))
        .route("/mcp/resources/list", get(rest::resources_list))
        .route("/mcp/resources/read", post(rest::resources_read))
        .route("/health", get(health::handle))
        .route("/admin/restart", post(admin::restart))
        .layer(middleware::from_fn(auth::require_auth))
        .with_state(state)
}
