// ABOUTME: GET /health handler reporting bridge liveness and the worker lifecycle state
// ABOUTME: Always 200 while the bridge process is serving; worker problems show in the body
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use mcp_bridge::LifecycleState;
use serde::Serialize;

use crate::state::SharedState;

/// Name reported in the `service` field
pub const SERVICE_NAME: &str = "mcp-bridge";

/// Health response body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Bridge liveness, always `healthy` when this handler runs
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
    /// Worker lifecycle state
    pub worker: LifecycleState,
    /// Worker instance number (0 when no worker is running)
    pub generation: u64,
    /// Live HTTP sessions
    pub sessions: usize,
    /// Age in seconds of the longest-lived session, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_session_secs: Option<u64>,
}

/// Handle GET /health
pub async fn handle(State(state): State<SharedState>) -> impl IntoResponse {
    let supervisor = state.supervisor();
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        worker: supervisor.state(),
        generation: supervisor.generation(),
        sessions: state.sessions().len(),
        oldest_session_secs: state.sessions().oldest_age().map(|age| age.as_secs()),
    })
}
