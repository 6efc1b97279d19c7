// ABOUTME: POST /admin/restart handler for operator-triggered worker restarts
// ABOUTME: Clears the fatal state by launching a fresh worker and redoing the handshake
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};

use crate::state::SharedState;

/// Handle POST /admin/restart
///
/// Returns 200 with the new worker state, or 500 when the fresh worker
/// could not be started (the bridge is then `failed`).
pub async fn restart(State(state): State<SharedState>) -> Response {
    let supervisor = state.supervisor();
    match supervisor.restart().await {
        Ok(()) => {
            info!(generation = supervisor.generation(), "Worker restarted by operator");
            Json(json!({
                "status": "restarted",
                "worker": supervisor.state(),
                "generation": supervisor.generation(),
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Operator restart failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": { "type": e.kind.as_str(), "message": e.message },
                    "worker": supervisor.state(),
                })),
            )
                .into_response()
        }
    }
}
