// ABOUTME: Line loop relaying a stdio MCP client's envelopes to an upstream HTTP endpoint
// ABOUTME: Requests run concurrently; replies funnel through one writer so lines never interleave
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use mcp_bridge::codec::{self, DecodeErrorKind};
use mcp_bridge::envelope::{INVALID_REQUEST, PARSE_ERROR};
use mcp_bridge::{BridgeError, Envelope, ErrorObject};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::upstream::Upstream;

/// Counters reported when the client closes its input
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProxySummary {
    /// Requests forwarded upstream
    pub requests: usize,
    /// Notifications and client responses forwarded upstream
    pub notifications: usize,
    /// Lines answered locally because they did not decode
    pub rejected: usize,
}

/// Relay envelopes from `input` to `upstream` until `input` reaches EOF
///
/// Every request gets exactly one line on `output`: the upstream reply or
/// a JSON-RPC error. Undecodable lines are answered with `id: null`. On EOF
/// in-flight requests are allowed to finish, then the upstream session is
/// closed.
pub async fn run<R, W>(
    input: R,
    output: W,
    upstream: Arc<Upstream>,
) -> Result<ProxySummary, BridgeError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(write_lines(output, rx));

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();
    let mut summary = ProxySummary::default();

    info!(endpoint = %upstream.endpoint(), "Stdio proxy ready");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match codec::decode(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Rejecting undecodable line");
                summary.rejected += 1;
                let code = match e.kind {
                    DecodeErrorKind::Syntax => PARSE_ERROR,
                    DecodeErrorKind::Malformed => INVALID_REQUEST,
                };
                let reply = Envelope::error(
                    None,
                    ErrorObject {
                        code,
                        message: decode_error_message(e.kind).to_owned(),
                        data: Some(Value::String(e.message)),
                    },
                );
                // The writer only stops once every sender is gone
                let _ = tx.send(reply);
                continue;
            }
        };

        if matches!(envelope, Envelope::Request { .. }) {
            summary.requests += 1;
            let upstream = Arc::clone(&upstream);
            let tx = tx.clone();
            in_flight.spawn(async move {
                let id = envelope.id().cloned();
                debug!(id = ?id, method = ?envelope.method(), "Forwarding request");
                let reply = match upstream.send(&envelope).await {
                    Ok(Some(reply)) => reply,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(id = ?id, error = %e, "Upstream call failed");
                        e.to_envelope(id)
                    }
                };
                let _ = tx.send(reply);
            });
        } else {
            summary.notifications += 1;
            if let Err(e) = upstream.send(&envelope).await {
                warn!(kind = envelope.kind(), error = %e, "Failed to forward message");
            }
        }

        // Reap finished calls so the set stays small on long sessions
        while in_flight.try_join_next().is_some() {}
    }

    debug!(in_flight = in_flight.len(), "Stdin closed, draining in-flight requests");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Forwarding task failed");
        }
    }

    if upstream.close().await {
        info!("Upstream session terminated");
    }

    drop(tx);
    writer
        .await
        .map_err(|e| BridgeError::internal(format!("stdout writer task failed: {e}")))??;

    info!(
        requests = summary.requests,
        notifications = summary.notifications,
        rejected = summary.rejected,
        "Stdio proxy finished"
    );
    Ok(summary)
}

const fn decode_error_message(kind: DecodeErrorKind) -> &'static str {
    match kind {
        DecodeErrorKind::Syntax => "Parse error",
        DecodeErrorKind::Malformed => "Invalid Request",
    }
}

/// Sole owner of `output`: one envelope per line, flushed after each
async fn write_lines<W>(
    mut output: W,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        output
            .write_all(codec::encode_line(&envelope).as_bytes())
            .await
            .map_err(|e| BridgeError::transport(format!("stdout write failed: {e}")))?;
        output
            .flush()
            .await
            .map_err(|e| BridgeError::transport(format!("stdout flush failed: {e}")))?;
    }
    Ok(())
}
