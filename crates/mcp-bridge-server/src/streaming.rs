// ABOUTME: Server-Sent Events responses carrying JSON-RPC envelopes as `message` events
// ABOUTME: Deferred single-reply streams for slow calls and long-lived session event streams
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::convert::Infallible;
use std::future::Future;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use mcp_bridge::codec;
use mcp_bridge::{BridgeError, Envelope, RequestId, Subscription};
use tracing::{debug, warn};

/// SSE event name used for every envelope
pub const MESSAGE_EVENT: &str = "message";

/// Wrap one envelope in an SSE `message` event
pub fn message_event(envelope: &Envelope) -> Event {
    Event::default()
        .event(MESSAGE_EVENT)
        .data(codec::encode(envelope))
}

/// Answer a call over SSE once it completes
///
/// Keep-alive comments are sent while the worker is busy. The stream
/// carries exactly one `message` event and then ends. If the client goes
/// away first, the pending call is dropped and its late answer discarded.
pub fn deferred_reply<F>(pending: F, original_id: Option<RequestId>) -> Response
where
    F: Future<Output = Result<Envelope, BridgeError>> + Send + 'static,
{
    let stream = futures::stream::once(async move {
        let envelope = match pending.await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Streamed call failed");
                e.to_envelope(original_id)
            }
        };
        Ok::<_, Infallible>(message_event(&envelope))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Stream worker-originated events of one session until it is terminated
pub fn session_stream(subscription: Subscription) -> Response {
    debug!(session_id = subscription.session_id(), "Opening session event stream");

    let events = subscription
        .into_stream()
        .map(|envelope| Ok::<_, Infallible>(message_event(&envelope)));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
