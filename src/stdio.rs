// ABOUTME: Stdio-side transport adapter: serialized line writer and single reader loop
// ABOUTME: Routes worker responses to the correlator and worker-originated messages to an event sink
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec;
use crate::correlator::Correlator;
use crate::envelope::Envelope;
use crate::launcher::BoxedWriter;
use crate::types::BridgeError;

/// Receiver of messages the worker sends on its own initiative
///
/// Implemented by the session manager so worker events reach HTTP
/// subscribers without the reader knowing about HTTP.
pub trait EventSink: Send + Sync {
    /// Deliver one worker-originated request or notification
    fn publish(&self, envelope: Envelope);
}

/// Why the reader loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The worker closed its output stream
    Eof,
    /// Reading failed with an I/O error
    Failed(String),
}

/// What happened to one frame read from the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to a waiting caller
    Resolved,
    /// Response nobody was waiting for (discarded)
    Unmatched,
    /// Worker-originated message handed to the event sink
    Event,
    /// Blank line
    Skipped,
    /// Undecodable frame (logged and dropped)
    Malformed,
}

/// Serializes writes to the worker's input stream
///
/// Each envelope is written as one complete line and flushed while the lock
/// is held, so concurrent callers never interleave partial lines.
pub struct StdioWriter {
    inner: Mutex<Option<BoxedWriter>>,
}

impl StdioWriter {
    /// Wrap a worker input stream
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Mutex::new(Some(writer)),
        }
    }

    /// Write one envelope as a newline-terminated JSON line and flush
    pub async fn send(&self, envelope: &Envelope) -> Result<(), BridgeError> {
        let line = codec::encode_line(envelope);
        let mut guard = self.inner.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| BridgeError::transport("worker input is closed"))?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::transport(format!("worker stdin write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::transport(format!("worker stdin flush failed: {e}")))?;

        debug!(kind = envelope.kind(), method = ?envelope.method(), "Wrote envelope to worker");
        Ok(())
    }

    /// Close the worker's input stream; later sends fail with a transport error
    pub async fn close(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Read frames from the worker until EOF or an I/O error
///
/// Exactly one reader runs per worker instance. A malformed line is logged
/// and skipped; it never ends the loop.
pub async fn read_loop<R>(reader: R, correlator: &Correlator, sink: &dyn EventSink) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("Worker output closed");
                return ReadOutcome::Eof;
            }
            Ok(_) => {
                route_frame(&buf, correlator, sink);
            }
            Err(e) => {
                warn!(error = %e, "Worker output read failed");
                return ReadOutcome::Failed(e.to_string());
            }
        }
    }
}

/// Decode one frame and dispatch it by variant
pub fn route_frame(frame: &[u8], correlator: &Correlator, sink: &dyn EventSink) -> Routed {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Routed::Skipped;
    }

    match codec::decode_slice(frame) {
        Ok(response @ Envelope::Response { .. }) => {
            if correlator.resolve(response) {
                Routed::Resolved
            } else {
                Routed::Unmatched
            }
        }
        Ok(event) => {
            debug!(kind = event.kind(), method = ?event.method(), "Worker-originated message");
            sink.publish(event);
            Routed::Event
        }
        Err(e) => {
            warn!(
                error = %e,
                frame = %String::from_utf8_lossy(frame).trim_end(),
                "Dropping undecodable line from worker"
            );
            Routed::Malformed
        }
    }
}
