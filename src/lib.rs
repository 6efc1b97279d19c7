// ABOUTME: MCP transport bridge library relaying JSON-RPC between a stdio worker and HTTP clients
// ABOUTME: Re-exports the codec, correlator, supervisor, and session manager used by both binaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # MCP Bridge
//!
//! Supervises an MCP server that only speaks newline-delimited JSON-RPC
//! over stdio (the *worker*) and relays traffic between it and clients that
//! speak a different transport.
//!
//! The worker is driven through a [`Supervisor`](supervisor::Supervisor):
//! it is launched once, handshaken once, and every caller request is
//! rewritten to a worker-side id by the [`Correlator`](correlator::Correlator)
//! so concurrent callers can reuse ids freely. Messages the worker sends on
//! its own initiative are fanned out to HTTP sessions through the
//! [`SessionManager`](session::SessionManager).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mcp_bridge::{Envelope, ProcessLauncher, SessionManager, Supervisor, SupervisorConfig, WorkerConfig};
//!
//! # async fn example() -> Result<(), mcp_bridge::BridgeError> {
//! let launcher = ProcessLauncher::new(WorkerConfig::new("my-mcp-server"));
//! let supervisor = Supervisor::new(
//!     Arc::new(launcher),
//!     SupervisorConfig::default(),
//!     Arc::new(SessionManager::new()),
//! );
//! supervisor.start().await?;
//!
//! let reply = supervisor
//!     .call(Envelope::request(1, "tools/list", None), Duration::from_secs(30))
//!     .await?;
//! println!("{}", mcp_bridge::codec::encode(&reply));
//!
//! supervisor.stop(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: error type and worker lifecycle states
//! - [`envelope`]: JSON-RPC message model and protocol constants
//! - [`codec`]: line and SSE framing with structural validation
//! - [`correlator`]: worker-side id allocation and response dispatch
//! - [`config`]: worker command line, timeouts, optional config file
//! - [`discovery`]: worker binary resolution
//! - [`process`]: subprocess spawning and termination
//! - [`launcher`]: the seam between the supervisor and worker instances
//! - [`stdio`]: line writer and reader loop on the worker's streams
//! - [`session`]: HTTP session registry and event fan-out
//! - [`supervisor`]: lifecycle, handshake, crash recovery, call relay
//! - `testing` (feature `testing`): in-memory fake worker

/// Error type and lifecycle states
pub mod types;

/// Envelope decoding, encoding, and SSE framing
pub mod codec;
/// Worker command line and timeout configuration
pub mod config;
/// Request id rewriting and response dispatch
pub mod correlator;
/// Worker binary resolution
pub mod discovery;
/// JSON-RPC message model
pub mod envelope;
/// Worker launch abstraction
pub mod launcher;
/// Subprocess spawning with graceful termination
pub mod process;
/// Session registry and event fan-out
pub mod session;
/// Stdio transport adapter
pub mod stdio;
/// Worker lifecycle supervision
pub mod supervisor;
/// In-memory fake worker for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{SupervisorConfig, WorkerConfig};
pub use correlator::Correlator;
pub use envelope::{Envelope, ErrorObject, RequestId, ResponsePayload};
pub use launcher::{ProcessLauncher, WorkerLauncher};
pub use session::{SessionManager, Subscription};
pub use supervisor::Supervisor;
pub use types::{BridgeError, ErrorKind, LifecycleState};
