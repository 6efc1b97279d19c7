// ABOUTME: Stdio front end for MCP clients that cannot speak HTTP
// ABOUTME: Forwards newline-delimited JSON-RPC from stdin to a Streamable HTTP endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # mcp-bridge-stdio
//!
//! Reads one JSON-RPC envelope per line from stdin, POSTs it to a remote
//! MCP endpoint (typically `mcp-bridge-server`), and writes each reply back
//! to stdout as one line. Logs go to stderr.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_bridge_stdio::upstream::{Upstream, DEFAULT_TIMEOUT, DEFAULT_UPSTREAM_URL};
//!
//! # async fn example() -> Result<(), mcp_bridge::BridgeError> {
//! let upstream = Arc::new(Upstream::new(DEFAULT_UPSTREAM_URL, DEFAULT_TIMEOUT)?);
//! let summary =
//!     mcp_bridge_stdio::proxy::run(tokio::io::stdin(), tokio::io::stdout(), upstream).await?;
//! eprintln!("forwarded {} requests", summary.requests);
//! # Ok(())
//! # }
//! ```

/// Line loop between stdin/stdout and the upstream client
pub mod proxy;

/// Streamable HTTP client for the remote endpoint
pub mod upstream;
