// ABOUTME: CLI entry point for the stdio proxy binary
// ABOUTME: Connects a stdio MCP client to a remote Streamable HTTP MCP endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mcp_bridge::config::parse_timeout;
use mcp_bridge_stdio::proxy;
use mcp_bridge_stdio::upstream::{Upstream, DEFAULT_UPSTREAM_URL};

/// mcp-bridge-stdio: talk to a Streamable HTTP MCP server from a stdio MCP client
#[derive(Parser)]
#[command(name = "mcp-bridge-stdio", version, about)]
struct Cli {
    /// Base URL of the upstream server (`/mcp` is appended when missing)
    #[arg(long, env = "MCP_BRIDGE_URL", default_value = DEFAULT_UPSTREAM_URL)]
    url: String,

    /// Seconds each upstream HTTP request may take
    #[arg(long, default_value = "30", value_parser = parse_timeout)]
    timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let upstream = Arc::new(Upstream::new(&cli.url, cli.timeout)?);

    tracing::info!(endpoint = %upstream.endpoint(), "Starting MCP stdio proxy");

    proxy::run(tokio::io::stdin(), tokio::io::stdout(), upstream).await?;
    Ok(())
}
