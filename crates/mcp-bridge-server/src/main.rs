// ABOUTME: CLI entry point for the MCP bridge HTTP server binary
// ABOUTME: Starts the worker, completes its handshake, and serves Streamable HTTP until signalled
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mcp_bridge::config::{parse_env_pair, parse_timeout, FileConfig};
use mcp_bridge::{
    BridgeError, ProcessLauncher, SessionManager, Supervisor, SupervisorConfig, WorkerConfig,
};
use tracing::{info, warn};

use mcp_bridge_server::router;
use mcp_bridge_server::state::ServerState;

/// mcp-bridge-server: expose a stdio MCP server over Streamable HTTP/SSE
#[derive(Parser)]
#[command(name = "mcp-bridge-server", version, about)]
struct Cli {
    /// HTTP listen host [default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,

    /// HTTP listen port [default: 3008]
    #[arg(long)]
    port: Option<u16>,

    /// Seconds the worker has to answer `initialize`
    #[arg(long, value_parser = parse_timeout)]
    init_timeout: Option<Duration>,

    /// Seconds each forwarded call may take
    #[arg(long, value_parser = parse_timeout)]
    request_timeout: Option<Duration>,

    /// Seconds between SIGTERM and SIGKILL when stopping the worker
    #[arg(long, value_parser = parse_timeout)]
    shutdown_grace: Option<Duration>,

    /// A crash within this many seconds of an automatic restart is fatal
    #[arg(long, value_parser = parse_timeout)]
    restart_window: Option<Duration>,

    /// Milliseconds before a call from an SSE-capable client is answered over SSE
    #[arg(long)]
    sse_upgrade_after_ms: Option<u64>,

    /// Extra worker environment variable, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Working directory for the worker
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// TOML config file [default: <config dir>/mcp-bridge/config.toml when present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker command line, e.g. `-- python3 -m my_mcp_server`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3008;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; the worker's stdout is the protocol stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = load_file_config(cli.config.as_deref())?;

    let mut worker = if cli.command.is_empty() {
        file.worker.clone().ok_or_else(|| {
            BridgeError::config("No worker command given (pass it after `--` or set [worker] in the config file)")
        })?
    } else {
        WorkerConfig::from_argv(&cli.command)?
    };
    worker = worker.with_envs(cli.env);
    if let Some(dir) = cli.cwd {
        worker = worker.with_working_directory(dir);
    }

    let mut config = file.apply(SupervisorConfig::default());
    if let Some(timeout) = cli.init_timeout {
        config = config.with_init_timeout(timeout);
    }
    if let Some(timeout) = cli.request_timeout {
        config = config.with_request_timeout(timeout);
    }
    if let Some(grace) = cli.shutdown_grace {
        config = config.with_shutdown_grace(grace);
    }
    if let Some(window) = cli.restart_window {
        config = config.with_restart_window(window);
    }

    let supervisor = Supervisor::new(
        Arc::new(ProcessLauncher::new(worker.clone())),
        config,
        Arc::new(SessionManager::new()),
    );

    info!(worker = %worker.display_command(), "Starting worker");
    supervisor.start().await?;

    let mut state = ServerState::new(Arc::clone(&supervisor));
    if let Some(ms) = cli.sse_upgrade_after_ms.or(file.http.sse_upgrade_after_ms) {
        state = state.with_sse_upgrade_after(Duration::from_millis(ms));
    }
    let app = router::build(Arc::new(state));

    let host = cli
        .host
        .or_else(|| file.http.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let port = cli.port.or(file.http.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!(
        address = %addr,
        worker = %worker.display_command(),
        "Starting MCP bridge HTTP server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(Arc::clone(&supervisor)))
        .await
        .map_err(|e| BridgeError::internal(format!("Server error: {e}")))?;

    supervisor.stop(supervisor.config().shutdown_grace).await;
    Ok(())
}

/// Load the explicit config file, or the default one if it exists
fn load_file_config(path: Option<&Path>) -> Result<FileConfig, BridgeError> {
    if let Some(path) = path {
        return FileConfig::load(path);
    }
    match FileConfig::default_path() {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading config file");
            FileConfig::load(&path)
        }
        _ => Ok(FileConfig::default()),
    }
}

/// Resolve on Ctrl-C or SIGTERM after stopping the worker
///
/// Stopping first ends every session, which closes open event streams so
/// the graceful shutdown does not wait on them.
async fn shutdown(supervisor: Arc<Supervisor>) {
    wait_for_signal().await;
    info!("Shutdown signal received");
    supervisor.stop(supervisor.config().shutdown_grace).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
