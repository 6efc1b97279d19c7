// ABOUTME: Configuration types for the supervised worker and the bridge's timing policy
// ABOUTME: Builder-style structs, CLI value parsers, and optional TOML config file loading
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::BTreeMap;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::PROTOCOL_VERSION;
use crate::types::BridgeError;

/// Time allowed for the worker to answer `initialize` (seconds)
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 10;

/// Default per-call deadline (seconds)
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Time the worker gets to exit after SIGTERM before it is killed (seconds)
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// A crash within this many seconds of an automatic restart is fatal
const DEFAULT_RESTART_WINDOW_SECS: u64 = 30;

/// Client name announced to the worker during the handshake
pub const DEFAULT_CLIENT_NAME: &str = "mcp-bridge";

/// Environment variable that can override the worker binary path
pub const WORKER_BINARY_ENV: &str = "MCP_BRIDGE_WORKER_BINARY";

/// Command line and environment used to launch the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Program name or path
    pub command: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables layered on top of the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the worker
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl WorkerConfig {
    /// Create a worker configuration for the given program
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        }
    }

    /// Build a configuration from an argv-style list (`program arg1 arg2 ...`)
    pub fn from_argv(argv: &[String]) -> Result<Self, BridgeError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BridgeError::config("Worker command line is empty"))?;
        Ok(Self::new(program.clone()).with_args(args.to_vec()))
    }

    /// Set the program arguments
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add one environment override
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment overrides
    #[must_use]
    pub fn with_envs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(pairs);
        self
    }

    /// Set the working directory for the worker
    #[must_use]
    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = Some(dir);
        self
    }

    /// Human-readable command line for logs
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Timing and handshake policy of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Deadline for the `initialize` handshake
    pub init_timeout: Duration,
    /// Default deadline for forwarded calls
    pub request_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,
    /// A crash this soon after an automatic restart is fatal
    pub restart_window: Duration,
    /// Protocol version requested from the worker
    pub protocol_version: String,
    /// Name announced in `clientInfo`
    pub client_name: String,
    /// Version announced in `clientInfo`
    pub client_version: String,
    /// Capabilities declared to the worker
    pub capabilities: Value,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            restart_window: Duration::from_secs(DEFAULT_RESTART_WINDOW_SECS),
            protocol_version: PROTOCOL_VERSION.to_owned(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            capabilities: json!({ "roots": { "listChanged": true }, "sampling": {} }),
        }
    }
}

impl SupervisorConfig {
    /// Set the handshake deadline
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the default per-call deadline
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the SIGTERM grace period
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the window in which a repeated crash becomes fatal
    #[must_use]
    pub const fn with_restart_window(mut self, window: Duration) -> Self {
        self.restart_window = window;
        self
    }

    /// Set the protocol version requested from the worker
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

/// Parse a `KEY=VALUE` environment override
pub fn parse_env_pair(input: &str) -> Result<(String, String), BridgeError> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| BridgeError::config(format!("Expected KEY=VALUE, got: {input}")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(BridgeError::config(format!("Empty variable name in: {input}")));
    }
    Ok((key.to_owned(), value.to_owned()))
}

/// Parse a timeout value from a string (in seconds)
///
/// # Errors
///
/// Returns an error if the string cannot be parsed as a `u64`.
pub fn parse_timeout(input: &str) -> Result<Duration, ParseIntError> {
    input.trim().parse::<u64>().map(Duration::from_secs)
}

// ============================================================================
// Config File
// ============================================================================

/// Settings read from a TOML config file
///
/// ```toml
/// [worker]
/// command = "python3"
/// args = ["-m", "my_mcp_server"]
/// env = { CACHE_DIR = "/tmp/mcp" }
///
/// [timeouts]
/// init_secs = 10
/// request_secs = 30
///
/// [http]
/// port = 8080
/// ```
#[cfg(feature = "config-file")]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    /// Worker command line
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    /// Deadline overrides
    #[serde(default)]
    pub timeouts: TimeoutSection,
    /// HTTP listener overrides
    #[serde(default)]
    pub http: HttpSection,
}

/// `[timeouts]` table of the config file
#[cfg(feature = "config-file")]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TimeoutSection {
    /// Handshake deadline in seconds
    pub init_secs: Option<u64>,
    /// Per-call deadline in seconds
    pub request_secs: Option<u64>,
    /// SIGTERM grace in seconds
    pub shutdown_grace_secs: Option<u64>,
    /// Repeated-crash window in seconds
    pub restart_window_secs: Option<u64>,
}

/// `[http]` table of the config file
#[cfg(feature = "config-file")]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HttpSection {
    /// Listen host
    pub host: Option<String>,
    /// Listen port
    pub port: Option<u16>,
    /// Milliseconds before a streaming-capable call is answered over SSE
    pub sse_upgrade_after_ms: Option<u64>,
}

#[cfg(feature = "config-file")]
impl FileConfig {
    /// Read and parse a config file
    pub fn load(path: &std::path::Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            BridgeError::config(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// `<config dir>/mcp-bridge/config.toml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mcp-bridge").join("config.toml"))
    }

    /// Overlay the file's timeouts on a supervisor configuration
    #[must_use]
    pub fn apply(&self, mut config: SupervisorConfig) -> SupervisorConfig {
        let t = &self.timeouts;
        if let Some(secs) = t.init_secs {
            config.init_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = t.request_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = t.shutdown_grace_secs {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = t.restart_window_secs {
            config.restart_window = Duration::from_secs(secs);
        }
        config
    }
}
