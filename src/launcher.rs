// ABOUTME: Worker launch abstraction yielding the protocol byte streams of a fresh worker
// ABOUTME: ProcessLauncher spawns the configured command; tests plug in in-memory workers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::WorkerConfig;
use crate::process::{spawn_worker, SpawnedWorker, WorkerProcess};
use crate::types::BridgeError;

/// Read half of a worker's protocol stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a worker's protocol stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Streams and process handle of one worker instance
pub struct WorkerIo {
    /// Worker output (responses and worker-originated messages)
    pub reader: BoxedReader,
    /// Worker input (requests and notifications from the bridge)
    pub writer: BoxedWriter,
    /// OS process, absent for in-memory workers
    pub process: Option<WorkerProcess>,
}

/// Starts worker instances for the supervisor
///
/// Every call produces a brand-new instance; the supervisor calls it again
/// with the same configuration when it restarts the worker.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a new worker instance
    async fn launch(&self) -> Result<WorkerIo, BridgeError>;

    /// Description of what is being launched, for logs
    fn describe(&self) -> String;
}

/// Launches the worker as a child process speaking MCP over stdio
pub struct ProcessLauncher {
    config: WorkerConfig,
}

impl ProcessLauncher {
    /// Create a launcher for the given command line
    pub const fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// The command line this launcher runs
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerIo, BridgeError> {
        let SpawnedWorker {
            process,
            stdin,
            stdout,
        } = spawn_worker(&self.config)?;

        Ok(WorkerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(process),
        })
    }

    fn describe(&self) -> String {
        self.config.display_command()
    }
}
