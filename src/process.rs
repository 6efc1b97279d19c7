// ABOUTME: Worker subprocess spawning with piped stdio and graceful termination
// ABOUTME: Drains stderr separately for diagnostics and escalates SIGTERM to SIGKILL on shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::discovery::resolve_worker_binary;
use crate::types::BridgeError;

/// Amount of worker stderr retained for crash diagnostics (64 KiB)
const MAX_STDERR_TAIL_BYTES: usize = 64 * 1024;

/// How long to wait for the stderr drain to finish once the worker is gone
const STDERR_COLLECT_GRACE: Duration = Duration::from_millis(500);

/// A spawned worker with its protocol streams split off
pub struct SpawnedWorker {
    /// Process handle
    pub process: WorkerProcess,
    /// Worker's stdin (bridge → worker protocol stream)
    pub stdin: ChildStdin,
    /// Worker's stdout (worker → bridge protocol stream)
    pub stdout: ChildStdout,
}

/// Handle to a running worker process
///
/// The child is spawned with `kill_on_drop`, so losing the handle never
/// leaves an orphaned worker behind.
pub struct WorkerProcess {
    child: Child,
    command: String,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
}

/// Spawn the worker with piped stdio
///
/// The worker inherits the bridge's environment plus the configured
/// overrides. Stderr is drained in the background into `tracing` and never
/// mixed into the protocol stream.
pub fn spawn_worker(config: &WorkerConfig) -> Result<SpawnedWorker, BridgeError> {
    let program = resolve_worker_binary(&config.command)?;

    let mut cmd = Command::new(&program);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = config.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        BridgeError::transport(format!(
            "Failed to spawn worker '{}': {e}",
            config.display_command()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| BridgeError::internal("Worker stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeError::internal("Worker stdout was not captured"))?;
    let stderr_task = tokio::spawn(drain_stderr(child.stderr.take(), MAX_STDERR_TAIL_BYTES));

    info!(
        pid = child.id(),
        command = %config.display_command(),
        "Spawned worker process"
    );

    Ok(SpawnedWorker {
        process: WorkerProcess {
            child,
            command: config.display_command(),
            stderr_task: Some(stderr_task),
        },
        stdin,
        stdout,
    })
}

/// Log each stderr line and keep the most recent `limit` bytes
async fn drain_stderr(stream: Option<ChildStderr>, limit: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let Some(stream) = stream else {
        return tail;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mcp_bridge::worker_stderr", "{line}");
        tail.extend_from_slice(line.as_bytes());
        tail.push(b'\n');
        if tail.len() > limit {
            let excess = tail.len() - limit;
            tail.drain(..excess);
        }
    }
    tail
}

impl WorkerProcess {
    /// OS process id, if the process is still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit code if the worker already exited
    pub fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Stop the worker: SIGTERM, wait up to `grace`, then SIGKILL
    ///
    /// The caller closes the worker's stdin first (by dropping the writer).
    /// Returns the exit code, `-1` when the process was killed by a signal.
    pub async fn terminate(mut self, grace: Duration) -> Result<i32, BridgeError> {
        if let Some(code) = self.try_exit_code() {
            self.log_stderr_tail(code).await;
            return Ok(code);
        }

        send_sigterm(&mut self.child);

        let code = match tokio_timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(e)) => {
                return Err(BridgeError::transport(format!(
                    "Failed to wait for worker process: {e}"
                )))
            }
            Err(_) => {
                warn!(?grace, command = %self.command, "Worker ignored SIGTERM, killing process");
                self.child
                    .kill()
                    .await
                    .map_err(|e| BridgeError::transport(format!("Failed to kill worker: {e}")))?;
                -1
            }
        };

        info!(code, command = %self.command, "Worker process stopped");
        self.log_stderr_tail(code).await;
        Ok(code)
    }

    /// Collect the exit status of a worker that is already dying
    pub async fn reap(mut self) -> Option<i32> {
        let code = match tokio_timeout(STDERR_COLLECT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => {
                let _ = self.child.start_kill();
                None
            }
        };
        self.log_stderr_tail(code.unwrap_or(-1)).await;
        code
    }

    async fn log_stderr_tail(&mut self, code: i32) {
        let Some(task) = self.stderr_task.take() else {
            return;
        };
        match tokio_timeout(STDERR_COLLECT_GRACE, task).await {
            Ok(Ok(tail)) if !tail.is_empty() => {
                let text = String::from_utf8_lossy(&tail);
                if code == 0 {
                    debug!(code, stderr = %text.trim_end(), "Worker stderr");
                } else {
                    warn!(code, stderr = %text.trim_end(), "Worker exited with stderr output");
                }
            }
            Ok(_) => {}
            Err(_) => debug!("Worker stderr still open after exit, not waiting"),
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        debug!(pid, "Sending SIGTERM to worker");
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, error = %e, "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    // No graceful signal on this platform
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sh(script: &str) -> WorkerConfig {
        WorkerConfig::new("sh").with_args(vec!["-c".to_owned(), script.to_owned()])
    }

    #[tokio::test]
    async fn spawned_worker_exchanges_lines() {
        let SpawnedWorker {
            process,
            mut stdin,
            mut stdout,
        } = spawn_worker(&sh("read line; echo \"got:$line\"")).unwrap();

        stdin.write_all(b"hello\n").await.unwrap();
        stdin.flush().await.unwrap();

        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "got:hello\n");

        drop(stdin);
        assert_eq!(process.terminate(Duration::from_secs(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn environment_overrides_reach_the_worker() {
        let config = sh("echo \"$BRIDGE_TEST_VALUE\"").with_env("BRIDGE_TEST_VALUE", "forty-two");
        let SpawnedWorker { process, stdout, .. } = spawn_worker(&config).unwrap();

        let mut out = String::new();
        BufReader::new(stdout).read_to_string(&mut out).await.unwrap();
        assert_eq!(out.trim(), "forty-two");
        assert_eq!(process.reap().await, Some(0));
    }

    #[tokio::test]
    async fn terminate_kills_worker_ignoring_sigterm() {
        let SpawnedWorker { process, .. } =
            spawn_worker(&sh("trap '' TERM; while true; do sleep 1; done")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let code = process.terminate(Duration::from_millis(200)).await.unwrap();
        assert_eq!(code, -1);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let result = spawn_worker(&WorkerConfig::new("definitely-not-a-real-binary-xyz123"));
        assert!(result.is_err());
    }
}
