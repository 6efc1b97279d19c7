// ABOUTME: Worker binary resolution ahead of process spawn
// ABOUTME: Honors an environment override, explicit paths, then searches PATH via which
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::WORKER_BINARY_ENV;
use crate::types::BridgeError;

/// Resolve the worker program to an executable path
///
/// `MCP_BRIDGE_WORKER_BINARY` wins over the configured command so an
/// operator can swap the worker without touching the command line.
pub fn resolve_worker_binary(command: &str) -> Result<PathBuf, BridgeError> {
    let env_override = env::var(WORKER_BINARY_ENV).ok();
    resolve_binary(command, env_override.as_deref())
}

/// Resolve a binary path by name, optionally using an environment variable override
///
/// Resolution order:
/// 1. If `env_override` is `Some`, use that value as the path
/// 2. If `name` contains a path separator, use it as-is when it exists
/// 3. Otherwise, search `PATH` using `which`
///
/// # Errors
///
/// Returns `BridgeError` if the binary cannot be found.
pub fn resolve_binary(name: &str, env_override: Option<&str>) -> Result<PathBuf, BridgeError> {
    if let Some(override_path) = env_override {
        let path = PathBuf::from(override_path);
        if path.exists() {
            debug!(binary = name, path = %path.display(), "Resolved via env override");
            return Ok(path);
        }
        return Err(BridgeError::binary_not_found(format!(
            "{WORKER_BINARY_ENV} points to non-existent path: {override_path}"
        )));
    }

    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
        return Err(BridgeError::binary_not_found(name));
    }

    which::which(name).map_err(|e| BridgeError::binary_not_found(format!("'{name}' on PATH: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn missing_override_path_is_reported() {
        let err = resolve_binary("sh", Some("/nonexistent/worker/xyz123")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BinaryNotFound);
        assert!(err.message.contains(WORKER_BINARY_ENV));
    }

    #[test]
    fn unknown_binary_is_not_found() {
        let err = resolve_binary("definitely-not-a-real-binary-xyz123", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BinaryNotFound);
    }

    #[test]
    fn explicit_missing_path_is_not_found() {
        let err = resolve_binary("/nonexistent/dir/worker", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BinaryNotFound);
    }

    #[cfg(unix)]
    #[test]
    fn shell_is_found_on_path() {
        let path = resolve_binary("sh", None).unwrap();
        assert!(path.exists());
    }
}
