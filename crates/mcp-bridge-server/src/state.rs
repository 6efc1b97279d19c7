// ABOUTME: Server state holding the worker supervisor and HTTP response policy
// ABOUTME: One bridge instance per state value; no globals, so several servers can coexist
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::{SessionManager, Supervisor};

/// Default delay before a streaming-capable call is answered over SSE
pub const DEFAULT_SSE_UPGRADE_AFTER: Duration = Duration::from_millis(250);

/// Shared server state handle
pub type SharedState = Arc<ServerState>;

/// Everything the HTTP handlers need
pub struct ServerState {
    supervisor: Arc<Supervisor>,
    /// Calls still running after this long are switched to an SSE reply
    sse_upgrade_after: Duration,
    /// Ids for requests built by the REST shortcut routes
    shortcut_ids: AtomicI64,
}

impl ServerState {
    /// Wrap a supervisor with the default response policy
    pub const fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            sse_upgrade_after: DEFAULT_SSE_UPGRADE_AFTER,
            shortcut_ids: AtomicI64::new(1),
        }
    }

    /// Set the SSE upgrade delay
    #[must_use]
    pub const fn with_sse_upgrade_after(mut self, delay: Duration) -> Self {
        self.sse_upgrade_after = delay;
        self
    }

    /// The worker supervisor
    pub const fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// The session registry
    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.supervisor.sessions()
    }

    /// Deadline applied to forwarded calls
    pub fn request_timeout(&self) -> Duration {
        self.supervisor.config().request_timeout
    }

    /// SSE upgrade delay
    pub const fn sse_upgrade_after(&self) -> Duration {
        self.sse_upgrade_after
    }

    /// Next id for a request built on behalf of a REST client
    pub fn next_shortcut_id(&self) -> i64 {
        self.shortcut_ids.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use mcp_bridge::testing::FakeLauncher;
    use mcp_bridge::SupervisorConfig;

    use super::*;

    #[test]
    fn upgrade_delay_is_configurable() {
        let supervisor = Supervisor::new(
            Arc::new(FakeLauncher::new()),
            SupervisorConfig::default(),
            Arc::new(SessionManager::new()),
        );
        let state = ServerState::new(supervisor);
        assert_eq!(state.sse_upgrade_after(), DEFAULT_SSE_UPGRADE_AFTER);

        let state = state.with_sse_upgrade_after(Duration::from_secs(1));
        assert_eq!(state.sse_upgrade_after(), Duration::from_secs(1));
        assert_eq!(state.request_timeout(), SupervisorConfig::default().request_timeout);
    }
}
