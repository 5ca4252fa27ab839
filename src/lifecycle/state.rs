//! Server lifecycle states.

/// Where a server is in its lifecycle.
///
/// ```text
/// Idle → Serving → Draining → Stopped
///            └────────────→ ErrorStopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet bound.
    Idle,
    /// Listener bound and accepting connections.
    Serving,
    /// Termination received; no new connections, waiting for in-flight ones.
    Draining,
    /// Drain finished or timed out.
    Stopped,
    /// The accept loop failed.
    ErrorStopped,
}

impl ServerState {
    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::ErrorStopped)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Serving => "serving",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
            ServerState::ErrorStopped => "error-stopped",
        };
        f.write_str(name)
    }
}
