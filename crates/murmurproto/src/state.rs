//! Connection lifecycle state.

use serde::{Deserialize, Serialize};

/// Channel state as seen by the connection manager.
///
/// Transitions only move forward:
///
/// ```text
/// Idle → Connecting → Authenticated → Streaming ⇄ Degraded
///   any state ──────────────────────────────────→ Closed
/// ```
///
/// The single backward edge is `Degraded → Streaming` after a successful
/// reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Authenticated,
    Streaming,
    Degraded(String),
    Closed,
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Authenticated => 2,
            ConnectionState::Streaming => 3,
            ConnectionState::Degraded(_) => 4,
            ConnectionState::Closed => 5,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Closed, _) => false,
            (_, ConnectionState::Closed) => true,
            (ConnectionState::Degraded(_), ConnectionState::Streaming) => true,
            (ConnectionState::Degraded(_), ConnectionState::Degraded(_)) => false,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticated | ConnectionState::Streaming | ConnectionState::Degraded(_)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Degraded(_) => "degraded",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Degraded(reason) => write!(f, "degraded ({})", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
