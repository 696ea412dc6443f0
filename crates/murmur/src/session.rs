//! Session identity and controller state.

use chrono::{DateTime, Utc};
use murmurproto::{GenerateRequest, OutputMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one generation-and-playback attempt.
///
/// Every asynchronous callback (frame delivery, heartbeat, playback
/// completion) carries the id it was scheduled for; the controller discards
/// anything whose id is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the caller asks for. Reused verbatim on reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub prompt: String,
    pub mode: OutputMode,
    pub auth_token: Option<String>,
}

impl SessionParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: OutputMode::Json,
            auth_token: None,
        }
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn request(&self) -> GenerateRequest {
        GenerateRequest::new(self.prompt.clone(), self.mode)
    }
}

/// Controller state machine.
///
/// ```text
/// Idle ──start()──▶ Connecting ──Authenticated──▶ Streaming
///                       │                             │
///                       ├──────── cancel() ───────────┼──▶ Cancelled
///                       └── auth/transport error ─────┼──▶ Failed(reason)
///                                                     ├──▶ Completed (StreamEnd)
///                                                     └──▶ Failed(reason)
/// ```
///
/// Completed, Failed and Cancelled are terminal; the next `start()` creates a
/// fresh session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed(String),
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed(_) | PipelineState::Cancelled
        )
    }

    /// Connecting or Streaming. Blocks a new `start()`.
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Connecting | PipelineState::Streaming)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Connecting => "Connecting",
            PipelineState::Streaming => "Streaming",
            PipelineState::Completed => "Completed",
            PipelineState::Failed(_) => "Failed",
            PipelineState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed(reason) => write!(f, "Failed: {}", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// One generation attempt, exclusively owned by the controller actor.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub params: SessionParams,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(params: SessionParams) -> Self {
        Self {
            id: SessionId::new(),
            params,
            state: PipelineState::Connecting,
            started_at: Utc::now(),
        }
    }

    /// Successor after a reconnect: same parameters, new identity.
    pub fn successor(&self, id: SessionId) -> Self {
        Self {
            id,
            params: self.params.clone(),
            state: self.state.clone(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Completed.is_terminal());
        assert!(PipelineState::Failed("x".into()).is_terminal());
        assert!(PipelineState::Cancelled.is_terminal());
        assert!(!PipelineState::Idle.is_terminal());
        assert!(!PipelineState::Streaming.is_terminal());
    }

    #[test]
    fn active_states() {
        assert!(PipelineState::Connecting.is_active());
        assert!(PipelineState::Streaming.is_active());
        assert!(!PipelineState::Idle.is_active());
        assert!(!PipelineState::Completed.is_active());
    }

    #[test]
    fn failed_display_includes_reason() {
        assert_eq!(
            PipelineState::Failed("quota exceeded".into()).to_string(),
            "Failed: quota exceeded"
        );
    }

    #[test]
    fn new_sessions_get_distinct_ids() {
        let params = SessionParams::new("hi");
        let a = Session::new(params.clone());
        let b = Session::new(params);
        assert_ne!(a.id, b.id);
        assert_eq!(a.state, PipelineState::Connecting);
    }

    #[test]
    fn successor_keeps_params() {
        let original = Session::new(SessionParams::new("story").with_token("t"));
        let next_id = SessionId::new();
        let next = original.successor(next_id);
        assert_eq!(next.id, next_id);
        assert_eq!(next.params, original.params);
    }

    #[test]
    fn params_build_request() {
        let params = SessionParams::new("hello").with_mode(OutputMode::PlainText);
        let req = params.request();
        assert_eq!(req.prompt, "hello");
        assert!(!req.json);
    }
}
