//! Error types for the pipeline.
//!
//! Only two kinds are recovered locally: [`murmurproto::DecodeError`] (frame
//! dropped) and [`PlaybackError`] (segment skipped). Everything else reaches
//! the caller with a human-readable reason.

/// Failure establishing or using the channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Handshake rejected by the server (HTTP 401/403). Never retried.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Socket-level failure: refused, reset, timed out, closed abnormally.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Endpoint or token cannot be turned into a request.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ConnectError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectError::Auth(_))
    }

    /// The reason without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ConnectError::Auth(m) | ConnectError::Transport(m) | ConnectError::InvalidEndpoint(m) => m,
        }
    }
}

/// One segment failed to render. The queue moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Playback of segment {seq} failed: {message}")]
pub struct PlaybackError {
    pub seq: u64,
    pub message: String,
}

impl PlaybackError {
    pub fn new(seq: u64, message: impl Into<String>) -> Self {
        Self {
            seq,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the [`PipelineController`](crate::PipelineController).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// A session is already Connecting or Streaming.
    #[error("Pipeline busy: session {0} is still running; cancel it or wait")]
    Busy(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Heartbeat went unanswered and the reconnect budget is spent.
    #[error("ConnectionLost: {0}")]
    ConnectionLost(String),

    /// The server sent `{"error": ...}`.
    #[error("{0}")]
    ErrorNotice(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The controller task is gone (runtime shut down).
    #[error("Pipeline controller stopped")]
    ActorGone,
}

impl PipelineError {
    /// Short machine-friendly kind, used in logs and CLI exit messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Busy(_) => "busy",
            PipelineError::Auth(_) => "auth",
            PipelineError::Transport(_) => "transport",
            PipelineError::ConnectionLost(_) => "connection_lost",
            PipelineError::ErrorNotice(_) => "error_notice",
            PipelineError::InvalidEndpoint(_) => "invalid_endpoint",
            PipelineError::ActorGone => "actor_gone",
        }
    }
}

impl From<ConnectError> for PipelineError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Auth(m) => PipelineError::Auth(m),
            ConnectError::Transport(m) => PipelineError::Transport(m),
            ConnectError::InvalidEndpoint(m) => PipelineError::InvalidEndpoint(m),
        }
    }
}
