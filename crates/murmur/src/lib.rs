//! murmur - real-time generation-and-playback pipeline
//!
//! This library provides:
//! - `connection`: ConnectionManager, the reactor that owns the channel,
//!   heartbeat and reconnect
//! - `controller`: PipelineController, the session state machine
//! - `transcript`: TranscriptAssembler for subtitle text
//! - `playback`: AudioPlaybackQueue and audio sinks
//! - `transport` / `ws`: the channel seam and its WebSocket implementation
//! - `telemetry`: tracing setup for the binary
//!
//! ```no_run
//! # async fn run() -> Result<(), murmur::PipelineError> {
//! use std::sync::Arc;
//! use murmur::{NullSink, PipelineController, SessionParams};
//!
//! let config = murmurconf::MurmurConfig::default();
//! let controller = PipelineController::from_config(&config, Arc::new(NullSink));
//! let mut events = controller.subscribe();
//!
//! controller.start(SessionParams::new("Tell me a story")).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod controller;
pub mod error;
pub mod heartbeat;
pub mod playback;
pub mod session;
pub mod telemetry;
pub mod transcript;
pub mod transport;
pub mod ws;

pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionManager};
pub use controller::{PipelineConfig, PipelineController, PipelineEvent, PipelineStatus};
pub use error::{ConnectError, PipelineError, PlaybackError};
pub use heartbeat::{AckWatchdog, ConnectionHealth, HeartbeatPolicy};
pub use playback::{
    AudioPlaybackQueue, AudioSegment, AudioSink, EnqueueOutcome, FileSink, NullSink, PlaybackAction,
    PlaybackStats,
};
pub use session::{PipelineState, Session, SessionId, SessionParams};
pub use transcript::TranscriptAssembler;
pub use transport::{Channel, ChannelEvent, ConnectRequest, Connector};
pub use ws::WsConnector;
