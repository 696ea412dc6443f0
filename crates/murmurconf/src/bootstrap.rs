//! Pipeline tuning - seeds each session, then the pipeline owns it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Keepalive and reconnect behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between keepalive probes.
    /// Default: 20
    #[serde(default = "HeartbeatConfig::default_interval_secs")]
    pub interval_secs: u64,

    /// Acknowledgement deadline as a multiple of the interval.
    /// Default: 2
    #[serde(default = "HeartbeatConfig::default_timeout_factor")]
    pub timeout_factor: u32,

    /// Reconnect attempts per session before surfacing ConnectionLost.
    /// Default: 1
    #[serde(default = "HeartbeatConfig::default_max_reconnects")]
    pub max_reconnects: u32,

    /// First reconnect delay; doubles per attempt.
    /// Default: 500
    #[serde(default = "HeartbeatConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on reconnect delay.
    /// Default: 5000
    #[serde(default = "HeartbeatConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl HeartbeatConfig {
    fn default_interval_secs() -> u64 {
        20
    }

    fn default_timeout_factor() -> u32 {
        2
    }

    fn default_max_reconnects() -> u32 {
        1
    }

    fn default_backoff_base_ms() -> u64 {
        500
    }

    fn default_backoff_max_ms() -> u64 {
        5_000
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// How long without an acknowledgement before the link is degraded.
    pub fn ack_timeout(&self) -> Duration {
        self.interval().saturating_mul(self.timeout_factor.max(1))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            timeout_factor: Self::default_timeout_factor(),
            max_reconnects: Self::default_max_reconnects(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
        }
    }
}

/// Audio queue behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// How long a missing segment may block playback before it is skipped.
    /// Default: 2000
    #[serde(default = "PlaybackConfig::default_max_gap_wait_ms")]
    pub max_gap_wait_ms: u64,

    /// Sequence number the server starts counting from.
    /// Default: 0
    #[serde(default)]
    pub first_sequence: u64,

    /// Write segments here instead of discarding them (CLI only).
    #[serde(default)]
    pub audio_dir: Option<PathBuf>,
}

impl PlaybackConfig {
    fn default_max_gap_wait_ms() -> u64 {
        2_000
    }

    pub fn max_gap_wait(&self) -> Duration {
        Duration::from_millis(self.max_gap_wait_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_gap_wait_ms: Self::default_max_gap_wait_ms(),
            first_sequence: 0,
            audio_dir: None,
        }
    }
}
