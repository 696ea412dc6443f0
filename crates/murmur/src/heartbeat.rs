//! Heartbeat timing and connection health.
//!
//! While a stream is open the reactor sends `{"ping": true}` every
//! `interval`. Any frame carrying the ping marker, or a transport pong, is an
//! acknowledgement. No acknowledgement within `ack_timeout` (2x the interval by
//! default) degrades the connection, and the reactor spends its reconnect
//! budget before giving up.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use murmurconf::HeartbeatConfig;
use murmurproto::ConnectionState;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

/// Resolved heartbeat and reconnect timing for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// How often to send keepalives
    pub interval: Duration,
    /// Silence tolerated before the connection counts as degraded
    pub ack_timeout: Duration,
    /// Reconnect attempts per session before surfacing the loss
    pub max_reconnects: u32,
    /// First reconnect delay (doubles each attempt up to max)
    pub backoff_base: Duration,
    /// Cap on reconnect delay
    pub backoff_max: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self::from(&HeartbeatConfig::default())
    }
}

impl From<&HeartbeatConfig> for HeartbeatPolicy {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            interval: config.interval(),
            ack_timeout: config.ack_timeout(),
            max_reconnects: config.max_reconnects,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl HeartbeatPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// attempt 1: backoff_base
    /// attempt n: min(backoff_base * 2^(n-1), backoff_max)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.backoff_base.saturating_mul(multiplier);
        std::cmp::min(delay, self.backoff_max)
    }
}

/// Tracks when the last acknowledgement arrived.
#[derive(Debug, Clone, Copy)]
pub struct AckWatchdog {
    last_ack: Instant,
    timeout: Duration,
}

impl AckWatchdog {
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self {
            last_ack: now,
            timeout,
        }
    }

    pub fn ack(&mut self, now: Instant) {
        self.last_ack = now;
    }

    pub fn deadline(&self) -> Instant {
        self.last_ack + self.timeout
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_ack)
    }
}

/// Health of one logical connection, shared between the reactor and readers.
///
/// Atomic fields allow lock-free reads of the counters.
pub struct ConnectionHealth {
    state: RwLock<ConnectionState>,
    last_ack: RwLock<Option<Instant>>,
    reconnects: AtomicU32,
    acks: AtomicU64,
    decode_errors: AtomicU64,
    frames: AtomicU64,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Idle),
            last_ack: RwLock::new(None),
            reconnects: AtomicU32::new(0),
            acks: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            frames: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Set state and return the previous one. Out-of-order transitions are
    /// applied anyway but logged.
    pub async fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let mut guard = self.state.write().await;
        if !guard.can_transition_to(&next) {
            warn!("health: unexpected transition {} -> {}", *guard, next);
        }
        std::mem::replace(&mut *guard, next)
    }

    pub async fn record_ack(&self) {
        *self.last_ack.write().await = Some(Instant::now());
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) -> u64 {
        self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_reconnect(&self) -> u32 {
        self.reconnects.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Snapshot for logs and `murmur generate --verbose`.
    pub async fn health_summary(&self) -> serde_json::Value {
        let last_ack = self.last_ack.read().await;
        let last_ack_ago = last_ack.map(|t| t.elapsed().as_secs());
        let state = self.state.read().await;

        serde_json::json!({
            "state": state.as_str(),
            "open": state.is_open(),
            "reconnects": self.reconnects(),
            "acks": self.acks.load(Ordering::Relaxed),
            "frames": self.frames.load(Ordering::Relaxed),
            "decode_errors": self.decode_errors(),
            "last_ack_secs_ago": last_ack_ago,
        })
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = HeartbeatPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
            ..Default::default()
        };

        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(7), Duration::from_secs(5));
        assert_eq!(policy.backoff_for_attempt(100), Duration::from_secs(5));
    }

    #[test]
    fn policy_from_defaults() {
        let policy = HeartbeatPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(20));
        assert_eq!(policy.ack_timeout, Duration::from_secs(40));
        assert_eq!(policy.max_reconnects, 1);
    }

    #[test]
    fn watchdog_deadline_moves_with_acks() {
        let t0 = Instant::now();
        let mut dog = AckWatchdog::new(t0, Duration::from_secs(40));
        assert_eq!(dog.deadline(), t0 + Duration::from_secs(40));
        assert!(!dog.expired(t0 + Duration::from_secs(39)));
        assert!(dog.expired(t0 + Duration::from_secs(40)));

        dog.ack(t0 + Duration::from_secs(30));
        assert!(!dog.expired(t0 + Duration::from_secs(40)));
        assert_eq!(dog.silence(t0 + Duration::from_secs(35)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn health_tracks_state_and_counters() {
        let health = ConnectionHealth::new();
        assert_eq!(health.state().await, ConnectionState::Idle);

        let prev = health.set_state(ConnectionState::Connecting).await;
        assert_eq!(prev, ConnectionState::Idle);

        health.record_ack().await;
        health.record_decode_error();
        assert_eq!(health.record_reconnect(), 1);

        let summary = health.health_summary().await;
        assert_eq!(summary["state"], "connecting");
        assert_eq!(summary["acks"], 1);
        assert_eq!(summary["decode_errors"], 1);
        assert_eq!(summary["reconnects"], 1);
        assert_eq!(summary["last_ack_secs_ago"], 0);
    }
}
