//! Infrastructure configuration - where the backend lives and how we log.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generation backend endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base WebSocket URL (scheme + host + port).
    /// Default: ws://127.0.0.1:8000
    #[serde(default = "BackendConfig::default_url")]
    pub url: String,

    /// Path of the generation endpoint.
    /// Default: /ws/generate
    #[serde(default = "BackendConfig::default_path")]
    pub path: String,

    /// Bearer token, carried as a query parameter on the upgrade request.
    #[serde(default)]
    pub token: Option<String>,

    /// Name of the query parameter carrying the token.
    /// Default: token
    #[serde(default = "BackendConfig::default_token_param")]
    pub token_param: String,

    /// Handshake timeout in milliseconds.
    /// Default: 10000
    #[serde(default = "BackendConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request structured JSON framing (false = plain text).
    /// Default: true
    #[serde(default = "BackendConfig::default_json_mode")]
    pub json_mode: bool,
}

impl BackendConfig {
    fn default_url() -> String {
        "ws://127.0.0.1:8000".to_string()
    }

    fn default_path() -> String {
        "/ws/generate".to_string()
    }

    fn default_token_param() -> String {
        "token".to_string()
    }

    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    fn default_json_mode() -> bool {
        true
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Full endpoint without credentials, e.g. `ws://127.0.0.1:8000/ws/generate`.
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if self.path.is_empty() {
            base.to_string()
        } else if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            path: Self::default_path(),
            token: None,
            token_param: Self::default_token_param(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            json_mode: Self::default_json_mode(),
        }
    }
}

/// Logging and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Only used when built with the `otel` feature.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}
