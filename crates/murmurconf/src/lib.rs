//! Minimal configuration loading for Murmur.
//!
//! This crate provides configuration loading with minimal dependencies so the
//! pipeline library, the CLI and test harnesses can share one config type.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`BackendConfig`, `TelemetryConfig`): where the
//!   generation backend lives and how we log. Fixed for the process.
//! - **Bootstrap** (`HeartbeatConfig`, `PlaybackConfig`): tuning that seeds
//!   each session. The pipeline copies it at `start()` and owns it afterwards.
//!
//! # Usage
//!
//! ```rust,no_run
//! use murmurconf::MurmurConfig;
//!
//! let config = MurmurConfig::load().expect("Failed to load config");
//! println!("Backend: {}", config.backend.endpoint());
//! println!("Heartbeat: {:?}", config.heartbeat.interval());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/murmur/config.toml` (system)
//! 2. `~/.config/murmur/config.toml` (user)
//! 3. `./murmur.toml` (local override) or an explicit `--config` path
//! 4. Environment variables (`MURMUR_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! # Example Config
//!
//! ```toml
//! [backend]
//! url = "ws://127.0.0.1:8000"
//! path = "/ws/generate"
//! token = "..."
//!
//! [heartbeat]
//! interval_secs = 20
//! timeout_factor = 2
//! max_reconnects = 1
//!
//! [playback]
//! max_gap_wait_ms = 2000
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{HeartbeatConfig, PlaybackConfig};
pub use infra::{BackendConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Murmur configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MurmurConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl MurmurConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./murmur.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::table_to_config(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        if let Some(dir) = config.playback.audio_dir.take() {
            config.playback.audio_dir = Some(loader::expand_path(&dir.to_string_lossy()));
        }

        Ok((config, sources))
    }

    /// Serialize config to TOML string. The token is never written out.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Murmur Configuration\n\n");

        output.push_str("[backend]\n");
        output.push_str(&format!("url = \"{}\"\n", self.backend.url));
        output.push_str(&format!("path = \"{}\"\n", self.backend.path));
        if self.backend.token.is_some() {
            output.push_str("# token = \"<redacted>\"\n");
        }
        output.push_str(&format!("token_param = \"{}\"\n", self.backend.token_param));
        output.push_str(&format!(
            "connect_timeout_ms = {}\n",
            self.backend.connect_timeout_ms
        ));
        output.push_str(&format!("json_mode = {}\n", self.backend.json_mode));

        output.push_str("\n[heartbeat]\n");
        output.push_str(&format!("interval_secs = {}\n", self.heartbeat.interval_secs));
        output.push_str(&format!("timeout_factor = {}\n", self.heartbeat.timeout_factor));
        output.push_str(&format!("max_reconnects = {}\n", self.heartbeat.max_reconnects));
        output.push_str(&format!("backoff_base_ms = {}\n", self.heartbeat.backoff_base_ms));
        output.push_str(&format!("backoff_max_ms = {}\n", self.heartbeat.backoff_max_ms));

        output.push_str("\n[playback]\n");
        output.push_str(&format!("max_gap_wait_ms = {}\n", self.playback.max_gap_wait_ms));
        output.push_str(&format!("first_sequence = {}\n", self.playback.first_sequence));
        if let Some(dir) = &self.playback.audio_dir {
            output.push_str(&format!("audio_dir = \"{}\"\n", dir.display()));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }

        output
    }
}
