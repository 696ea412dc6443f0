//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MurmurConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/murmur/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("murmur/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("murmur.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table (not yet merged or typed).
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; any other value
/// in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config, filling gaps with defaults.
pub fn table_to_config(table: toml::Table, origin: &Path) -> Result<MurmurConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into::<MurmurConfig>()
        .map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Parse a single TOML document into a config.
pub fn parse_config(contents: &str, origin: &Path) -> Result<MurmurConfig, ConfigError> {
    let table = parse_table(contents, origin)?;
    table_to_config(table, origin)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MurmurConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup (tests pass a map instead of the
/// process environment).
pub fn apply_overrides_from<F>(config: &mut MurmurConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut hit = |key: &str| -> Option<String> {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = hit("MURMUR_URL") {
        config.backend.url = v;
    }
    if let Some(v) = hit("MURMUR_PATH") {
        config.backend.path = v;
    }
    if let Some(v) = hit("MURMUR_TOKEN") {
        config.backend.token = Some(v);
    }
    if let Some(v) = hit("MURMUR_HEARTBEAT_SECS") {
        if let Ok(secs) = v.parse() {
            config.heartbeat.interval_secs = secs;
        }
    }
    if let Some(v) = hit("MURMUR_MAX_GAP_WAIT_MS") {
        if let Ok(ms) = v.parse() {
            config.playback.max_gap_wait_ms = ms;
        }
    }

    if let Some(v) = hit("MURMUR_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    // RUST_LOG wins over our own variable
    if let Some(v) = hit("RUST_LOG") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = hit("MURMUR_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    // Also support standard OTEL env var
    if let Some(v) = hit("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
            return PathBuf::from(path);
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }

    PathBuf::from(path)
}
