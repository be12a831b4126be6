//! Engine configuration loading.
//!
//! TOML is the sole config source; every field has a default, so an absent
//! config file (or an absent section within one) is not an error. Shape
//! follows the forwarder's config loader: a `RawConfig` of all-`Option`
//! fields deserialized by `serde`, validated and defaulted into a concrete
//! [`EngineConfig`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory under which `session_YYYY-MM-DD_HHMMSS/` directories are created.
    pub data_root: std::path::PathBuf,
    /// Permits on the process-wide memory-sampling semaphore.
    pub memory_sample_permits: usize,
    /// Max concurrently attached sessions before LRU eviction kicks in.
    pub max_sessions: usize,
    pub network_rate_per_sec: u32,
    pub console_rate_per_sec: u32,
    /// Bounded queue depth per (host, stream) writer.
    pub writer_queue_depth: usize,
    pub rotation: RotationConfig,
    pub flush: FlushConfig,
    pub call_timeout: Duration,
    /// Cadence of the Target Registry's reconciliation poll.
    pub registry_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: u64,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub enum FlushConfig {
    Immediate,
    Batched { interval: Duration },
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_root: default_data_root(),
            memory_sample_permits: 8,
            max_sessions: 50,
            network_rate_per_sec: 50,
            console_rate_per_sec: 10,
            writer_queue_depth: 1024,
            rotation: RotationConfig {
                max_bytes: 50 * 1024 * 1024,
                max_age: Duration::from_secs(24 * 3600),
            },
            flush: FlushConfig::Immediate,
            call_timeout: Duration::from_secs(10),
            registry_poll_interval: Duration::from_secs(5),
        }
    }
}

fn default_data_root() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("BrowserFairyData")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Load config from a TOML file at `path`, falling back to defaults for
/// every field the file omits.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_from_str(&toml_str)
}

/// Load config from an already-read TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<EngineConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;
    raw.into_config()
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    data_root: Option<String>,
    memory_sample_permits: Option<usize>,
    max_sessions: Option<usize>,
    rate_limits: Option<RawRateLimits>,
    writer: Option<RawWriter>,
    call_timeout_secs: Option<u64>,
    registry_poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRateLimits {
    network_per_sec: Option<u32>,
    console_per_sec: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWriter {
    queue_depth: Option<usize>,
    rotation_max_bytes: Option<u64>,
    rotation_max_age_secs: Option<u64>,
    /// `"immediate"` or `"batched"`.
    flush_mode: Option<String>,
    flush_interval_ms: Option<u64>,
}

impl RawConfig {
    fn into_config(self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();
        let rate_limits = self.rate_limits.unwrap_or_default();
        let writer = self.writer.unwrap_or_default();

        let flush_mode = writer.flush_mode.as_deref().unwrap_or("immediate");
        let flush = match flush_mode {
            "immediate" => FlushConfig::Immediate,
            "batched" => FlushConfig::Batched {
                interval: Duration::from_millis(writer.flush_interval_ms.unwrap_or(250)),
            },
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "writer.flush_mode must be 'immediate' or 'batched', got '{other}'"
                )));
            }
        };

        Ok(EngineConfig {
            data_root: self
                .data_root
                .map(std::path::PathBuf::from)
                .unwrap_or(defaults.data_root),
            memory_sample_permits: self
                .memory_sample_permits
                .unwrap_or(defaults.memory_sample_permits),
            max_sessions: self.max_sessions.unwrap_or(defaults.max_sessions),
            network_rate_per_sec: rate_limits
                .network_per_sec
                .unwrap_or(defaults.network_rate_per_sec),
            console_rate_per_sec: rate_limits
                .console_per_sec
                .unwrap_or(defaults.console_rate_per_sec),
            writer_queue_depth: writer.queue_depth.unwrap_or(defaults.writer_queue_depth),
            rotation: RotationConfig {
                max_bytes: writer.rotation_max_bytes.unwrap_or(defaults.rotation.max_bytes),
                max_age: writer
                    .rotation_max_age_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.rotation.max_age),
            },
            flush,
            call_timeout: self
                .call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            registry_poll_interval: self
                .registry_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.registry_poll_interval),
        })
    }
}
