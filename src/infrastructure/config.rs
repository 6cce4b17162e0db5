//! Configuration management for the task engine
//!
//! Sources, in order: built-in defaults, an optional `taskforge.toml`, then
//! `TASKFORGE_*` environment overrides. The result is validated once and
//! frozen; invalid values fail initialization instead of being clamped.
//!
//! `ConfigInitializer` builds the configuration lazily and exactly once,
//! however many threads ask for it at the same time.

use crate::core::once::{InitPhase, OnceInit, Poisoned};
use crate::hot_path::cache::EvictionPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default config file, overridden by `TASKFORGE_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "taskforge.toml";

/// What `submit` does when the task queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPolicy {
    /// Wait until a worker frees a slot
    #[default]
    Block,
    /// Fail immediately with `QueueFull`
    Reject,
    /// Wait at most this long, then fail with `QueueFull`
    BlockFor(Duration),
}

impl fmt::Display for SubmitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitPolicy::Block => f.write_str("block"),
            SubmitPolicy::Reject => f.write_str("reject"),
            SubmitPolicy::BlockFor(d) => write!(f, "block:{}", d.as_millis()),
        }
    }
}

impl FromStr for SubmitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("block") {
            return Ok(SubmitPolicy::Block);
        }
        if s.eq_ignore_ascii_case("reject") {
            return Ok(SubmitPolicy::Reject);
        }
        match s.split_once(':') {
            Some((head, ms)) if head.eq_ignore_ascii_case("block") => ms
                .trim()
                .parse::<u64>()
                .map(|ms| SubmitPolicy::BlockFor(Duration::from_millis(ms)))
                .map_err(|_| format!("invalid wait in submit policy '{}'", s)),
            _ => Err(format!("unknown submit policy '{}'", s)),
        }
    }
}

/// On-disk layout of `taskforge.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub scratch: ScratchSection,
}

/// `[engine]` table
///
/// Counts are signed so that zero and negative values reach validation and
/// produce a field-specific error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    #[serde(default = "default_worker_count")]
    pub worker_count: i64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: i64,

    #[serde(default = "default_eviction_policy")]
    pub cache_eviction_policy: String,

    /// Snapshot logging period; 0 disables the monitor
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: i64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: i64,

    /// "block", "reject" or "block:<ms>"
    #[serde(default = "default_submit_policy")]
    pub submit_policy: String,
}

/// `[scratch]` table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScratchSection {
    /// Idle buffers kept for reuse; defaults to twice the worker count
    #[serde(default)]
    pub pool_capacity: Option<i64>,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: Option<i64>,
}

impl Default for ScratchSection {
    fn default() -> Self {
        Self {
            pool_capacity: None,
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            cache_capacity: default_cache_capacity(),
            cache_eviction_policy: default_eviction_policy(),
            monitor_interval_ms: default_monitor_interval_ms(),
            queue_capacity: default_queue_capacity(),
            submit_policy: default_submit_policy(),
        }
    }
}

fn default_worker_count() -> i64 {
    4
}

fn default_cache_capacity() -> i64 {
    1024
}

fn default_eviction_policy() -> String {
    "LRU".to_string()
}

fn default_monitor_interval_ms() -> i64 {
    1000
}

fn default_queue_capacity() -> i64 {
    1024
}

fn default_submit_policy() -> String {
    "block".to_string()
}

fn default_buffer_size() -> Option<i64> {
    Some(4096)
}

impl ConfigFile {
    /// Load configuration from the TOML file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("TASKFORGE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                tracing::debug!(target: "config", path = %config_path, "loading config file");
                Self::from_toml_str(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(format!("{}: {}", config_path, e))),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay `TASKFORGE_*` variables taken from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn int(name: &'static str, raw: String) -> Result<i64, ConfigError> {
            raw.trim().parse::<i64>().map_err(|_| ConfigError::Validation {
                field: name,
                reason: format!("'{}' is not an integer", raw),
            })
        }

        if let Some(v) = lookup("TASKFORGE_WORKER_COUNT") {
            self.engine.worker_count = int("worker_count", v)?;
        }
        if let Some(v) = lookup("TASKFORGE_CACHE_CAPACITY") {
            self.engine.cache_capacity = int("cache_capacity", v)?;
        }
        if let Some(v) = lookup("TASKFORGE_EVICTION_POLICY") {
            self.engine.cache_eviction_policy = v;
        }
        if let Some(v) = lookup("TASKFORGE_MONITOR_INTERVAL_MS") {
            self.engine.monitor_interval_ms = int("monitor_interval", v)?;
        }
        if let Some(v) = lookup("TASKFORGE_QUEUE_CAPACITY") {
            self.engine.queue_capacity = int("queue_capacity", v)?;
        }
        if let Some(v) = lookup("TASKFORGE_SUBMIT_POLICY") {
            self.engine.submit_policy = v;
        }
        Ok(())
    }
}

/// Validated, immutable engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub cache_capacity: usize,
    pub cache_eviction_policy: EvictionPolicy,
    /// Zero disables the background monitor
    pub monitor_interval: Duration,
    pub queue_capacity: usize,
    pub submit_policy: SubmitPolicy,
    pub scratch_pool_capacity: usize,
    pub scratch_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            cache_capacity: 1024,
            cache_eviction_policy: EvictionPolicy::Lru,
            monitor_interval: Duration::from_millis(1000),
            queue_capacity: 1024,
            submit_policy: SubmitPolicy::Block,
            scratch_pool_capacity: 8,
            scratch_buffer_size: 4096,
        }
    }
}

fn positive(field: &'static str, value: i64) -> Result<usize, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::Validation {
            field,
            reason: format!("must be greater than zero, got {}", value),
        });
    }
    usize::try_from(value).map_err(|_| ConfigError::Validation {
        field,
        reason: format!("{} does not fit in usize", value),
    })
}

impl TryFrom<ConfigFile> for EngineConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let engine = file.engine;
        let worker_count = positive("worker_count", engine.worker_count)?;

        if engine.monitor_interval_ms < 0 {
            return Err(ConfigError::Validation {
                field: "monitor_interval",
                reason: format!("must not be negative, got {}", engine.monitor_interval_ms),
            });
        }

        let cache_eviction_policy = engine
            .cache_eviction_policy
            .parse::<EvictionPolicy>()
            .map_err(|reason| ConfigError::Validation {
                field: "cache_eviction_policy",
                reason,
            })?;

        let submit_policy = engine
            .submit_policy
            .parse::<SubmitPolicy>()
            .map_err(|reason| ConfigError::Validation {
                field: "submit_policy",
                reason,
            })?;

        let scratch_pool_capacity = match file.scratch.pool_capacity {
            Some(n) => positive("scratch_pool_capacity", n)?,
            None => worker_count * 2,
        };
        let scratch_buffer_size = match file.scratch.buffer_size {
            Some(n) if n < 0 => {
                return Err(ConfigError::Validation {
                    field: "scratch_buffer_size",
                    reason: format!("must not be negative, got {}", n),
                })
            }
            Some(n) => n as usize,
            None => EngineConfig::default().scratch_buffer_size,
        };

        let config = EngineConfig {
            worker_count,
            cache_capacity: positive("cache_capacity", engine.cache_capacity)?,
            cache_eviction_policy,
            monitor_interval: Duration::from_millis(engine.monitor_interval_ms as u64),
            queue_capacity: positive("queue_capacity", engine.queue_capacity)?,
            submit_policy,
            scratch_pool_capacity,
            scratch_buffer_size,
        };
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Defaults, then the config file, then environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut file = ConfigFile::load()?;
        file.apply_env_overrides(|name| std::env::var(name).ok())?;
        Self::try_from(file)
    }

    /// Range checks shared by every construction path
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, usize); 4] = [
            ("worker_count", self.worker_count),
            ("cache_capacity", self.cache_capacity),
            ("queue_capacity", self.queue_capacity),
            ("scratch_pool_capacity", self.scratch_pool_capacity),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field,
                    reason: "must be greater than zero, got 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration errors
///
/// `Clone` so one failed initialization can be reported to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("configuration initializer panicked")]
    Poisoned,
}

impl From<Poisoned> for ConfigError {
    fn from(_: Poisoned) -> Self {
        ConfigError::Poisoned
    }
}

type ConfigSource = Box<dyn Fn() -> Result<EngineConfig, ConfigError> + Send + Sync>;

/// Builds the engine configuration on first use, exactly once
///
/// Construction cannot be retried or reset; a failure is handed to every
/// caller for the lifetime of the initializer.
pub struct ConfigInitializer {
    cell: OnceInit<EngineConfig, ConfigError>,
    source: ConfigSource,
}

impl ConfigInitializer {
    /// Read defaults, `taskforge.toml` and `TASKFORGE_*` variables on first use
    pub fn from_env() -> Self {
        Self::with_source(EngineConfig::load)
    }

    /// Use a fixed configuration, still validated on first use
    pub fn from_config(config: EngineConfig) -> Self {
        Self::with_source(move || Ok(config.clone()))
    }

    pub fn with_source<F>(source: F) -> Self
    where
        F: Fn() -> Result<EngineConfig, ConfigError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceInit::new(),
            source: Box::new(source),
        }
    }

    /// Get the configuration, constructing it if this is the first call
    pub fn get(&self) -> Result<Arc<EngineConfig>, ConfigError> {
        self.cell.get_or_try_init(|| {
            let config = (self.source)().and_then(|config| {
                config.validate()?;
                Ok(config)
            });
            match &config {
                Ok(c) => tracing::info!(
                    target: "config",
                    workers = c.worker_count,
                    cache_capacity = c.cache_capacity,
                    policy = %c.cache_eviction_policy,
                    submit_policy = %c.submit_policy,
                    "configuration initialized"
                ),
                Err(e) => tracing::error!(target: "config", error = %e, "configuration rejected"),
            }
            config
        })
    }

    pub fn phase(&self) -> InitPhase {
        self.cell.phase()
    }
}
