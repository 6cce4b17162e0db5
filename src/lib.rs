//! Concurrent task-processing engine
//!
//! Core library: a fixed pool of worker threads fed from a bounded queue,
//! sharing a bounded LRU cache, a scratch buffer pool and a metrics collector.

pub mod core;
pub mod engine;
pub mod hot_path;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{Task, TaskError, TaskId, TaskResult};
pub use engine::{EngineState, ShutdownReport, TaskEngine};
pub use hot_path::{BoundedCache, CacheByPayload, CacheError, EvictionPolicy, TaskHandler};
pub use infrastructure::config::{ConfigError, ConfigInitializer, EngineConfig, SubmitPolicy};
pub use infrastructure::metrics::MetricsSnapshot;
pub use infrastructure::pool::ScratchBuffer;

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Task queue is full")]
    QueueFull,

    #[error("Engine is not running")]
    NotRunning,

    #[error("Invalid engine state: {0}")]
    InvalidState(&'static str),

    #[error("Shutdown timed out with {remaining_workers} workers still running")]
    ShutdownTimeout { remaining_workers: usize },

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
