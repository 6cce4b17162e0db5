//! Infrastructure - cold path and shared services
//!
//! This module contains non-latency-critical code:
//! - Configuration loading and one-time initialization
//! - Logging and metrics
//! - Periodic metrics reporting
//! - Scratch buffer recycling

pub mod config;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod pool;

pub use config::{ConfigError, ConfigInitializer, EngineConfig, SubmitPolicy};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use pool::{ObjectPool, ScratchBuffer, ScratchPool};
