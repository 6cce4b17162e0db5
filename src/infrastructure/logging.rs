//! Centralized logging setup
//!
//! Console output plus daily-rolling files under a log directory:
//! - <dir>/main/   - every event, JSON encoded
//! - <dir>/error/  - WARN and ERROR only
//! - <dir>/worker/ - events from the `worker` target (task failures, panics)
//!
//! `RUST_LOG` overrides the default `info` filter.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Subdirectories created under the log directory
pub const LOG_CHANNELS: [&str; 3] = ["main", "error", "worker"];

/// Initialize console and file logging
///
/// Returns the appender guards, which must be kept alive for the duration of
/// the program or buffered lines are lost.
/// # Errors
/// Fails if the log directories cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(dir: impl AsRef<Path>) -> io::Result<Vec<WorkerGuard>> {
    let dir = dir.as_ref();
    prepare_dirs(dir)?;

    let mut guards = Vec::new();

    let (main_appender, main_guard) = create_appender(dir, "main");
    guards.push(main_guard);

    let (error_appender, error_guard) = create_appender(dir, "error");
    guards.push(error_guard);

    let (worker_appender, worker_guard) = create_appender(dir, "worker");
    guards.push(worker_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let worker_layer = tracing_subscriber::fmt::layer()
        .with_writer(worker_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == "worker"
        }));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(worker_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    tracing::info!("Logging initialized, files in {}", dir.display());

    Ok(guards)
}

/// Create one subdirectory per log channel
pub fn prepare_dirs(dir: &Path) -> io::Result<()> {
    for channel in LOG_CHANNELS {
        fs::create_dir_all(dir.join(channel))?;
    }
    Ok(())
}

/// Console-only logging for tests and quick runs
pub fn init_console() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Create a daily rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific targets
#[macro_export]
macro_rules! log_engine {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "engine", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_worker {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "worker", $level, $($arg)+)
    };
}
