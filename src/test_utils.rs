//! Shared handlers and fixtures for unit tests

use crate::core::{Task, TaskError, TaskResult};
use crate::hot_path::cache::BoundedCache;
use crate::hot_path::worker::{LiveWorkers, TaskHandler, WorkerContext};
use crate::infrastructure::config::{EngineConfig, SubmitPolicy};
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::pool::{ScratchBuffer, ScratchPool};
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Returns the payload unchanged
pub fn echo_handler() -> impl TaskHandler {
    |task: &Task, _scratch: &mut ScratchBuffer| -> Result<Bytes, TaskError> {
        Ok(task.payload().clone())
    }
}

/// Echoes, except for `failing_id` which returns an error
pub fn failing_on(failing_id: u64) -> impl TaskHandler {
    move |task: &Task, _scratch: &mut ScratchBuffer| -> Result<Bytes, TaskError> {
        if task.id().as_raw() == failing_id {
            Err(TaskError::failed(format!("{} rejected", task.id())))
        } else {
            Ok(task.payload().clone())
        }
    }
}

/// Worker context with small defaults, publishing to `results` if given
pub fn worker_context(
    handler: Arc<dyn TaskHandler>,
    results: Option<Sender<TaskResult>>,
) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
        handler,
        cache: Arc::new(BoundedCache::new(16).unwrap()),
        metrics: Arc::new(MetricsCollector::new()),
        scratch: Arc::new(ScratchPool::with_buffer_size(4, 64)),
        results,
        discard: Arc::new(AtomicBool::new(false)),
        live: Arc::new(LiveWorkers::default()),
    })
}

/// Engine config with the monitor off
pub fn test_config(workers: usize, queue_capacity: usize, policy: SubmitPolicy) -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        worker_count: workers,
        cache_capacity: 16,
        monitor_interval: Duration::ZERO,
        queue_capacity,
        submit_policy: policy,
        scratch_pool_capacity: workers * 2,
        scratch_buffer_size: 64,
        ..EngineConfig::default()
    })
}

/// Handler that parks every task until the gate opens
///
/// Each started task sends one message on `started`. Dropping the `Gate`
/// (or calling `open`) releases every current and future task.
pub struct Gate {
    release: Option<Sender<()>>,
    pub started: Receiver<u64>,
}

impl Gate {
    pub fn new() -> (Self, impl TaskHandler) {
        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<u64>();
        let handler = move |task: &Task, _scratch: &mut ScratchBuffer| -> Result<Bytes, TaskError> {
            let _ = started_tx.send(task.id().as_raw());
            // Err once the gate's sender is dropped
            let _ = release_rx.recv();
            Ok(task.payload().clone())
        };
        (
            Self {
                release: Some(release_tx),
                started: started_rx,
            },
            handler,
        )
    }

    /// Wait until a task has entered the handler, returning its id
    pub fn wait_started(&self) -> u64 {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("task did not start")
    }

    pub fn open(&mut self) {
        self.release.take();
    }
}
