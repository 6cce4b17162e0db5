//! Task Engine
//!
//! Coordinates the worker pool: owns the bounded task queue, the shared cache,
//! the scratch pool and the metrics, and drives the lifecycle
//! `Created -> Running -> Draining -> Stopped`.
//!
//! Every accepted task is accounted for: it either produces a `TaskResult`
//! (success or failure) or, on a non-draining shutdown, a discard notice.
//! Results go to the caller's channel when one was given at construction and
//! are dropped otherwise; the engine itself never buffers them.

use crate::core::{Task, TaskResult};
use crate::hot_path::cache::BoundedCache;
use crate::hot_path::worker::{LiveWorkers, TaskHandler, Worker, WorkerContext, WorkerSlot, WorkerState};
use crate::infrastructure::config::{ConfigError, ConfigInitializer, EngineConfig, SubmitPolicy};
use crate::infrastructure::metrics::{MetricsCollector, MetricsSnapshot};
use crate::infrastructure::monitor::Monitor;
use crate::infrastructure::pool::ScratchPool;
use crate::{EngineError, Result};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// What a completed shutdown observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShutdownReport {
    /// Queued tasks reported as discarded instead of run
    pub discarded: u64,
    pub final_snapshot: MetricsSnapshot,
}

/// Concurrent task-processing engine
pub struct TaskEngine {
    config: Arc<EngineConfig>,
    state: Mutex<EngineState>,
    /// Submit side of the queue; taken on shutdown so workers see it close
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    ctx: Arc<WorkerContext>,
    slots: Vec<Arc<WorkerSlot>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    monitor: Mutex<Option<Monitor>>,
}

impl TaskEngine {
    /// Build an engine sized by `config`; no threads start until `start`
    ///
    /// Outcomes are counted in the metrics only. Use `with_results` to
    /// receive each `TaskResult`.
    pub fn new<H: TaskHandler>(config: Arc<EngineConfig>, handler: H) -> Result<Self> {
        Self::with_shared_handler(config, Arc::new(handler), None)
    }

    /// Like `new`, publishing every outcome on `results`
    ///
    /// The caller owns the receiving end; an unbounded channel that is never
    /// read grows with every task.
    pub fn with_results<H: TaskHandler>(
        config: Arc<EngineConfig>,
        handler: H,
        results: Sender<TaskResult>,
    ) -> Result<Self> {
        Self::with_shared_handler(config, Arc::new(handler), Some(results))
    }

    pub fn with_shared_handler(
        config: Arc<EngineConfig>,
        handler: Arc<dyn TaskHandler>,
        results: Option<Sender<TaskResult>>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = BoundedCache::with_policy(config.cache_capacity, config.cache_eviction_policy)?;
        let scratch = ScratchPool::with_buffer_size(config.scratch_pool_capacity, config.scratch_buffer_size);
        let (sender, receiver) = channel::bounded(config.queue_capacity);

        let ctx = Arc::new(WorkerContext {
            handler,
            cache: Arc::new(cache),
            metrics: Arc::new(MetricsCollector::new()),
            scratch: Arc::new(scratch),
            results,
            discard: Arc::new(AtomicBool::new(false)),
            live: Arc::new(LiveWorkers::default()),
        });

        let slots = (0..config.worker_count)
            .map(|_| Arc::new(WorkerSlot::default()))
            .collect();

        Ok(Self {
            config,
            state: Mutex::new(EngineState::Created),
            sender: RwLock::new(Some(sender)),
            receiver,
            ctx,
            slots,
            handles: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
        })
    }

    /// Consult the initializer once and build an engine from its result
    pub fn from_initializer<H: TaskHandler>(init: &ConfigInitializer, handler: H) -> Result<Self> {
        let config = init.get()?;
        Self::new(config, handler)
    }

    /// `new` followed by `start`
    pub fn start_with<H: TaskHandler>(config: Arc<EngineConfig>, handler: H) -> Result<Self> {
        let engine = Self::new(config, handler)?;
        engine.start()?;
        Ok(engine)
    }

    /// Spawn exactly `worker_count` workers and begin accepting tasks
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Created {
            return Err(EngineError::InvalidState("engine can only be started once"));
        }

        let worker_count = self.config.worker_count;
        if worker_count == 0 {
            return Err(EngineError::Config(ConfigError::Validation {
                field: "worker_count",
                reason: "must be greater than zero, got 0".to_string(),
            }));
        }

        *self.monitor.lock() = Monitor::spawn(Arc::clone(&self.ctx.metrics), self.config.monitor_interval)?;

        let mut handles = self.handles.lock();
        for (id, slot) in self.slots.iter().enumerate() {
            self.ctx.live.register();
            let worker = Worker::new(id, self.receiver.clone(), Arc::clone(slot), Arc::clone(&self.ctx));
            match worker.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.ctx.live.deregister();
                    tracing::error!(target: "engine", worker = id, error = %e, "failed to spawn worker");
                    // Close the queue so the workers already running exit
                    self.sender.write().take();
                    *state = EngineState::Stopped;
                    drop(handles);
                    self.ctx.live.wait_all(None);
                    self.join_workers();
                    if let Some(monitor) = self.monitor.lock().take() {
                        monitor.stop();
                    }
                    return Err(EngineError::Spawn(e));
                }
            }
        }
        drop(handles);

        *state = EngineState::Running;
        tracing::info!(
            target: "engine",
            workers = worker_count,
            queue_capacity = self.config.queue_capacity,
            cache_capacity = self.config.cache_capacity,
            "engine started"
        );
        Ok(())
    }

    /// Enqueue a task, applying the configured policy when the queue is full
    pub fn submit(&self, task: Task) -> Result<()> {
        self.submit_with(task, self.config.submit_policy)
    }

    /// Enqueue a task with an explicit full-queue policy
    pub fn submit_with(&self, task: Task, policy: SubmitPolicy) -> Result<()> {
        if *self.state.lock() != EngineState::Running {
            return Err(EngineError::NotRunning);
        }
        // Clone so a blocked send does not hold the lock shutdown needs
        let sender = match self.sender.read().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(EngineError::NotRunning),
        };

        self.ctx.metrics.record_task_submitted();
        let sent = match policy {
            SubmitPolicy::Block => sender.send(task).map_err(|_| EngineError::NotRunning),
            SubmitPolicy::Reject => sender.try_send(task).map_err(|e| match e {
                TrySendError::Full(_) => EngineError::QueueFull,
                TrySendError::Disconnected(_) => EngineError::NotRunning,
            }),
            SubmitPolicy::BlockFor(wait) => sender.send_timeout(task, wait).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EngineError::QueueFull,
                SendTimeoutError::Disconnected(_) => EngineError::NotRunning,
            }),
        };

        if sent.is_err() {
            self.ctx.metrics.record_task_rejected();
        }
        sent
    }

    /// Stop the pool, waiting as long as it takes
    ///
    /// With `drain` every queued task still runs; without it queued tasks are
    /// reported as discarded and only in-flight tasks finish. Calling again
    /// after the engine stopped is a no-op.
    pub fn shutdown(&self, drain: bool) -> Result<ShutdownReport> {
        self.shutdown_inner(drain, None)
    }

    /// Like `shutdown`, but gives up after `timeout`
    ///
    /// On timeout the engine stays `Draining`; a later call resumes waiting.
    pub fn shutdown_timeout(&self, drain: bool, timeout: Duration) -> Result<ShutdownReport> {
        self.shutdown_inner(drain, Some(timeout))
    }

    fn shutdown_inner(&self, drain: bool, timeout: Option<Duration>) -> Result<ShutdownReport> {
        let discarded_before = {
            let mut state = self.state.lock();
            match *state {
                EngineState::Stopped => {
                    return Ok(ShutdownReport {
                        discarded: 0,
                        final_snapshot: self.ctx.metrics.snapshot(),
                    })
                }
                EngineState::Created => {
                    self.sender.write().take();
                    *state = EngineState::Stopped;
                    return Ok(ShutdownReport {
                        discarded: 0,
                        final_snapshot: self.ctx.metrics.snapshot(),
                    });
                }
                EngineState::Running | EngineState::Draining => {
                    // Baseline before workers can start discarding
                    let before = self.ctx.metrics.snapshot().tasks_discarded;
                    if !drain {
                        self.ctx.discard.store(true, Ordering::Release);
                    }
                    *state = EngineState::Draining;
                    before
                }
            }
        };

        tracing::info!(target: "engine", drain, "engine draining");
        self.sender.write().take();
        if !drain {
            self.discard_queued();
        }

        let remaining = self.ctx.live.wait_all(timeout);
        if remaining > 0 {
            tracing::warn!(target: "engine", remaining, "shutdown timed out");
            return Err(EngineError::ShutdownTimeout {
                remaining_workers: remaining,
            });
        }

        self.join_workers();
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        // Tasks from submitters racing the shutdown land here once workers are gone
        self.discard_queued();

        let final_snapshot = self.ctx.metrics.snapshot();
        *self.state.lock() = EngineState::Stopped;
        tracing::info!(
            target: "engine",
            completed = final_snapshot.tasks_completed,
            failed = final_snapshot.tasks_failed,
            discarded = final_snapshot.tasks_discarded,
            "engine stopped"
        );

        Ok(ShutdownReport {
            discarded: final_snapshot.tasks_discarded - discarded_before,
            final_snapshot,
        })
    }

    /// Pull everything still queued and report it as discarded
    fn discard_queued(&self) {
        for task in self.receiver.try_iter() {
            self.ctx.metrics.record_task_discarded();
            self.ctx.publish(TaskResult::discarded(task.id()));
        }
    }

    fn join_workers(&self) {
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!(target: "engine", "worker thread panicked outside a task");
            }
        }
    }

    /// Consistent point-in-time copy of the engine counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|slot| slot.get()).collect()
    }

    /// Tasks waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn cache(&self) -> &Arc<BoundedCache<Bytes>> {
        &self.ctx.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.ctx.metrics
    }

    pub fn scratch_pool(&self) -> &Arc<ScratchPool> {
        &self.ctx.scratch
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        if matches!(self.state(), EngineState::Running | EngineState::Draining) {
            if let Err(e) = self.shutdown(false) {
                tracing::error!(target: "engine", error = %e, "shutdown on drop failed");
            }
        }
    }
}
