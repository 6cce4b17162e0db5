//! Worker threads (Hot Path)
//!
//! Each worker pulls tasks from the shared queue until it is closed and
//! drained. A task runs under `catch_unwind`, so a panic or an error becomes a
//! failed `TaskResult` and the loop moves on to the next task.
//!
//! Lock discipline: the cache call returns before metrics are touched, so a
//! worker never holds the cache lock and the metrics lock together.

use crate::core::{Task, TaskError, TaskResult};
use crate::hot_path::cache::BoundedCache;
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::pool::{ScratchBuffer, ScratchPool};
use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// User-supplied task logic
///
/// `cache_key` opts a task into read-through caching: a hit skips `execute`
/// entirely. Closures of the right shape are handlers with no caching.
pub trait TaskHandler: Send + Sync + 'static {
    fn cache_key(&self, _task: &Task) -> Option<String> {
        None
    }

    fn execute(&self, task: &Task, scratch: &mut ScratchBuffer) -> Result<Bytes, TaskError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task, &mut ScratchBuffer) -> Result<Bytes, TaskError> + Send + Sync + 'static,
{
    fn execute(&self, task: &Task, scratch: &mut ScratchBuffer) -> Result<Bytes, TaskError> {
        self(task, scratch)
    }
}

/// Wraps a handler so tasks with equal payloads share one cache entry
pub struct CacheByPayload<H>(pub H);

impl<H: TaskHandler> TaskHandler for CacheByPayload<H> {
    fn cache_key(&self, task: &Task) -> Option<String> {
        Some(String::from_utf8_lossy(task.payload()).into_owned())
    }

    fn execute(&self, task: &Task, scratch: &mut ScratchBuffer) -> Result<Bytes, TaskError> {
        self.0.execute(task, scratch)
    }
}

/// Per-worker lifecycle
///
/// `Succeeded` and `Failed` describe the last task and are held while the
/// worker waits for the next one; `Idle` means no task has run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Stopped = 4,
}

impl WorkerState {
    /// Waiting on the queue, with or without a previous outcome
    #[inline]
    pub fn is_idle(self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Succeeded | WorkerState::Failed)
    }

    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Succeeded,
            3 => WorkerState::Failed,
            _ => WorkerState::Stopped,
        }
    }
}

/// Lock-free state slot, padded so neighbouring workers don't share a line
#[derive(Debug, Default)]
pub struct WorkerSlot(CachePadded<AtomicU8>);

impl WorkerSlot {
    #[inline]
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Counts workers that have not yet exited
///
/// Shutdown waits on this instead of joining, so it can give up after a
/// caller-supplied timeout.
#[derive(Debug, Default)]
pub struct LiveWorkers {
    count: Mutex<usize>,
    all_stopped: Condvar,
}

impl LiveWorkers {
    pub fn register(&self) {
        *self.count.lock() += 1;
    }

    pub fn deregister(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.all_stopped.notify_all();
        }
    }

    pub fn live(&self) -> usize {
        *self.count.lock()
    }

    /// Block until every worker has exited or `timeout` elapses
    ///
    /// Returns the number of workers still running.
    pub fn wait_all(&self, timeout: Option<Duration>) -> usize {
        let mut count = self.count.lock();
        match timeout {
            None => {
                while *count > 0 {
                    self.all_stopped.wait(&mut count);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while *count > 0 {
                    if self.all_stopped.wait_until(&mut count, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *count
    }
}

/// Everything a worker shares with the coordinator and its peers
pub struct WorkerContext {
    pub handler: Arc<dyn TaskHandler>,
    pub cache: Arc<BoundedCache<Bytes>>,
    pub metrics: Arc<MetricsCollector>,
    pub scratch: Arc<ScratchPool>,
    /// Subscriber for outcomes; `None` means results are dropped after metrics
    pub results: Option<Sender<TaskResult>>,
    /// Set by a non-draining shutdown: queued tasks are reported, not run
    pub discard: Arc<AtomicBool>,
    pub live: Arc<LiveWorkers>,
}

impl WorkerContext {
    /// Hand a result to the subscriber, if there is one
    pub fn publish(&self, result: TaskResult) {
        if let Some(results) = &self.results {
            // Err only when the subscriber dropped its receiver
            let _ = results.send(result);
        }
    }
}

/// One worker thread's loop
pub struct Worker {
    id: usize,
    queue: Receiver<Task>,
    slot: Arc<WorkerSlot>,
    ctx: Arc<WorkerContext>,
}

/// Deregisters the worker however the loop ends
struct ExitGuard<'a> {
    slot: &'a WorkerSlot,
    live: &'a LiveWorkers,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(WorkerState::Stopped);
        self.live.deregister();
    }
}

impl Worker {
    pub fn new(id: usize, queue: Receiver<Task>, slot: Arc<WorkerSlot>, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id,
            queue,
            slot,
            ctx,
        }
    }

    /// Start the loop on a named OS thread
    ///
    /// The caller must have registered this worker with `LiveWorkers`.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("taskforge-worker-{}", self.id))
            .spawn(move || self.run())
    }

    fn run(self) {
        let _exit = ExitGuard {
            slot: &self.slot,
            live: &self.ctx.live,
        };
        self.slot.set(WorkerState::Idle);
        crate::log_worker!(tracing::Level::DEBUG, worker = self.id, "worker started");

        // recv fails only once every sender is gone and the queue is empty
        while let Ok(task) = self.queue.recv() {
            if self.ctx.discard.load(Ordering::Acquire) {
                self.ctx.metrics.record_task_discarded();
                tracing::debug!(target: "worker", worker = self.id, task = %task.id(), "discarded");
                self.ctx.publish(TaskResult::discarded(task.id()));
                continue;
            }

            let result = self.process(&task);
            self.ctx.publish(result);
        }

        crate::log_worker!(tracing::Level::DEBUG, worker = self.id, "worker stopped");
    }

    fn process(&self, task: &Task) -> TaskResult {
        self.slot.set(WorkerState::Running);
        self.ctx.metrics.record_task_started();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(task)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload))));

        let result = match outcome {
            Ok((output, cached)) => TaskResult::success(task.id(), output, cached),
            Err(err) => {
                match &err {
                    TaskError::Panicked(msg) => tracing::error!(
                        target: "worker", worker = self.id, task = %task.id(), panic = %msg, "task panicked"
                    ),
                    other => tracing::warn!(
                        target: "worker", worker = self.id, task = %task.id(), error = %other, "task failed"
                    ),
                }
                TaskResult::failure(task.id(), err)
            }
        };

        let success = result.is_success();
        self.ctx.metrics.record_task_completed(success);
        self.slot.set(if success {
            WorkerState::Succeeded
        } else {
            WorkerState::Failed
        });
        result
    }

    /// Read-through: cache hit, else run the handler and remember its output
    fn execute(&self, task: &Task) -> Result<(Bytes, bool), TaskError> {
        let key = self.ctx.handler.cache_key(task);

        if let Some(key) = &key {
            let hit = self.ctx.cache.get(key);
            self.ctx.metrics.record_cache_access(hit.is_some());
            if let Some(output) = hit {
                return Ok((output, true));
            }
        }

        let mut scratch = self.ctx.scratch.acquire_cleared();
        let outcome = self.ctx.handler.execute(task, &mut scratch);
        self.ctx.scratch.release(scratch);
        let output = outcome?;

        if let Some(key) = key {
            self.ctx.cache.set(key, output.clone());
        }
        Ok((output, false))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
