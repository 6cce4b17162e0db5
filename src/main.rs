//! Taskforge demo runner
//!
//! # Architecture
//! - **core**: Task types and one-time initialization
//! - **hot_path**: Bounded LRU cache and worker loop
//! - **infrastructure**: Cold path (config, logging, metrics, monitor, scratch pool)
//! - **engine**: Queue, worker pool and shutdown coordination
//!
//! Loads configuration, starts the engine and feeds it a synthetic workload of
//! repeating payloads so the cache sees both hits and misses. Stops when the
//! workload is done or on Ctrl-C.

use anyhow::Context;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use taskforge::infrastructure::logging::init_logging;
use taskforge::{
    CacheByPayload, ConfigInitializer, EngineState, ScratchBuffer, Task, TaskEngine, TaskError,
};

/// Tasks submitted by the synthetic workload
const WORKLOAD_TASKS: u64 = 10_000;

/// Distinct payloads; everything past the first round is a cache candidate
const DISTINCT_PAYLOADS: u64 = 512;

/// Reverse the payload into scratch and append an FNV-1a digest
fn digest_handler(task: &Task, scratch: &mut ScratchBuffer) -> Result<Bytes, TaskError> {
    let payload = task.payload();
    if payload.is_empty() {
        return Err(TaskError::failed("empty payload"));
    }

    let buf = scratch.as_mut_vec();
    buf.extend(payload.iter().rev());

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in buf.iter() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    buf.extend_from_slice(format!(":{:016x}", hash).as_bytes());

    Ok(Bytes::copy_from_slice(scratch.as_slice()))
}

fn submit_workload(engine: &TaskEngine) -> taskforge::Result<u64> {
    let mut submitted = 0;
    for id in 0..WORKLOAD_TASKS {
        if engine.state() != EngineState::Running {
            break;
        }
        let payload = format!("job-{:04}", id % DISTINCT_PAYLOADS);
        match engine.submit(Task::new(id, payload)) {
            Ok(()) => submitted += 1,
            Err(taskforge::EngineError::QueueFull) => {
                tracing::warn!(target: "engine", task = id, "queue full, task dropped");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(submitted)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Guards flush the file appenders on exit
    let _guards = init_logging("logs").context("failed to initialize logging")?;

    let initializer = ConfigInitializer::from_env();
    let config = initializer.get().context("failed to load configuration")?;
    tracing::info!(
        workers = config.worker_count,
        cache_capacity = config.cache_capacity,
        policy = %config.submit_policy,
        "configuration loaded"
    );

    let (results_tx, results_rx) = crossbeam::channel::unbounded();
    let engine = TaskEngine::with_results(config, CacheByPayload(digest_handler), results_tx)?;
    engine.start()?;
    let engine = Arc::new(engine);

    // Ends once the engine, and with it the last results sender, is dropped
    let consumer = tokio::task::spawn_blocking(move || {
        results_rx
            .iter()
            .filter(|r| !r.is_success() && !r.is_discarded())
            .count()
    });

    let producer = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || submit_workload(&engine))
    };
    tokio::pin!(producer);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut drain = true;
    let mut producer_done = false;
    loop {
        tokio::select! {
            joined = &mut producer => {
                let submitted = joined.context("workload producer panicked")??;
                taskforge::log_engine!(tracing::Level::INFO, submitted, "workload submitted");
                producer_done = true;
                break;
            }
            _ = ticker.tick() => {
                let snapshot = engine.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(json) => taskforge::log_engine!(tracing::Level::INFO, snapshot = %json, "progress"),
                    Err(e) => tracing::warn!("failed to encode snapshot: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, discarding queued tasks");
                drain = false;
                break;
            }
        }
    }

    let stopper = Arc::clone(&engine);
    let report = tokio::task::spawn_blocking(move || stopper.shutdown(drain))
        .await
        .context("shutdown task panicked")??;

    let summary = serde_json::to_string(&report.final_snapshot)?;
    taskforge::log_engine!(
        tracing::Level::INFO,
        discarded = report.discarded,
        hit_ratio = report.final_snapshot.cache_hit_ratio(),
        snapshot = %summary,
        "engine finished"
    );

    if !producer_done {
        // Submits fail with NotRunning once shutdown has begun
        if let Err(e) = producer.await.context("workload producer panicked")? {
            tracing::debug!(error = %e, "workload interrupted");
        }
    }
    drop(engine);

    let failures = consumer.await.context("result consumer panicked")?;
    if failures > 0 {
        tracing::warn!(failures, "some tasks failed");
    }

    Ok(())
}
