//! Periodic metrics reporter
//!
//! Background thread that logs a `MetricsSnapshot` every interval under the
//! `monitor` target. Stopping closes its channel, which wakes it immediately.

use crate::infrastructure::metrics::MetricsCollector;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Monitor {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Start reporting; a zero interval disables the monitor
    pub fn spawn(metrics: Arc<MetricsCollector>, interval: Duration) -> std::io::Result<Option<Self>> {
        if interval.is_zero() {
            return Ok(None);
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("taskforge-monitor".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let s = metrics.snapshot();
                        tracing::info!(
                            target: "monitor",
                            started = s.tasks_started,
                            completed = s.tasks_completed,
                            failed = s.tasks_failed,
                            active = s.active_workers,
                            cache_hits = s.cache_hits,
                            cache_misses = s.cache_misses,
                            hit_ratio = s.cache_hit_ratio(),
                            "engine metrics"
                        );
                    }
                    _ => break,
                }
            })?;

        Ok(Some(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }))
    }

    /// Wake the reporter and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_interval_disables() {
        let metrics = Arc::new(MetricsCollector::new());
        assert!(Monitor::spawn(metrics, Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_stop_wakes_immediately() {
        let metrics = Arc::new(MetricsCollector::new());
        let monitor = Monitor::spawn(metrics, Duration::from_secs(60))
            .unwrap()
            .unwrap();

        let start = Instant::now();
        monitor.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_reports_while_running() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_task_started();
        let monitor = Monitor::spawn(Arc::clone(&metrics), Duration::from_millis(5))
            .unwrap()
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        monitor.stop();
        assert_eq!(metrics.snapshot().tasks_started, 1);
    }
}
