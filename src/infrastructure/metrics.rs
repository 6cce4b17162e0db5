//! Metrics collection for engine monitoring
//!
//! All counters sit in one struct behind one `parking_lot::Mutex`, so every
//! increment is exact and a snapshot is a single consistent instant.
//! Collected by workers, exported to whoever polls `snapshot()`.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    tasks_submitted: u64,
    tasks_rejected: u64,
    tasks_discarded: u64,
    tasks_started: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    cache_hits: u64,
    cache_misses: u64,
    active_workers: u64,
}

/// Engine metrics collector
///
/// Thread-safe counters updated from worker threads.
/// Snapshots taken for external reporting.
pub struct MetricsCollector {
    counters: Mutex<Counters>,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub active_workers: u64,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_discarded: u64,
    pub uptime_ms: u64,
}

impl MetricsSnapshot {
    /// Tasks started but not yet finished
    #[inline]
    pub fn in_flight(&self) -> u64 {
        self.tasks_started
            .saturating_sub(self.tasks_completed + self.tasks_failed)
    }

    /// Hits over all cache lookups, 0.0 before the first lookup
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Finished tasks per second since the collector was created
    pub fn throughput(&self) -> f64 {
        if self.uptime_ms == 0 {
            return 0.0;
        }
        (self.tasks_completed + self.tasks_failed) as f64 * 1000.0 / self.uptime_ms as f64
    }
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    /// Submit attempt on a running engine, whether or not it was queued
    #[inline]
    pub fn record_task_submitted(&self) {
        self.counters.lock().tasks_submitted += 1;
    }

    /// Task refused because the queue was full
    #[inline]
    pub fn record_task_rejected(&self) {
        self.counters.lock().tasks_rejected += 1;
    }

    /// Queued task dropped by a non-draining shutdown
    #[inline]
    pub fn record_task_discarded(&self) {
        self.counters.lock().tasks_discarded += 1;
    }

    /// Worker picked up a task
    #[inline]
    pub fn record_task_started(&self) {
        let mut c = self.counters.lock();
        c.tasks_started += 1;
        c.active_workers += 1;
    }

    /// Worker finished a task
    #[inline]
    pub fn record_task_completed(&self, success: bool) {
        let mut c = self.counters.lock();
        if success {
            c.tasks_completed += 1;
        } else {
            c.tasks_failed += 1;
        }
        c.active_workers = c.active_workers.saturating_sub(1);
    }

    #[inline]
    pub fn record_cache_access(&self, hit: bool) {
        let mut c = self.counters.lock();
        if hit {
            c.cache_hits += 1;
        } else {
            c.cache_misses += 1;
        }
    }

    /// Copy every counter under one critical section
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = *self.counters.lock();
        MetricsSnapshot {
            tasks_started: c.tasks_started,
            tasks_completed: c.tasks_completed,
            tasks_failed: c.tasks_failed,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            active_workers: c.active_workers,
            tasks_submitted: c.tasks_submitted,
            tasks_rejected: c.tasks_rejected,
            tasks_discarded: c.tasks_discarded,
            uptime_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        let snapshot = collector.snapshot();

        assert_eq!(snapshot.tasks_started, 0);
        assert_eq!(snapshot.tasks_completed, 0);
        assert_eq!(snapshot.tasks_failed, 0);
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.cache_hit_ratio(), 0.0);
    }

    #[test]
    fn test_task_lifecycle_counters() {
        let collector = MetricsCollector::new();

        collector.record_task_started();
        collector.record_task_started();
        assert_eq!(collector.snapshot().active_workers, 2);
        assert_eq!(collector.snapshot().in_flight(), 2);

        collector.record_task_completed(true);
        collector.record_task_completed(false);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.tasks_started, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_cache_access() {
        let collector = MetricsCollector::new();
        collector.record_cache_access(true);
        collector.record_cache_access(true);
        collector.record_cache_access(true);
        collector.record_cache_access(false);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 1);
        assert!((snapshot.cache_hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_lost_updates() {
        let collector = Arc::new(MetricsCollector::new());
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        collector.record_task_completed(true);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.snapshot().tasks_completed, 1000 * threads);
    }

    #[test]
    fn test_snapshot_is_consistent_under_contention() {
        let collector = Arc::new(MetricsCollector::new());

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for n in 0..2000 {
                        collector.record_task_started();
                        collector.record_task_completed((n + i) % 3 != 0);
                    }
                })
            })
            .collect();

        let reader = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let s = collector.snapshot();
                    assert!(s.tasks_completed + s.tasks_failed <= s.tasks_started);
                    assert_eq!(s.active_workers, s.in_flight());
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let s = collector.snapshot();
        assert_eq!(s.tasks_started, 8000);
        assert_eq!(s.tasks_completed + s.tasks_failed, 8000);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let collector = MetricsCollector::new();
        collector.record_task_submitted();
        let json = serde_json::to_string(&collector.snapshot()).unwrap();
        assert!(json.contains("\"tasksSubmitted\":1"));
        assert!(json.contains("\"activeWorkers\":0"));
    }
}
