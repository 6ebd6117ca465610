//! Process-wide metrics registry.
//!
//! A bounded rolling window of request records behind one `parking_lot`
//! mutex, the same "ring buffer behind a lock" shape used for each worker's
//! own duration window in [`crate::worker`]. Disabled entirely when
//! `enable_metrics` is false: `record` becomes a no-op and `snapshot`
//! reports all zeros, so callers never need to branch on whether metrics
//! are turned on.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bound on the registry's retained request records.
pub const METRICS_WINDOW: usize = 1000;

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub start_time: Instant,
    pub end_time: Instant,
    pub worker_id: String,
    pub success: bool,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub requests_per_second: f64,
}

struct Inner {
    records: VecDeque<RequestRecord>,
    total: u64,
    success: u64,
    failed: u64,
}

/// Process-wide rolling metrics, shared by every dispatch.
pub struct MetricsRegistry {
    enabled: bool,
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(METRICS_WINDOW),
                total: 0,
                success: 0,
                failed: 0,
            }),
        }
    }

    /// Append one request record. No-op when metrics are disabled.
    pub fn record(&self, record: RequestRecord) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        inner.total += 1;
        if record.success {
            inner.success += 1;
        } else {
            inner.failed += 1;
        }
        if inner.records.len() >= METRICS_WINDOW {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    /// Produce a point-in-time snapshot. Returns all zeros when metrics are
    /// disabled or no requests have been recorded yet.
    pub fn snapshot(&self) -> MetricsSnapshot {
        if !self.enabled {
            return MetricsSnapshot::default();
        }
        let inner = self.inner.lock();
        if inner.total == 0 {
            return MetricsSnapshot::default();
        }

        let durations: Vec<Duration> = inner
            .records
            .iter()
            .map(|r| r.end_time.duration_since(r.start_time))
            .collect();

        let average_response_time = if durations.is_empty() {
            0.0
        } else {
            durations.iter().map(Duration::as_secs_f64).sum::<f64>() / durations.len() as f64
        };
        let min_response_time = if durations.is_empty() {
            0.0
        } else {
            durations.iter().map(Duration::as_secs_f64).fold(f64::INFINITY, f64::min)
        };
        let max_response_time = durations
            .iter()
            .map(Duration::as_secs_f64)
            .fold(0.0_f64, f64::max);

        let requests_per_second = if inner.records.len() < 2 {
            0.0
        } else {
            let span = inner
                .records
                .back()
                .unwrap()
                .end_time
                .duration_since(inner.records.front().unwrap().start_time)
                .as_secs_f64();
            if span <= 0.0 {
                0.0
            } else {
                inner.records.len() as f64 / span
            }
        };

        MetricsSnapshot {
            total_requests: inner.total,
            successful_requests: inner.success,
            failed_requests: inner.failed,
            success_rate: inner.success as f64 / inner.total as f64,
            average_response_time,
            min_response_time,
            max_response_time,
            requests_per_second,
        }
    }
}
