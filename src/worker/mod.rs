//! Worker — one upstream inference endpoint.
//!
//! Holds the dialect, addressing, live in-flight counter, rolling
//! performance window and health flag for a single upstream. All mutation
//! happens through the operations below; nothing outside this module writes
//! to a `Worker`'s fields directly.

pub mod dialect;

pub use dialect::{Dialect, RequestParams, ResolvedParams};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::WorkerSpec;

/// Bound on the rolling window of recent request durations (§3).
pub const ROLLING_WINDOW: usize = 100;

/// Mutable stats that are always read and written together: the rolling
/// duration window and the last-error timestamp/kind.
#[derive(Debug, Default)]
struct WorkerStats {
    durations: VecDeque<Duration>,
    last_error_at: Option<u64>,
    last_error_kind: Option<String>,
}

/// One upstream inference server.
pub struct Worker {
    id: String,
    host: String,
    port: u16,
    dialect: Dialect,
    model: String,
    ceiling: usize,

    healthy: AtomicBool,
    in_flight: AtomicUsize,
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,

    stats: Mutex<WorkerStats>,
}

/// Point-in-time, read-only view of a worker, for `get_worker_status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub dialect: Dialect,
    pub model: String,
    pub healthy: bool,
    pub in_flight: usize,
    pub ceiling: usize,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
}

impl Worker {
    pub fn new(spec: &WorkerSpec) -> Self {
        Self {
            id: spec.id.clone(),
            host: spec.host.clone(),
            port: spec.port,
            dialect: spec.dialect,
            model: spec.model.clone(),
            ceiling: spec.max_concurrent_requests,
            healthy: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Absolute URL for a completion request, per the dialect's wire contract.
    pub fn url_for_request(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.dialect.request_path())
    }

    /// Absolute URL for the dialect's health/listing endpoint.
    pub fn url_for_health(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.dialect.health_path())
    }

    pub fn build_request_body(&self, prompt: &str, params: &ResolvedParams) -> serde_json::Value {
        self.dialect.build_request_body(&self.model, prompt, params)
    }

    pub fn normalize_response(&self, body: &serde_json::Value) -> Result<(String, String), crate::error::DispatchError> {
        self.dialect.normalize_response(&self.id, body)
    }

    /// Atomically increments in-flight iff below ceiling. `Ordering::SeqCst`
    /// on both the check and the increment keeps the acquire linearizable
    /// against concurrent acquires and the Selector's availability reads.
    pub fn try_acquire_slot(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur < self.ceiling {
                    Some(cur + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Release a previously-acquired slot. Must be paired 1:1 with a
    /// successful `try_acquire_slot`.
    pub fn release_slot(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "release_slot called without a matching acquire");
    }

    /// Record the outcome of one completed dispatch attempt. `error_kind` is
    /// only meaningful when `success` is false and is dropped otherwise.
    pub fn record_request(&self, duration: Duration, success: bool, error_kind: Option<&str>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut stats = self.stats.lock();
        if stats.durations.len() >= ROLLING_WINDOW {
            stats.durations.pop_front();
        }
        stats.durations.push_back(duration);
        if !success {
            stats.last_error_at = Some(now_unix());
            stats.last_error_kind = error_kind.map(str::to_string);
        }
    }

    /// Composite score used by the Selector (§4.4). Only meaningful for a
    /// worker that has already passed the eligibility filter.
    pub fn score(&self) -> f64 {
        let in_flight = self.in_flight() as f64;
        let ceiling = self.ceiling.max(1) as f64;
        let availability = (1.0 - in_flight / ceiling).clamp(0.0, 1.0);

        let total = self.total.load(Ordering::Relaxed);
        let success = if total == 0 {
            1.0
        } else {
            self.successes.load(Ordering::Relaxed) as f64 / total as f64
        };

        let speed = {
            let stats = self.stats.lock();
            if stats.durations.is_empty() {
                0.5
            } else {
                let mean_secs = stats.durations.iter().map(Duration::as_secs_f64).sum::<f64>()
                    / stats.durations.len() as f64;
                1.0 / (1.0 + mean_secs)
            }
        };

        let weight = 0.4 * availability + 0.4 * success + 0.2 * speed;
        weight.max(0.01)
    }

    pub fn status(&self) -> WorkerStatus {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            successes as f64 / total as f64
        } else {
            0.0
        };
        let avg_response_time = {
            let stats = self.stats.lock();
            if stats.durations.is_empty() {
                0.0
            } else {
                stats.durations.iter().map(Duration::as_secs_f64).sum::<f64>()
                    / stats.durations.len() as f64
            }
        };

        WorkerStatus {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            dialect: self.dialect,
            model: self.model.clone(),
            healthy: self.is_healthy(),
            in_flight: self.in_flight(),
            ceiling: self.ceiling,
            total,
            successes,
            failures,
            success_rate,
            avg_response_time,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ceiling: usize) -> WorkerSpec {
        WorkerSpec {
            id: "w0".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            dialect: Dialect::OpenAiStyle,
            model: "m".to_string(),
            max_concurrent_requests: ceiling,
        }
    }

    #[test]
    fn slot_respects_ceiling() {
        let w = Worker::new(&spec(2));
        assert!(w.try_acquire_slot());
        assert!(w.try_acquire_slot());
        assert!(!w.try_acquire_slot());
        assert_eq!(w.in_flight(), 2);
        w.release_slot();
        assert_eq!(w.in_flight(), 1);
        assert!(w.try_acquire_slot());
    }

    #[test]
    fn fresh_worker_has_full_score_components() {
        let w = Worker::new(&spec(4));
        // availability=1, success=1 (never completed), speed=0.5 (no samples)
        let expected = 0.4 + 0.4 + 0.2 * 0.5;
        assert!((w.score() - expected).abs() < 1e-9);
    }

    #[test]
    fn record_request_updates_counters_and_window() {
        let w = Worker::new(&spec(4));
        w.record_request(Duration::from_millis(100), true, None);
        w.record_request(Duration::from_millis(200), false, Some("timeout_error"));
        let status = w.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.successes, 1);
        assert_eq!(status.failures, 1);
        assert!(status.avg_response_time > 0.0);
        assert_eq!(w.stats.lock().last_error_kind.as_deref(), Some("timeout_error"));
    }

    #[test]
    fn rolling_window_evicts_oldest() {
        let w = Worker::new(&spec(4));
        for i in 0..(ROLLING_WINDOW + 10) {
            w.record_request(Duration::from_millis(i as u64), true, None);
        }
        assert_eq!(w.stats.lock().durations.len(), ROLLING_WINDOW);
    }

    #[test]
    fn health_flag_round_trips() {
        let w = Worker::new(&spec(4));
        assert!(w.is_healthy());
        w.set_healthy(false);
        assert!(!w.is_healthy());
    }
}
