//! Pool — top-level lifecycle owner.
//!
//! Wires the Worker set, HTTP client, Metrics Registry, Health Prober,
//! Dispatcher and Batch Engine together and exposes the observable surface
//! callers use (§6). A single owner carries the open/close state machine
//! since relaypool has exactly one pool per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batch::{BatchEngine, BatchOutcome, ProgressCallback};
use crate::config::PoolConfig;
use crate::dispatcher::{Dispatcher, DispatchSuccess};
use crate::error::DispatchError;
use crate::health::HealthProber;
use crate::http_client;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::worker::{RequestParams, Worker, WorkerStatus};

/// Combined metrics surface for `get_metrics()` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub request_metrics: MetricsSnapshot,
    pub worker_metrics: Vec<WorkerStatus>,
}

struct ProberHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// The worker pool + selection + health + request dispatcher engine.
pub struct Pool {
    workers: Vec<Arc<Worker>>,
    client: reqwest::Client,
    metrics: MetricsRegistry,
    config: PoolConfig,
    open: AtomicBool,
    prober: std::sync::Mutex<Option<ProberHandle>>,
}

impl Pool {
    /// Construct the pool from configuration and open it: builds the shared
    /// HTTP client, runs one synchronous health-probe round to populate
    /// flags, then starts the periodic prober (§3 Lifecycle).
    pub async fn open(config: PoolConfig) -> Result<Arc<Self>, DispatchError> {
        config.validate()?;

        let client = http_client::build_client(&config)
            .map_err(|e| DispatchError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        let workers: Vec<Arc<Worker>> = config.workers.iter().map(|spec| Arc::new(Worker::new(spec))).collect();
        let metrics = MetricsRegistry::new(config.enable_metrics);

        let pool = Arc::new(Self {
            workers,
            client,
            metrics,
            config,
            open: AtomicBool::new(true),
            prober: std::sync::Mutex::new(None),
        });

        let prober = Arc::new(HealthProber::new(
            pool.workers.clone(),
            pool.client.clone(),
            pool.config.health_check_interval,
        ));

        info!(workers = pool.workers.len(), "running initial health probe round");
        prober.probe_once().await;

        let (task, cancel) = prober.spawn();
        *pool.prober.lock().expect("prober mutex poisoned") = Some(ProberHandle { task, cancel });

        info!("pool opened");
        Ok(pool)
    }

    fn ensure_open(&self) -> Result<(), DispatchError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DispatchError::PoolClosed)
        }
    }

    /// Single-request path (§4.6).
    pub async fn process_request(
        &self,
        prompt: &str,
        params: RequestParams,
    ) -> Result<DispatchSuccess, DispatchError> {
        self.ensure_open()?;
        let dispatcher = Dispatcher::new(
            &self.workers,
            &self.client,
            &self.metrics,
            self.config.request_timeout,
            self.config.max_retries,
        );
        dispatcher.dispatch(prompt, params).await
    }

    /// Batch fan-out path (§4.7).
    pub async fn process_batch(
        &self,
        prompts: &[String],
        params: RequestParams,
        max_concurrent: Option<usize>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<BatchOutcome>, DispatchError> {
        self.ensure_open()?;
        let engine = BatchEngine::new(
            &self.workers,
            &self.client,
            &self.metrics,
            self.config.request_timeout,
            self.config.max_retries,
        );
        let concurrency = max_concurrent.unwrap_or(self.config.max_concurrent_batch);
        Ok(engine.process_batch(prompts, params, concurrency, on_progress).await)
    }

    /// Combined metrics snapshot (§6).
    pub fn get_metrics(&self) -> Result<PoolMetrics, DispatchError> {
        self.ensure_open()?;
        Ok(PoolMetrics {
            request_metrics: self.metrics.snapshot(),
            worker_metrics: self.workers.iter().map(|w| w.status()).collect(),
        })
    }

    /// Per-worker status summary, usable for a CLI status view (§6).
    pub fn get_worker_status(&self) -> Result<Vec<WorkerStatus>, DispatchError> {
        self.ensure_open()?;
        Ok(self.workers.iter().map(|w| w.status()).collect())
    }

    /// Cancel the prober, give in-flight dispatches a short grace period,
    /// then drop the HTTP client. Afterward the pool is terminal — every
    /// other operation returns `PoolClosed`.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return; // already closed
        }

        if let Some(handle) = self.prober.lock().expect("prober mutex poisoned").take() {
            handle.cancel.cancel();
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle.task).await;
        }

        // Give in-flight dispatches a short grace period before we drop our
        // handle to the shared client.
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;

        info!("pool closed");
    }
}
