//! Batch engine — order-preserving fan-out over a sequence of prompts.
//!
//! Bounded by a single `tokio::sync::Semaphore`. Each prompt holds its
//! permit for its entire dispatch lifecycle, including retries, and writes
//! its outcome into a pre-sized slot by index so result order never depends
//! on completion order.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::dispatcher::{Dispatcher, DispatchSuccess};
use crate::metrics::MetricsRegistry;
use crate::worker::{RequestParams, Worker};

/// The outcome for one prompt in a batch (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Success(DispatchSuccess),
    Error {
        prompt_index: usize,
        error_kind: String,
        message: String,
    },
}

/// Callback invoked after every completion (success or error):
/// `(completed, total, elapsed_seconds)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, f64) + Send + Sync>;

pub struct BatchEngine<'a> {
    workers: &'a [Arc<Worker>],
    client: &'a reqwest::Client,
    metrics: &'a MetricsRegistry,
    request_timeout: std::time::Duration,
    max_retries: u32,
}

impl<'a> BatchEngine<'a> {
    pub fn new(
        workers: &'a [Arc<Worker>],
        client: &'a reqwest::Client,
        metrics: &'a MetricsRegistry,
        request_timeout: std::time::Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            workers,
            client,
            metrics,
            request_timeout,
            max_retries,
        }
    }

    /// Fan prompts out across the pool with at most `max_concurrent`
    /// in-flight dispatches, preserving input order in the result (§4.7).
    pub async fn process_batch(
        &self,
        prompts: &[String],
        params: RequestParams,
        max_concurrent: usize,
        on_progress: Option<ProgressCallback>,
    ) -> Vec<BatchOutcome> {
        let total = prompts.len();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let start = Instant::now();

        let tasks = prompts.iter().enumerate().map(|(index, prompt)| {
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let on_progress = on_progress.clone();
            let params = params.clone();
            let dispatcher = Dispatcher::new(
                self.workers,
                self.client,
                self.metrics,
                self.request_timeout,
                self.max_retries,
            );

            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("batch semaphore is never closed while in use");

                let outcome = match dispatcher.dispatch(prompt, params).await {
                    Ok(success) => BatchOutcome::Success(success),
                    Err(e) => BatchOutcome::Error {
                        prompt_index: index,
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                };

                let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if let Some(cb) = &on_progress {
                    cb(done, total, start.elapsed().as_secs_f64());
                }
                debug!(index, done, total, "batch prompt completed");

                (index, outcome)
            }
        });

        let mut results: Vec<Option<BatchOutcome>> = (0..total).map(|_| None).collect();
        for (index, outcome) in futures::future::join_all(tasks).await {
            results[index] = Some(outcome);
        }

        results
            .into_iter()
            .map(|o| o.expect("every prompt index is populated exactly once"))
            .collect()
    }
}

