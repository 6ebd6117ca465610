//! Dispatcher — single-request path: select, acquire, send, record, retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::metrics::{MetricsRegistry, RequestRecord};
use crate::selector;
use crate::worker::{RequestParams, ResolvedParams, Worker};

/// A successful dispatch outcome, returned from `Pool::process_request` and
/// embedded (on success) in a batch outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSuccess {
    pub worker_id: String,
    pub model: String,
    pub response_text: String,
    pub duration_seconds: f64,
}

/// How many per-attempt "lost the slot race" misses we tolerate inside a
/// single attempt before treating the eligible set as effectively empty.
const MAX_ROUTING_MISSES_PER_ATTEMPT: u32 = 8;
const ROUTING_MISS_BACKOFF: Duration = Duration::from_millis(5);

pub struct Dispatcher<'a> {
    workers: &'a [Arc<Worker>],
    client: &'a reqwest::Client,
    metrics: &'a MetricsRegistry,
    request_timeout: Duration,
    max_retries: u32,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        workers: &'a [Arc<Worker>],
        client: &'a reqwest::Client,
        metrics: &'a MetricsRegistry,
        request_timeout: Duration,
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

    /// Run the single-request path per §4.6. Every attempt, including
    /// retries, is logged under one `request_id` span so a single dispatch
    /// can be followed through the log stream end to end.
    pub async fn dispatch(&self, prompt: &str, params: RequestParams) -> Result<DispatchSuccess, DispatchError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("dispatch", request_id = %request_id);
        self.dispatch_inner(prompt, params).instrument(span).await
    }

    async fn dispatch_inner(&self, prompt: &str, params: RequestParams) -> Result<DispatchSuccess, DispatchError> {
        let resolved: ResolvedParams = params.into();
        let mut attempt: u32 = 0;
        let mut last_error: Option<DispatchError> = None;

        while attempt <= self.max_retries {
            let worker = match self.acquire_eligible_worker().await {
                Ok(Some(w)) => w,
                Ok(None) => {
                    // The Selector saw zero eligible workers. This is often
                    // transient (every worker is merely at its concurrency
                    // ceiling for the moment, not unhealthy), so it gets the
                    // same retry budget and backoff as any other per-attempt
                    // failure rather than terminating the dispatch outright.
                    debug!(attempt, "no eligible worker, backing off before retrying selection");
                    last_error = Some(DispatchError::NoWorkersAvailable);
                    if !self.retry_after_failure(&mut attempt).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable || !self.retry_after_failure(&mut attempt).await {
                        break;
                    }
                    continue;
                }
            };

            let started = Instant::now();
            let outcome = self.send_once(&worker, prompt, &resolved).await;
            let duration = started.elapsed();
            worker.release_slot();

            match outcome {
                Ok((model, response_text)) => {
                    worker.record_request(duration, true, None);
                    self.push_metrics(&worker, started, duration, true, None);
                    debug!(worker = worker.id(), attempt, "dispatch succeeded");
                    return Ok(DispatchSuccess {
                        worker_id: worker.id().to_string(),
                        model,
                        response_text,
                        duration_seconds: duration.as_secs_f64(),
                    });
                }
                Err(e) => {
                    worker.record_request(duration, false, Some(e.kind()));
                    self.push_metrics(&worker, started, duration, false, Some(e.kind()));
                    warn!(worker = worker.id(), attempt, error = %e, "dispatch attempt failed");
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if !self.retry_after_failure(&mut attempt).await {
                        break;
                    }
                }
            }
        }

        Err(DispatchError::AllRetriesExhausted(Box::new(
            last_error.unwrap_or(DispatchError::NoWorkersAvailable),
        )))
    }

    /// Advance the attempt counter after a failed attempt and, if the retry
    /// budget isn't exhausted, sleep the standard exponential backoff
    /// (§4.6 step e) before the caller retries. Returns `false` when
    /// `max_retries` has been used up and the dispatch should give up.
    async fn retry_after_failure(&self, attempt: &mut u32) -> bool {
        *attempt += 1;
        if *attempt > self.max_retries {
            return false;
        }
        tokio::time::sleep(backoff_for(*attempt)).await;
        true
    }

    /// Select a worker and acquire its slot, retrying the selection a bounded
    /// number of times when the slot race is lost (§4.6 step b). Returns
    /// `Ok(None)` when the Selector reports no eligible worker at all.
    async fn acquire_eligible_worker(&self) -> Result<Option<Arc<Worker>>, DispatchError> {
        for miss in 0..MAX_ROUTING_MISSES_PER_ATTEMPT {
            let worker = match selector::select(self.workers) {
                Ok(w) => Arc::clone(w),
                Err(DispatchError::NoWorkersAvailable) => return Ok(None),
                Err(e) => return Err(e),
            };

            if worker.try_acquire_slot() {
                return Ok(Some(worker));
            }

            debug!(worker = worker.id(), miss, "lost the slot race, retrying selection");
            tokio::time::sleep(ROUTING_MISS_BACKOFF).await;
        }

        Err(DispatchError::SelectionStarvation)
    }

    async fn send_once(
        &self,
        worker: &Worker,
        prompt: &str,
        params: &ResolvedParams,
    ) -> Result<(String, String), DispatchError> {
        let url = worker.url_for_request();
        let body = worker.build_request_body(prompt, params);

        let send_fut = self.client.post(&url).json(&body).send();
        let response = match tokio::time::timeout(self.request_timeout, send_fut).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(if e.is_timeout() {
                    DispatchError::TimeoutError {
                        worker_id: worker.id().to_string(),
                        elapsed_secs: self.request_timeout.as_secs_f64(),
                    }
                } else {
                    DispatchError::ConnectError {
                        worker_id: worker.id().to_string(),
                        message: e.to_string(),
                    }
                })
            }
            Err(_) => {
                return Err(DispatchError::TimeoutError {
                    worker_id: worker.id().to_string(),
                    elapsed_secs: self.request_timeout.as_secs_f64(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.ok();
            return Err(DispatchError::HttpStatusError {
                worker_id: worker.id().to_string(),
                status: status.as_u16(),
                body: body_text,
            });
        }

        let json = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DispatchError::MalformedResponse {
                worker_id: worker.id().to_string(),
                message: e.to_string(),
            })?;

        worker.normalize_response(&json)
    }

    fn push_metrics(&self, worker: &Worker, start: Instant, duration: Duration, success: bool, kind: Option<&str>) {
        self.metrics.record(RequestRecord {
            start_time: start,
            end_time: start + duration,
            worker_id: worker.id().to_string(),
            success,
            error_kind: kind.map(str::to_string),
        });
    }
}

/// The nth retry sleep is `0.5 * 2^n` seconds (§4.6, §8 property 8).
fn backoff_for(attempt: u32) -> Duration {
    let secs = 0.5 * 2f64.powi(attempt as i32 - 1);
    Duration::from_secs_f64(secs)
}
