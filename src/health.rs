//! Health prober — background periodic liveness check.
//!
//! One round runs synchronously at pool open to populate health flags, then
//! a `tokio::time::interval` loop drives subsequent rounds. Cancellation
//! uses a `tokio_util::sync::CancellationToken` so the background loop can
//! be torn down promptly on `close()` rather than merely stop being
//! rescheduled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::worker::Worker;

/// Per-probe deadline (§4.5).
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives periodic health probes against every worker in the pool.
pub struct HealthProber {
    workers: Vec<Arc<Worker>>,
    client: reqwest::Client,
    interval: Duration,
    cancel: CancellationToken,
}

impl HealthProber {
    pub fn new(workers: Vec<Arc<Worker>>, client: reqwest::Client, interval: Duration) -> Self {
        Self {
            workers,
            client,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Run one probe round synchronously against every worker, in parallel.
    pub async fn probe_once(&self) {
        let tasks = self.workers.iter().map(|worker| {
            let client = self.client.clone();
            let worker = Arc::clone(worker);
            async move {
                probe_worker(&client, &worker).await;
            }
        });
        join_all(tasks).await;
    }

    /// Start the periodic background loop. The first tick of
    /// `tokio::time::interval` fires immediately, but the pool already ran
    /// one synchronous round at open, so the caller should `tick()` once
    /// before entering the loop to avoid a redundant immediate round -
    /// handled here by consuming the first tick before the loop begins.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, CancellationToken) {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("health prober cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!("health prober round starting");
                        self.probe_once().await;
                    }
                }
            }
        });
        (handle, cancel)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

async fn probe_worker(client: &reqwest::Client, worker: &Worker) {
    let url = worker.url_for_health();
    let started = Instant::now();

    let outcome = tokio::time::timeout(PROBE_TIMEOUT, client.get(&url).send()).await;

    match outcome {
        Ok(Ok(resp)) if resp.status().is_success() => {
            worker.set_healthy(true);
            worker.record_request(started.elapsed(), true, None);
            debug!(worker = worker.id(), "health probe ok");
        }
        Ok(Ok(resp)) => {
            warn!(worker = worker.id(), status = %resp.status(), "health probe non-2xx");
            worker.set_healthy(false);
        }
        Ok(Err(e)) => {
            warn!(worker = worker.id(), error = %e, "health probe connect failure");
            worker.set_healthy(false);
        }
        Err(_) => {
            warn!(worker = worker.id(), "health probe timed out");
            worker.set_healthy(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerSpec;
    use crate::worker::Dialect;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    async fn spawn_fake_upstream(status: u16) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<hyper::body::Incoming>| async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from_static(b"{}")))
                                .unwrap(),
                        )
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        addr
    }

    fn worker_at(addr: std::net::SocketAddr, ceiling: usize) -> Arc<Worker> {
        Arc::new(Worker::new(&WorkerSpec {
            id: "w0".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            dialect: Dialect::OpenAiStyle,
            model: "m".to_string(),
            max_concurrent_requests: ceiling,
        }))
    }

    #[tokio::test]
    async fn healthy_upstream_marks_worker_healthy() {
        let addr = spawn_fake_upstream(200).await;
        let worker = worker_at(addr, 4);
        worker.set_healthy(false);
        let client = reqwest::Client::new();
        probe_worker(&client, &worker).await;
        assert!(worker.is_healthy());
    }

    #[tokio::test]
    async fn non_2xx_marks_worker_unhealthy() {
        let addr = spawn_fake_upstream(500).await;
        let worker = worker_at(addr, 4);
        let client = reqwest::Client::new();
        probe_worker(&client, &worker).await;
        assert!(!worker.is_healthy());
    }

    #[tokio::test]
    async fn connect_failure_marks_worker_unhealthy() {
        // Nothing listening on this port.
        let worker = Arc::new(Worker::new(&WorkerSpec {
            id: "w0".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            dialect: Dialect::OpenAiStyle,
            model: "m".to_string(),
            max_concurrent_requests: 4,
        }));
        let client = reqwest::Client::new();
        probe_worker(&client, &worker).await;
        assert!(!worker.is_healthy());
    }
}
