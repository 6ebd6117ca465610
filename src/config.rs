//! Configuration for relaypool
//!
//! CLI arguments and environment variable handling using clap, plus the
//! typed `PoolConfig`/`WorkerSpec` structs the core actually consumes. The
//! core itself never touches clap or environment variables — `Args::into_pool_config`
//! is the seam where the external, out-of-scope loader hands the core its
//! already-resolved values.

use crate::error::DispatchError;
use crate::worker::Dialect;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// relaypool - client-side load balancer for local text-completion workers
#[derive(Parser, Debug, Clone)]
#[command(name = "relaypool")]
#[command(about = "Fans text-completion requests out across a fleet of local inference workers")]
pub struct Args {
    /// Address the demo CLI's status endpoint listens on (unused by the core itself)
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:8070")]
    pub listen: SocketAddr,

    /// Comma-separated worker specs: "id=host:port:dialect:model[:ceiling]"
    /// e.g. "w0=127.0.0.1:8000:openai-style:llama3,w1=127.0.0.1:8001:native-style:llama3"
    #[arg(long, env = "RELAYPOOL_WORKERS")]
    pub workers: String,

    /// Health check interval in seconds
    #[arg(long, env = "HEALTH_CHECK_INTERVAL_SECS", default_value = "30")]
    pub health_check_interval_secs: u64,

    /// Per-attempt request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "300")]
    pub request_timeout_secs: u64,

    /// Maximum retries per request (attempts = retries + 1)
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Default global concurrency ceiling for batch requests
    #[arg(long, env = "MAX_CONCURRENT_BATCH", default_value = "50")]
    pub max_concurrent_batch: usize,

    /// Enable the metrics registry
    #[arg(long, env = "ENABLE_METRICS", default_value = "true")]
    pub enable_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// A single worker's static configuration, as supplied by the external loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub dialect: Dialect,
    pub model: String,
    pub max_concurrent_requests: usize,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            dialect: Dialect::OpenAiStyle,
            model: String::new(),
            max_concurrent_requests: 5,
        }
    }
}

/// Typed, already-resolved configuration the core accepts. This is the sole
/// interface between the external config loader and the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: Vec<WorkerSpec>,
    pub health_check_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub max_concurrent_batch: usize,
    pub enable_metrics: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            health_check_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            max_retries: 3,
            max_concurrent_batch: 50,
            enable_metrics: true,
        }
    }
}

impl PoolConfig {
    /// Cross-field validation; the core refuses to open a pool with an
    /// invalid configuration rather than panicking mid-flight.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "at least one worker must be configured".to_string(),
            ));
        }
        for w in &self.workers {
            if w.id.is_empty() {
                return Err(DispatchError::InvalidConfig(
                    "worker id must not be empty".to_string(),
                ));
            }
            if w.max_concurrent_requests == 0 {
                return Err(DispatchError::InvalidConfig(format!(
                    "worker {} has a zero concurrency ceiling",
                    w.id
                )));
            }
        }
        if self.max_concurrent_batch == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_concurrent_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Args {
    /// Parse the `--workers` spec string into `WorkerSpec`s.
    ///
    /// Format per worker: `id=host:port:dialect:model[:ceiling]`, workers
    /// separated by commas. `dialect` is one of `openai-style`,
    /// `native-style`, `cluster-style`. `ceiling` defaults to 5 when omitted.
    pub fn parse_workers(&self) -> Result<Vec<WorkerSpec>, DispatchError> {
        self.workers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_worker_spec)
            .collect()
    }

    /// Build the typed `PoolConfig` the core consumes.
    pub fn into_pool_config(self) -> Result<PoolConfig, DispatchError> {
        let workers = self.parse_workers()?;
        let cfg = PoolConfig {
            workers,
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            max_concurrent_batch: self.max_concurrent_batch,
            enable_metrics: self.enable_metrics,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_worker_spec(spec: &str) -> Result<WorkerSpec, DispatchError> {
    let (id, rest) = spec.split_once('=').ok_or_else(|| {
        DispatchError::InvalidConfig(format!("worker spec '{spec}' is missing 'id='"))
    })?;
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() < 4 {
        return Err(DispatchError::InvalidConfig(format!(
            "worker spec '{spec}' must be id=host:port:dialect:model[:ceiling]"
        )));
    }
    let host = parts[0].to_string();
    let port: u16 = parts[1]
        .parse()
        .map_err(|_| DispatchError::InvalidConfig(format!("invalid port in '{spec}'")))?;
    let dialect: Dialect = parts[2]
        .parse()
        .map_err(|_| DispatchError::InvalidConfig(format!("invalid dialect in '{spec}'")))?;
    let model = parts[3].to_string();
    let max_concurrent_requests = match parts.get(4) {
        Some(c) => c
            .parse()
            .map_err(|_| DispatchError::InvalidConfig(format!("invalid ceiling in '{spec}'")))?,
        None => 5,
    };

    Ok(WorkerSpec {
        id: id.to_string(),
        host,
        port,
        dialect,
        model,
        max_concurrent_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_spec() {
        let spec = parse_worker_spec("w0=127.0.0.1:8000:openai-style:llama3").unwrap();
        assert_eq!(spec.id, "w0");
        assert_eq!(spec.port, 8000);
        assert_eq!(spec.dialect, Dialect::OpenAiStyle);
        assert_eq!(spec.max_concurrent_requests, 5);
    }

    #[test]
    fn parses_spec_with_ceiling() {
        let spec = parse_worker_spec("w1=host:9000:native-style:m:12").unwrap();
        assert_eq!(spec.max_concurrent_requests, 12);
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(parse_worker_spec("no-equals-sign").is_err());
        assert!(parse_worker_spec("w0=host:notanumber:openai-style:m").is_err());
        assert!(parse_worker_spec("w0=host:8000:bogus-dialect:m").is_err());
    }

    #[test]
    fn pool_config_requires_at_least_one_worker() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_err());
    }
}
