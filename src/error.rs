//! Error taxonomy for relaypool
//!
//! A single `thiserror`-derived enum covers everything the dispatcher,
//! selector, health prober and batch engine can fail with. Library code
//! always returns `Result<T>`; only the CLI binary converts into
//! `anyhow::Result` at the top.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("no healthy worker available")]
    NoWorkersAvailable,

    #[error("lost the race for a worker slot repeatedly")]
    SelectionStarvation,

    #[error("connection to worker {worker_id} failed: {message}")]
    ConnectError { worker_id: String, message: String },

    #[error("request to worker {worker_id} timed out after {elapsed_secs:.1}s")]
    TimeoutError {
        worker_id: String,
        elapsed_secs: f64,
    },

    #[error("worker {worker_id} returned HTTP {status}")]
    HttpStatusError {
        worker_id: String,
        status: u16,
        body: Option<String>,
    },

    #[error("worker {worker_id} returned a response relaypool could not parse: {message}")]
    MalformedResponse { worker_id: String, message: String },

    #[error("all retries exhausted: {0}")]
    AllRetriesExhausted(Box<DispatchError>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pool is not open")]
    PoolClosed,
}

impl DispatchError {
    /// True for failures worth retrying against a different worker.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::PoolClosed | DispatchError::InvalidConfig(_))
    }

    /// Stable, short tag for metrics records and JSON surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NoWorkersAvailable => "no_workers_available",
            DispatchError::SelectionStarvation => "selection_starvation",
            DispatchError::ConnectError { .. } => "connect_error",
            DispatchError::TimeoutError { .. } => "timeout_error",
            DispatchError::HttpStatusError { .. } => "http_status_error",
            DispatchError::MalformedResponse { .. } => "malformed_response",
            DispatchError::AllRetriesExhausted(_) => "all_retries_exhausted",
            DispatchError::InvalidConfig(_) => "invalid_config",
            DispatchError::PoolClosed => "pool_closed",
        }
    }
}
