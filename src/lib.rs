//! relaypool - client-side load balancer for a fleet of local
//! text-completion inference workers.
//!
//! Fans a single prompt or a batch of prompts out across a set of
//! OpenAI-style, native-generate, or chat-completions-style upstream
//! workers, picking a healthy worker per request by a composite
//! availability/success/speed score, retrying with backoff on failure, and
//! returning a normalized result. Continuous background health probing and
//! rolling performance metrics run alongside dispatch.
//!
//! ## Modules
//!
//! - [`worker`]: one upstream endpoint — dialect, addressing, live counters.
//! - [`selector`]: weighted random worker selection.
//! - [`health`]: background periodic liveness probing.
//! - [`metrics`]: process-wide rolling request metrics.
//! - [`dispatcher`]: single-request select → send → retry path.
//! - [`batch`]: order-preserving, concurrency-bounded fan-out.
//! - [`pool`]: top-level lifecycle owner wiring the above together.
//! - [`config`]: typed configuration and CLI/env loader.
//! - [`error`]: crate-wide error taxonomy.

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod http_client;
pub mod metrics;
pub mod pool;
pub mod selector;
pub mod worker;

pub use batch::{BatchEngine, BatchOutcome};
pub use config::{Args, PoolConfig, WorkerSpec};
pub use dispatcher::{Dispatcher, DispatchSuccess};
pub use error::{DispatchError, Result};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use pool::{Pool, PoolMetrics};
pub use worker::{Dialect, RequestParams, Worker, WorkerStatus};
