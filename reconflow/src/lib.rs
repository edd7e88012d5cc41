//! # Reconflow
//!
//! Client-side orchestration and polling engine for a remote
//! reconciliation-pipeline backend.
//!
//! Reconflow starts pipeline steps on the backend over HTTP, polls each
//! started task until it reaches a terminal state, and propagates outputs
//! between dependent steps:
//!
//! - **Transport**: deadline-bounded calls, classified failures, linear-backoff retries
//! - **Health gating**: a cached liveness probe gates starts and polling
//! - **Polling sessions**: one cooperative loop per task with a single terminal event
//! - **Orchestration**: dependency gates, run/cancel, whole-pipeline runs
//! - **Observability**: structured `tracing` logs and node run spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reconflow::prelude::*;
//!
//! let config = EngineConfig::load(None)?;
//! let orchestrator = NodeOrchestrator::from_config(config, PipelineGraph::completeness())?;
//!
//! let output = orchestrator.run("reading_config_comp").await?;
//! let summary = orchestrator.run_pipeline().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod health;
pub mod observability;
pub mod orchestrator;
pub mod polling;
pub mod registry;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationSet, CancellationToken};
    pub use crate::config::{EngineConfig, LegacyConfig, PollingMode};
    pub use crate::core::{
        NodeId, NodeOutput, NodeRecord, NodeStatus, RemoteStatus, RunParameters, RunRequest,
        TaskHandle,
    };
    pub use crate::errors::{GraphError, ReconflowError, Result, TransportError};
    pub use crate::health::{HealthMonitor, HealthState};
    pub use crate::observability::{init_tracing, LoggingTracingEmitter, TracingEmitter};
    pub use crate::orchestrator::{
        NodeEvent, NodeOrchestrator, NodeSpec, PipelineGraph, PipelineSummary,
    };
    pub use crate::polling::{PollEvent, PollingStrategy};
    pub use crate::registry::TaskRegistry;
    pub use crate::retry::{with_retry, RetryPolicy};
    pub use crate::transport::{BackendClient, HttpTransport, Transport};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
