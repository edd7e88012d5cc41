//! Structured tracing for node runs.
//!
//! Node runs are reported as spans: a start, then either an end with the
//! duration or an error. The default emitter writes them through the
//! `tracing` macros so any subscriber can pick them up.

use crate::errors::{ReconflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "reconflow=info";

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `reconflow=info` filter.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ReconflowError::Config(format!("cannot install subscriber: {e}")))
}

/// Span attributes for one node run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpanAttributes {
    /// Node name.
    pub node_id: String,
    /// Remote process id, once known.
    pub process_id: Option<String>,
    /// Final node status.
    pub status: Option<String>,
    /// Status checks performed.
    pub attempts: Option<u32>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl NodeSpanAttributes {
    /// Creates attributes for a node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Sets the process id.
    #[must_use]
    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    /// Sets the final status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Flattens into dotted key/value pairs.
    #[must_use]
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("node.id".to_string(), self.node_id.clone());
        if let Some(ref v) = self.process_id {
            fields.insert("node.process_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.status {
            fields.insert("node.status".to_string(), v.clone());
        }
        if let Some(v) = self.attempts {
            fields.insert("node.attempts".to_string(), v.to_string());
        }
        if let Some(ref v) = self.error {
            fields.insert("node.error".to_string(), v.clone());
        }
        fields
    }
}

/// Timer for measuring span duration.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

/// Receives node run spans.
pub trait TracingEmitter: Send + Sync + std::fmt::Debug {
    /// A run was launched.
    fn span_start(&self, name: &str, attributes: &NodeSpanAttributes);

    /// A run completed.
    fn span_end(&self, name: &str, duration_ms: f64, attributes: &NodeSpanAttributes);

    /// A run ended without a usable output.
    fn span_error(&self, name: &str, duration_ms: f64, attributes: &NodeSpanAttributes);
}

/// Emitter that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoOpTracingEmitter;

impl TracingEmitter for NoOpTracingEmitter {
    fn span_start(&self, _name: &str, _attributes: &NodeSpanAttributes) {}
    fn span_end(&self, _name: &str, _duration_ms: f64, _attributes: &NodeSpanAttributes) {}
    fn span_error(&self, _name: &str, _duration_ms: f64, _attributes: &NodeSpanAttributes) {}
}

/// Emitter that logs through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingTracingEmitter;

impl TracingEmitter for LoggingTracingEmitter {
    fn span_start(&self, name: &str, attributes: &NodeSpanAttributes) {
        tracing::info!(
            span_name = name,
            node = %attributes.node_id,
            process_id = attributes.process_id.as_deref(),
            "Node started"
        );
    }

    fn span_end(&self, name: &str, duration_ms: f64, attributes: &NodeSpanAttributes) {
        tracing::info!(
            span_name = name,
            node = %attributes.node_id,
            process_id = attributes.process_id.as_deref(),
            status = attributes.status.as_deref(),
            attempts = attributes.attempts,
            duration_ms,
            "Node finished"
        );
    }

    fn span_error(&self, name: &str, duration_ms: f64, attributes: &NodeSpanAttributes) {
        tracing::warn!(
            span_name = name,
            node = %attributes.node_id,
            process_id = attributes.process_id.as_deref(),
            status = attributes.status.as_deref(),
            attempts = attributes.attempts,
            error = attributes.error.as_deref(),
            duration_ms,
            "Node did not complete"
        );
    }
}
