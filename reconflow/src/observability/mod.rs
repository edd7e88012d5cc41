//! Observability utilities.

mod tracing;

pub use tracing::{
    init_tracing, LoggingTracingEmitter, NoOpTracingEmitter, NodeSpanAttributes, SpanTimer,
    TracingEmitter,
};
