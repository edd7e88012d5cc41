//! Node lifecycle orchestration.
//!
//! [`NodeOrchestrator`] gates, starts and tracks runs; [`PipelineGraph`]
//! holds the declared dependencies and [`NodeStateStore`] the state
//! presentation layers subscribe to.

mod engine;
#[cfg(test)]
mod engine_tests;
mod graph;
mod store;

pub use engine::{NodeOrchestrator, OrchestratorBuilder, PipelineSummary};
pub use graph::{NodeSpec, PipelineGraph};
pub use store::{NodeEvent, NodeStateStore};
