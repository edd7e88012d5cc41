//! Core domain model types for reconflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Node identity, task handles and the per-node record
//! - Node lifecycle states and parsed backend statuses
//! - Node outputs with the failure sentinel
//! - Run parameters and the start request body

mod node;
mod output;
mod params;
mod status;

pub use node::{NodeId, NodeRecord, TaskHandle};
pub use output::{NodeOutput, STOPPED_MESSAGE};
pub use params::{RunParameters, RunRequest, RUN_DATE_FORMAT};
pub use status::{NodeStatus, RemoteStatus};
