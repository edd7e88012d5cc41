//! Node identity, remote task handles, and the per-node state record.

use super::NodeStatus;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque identifier of a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id can be used verbatim as a URL path segment:
    /// non-empty ASCII letters, digits, `_`, `-` and `.`.
    #[must_use]
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle to a task the backend accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Backend-assigned task identifier.
    pub process_id: String,
    /// The node this task runs.
    pub node_id: NodeId,
    /// When the start call was acknowledged.
    pub started_at: Timestamp,
}

impl TaskHandle {
    /// Creates a handle stamped with the current time.
    #[must_use]
    pub fn new(node_id: NodeId, process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            node_id,
            started_at: now_utc(),
        }
    }
}

/// Everything the orchestrator knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Lifecycle state.
    pub status: NodeStatus,
    /// Set on entering `running`, cleared on any terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// Remote process id of the current or last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    /// Incremented by every explicit run.
    pub generation: u64,
    /// Status checks performed during the current run.
    pub attempts: u32,
    /// Last raw status reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<String>,
    /// Poll-level network retry in progress, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
    /// Human-readable outcome or progress note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last mutation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl NodeRecord {
    /// Status as presented to an operator: `retrying` while a running
    /// node's poll loop is riding out a network blip.
    #[must_use]
    pub fn display_status(&self) -> NodeStatus {
        match (self.status, self.retry_attempt) {
            (NodeStatus::Running, Some(_)) => NodeStatus::Retrying,
            (status, _) => status,
        }
    }

    /// Milliseconds since the node entered `running`, if it is running.
    #[must_use]
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.start_time
            .map(|start| (now_utc() - start).num_milliseconds())
    }
}
