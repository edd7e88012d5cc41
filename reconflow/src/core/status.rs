//! Node lifecycle states and parsed backend task statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The externally visible lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Never run, or reset.
    Idle,
    /// Accepted for launch; the start call is in flight.
    Queued,
    /// The remote task is running and being polled.
    Running,
    /// Running, with the poll loop riding out a network blip.
    ///
    /// The orchestrator never stores this value: it is a sub-state of
    /// [`NodeStatus::Running`] derived by [`crate::core::NodeRecord::display_status`].
    Retrying,
    /// The remote task finished and produced a clean output.
    Completed,
    /// The node failed (remote failure, transport failure, or a gate).
    Failed,
    /// The polling budget ran out.
    Timeout,
    /// The operator stopped the node.
    Stopped,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl NodeStatus {
    /// Returns true if no automatic transition leaves this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Stopped
        )
    }

    /// Returns true while a run is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Retrying)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the node ended without a usable output.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout | Self::Stopped)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Runs always go `idle → queued → running → terminal`; a node that
    /// never launched may fail straight from an inactive state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Queued | Self::Failed) if !from.is_active() => true,
            (Self::Queued, Self::Running | Self::Failed | Self::Stopped) => true,
            (Self::Running | Self::Retrying, to) => to.is_terminal(),
            _ => false,
        }
    }
}

/// A task status string reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    /// Accepted, not started.
    Pending,
    /// Executing.
    Running,
    /// Finished; output available.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled through the stop endpoint.
    Cancelled,
    /// Stopped by the backend.
    Stopped,
    /// The backend has no record of the task.
    NotFound,
    /// Any other value.
    Unknown(String),
}

impl From<&str> for RemoteStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "started" => Self::Pending,
            "running" => Self::Running,
            "completed" | "success" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "stopped" => Self::Stopped,
            "not_found" => Self::NotFound,
            _ => Self::Unknown(value.to_string()),
        }
    }
}

impl From<String> for RemoteStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<RemoteStatus> for String {
    fn from(value: RemoteStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotFound => write!(f, "not_found"),
            Self::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

impl RemoteStatus {
    /// Returns true for statuses that end the task without an output.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Stopped)
    }

    /// Returns true for statuses reporting a cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_display() {
        assert_eq!(NodeStatus::Idle.to_string(), "idle");
        assert_eq!(NodeStatus::Timeout.to_string(), "timeout");
        assert_eq!(NodeStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_node_status_is_terminal() {
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::Timeout.is_terminal());
        assert!(NodeStatus::Stopped.is_terminal());
        assert!(!NodeStatus::Idle.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
        assert!(!NodeStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(NodeStatus::Idle.can_transition_to(NodeStatus::Queued));
        assert!(NodeStatus::Idle.can_transition_to(NodeStatus::Failed));
        assert!(NodeStatus::Queued.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Completed));
        assert!(NodeStatus::Completed.can_transition_to(NodeStatus::Queued));

        assert!(!NodeStatus::Idle.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Queued.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Completed.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Stopped.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Queued));
    }

    #[test]
    fn test_node_status_serialize() {
        let json = serde_json::to_string(&NodeStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);

        let parsed: NodeStatus = serde_json::from_str(r#""timeout""#).unwrap();
        assert_eq!(parsed, NodeStatus::Timeout);
    }

    #[test]
    fn test_remote_status_parse() {
        assert_eq!(RemoteStatus::from("running"), RemoteStatus::Running);
        assert_eq!(RemoteStatus::from("COMPLETED"), RemoteStatus::Completed);
        assert_eq!(RemoteStatus::from("started"), RemoteStatus::Pending);
        assert_eq!(RemoteStatus::from("not_found"), RemoteStatus::NotFound);
        assert_eq!(
            RemoteStatus::from("warming_up"),
            RemoteStatus::Unknown("warming_up".to_string())
        );
    }

    #[test]
    fn test_remote_status_deserialize() {
        let parsed: RemoteStatus = serde_json::from_str(r#""cancelled""#).unwrap();
        assert_eq!(parsed, RemoteStatus::Cancelled);
        assert!(parsed.is_failure());
        assert!(parsed.is_cancellation());
        assert!(!RemoteStatus::Failed.is_cancellation());
    }
}
