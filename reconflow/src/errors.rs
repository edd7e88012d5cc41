//! Error types for the reconflow engine.
//!
//! Transport failures are kept apart from the engine-level taxonomy so
//! retry logic can branch on them without inspecting strings. Every error
//! is `Clone`: a terminal error is both stored on the node and returned to
//! the caller of `run`.

use crate::core::{NodeId, NodeStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Failure of a single HTTP exchange with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not finish before its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// Connection-level failure (refused, reset, DNS, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body, possibly empty.
        body: String,
    },

    /// A success response whose body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Creates a timeout error from a deadline.
    #[must_use]
    pub fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates an HTTP status error.
    #[must_use]
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Returns true if another attempt of the same request may succeed.
    ///
    /// Timeouts, network errors, 429 and 5xx responses qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }

    /// Returns true for the connection-level class (timeout or network).
    #[must_use]
    pub fn is_network_blip(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network(_))
    }

    /// Returns the HTTP status code, if this is a status error.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while loading or validating a pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node declares a dependency that is not part of the graph.
    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency {
        /// The declaring node.
        node: NodeId,
        /// The missing dependency.
        dependency: NodeId,
    },

    /// A node id that cannot be addressed on the backend.
    #[error("Node id '{0}' may only contain letters, digits, '_', '-' and '.'")]
    InvalidNodeId(NodeId),

    /// The same node was declared twice.
    #[error("Node '{0}' is declared more than once")]
    DuplicateNode(NodeId),

    /// The dependency edges form a cycle.
    #[error("Cycle detected in pipeline: {}", format_path(.0))]
    CycleDetected(Vec<NodeId>),
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The main error type for reconflow operations.
#[derive(Debug, Clone, Error)]
pub enum ReconflowError {
    /// A single transport call failed and was not retried.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// All attempts of a retried call failed.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Attempts made.
        attempts: usize,
        /// The error of the final attempt.
        last_error: TransportError,
    },

    /// The health gate rejected the operation.
    #[error("Backend is not reachable or unhealthy")]
    BackendUnhealthy,

    /// The backend reported a business failure.
    #[error("Remote task failed: {0}")]
    RemoteTaskFailed(String),

    /// The polling budget ran out while the task was still active.
    #[error("{message}")]
    RemoteTaskTimedOut {
        /// Status checks performed.
        attempts: u32,
        /// Human-readable description of the exhausted budget.
        message: String,
    },

    /// The operator cancelled the node.
    #[error("Node '{0}' was stopped by the operator")]
    LocallyCancelled(NodeId),

    /// An upstream node did not complete.
    #[error("Cannot run '{node}': dependency '{dependency}' is {dependency_status}")]
    DependencyFailed {
        /// The node that was not started.
        node: NodeId,
        /// The blocking dependency.
        dependency: NodeId,
        /// The dependency's state at check time.
        dependency_status: NodeStatus,
    },

    /// The node already has a run in progress.
    #[error("Node '{0}' is already queued or running")]
    NodeBusy(NodeId),

    /// Run parameters failed validation.
    #[error("Invalid run parameters: {0}")]
    InvalidParameters(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ReconflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ReconflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ReconflowError {
    /// Returns true if the underlying cause is a connection-level blip,
    /// either directly or as the last error of an exhausted retry.
    #[must_use]
    pub fn is_network_blip(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_network_blip(),
            Self::RetryExhausted { last_error, .. } => last_error.is_network_blip(),
            _ => false,
        }
    }

    /// The terminal node state this error produces.
    #[must_use]
    pub fn node_status(&self) -> NodeStatus {
        match self {
            Self::RemoteTaskTimedOut { .. } => NodeStatus::Timeout,
            Self::LocallyCancelled(_) => NodeStatus::Stopped,
            _ => NodeStatus::Failed,
        }
    }

    /// Short stable name of the variant, used in logs and JSON output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::Timeout { .. }) => "TransportTimeout",
            Self::Transport(TransportError::Network(_)) => "TransportNetworkError",
            Self::Transport(TransportError::HttpStatus { .. }) => "HttpError",
            Self::Transport(TransportError::Decode(_)) => "DecodeError",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::BackendUnhealthy => "BackendUnhealthy",
            Self::RemoteTaskFailed(_) => "RemoteTaskFailed",
            Self::RemoteTaskTimedOut { .. } => "RemoteTaskTimedOut",
            Self::LocallyCancelled(_) => "LocallyCancelled",
            Self::DependencyFailed { .. } => "DependencyFailed",
            Self::NodeBusy(_) => "NodeBusy",
            Self::InvalidParameters(_) => "InvalidParameters",
            Self::Config(_) => "ConfigError",
            Self::Graph(_) => "GraphError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::Transport(TransportError::HttpStatus { status, .. }) => {
                map.insert("status".to_string(), serde_json::json!(status));
            }
            Self::RetryExhausted { attempts, last_error } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("last_error".to_string(), serde_json::json!(last_error.to_string()));
            }
            Self::RemoteTaskTimedOut { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Self::DependencyFailed { dependency, dependency_status, .. } => {
                map.insert("dependency".to_string(), serde_json::json!(dependency));
                map.insert(
                    "dependency_status".to_string(),
                    serde_json::json!(dependency_status),
                );
            }
            _ => {}
        }

        map
    }
}

/// Convenience result alias.
pub type Result<T, E = ReconflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_retryable_classes() {
        assert!(TransportError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Network("refused".into()).is_retryable());
        assert!(TransportError::http(503, "").is_retryable());
        assert!(TransportError::http(429, "").is_retryable());
        assert!(!TransportError::http(404, "Process not found").is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_network_blip_excludes_status_errors() {
        assert!(!TransportError::http(502, "").is_network_blip());

        let exhausted = ReconflowError::RetryExhausted {
            attempts: 3,
            last_error: TransportError::Network("reset".into()),
        };
        assert!(exhausted.is_network_blip());
    }

    #[test]
    fn test_timeout_keeps_deadline() {
        let err = TransportError::timeout(Duration::from_millis(1500));
        assert_eq!(err, TransportError::Timeout { timeout_ms: 1500 });
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn test_node_status_mapping() {
        let timed_out = ReconflowError::RemoteTaskTimedOut {
            attempts: 3,
            message: "budget".into(),
        };
        assert_eq!(timed_out.node_status(), NodeStatus::Timeout);
        assert_eq!(
            ReconflowError::LocallyCancelled(NodeId::from("a")).node_status(),
            NodeStatus::Stopped
        );
        assert_eq!(ReconflowError::BackendUnhealthy.node_status(), NodeStatus::Failed);
    }

    #[test]
    fn test_cycle_error_message() {
        let err = GraphError::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_error_to_dict() {
        let err = ReconflowError::RetryExhausted {
            attempts: 3,
            last_error: TransportError::Network("refused".into()),
        };
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "RetryExhausted");
        assert_eq!(dict.get("attempts").unwrap(), 3);
    }
}
