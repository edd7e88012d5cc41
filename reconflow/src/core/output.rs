//! Node output payloads and the uniform failure sentinel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The message stored on a node the operator stopped.
pub const STOPPED_MESSAGE: &str = "Process stopped by user";

/// The result of a remote step.
///
/// The payload is opaque JSON. Independently of how it was transported, a
/// payload is a failure when it carries `status: "failed"` or a non-empty
/// `fail_message`; such a payload must never be forwarded downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(Value);

impl Default for NodeOutput {
    fn default() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl NodeOutput {
    /// Wraps a payload.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Creates a payload carrying the failure sentinel.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self(serde_json::json!({
            "status": "failed",
            "fail_message": message.into(),
        }))
    }

    /// Creates the payload recorded for an operator stop.
    #[must_use]
    pub fn stopped() -> Self {
        Self::failure(STOPPED_MESSAGE)
    }

    /// Borrows the raw payload.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consumes the output and returns the raw payload.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Gets a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The payload's `status` field, when it is a string.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }

    /// The payload's `fail_message`, when present and non-empty.
    #[must_use]
    pub fn fail_message(&self) -> Option<&str> {
        self.get("fail_message")
            .and_then(Value::as_str)
            .filter(|msg| !msg.trim().is_empty())
    }

    /// Returns true if the payload carries the failure sentinel.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status().is_some_and(|s| s.eq_ignore_ascii_case("failed"))
            || self.fail_message().is_some()
    }

    /// Human-readable failure reason, if the payload is a failure.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        if !self.is_failure() {
            return None;
        }
        Some(
            self.fail_message()
                .unwrap_or("Task reported status 'failed'")
                .to_string(),
        )
    }
}
