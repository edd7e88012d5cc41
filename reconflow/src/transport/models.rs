//! Wire types for the backend's JSON API.

use crate::core::{NodeOutput, RemoteStatus};
use crate::errors::{ReconflowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Body of `GET /health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    #[serde(default)]
    pub status: Option<String>,
    /// Backend clock at probe time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Failure detail when unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Task statistics attached to healthy answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_stats: Option<Value>,
}

impl HealthResponse {
    /// A 200 answer is healthy unless it says otherwise.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("unhealthy"))
    }
}

/// Body of `POST /run/{node}`'s answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTaskResponse {
    /// Process id used for every later call.
    pub task_id: String,
    /// Initial status, usually `started`.
    pub status: String,
    /// OS process id on the backend host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    /// Backend worker thread id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Echo of the step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

/// Body of `GET /status/{process_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Parsed task status.
    pub status: RemoteStatus,
    /// Output, when the backend inlines it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error detail for failed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step that produced the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl StatusResponse {
    /// Creates a bare status answer.
    #[must_use]
    pub fn new(status: RemoteStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            step_name: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// The inlined output, if any and non-null.
    #[must_use]
    pub fn inline_output(&self) -> Option<NodeOutput> {
        self.output
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| NodeOutput::new(v.clone()))
    }

    /// Best available failure description.
    #[must_use]
    pub fn failure_message(&self) -> String {
        if let Some(error) = self.error.as_deref().filter(|e| !e.trim().is_empty()) {
            return error.to_string();
        }
        if let Some(reason) = self.inline_output().and_then(|o| o.failure_reason()) {
            return reason;
        }
        format!("Task {}", self.status)
    }
}

/// Body of `GET /output/{process_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputResponse {
    /// Domain result or failure sentinel.
    #[serde(default)]
    pub output: Value,
}

/// Body of `POST /stop/{process_id}`'s answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    /// `cancelled`, `not_running` or `not_found`.
    pub status: String,
    /// Echo of the process id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Body of `GET /steps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsResponse {
    /// Step id to display name.
    pub steps: BTreeMap<String, String>,
    /// Number of steps.
    #[serde(default)]
    pub total_steps: usize,
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Tasks known to the backend.
    pub total_tasks: u64,
    /// Tasks executing now.
    pub running_tasks: u64,
    /// Tasks that completed.
    pub completed_tasks: u64,
    /// Tasks that failed.
    pub failed_tasks: u64,
    /// Concurrency limit.
    pub max_concurrent_tasks: u64,
    /// Retention of finished tasks.
    pub task_ttl_hours: u64,
    /// Where task records are stored.
    pub storage_directory: String,
}

/// Body of `POST /cleanup/now`'s answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// `success` on completion.
    pub status: String,
    /// Summary line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Backend-specific counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Daily cleanup time, body of `POST /cleanup/schedule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSchedule {
    /// Hour of day, 0-23.
    #[serde(default = "default_cleanup_hour")]
    pub hour: u8,
    /// Minute, 0-59.
    #[serde(default)]
    pub minute: u8,
    /// IANA timezone name.
    #[serde(default = "default_cleanup_timezone")]
    pub timezone: String,
}

fn default_cleanup_hour() -> u8 {
    23
}

fn default_cleanup_timezone() -> String {
    "UTC".to_string()
}

impl Default for CleanupSchedule {
    fn default() -> Self {
        Self {
            hour: default_cleanup_hour(),
            minute: 0,
            timezone: default_cleanup_timezone(),
        }
    }
}

impl CleanupSchedule {
    /// Rejects out-of-range times and empty timezones.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(ReconflowError::InvalidParameters(format!(
                "cleanup time {:02}:{:02} is out of range",
                self.hour, self.minute
            )));
        }
        if self.timezone.trim().is_empty() {
            return Err(ReconflowError::InvalidParameters(
                "cleanup timezone must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body of `GET /cleanup/schedule` and of `POST /cleanup/schedule`'s answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupScheduleInfo {
    /// `success` or `not_found`.
    pub status: String,
    /// Next run and trigger description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
    /// Summary line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
