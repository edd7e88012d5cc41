//! Typed calls for every backend endpoint.

use super::models::{
    CleanupResponse, CleanupSchedule, CleanupScheduleInfo, HealthResponse, OutputResponse,
    StartTaskResponse, StatusResponse, StepsResponse, StopResponse, SystemStats,
};
use super::{HttpRequest, HttpTransport, Transport, TransportClient};
use crate::config::EngineConfig;
use crate::core::{NodeId, RunRequest};
use crate::errors::{ReconflowError, Result, TransportError};
use crate::retry::{with_retry, RetryPolicy};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Client for the reconciliation backend.
///
/// Start, status and output calls go through the retry policy; stop and
/// the administrative endpoints are single calls bounded by the request
/// timeout.
#[derive(Debug, Clone)]
pub struct BackendClient {
    transport: TransportClient,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl BackendClient {
    /// Creates a client over an arbitrary transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        Self {
            transport: TransportClient::new(transport),
            request_timeout: config.request_timeout(),
            retry: config.retry_policy(),
        }
    }

    /// Creates a client over the reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// The policy applied to retried calls.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The deadline applied to single calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        deadline: Duration,
    ) -> std::result::Result<T, TransportError> {
        self.transport.call(request, deadline).await?.decode()
    }

    /// Probes `GET /health` once.
    ///
    /// # Errors
    ///
    /// Any transport error, including a non-2xx answer.
    pub async fn health(&self, deadline: Duration) -> std::result::Result<HealthResponse, TransportError> {
        self.fetch(HttpRequest::get("/health"), deadline).await
    }

    /// Starts a node on the backend.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` without a call if the node id is not a
    /// safe path segment, otherwise `RetryExhausted` or the first
    /// non-retryable transport error.
    pub async fn start_task(&self, node: &NodeId, body: &RunRequest) -> Result<StartTaskResponse> {
        if !node.is_path_safe() {
            return Err(ReconflowError::InvalidParameters(format!(
                "node id '{node}' is not a valid path segment"
            )));
        }
        let body = serde_json::to_value(body)?;
        let path = format!("/run/{node}");
        with_retry(&self.retry, "start", move || {
            self.fetch(
                HttpRequest::post(path.as_str()).with_body(body.clone()),
                self.request_timeout,
            )
        })
        .await
    }

    /// Fetches a task's status with retries.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` or the first non-retryable transport error.
    pub async fn status(&self, process_id: &str) -> Result<StatusResponse> {
        let path = format!("/status/{process_id}");
        with_retry(&self.retry, "status", move || {
            self.fetch(HttpRequest::get(path.as_str()), self.request_timeout)
        })
        .await
    }

    /// Fetches a task's status with a single call.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn status_once(&self, process_id: &str) -> Result<StatusResponse> {
        let request = HttpRequest::get(format!("/status/{process_id}"));
        Ok(self.fetch(request, self.request_timeout).await?)
    }

    /// Fetches a finished task's output with retries.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` or the first non-retryable transport error.
    pub async fn output(&self, process_id: &str) -> Result<OutputResponse> {
        let path = format!("/output/{process_id}");
        with_retry(&self.retry, "output", move || {
            self.fetch(HttpRequest::get(path.as_str()), self.request_timeout)
        })
        .await
    }

    /// Asks the backend to stop a task.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn stop(&self, process_id: &str) -> Result<StopResponse> {
        let request = HttpRequest::post(format!("/stop/{process_id}"));
        Ok(self.fetch(request, self.request_timeout).await?)
    }

    /// Lists the steps the backend can run.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn steps(&self) -> Result<StepsResponse> {
        Ok(self.fetch(HttpRequest::get("/steps"), self.request_timeout).await?)
    }

    /// Backend task statistics.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn stats(&self) -> Result<SystemStats> {
        Ok(self.fetch(HttpRequest::get("/stats"), self.request_timeout).await?)
    }

    /// Most recent task records, newest first.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn tasks(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        let request = HttpRequest::get("/tasks").with_query("limit", limit);
        Ok(self.fetch(request, self.request_timeout).await?)
    }

    /// Triggers an immediate cleanup of finished tasks.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn cleanup_now(&self) -> Result<CleanupResponse> {
        Ok(self.fetch(HttpRequest::post("/cleanup/now"), self.request_timeout).await?)
    }

    /// Reads the daily cleanup schedule.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub async fn cleanup_schedule(&self) -> Result<CleanupScheduleInfo> {
        Ok(self.fetch(HttpRequest::get("/cleanup/schedule"), self.request_timeout).await?)
    }

    /// Updates the daily cleanup schedule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` for an invalid schedule, or any
    /// transport error.
    pub async fn set_cleanup_schedule(&self, schedule: &CleanupSchedule) -> Result<CleanupScheduleInfo> {
        schedule.validate()?;
        let request = HttpRequest::post("/cleanup/schedule").with_body(serde_json::to_value(schedule)?);
        Ok(self.fetch(request, self.request_timeout).await?)
    }
}
