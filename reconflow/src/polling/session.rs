//! Per-task polling state and exactly-once terminal delivery.

use super::events::{PollEvent, PollProgress};
use crate::cancellation::{CancellationSet, CancellationToken};
use crate::core::{NodeId, NodeOutput, RemoteStatus, TaskHandle};
use crate::errors::ReconflowError;
use crate::health::HealthMonitor;
use crate::transport::models::StatusResponse;
use crate::transport::BackendClient;
use crate::utils::format_duration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Shared services a session polls through.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Backend calls.
    pub client: BackendClient,
    /// Liveness gate.
    pub health: Arc<HealthMonitor>,
    /// Nodes the operator cancelled.
    pub cancelled: Arc<CancellationSet>,
}

/// The polling loop's state for one remote task.
///
/// Events go to a single consumer. [`Self::finish`] delivers the terminal
/// event at most once; afterwards every emit is dropped.
#[derive(Debug)]
pub struct PollingSession {
    node_id: NodeId,
    process_id: String,
    context: SessionContext,
    token: Arc<CancellationToken>,
    events: mpsc::UnboundedSender<PollEvent>,
    started: Instant,
    attempts: u32,
    finished: bool,
}

impl PollingSession {
    /// Creates a session for a started task.
    #[must_use]
    pub fn new(
        handle: &TaskHandle,
        context: SessionContext,
        token: Arc<CancellationToken>,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        Self {
            node_id: handle.node_id.clone(),
            process_id: handle.process_id.clone(),
            context,
            token,
            events,
            started: Instant::now(),
            attempts: 0,
            finished: false,
        }
    }

    /// The polled node.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The polled task.
    #[must_use]
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Backend calls.
    #[must_use]
    pub fn client(&self) -> &BackendClient {
        &self.context.client
    }

    /// Liveness gate.
    #[must_use]
    pub fn health(&self) -> &HealthMonitor {
        &self.context.health
    }

    /// The session's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Status checks counted so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Counts one status check and returns the new total.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the terminal event was delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the operator cancelled this session or its node.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.context.cancelled.contains(&self.node_id)
    }

    /// Sends a progress event unless the session finished.
    pub fn emit_progress(
        &self,
        max_attempts: u32,
        remote_status: Option<RemoteStatus>,
        retry_attempt: Option<u32>,
    ) {
        if self.finished {
            return;
        }
        let progress = PollProgress {
            attempt: self.attempts,
            max_attempts,
            remote_status,
            retry_attempt,
            elapsed: self.elapsed(),
        };
        // The consumer may be gone after a cancel; nothing to deliver to.
        let _ = self.events.send(PollEvent::Progress(progress));
    }

    /// Delivers the terminal event. Returns false if one was already sent.
    pub fn finish(&mut self, event: PollEvent) -> bool {
        if self.finished || !event.is_terminal() {
            return false;
        }
        self.finished = true;

        match &event {
            PollEvent::Completed(_) => tracing::debug!(
                node_id = %self.node_id,
                process_id = %self.process_id,
                attempts = self.attempts,
                "Polling completed"
            ),
            PollEvent::Failed(e) => tracing::debug!(
                node_id = %self.node_id,
                process_id = %self.process_id,
                attempts = self.attempts,
                kind = e.kind(),
                error = %e,
                "Polling ended"
            ),
            PollEvent::Progress(_) => {}
        }

        let _ = self.events.send(event);
        true
    }

    /// Terminates as cancelled.
    pub fn finish_cancelled(&mut self) {
        let node = self.node_id.clone();
        self.finish(PollEvent::Failed(ReconflowError::LocallyCancelled(node)));
    }

    /// Terminates with an error, preferring cancellation.
    pub fn finish_error(&mut self, error: ReconflowError) {
        if self.is_cancelled() {
            self.finish_cancelled();
        } else {
            self.finish(PollEvent::Failed(error));
        }
    }

    /// Terminates after the attempt budget ran out.
    pub fn finish_attempts_exhausted(&mut self, max_attempts: u32, interval: Duration) {
        let budget = interval.saturating_mul(max_attempts);
        let message = format!(
            "Task timed out after {max_attempts} status checks ({} at {} intervals)",
            format_duration(budget),
            format_duration(interval)
        );
        let attempts = self.attempts;
        self.finish(PollEvent::Failed(ReconflowError::RemoteTaskTimedOut {
            attempts,
            message,
        }));
    }

    /// Terminates after the wall-clock budget ran out.
    pub fn finish_deadline_exceeded(&mut self, task_timeout: Duration) {
        let message = format!(
            "Task timed out after {} ({} status checks)",
            format_duration(task_timeout),
            self.attempts
        );
        let attempts = self.attempts;
        self.finish(PollEvent::Failed(ReconflowError::RemoteTaskTimedOut {
            attempts,
            message,
        }));
    }

    /// Resolves a `completed` status: fetch the output and check it.
    pub async fn resolve_completed(&mut self, status: &StatusResponse) {
        let output = match self.context.client.output(&self.process_id).await {
            Ok(response) if !response.output.is_null() => NodeOutput::new(response.output),
            Ok(_) => status.inline_output().unwrap_or_default(),
            Err(e) => match status.inline_output() {
                Some(inline) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        process_id = %self.process_id,
                        error = %e,
                        "Output fetch failed, using output from status"
                    );
                    inline
                }
                None => {
                    self.finish_error(e);
                    return;
                }
            },
        };

        if self.is_cancelled() {
            self.finish_cancelled();
            return;
        }

        match output.failure_reason() {
            Some(reason) => {
                self.finish(PollEvent::Failed(ReconflowError::RemoteTaskFailed(reason)));
            }
            None => {
                self.finish(PollEvent::Completed(output));
            }
        }
    }

    /// Resolves a `failed`, `cancelled` or `stopped` status.
    ///
    /// A task stopped on the backend ends the node `stopped`, whoever
    /// issued the stop.
    pub fn resolve_failed(&mut self, status: &StatusResponse) {
        if self.is_cancelled() {
            self.finish_cancelled();
        } else if status.status.is_cancellation() {
            tracing::info!(
                node_id = %self.node_id,
                process_id = %self.process_id,
                remote_status = %status.status,
                "Task stopped on the backend"
            );
            self.finish_cancelled();
        } else {
            let message = status.failure_message();
            self.finish(PollEvent::Failed(ReconflowError::RemoteTaskFailed(message)));
        }
    }
}
