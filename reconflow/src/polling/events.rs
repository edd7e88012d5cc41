//! Events delivered by a polling session.

use crate::core::{NodeOutput, RemoteStatus};
use crate::errors::ReconflowError;
use std::time::Duration;

/// A non-terminal observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PollProgress {
    /// Status checks counted against the attempt budget so far.
    pub attempt: u32,
    /// The attempt budget.
    pub max_attempts: u32,
    /// Last status the backend reported.
    pub remote_status: Option<RemoteStatus>,
    /// Set while a network blip is being retried.
    pub retry_attempt: Option<u32>,
    /// Time since the session started.
    pub elapsed: Duration,
}

/// The single result type of a session: any number of progress events
/// followed by exactly one terminal event.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// The task is still active.
    Progress(PollProgress),
    /// The task finished with a clean output.
    Completed(NodeOutput),
    /// The task failed, timed out, was cancelled, or became unreachable.
    Failed(ReconflowError),
}

impl PollEvent {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}
