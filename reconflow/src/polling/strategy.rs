//! The two polling loops.
//!
//! [`StandardPolling`] is health-gated, retries network blips at the poll
//! level and enforces both an attempt and a wall-clock budget.
//! [`LegacyPolling`] makes one direct status call per tick on a longer
//! fixed interval; any error ends the task. The orchestrator picks one at
//! construction time.

use super::session::PollingSession;
use crate::config::{EngineConfig, PollingMode};
use crate::core::RemoteStatus;
use crate::errors::ReconflowError;
use crate::utils::duration_ms;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A polling loop run to completion against one session.
#[async_trait]
pub trait PollingStrategy: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Polls until the session delivers its terminal event.
    async fn poll(&self, session: &mut PollingSession);
}

/// Builds the strategy the configuration selects.
#[must_use]
pub fn strategy_for(config: &EngineConfig) -> Arc<dyn PollingStrategy> {
    match config.mode {
        PollingMode::Standard => Arc::new(StandardPolling::from_config(config)),
        PollingMode::Legacy => Arc::new(LegacyPolling::from_config(config)),
    }
}

/// Health-gated polling with poll-level network retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardPolling {
    /// Interval between status checks.
    pub interval: Duration,
    /// Status checks before timing out.
    pub max_attempts: u32,
    /// Period of forced health probes.
    pub health_check_interval: Duration,
    /// Wall-clock budget.
    pub task_timeout: Duration,
    /// Poll-level retries of a network blip.
    pub network_retry_attempts: u32,
    /// Delay between poll-level retries.
    pub network_retry_delay: Duration,
}

impl StandardPolling {
    /// Reads the budgets from the configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
            health_check_interval: config.health_check_interval(),
            task_timeout: config.task_timeout(),
            network_retry_attempts: config.network_retry_attempts,
            network_retry_delay: config.network_retry_delay(),
        }
    }
}

#[async_trait]
impl PollingStrategy for StandardPolling {
    fn name(&self) -> &'static str {
        "standard"
    }

    async fn poll(&self, session: &mut PollingSession) {
        let mut next_health_check = self.health_check_interval;
        let mut network_retries: u32 = 0;
        let mut last_status: Option<RemoteStatus> = None;

        while !session.is_finished() {
            if session.is_cancelled() {
                session.finish_cancelled();
                break;
            }

            if session.elapsed() >= next_health_check {
                next_health_check = session.elapsed() + self.health_check_interval;
                if !session.health().is_healthy(true).await {
                    tracing::warn!(
                        node_id = %session.node_id(),
                        process_id = %session.process_id(),
                        "Backend unreachable while polling"
                    );
                    session.finish_error(ReconflowError::BackendUnhealthy);
                    break;
                }
            }

            if session.elapsed() >= self.task_timeout {
                session.finish_deadline_exceeded(self.task_timeout);
                break;
            }

            let status = match session.client().status(session.process_id()).await {
                Ok(status) => status,
                Err(e) if e.is_network_blip() => {
                    network_retries += 1;
                    if network_retries > self.network_retry_attempts {
                        session.finish_error(e);
                        break;
                    }
                    tracing::debug!(
                        node_id = %session.node_id(),
                        process_id = %session.process_id(),
                        retry_attempt = network_retries,
                        delay_ms = duration_ms(self.network_retry_delay),
                        error = %e,
                        "Network error while polling, retrying"
                    );
                    session.emit_progress(
                        self.max_attempts,
                        last_status.clone(),
                        Some(network_retries),
                    );
                    if !session.token().sleep(self.network_retry_delay).await {
                        session.finish_cancelled();
                    }
                    continue;
                }
                Err(e) => {
                    session.finish_error(e);
                    break;
                }
            };
            network_retries = 0;

            if session.is_cancelled() {
                session.finish_cancelled();
                break;
            }

            match &status.status {
                RemoteStatus::Completed => session.resolve_completed(&status).await,
                s if s.is_failure() => session.resolve_failed(&status),
                other => {
                    last_status = Some(other.clone());
                    let attempt = session.record_attempt();
                    session.emit_progress(self.max_attempts, last_status.clone(), None);
                    if attempt >= self.max_attempts {
                        session.finish_attempts_exhausted(self.max_attempts, self.interval);
                    } else if !session.token().sleep(self.interval).await {
                        session.finish_cancelled();
                    }
                }
            }
        }
    }
}

/// Direct polling with no health gating and no network retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPolling {
    /// Fixed interval between status checks.
    pub interval: Duration,
    /// Status checks before timing out.
    pub max_attempts: u32,
}

impl LegacyPolling {
    /// Reads the legacy budgets from the configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.legacy.poll_interval(),
            max_attempts: config.legacy.max_poll_attempts,
        }
    }
}

#[async_trait]
impl PollingStrategy for LegacyPolling {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn poll(&self, session: &mut PollingSession) {
        while !session.is_finished() {
            if session.is_cancelled() {
                session.finish_cancelled();
                break;
            }

            let status = match session.client().status_once(session.process_id()).await {
                Ok(status) => status,
                Err(e) => {
                    session.finish_error(e);
                    break;
                }
            };

            if session.is_cancelled() {
                session.finish_cancelled();
                break;
            }

            match &status.status {
                RemoteStatus::Completed => session.resolve_completed(&status).await,
                s if s.is_failure() => session.resolve_failed(&status),
                other => {
                    let attempt = session.record_attempt();
                    session.emit_progress(self.max_attempts, Some(other.clone()), None);
                    if attempt >= self.max_attempts {
                        session.finish_attempts_exhausted(self.max_attempts, self.interval);
                    } else if !session.token().sleep(self.interval).await {
                        session.finish_cancelled();
                    }
                }
            }
        }
    }
}
