//! Engine configuration.
//!
//! Every tunable has a default, so an empty JSON object is a valid
//! configuration. Values are layered: defaults, then an optional JSON file,
//! then `RECONFLOW_*` environment variables, then validation.

use crate::errors::{ReconflowError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Upper bound for any configured duration: thirty days.
const MAX_SECONDS: f64 = 30.0 * 24.0 * 3600.0;

/// Converts configured seconds, clamping values no `Duration` can hold.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_SECONDS)).unwrap_or(Duration::ZERO)
}

/// Which polling strategy the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    /// Health-gated polling with retries.
    #[default]
    Standard,
    /// Direct polling with a longer interval and no health gating.
    Legacy,
}

impl fmt::Display for PollingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl std::str::FromStr for PollingMode {
    type Err = ReconflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "legacy" => Ok(Self::Legacy),
            other => Err(ReconflowError::Config(format!(
                "unknown polling mode '{other}' (expected 'standard' or 'legacy')"
            ))),
        }
    }
}

/// Budgets used by the legacy polling strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Fixed interval between status checks.
    #[serde(default = "default_legacy_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Status checks before the task is declared timed out.
    #[serde(default = "default_legacy_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_legacy_poll_interval() -> f64 {
    5.0
}

fn default_legacy_max_poll_attempts() -> u32 {
    720
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_legacy_poll_interval(),
            max_poll_attempts: default_legacy_max_poll_attempts(),
        }
    }
}

impl LegacyConfig {
    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds)
    }
}

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backend base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for a single HTTP call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// Interval between status checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Status checks before the task is declared timed out.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Attempts for start, status and output calls.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base of the linear backoff between attempts.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: f64,
    /// Health cache lifetime and forced re-probe period while polling.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: f64,
    /// Deadline for one health probe.
    #[serde(default = "default_health_probe_timeout")]
    pub health_probe_timeout_seconds: f64,
    /// Wall-clock budget for one polling session.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: f64,
    /// Poll-level retries of a network blip.
    #[serde(default = "default_network_retry_attempts")]
    pub network_retry_attempts: u32,
    /// Delay between poll-level network retries.
    #[serde(default = "default_network_retry_delay")]
    pub network_retry_delay_seconds: f64,
    /// Idle connections kept per host by the HTTP client.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    /// Polling strategy.
    #[serde(default)]
    pub mode: PollingMode,
    /// Legacy strategy budgets.
    #[serde(default)]
    pub legacy: LegacyConfig,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_max_poll_attempts() -> u32 {
    900
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> f64 {
    1.0
}

fn default_health_check_interval() -> f64 {
    30.0
}

fn default_health_probe_timeout() -> f64 {
    5.0
}

fn default_task_timeout() -> f64 {
    1800.0
}

fn default_network_retry_attempts() -> u32 {
    5
}

fn default_network_retry_delay() -> f64 {
    5.0
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            poll_interval_seconds: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_seconds: default_retry_base_delay(),
            health_check_interval_seconds: default_health_check_interval(),
            health_probe_timeout_seconds: default_health_probe_timeout(),
            task_timeout_seconds: default_task_timeout(),
            network_retry_attempts: default_network_retry_attempts(),
            network_retry_delay_seconds: default_network_retry_delay(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            mode: PollingMode::default(),
            legacy: LegacyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReconflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ReconflowError::Config(format!("invalid {}: {e}", path.display())))
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Loads the optional file, applies the environment and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `RECONFLOW_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RECONFLOW_BASE_URL") {
            self.base_url = url;
        }
        if let Some(v) = lookup("RECONFLOW_REQUEST_TIMEOUT") {
            self.request_timeout_seconds = parse_env("RECONFLOW_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_POLL_INTERVAL") {
            self.poll_interval_seconds = parse_env("RECONFLOW_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_MAX_POLL_ATTEMPTS") {
            self.max_poll_attempts = parse_env("RECONFLOW_MAX_POLL_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_RETRY_ATTEMPTS") {
            self.retry_attempts = parse_env("RECONFLOW_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_HEALTH_CHECK_INTERVAL") {
            self.health_check_interval_seconds =
                parse_env("RECONFLOW_HEALTH_CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_TASK_TIMEOUT") {
            self.task_timeout_seconds = parse_env("RECONFLOW_TASK_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("RECONFLOW_MODE") {
            self.mode = v.parse()?;
        }
        Ok(self)
    }

    /// Checks that durations are positive and budgets non-zero.
    ///
    /// # Errors
    ///
    /// Returns `ReconflowError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ReconflowError::Config(format!("base_url '{}': {e}", self.base_url)))?;

        let durations = [
            ("request_timeout_seconds", self.request_timeout_seconds),
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("health_check_interval_seconds", self.health_check_interval_seconds),
            ("health_probe_timeout_seconds", self.health_probe_timeout_seconds),
            ("task_timeout_seconds", self.task_timeout_seconds),
            ("legacy.poll_interval_seconds", self.legacy.poll_interval_seconds),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value <= 0.0 || value > MAX_SECONDS {
                return Err(ReconflowError::Config(format!(
                    "{name} must be a positive number of seconds up to {MAX_SECONDS}, got {value}"
                )));
            }
        }

        let delays = [
            ("retry_base_delay_seconds", self.retry_base_delay_seconds),
            ("network_retry_delay_seconds", self.network_retry_delay_seconds),
        ];
        for (name, value) in delays {
            if !value.is_finite() || !(0.0..=MAX_SECONDS).contains(&value) {
                return Err(ReconflowError::Config(format!(
                    "{name} must be between 0 and {MAX_SECONDS} seconds, got {value}"
                )));
            }
        }

        let budgets = [
            ("max_poll_attempts", self.max_poll_attempts),
            ("retry_attempts", self.retry_attempts),
            ("legacy.max_poll_attempts", self.legacy.max_poll_attempts),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(ReconflowError::Config(format!("{name} must be at least 1")));
            }
        }

        Ok(())
    }

    /// Sets the backend base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sets the status-check budget.
    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts;
        self
    }

    /// Sets the attempts and backoff base for retried calls.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_base_delay_seconds = base_delay.as_secs_f64();
        self
    }

    /// Sets the health cache lifetime.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sets the health probe deadline.
    #[must_use]
    pub fn with_health_probe_timeout(mut self, timeout: Duration) -> Self {
        self.health_probe_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the wall-clock budget per session.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the poll-level network retry cap and delay.
    #[must_use]
    pub fn with_network_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.network_retry_attempts = attempts;
        self.network_retry_delay_seconds = delay.as_secs_f64();
        self
    }

    /// Sets the polling strategy.
    #[must_use]
    pub fn with_mode(mut self, mode: PollingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the legacy strategy budgets.
    #[must_use]
    pub fn with_legacy(mut self, interval: Duration, max_poll_attempts: u32) -> Self {
        self.legacy.poll_interval_seconds = interval.as_secs_f64();
        self.legacy.max_poll_attempts = max_poll_attempts;
        self
    }

    /// Gets the request timeout as Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds)
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds)
    }

    /// Gets the retry base delay as Duration.
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        seconds(self.retry_base_delay_seconds)
    }

    /// Gets the health check interval as Duration.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        seconds(self.health_check_interval_seconds)
    }

    /// Gets the health probe timeout as Duration.
    #[must_use]
    pub fn health_probe_timeout(&self) -> Duration {
        seconds(self.health_probe_timeout_seconds)
    }

    /// Gets the task timeout as Duration.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        seconds(self.task_timeout_seconds)
    }

    /// Gets the network retry delay as Duration.
    #[must_use]
    pub fn network_retry_delay(&self) -> Duration {
        seconds(self.network_retry_delay_seconds)
    }

    /// The policy used for start, status and output calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay())
            .with_timeout_per_attempt(self.request_timeout())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ReconflowError::Config(format!("{key}='{value}': {e}")))
}
