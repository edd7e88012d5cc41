//! Cached backend liveness.
//!
//! One [`HealthMonitor`] exists per orchestrator. Starting and polling are
//! gated on it; a background tick keeps the cache fresh for display.

use crate::transport::BackendClient;
use crate::utils::{now_utc, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Last known backend liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    /// Result of the last probe; false before the first one.
    pub is_healthy: bool,
    /// When the last probe finished.
    pub last_checked_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct Cache {
    state: HealthState,
    checked: Option<Instant>,
}

/// Probes `GET /health` and caches the answer.
#[derive(Debug)]
pub struct HealthMonitor {
    client: BackendClient,
    interval: Duration,
    probe_timeout: Duration,
    cache: Mutex<Cache>,
    probe_gate: tokio::sync::Mutex<()>,
    updates: watch::Sender<HealthState>,
}

impl HealthMonitor {
    /// Creates a monitor with an empty cache.
    #[must_use]
    pub fn new(client: BackendClient, interval: Duration, probe_timeout: Duration) -> Self {
        let (updates, _) = watch::channel(HealthState::default());
        Self {
            client,
            interval,
            probe_timeout,
            cache: Mutex::new(Cache::default()),
            probe_gate: tokio::sync::Mutex::new(()),
            updates,
        }
    }

    /// The cache lifetime and background tick period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the cached liveness, probing first when forced or stale.
    ///
    /// Never fails: any probe error counts as unhealthy.
    pub async fn is_healthy(&self, force: bool) -> bool {
        if !force {
            if let Some(cached) = self.fresh() {
                return cached;
            }
        }

        let _gate = self.probe_gate.lock().await;
        // A concurrent caller may have refreshed the cache while we waited.
        if !force {
            if let Some(cached) = self.fresh() {
                return cached;
            }
        }

        let healthy = self.probe().await;
        self.store(healthy);
        healthy
    }

    /// The last stored state without probing.
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.cache.lock().state
    }

    /// Receives every stored state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.updates.subscribe()
    }

    /// Spawns the fixed-interval refresh. The owner aborts the handle.
    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.is_healthy(true).await;
            }
        })
    }

    fn fresh(&self) -> Option<bool> {
        let cache = self.cache.lock();
        cache
            .checked
            .filter(|checked| checked.elapsed() < self.interval)
            .map(|_| cache.state.is_healthy)
    }

    async fn probe(&self) -> bool {
        match self.client.health(self.probe_timeout).await {
            Ok(body) if body.is_healthy() => true,
            Ok(body) => {
                tracing::debug!(error = ?body.error, "Backend reports unhealthy");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                false
            }
        }
    }

    fn store(&self, healthy: bool) {
        let state = HealthState {
            is_healthy: healthy,
            last_checked_at: Some(now_utc()),
        };
        let previous = {
            let mut cache = self.cache.lock();
            let previous = cache.checked.map(|_| cache.state.is_healthy);
            cache.state = state;
            cache.checked = Some(Instant::now());
            previous
        };

        match (previous, healthy) {
            (Some(false) | None, true) => tracing::info!("Backend is healthy"),
            (Some(true) | None, false) => tracing::warn!("Backend is unreachable or unhealthy"),
            _ => {}
        }
        self.updates.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::MockBackend;
    use serde_json::json;

    fn monitor(backend: &MockBackend, interval: Duration) -> Arc<HealthMonitor> {
        let client = BackendClient::new(backend.transport(), &EngineConfig::default());
        Arc::new(HealthMonitor::new(client, interval, Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_cached_within_interval() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        let monitor = monitor(&backend, Duration::from_secs(30));

        assert!(monitor.is_healthy(false).await);
        assert!(monitor.is_healthy(false).await);
        assert_eq!(backend.calls("GET", "/health"), 1);
    }

    #[tokio::test]
    async fn test_force_always_probes() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        let monitor = monitor(&backend, Duration::from_secs(30));

        monitor.is_healthy(false).await;
        monitor.is_healthy(true).await;
        assert_eq!(backend.calls("GET", "/health"), 2);
    }

    #[tokio::test]
    async fn test_stale_cache_reprobes() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        let monitor = monitor(&backend, Duration::from_millis(20));

        monitor.is_healthy(false).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        monitor.is_healthy(false).await;
        assert_eq!(backend.calls("GET", "/health"), 2);
    }

    #[tokio::test]
    async fn test_probe_failures_are_unhealthy() {
        let backend = MockBackend::new();
        backend.respond_status("GET", "/health", 503, "down");
        let monitor = monitor(&backend, Duration::from_secs(30));
        assert!(!monitor.is_healthy(true).await);

        backend.respond_json("GET", "/health", json!({"status": "unhealthy"}));
        assert!(!monitor.is_healthy(true).await);

        backend.respond_network_error("GET", "/health");
        assert!(!monitor.is_healthy(true).await);

        let state = monitor.state();
        assert!(!state.is_healthy);
        assert!(state.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_slow_probe_times_out_unhealthy() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        backend.set_latency(Duration::from_millis(500));
        let monitor = monitor(&backend, Duration::from_secs(30));

        assert!(!monitor.is_healthy(true).await);
    }

    #[tokio::test]
    async fn test_subscribe_sees_updates() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        let monitor = monitor(&backend, Duration::from_secs(30));
        let mut rx = monitor.subscribe();

        monitor.is_healthy(true).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_healthy);
    }

    #[tokio::test]
    async fn test_background_tick_refreshes() {
        let backend = MockBackend::new();
        backend.respond_json("GET", "/health", json!({"status": "healthy"}));
        let monitor = monitor(&backend, Duration::from_millis(10));

        let handle = monitor.spawn_background();
        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.abort();

        assert!(backend.calls("GET", "/health") >= 3);
        assert!(monitor.state().is_healthy);
    }
}
