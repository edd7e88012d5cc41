//! Test fixtures for engine tests.

use std::time::Duration;

use serde_json::{json, Value};

use super::MockBackend;
use crate::config::EngineConfig;

/// A configuration with millisecond budgets.
///
/// Retried calls make a single attempt so scripts map one-to-one onto
/// calls; tests that exercise retries override it.
#[must_use]
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_base_url("http://mock.invalid")
        .with_request_timeout(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(5))
        .with_max_poll_attempts(50)
        .with_retry(1, Duration::from_millis(1))
        .with_health_check_interval(Duration::from_secs(3600))
        .with_health_probe_timeout(Duration::from_millis(200))
        .with_task_timeout(Duration::from_secs(10))
        .with_network_retry(2, Duration::from_millis(5))
        .with_legacy(Duration::from_millis(5), 20)
}

/// A status body.
#[must_use]
pub fn status_body(status: &str) -> Value {
    json!({ "status": status })
}

/// The process id the scripted backend assigns to a node.
#[must_use]
pub fn process_id(node: &str) -> String {
    format!("proc-{node}")
}

/// A backend that answers healthy.
#[must_use]
pub fn healthy_backend() -> MockBackend {
    let backend = MockBackend::new();
    backend.respond_json("GET", "/health", json!({"status": "healthy"}));
    backend
}

/// Scripts a start answer for a node.
pub fn script_start(backend: &MockBackend, node: &str) {
    backend.respond_json(
        "POST",
        &format!("/run/{node}"),
        json!({
            "task_id": process_id(node),
            "status": "started",
            "pid": 4242,
            "thread_id": 7,
            "step_name": node,
        }),
    );
}

/// Scripts a node that runs for `running_polls` checks, then completes
/// with `output`.
pub fn script_success(backend: &MockBackend, node: &str, running_polls: usize, output: Value) {
    let pid = process_id(node);
    script_start(backend, node);
    for _ in 0..running_polls {
        backend.push_json("GET", &format!("/status/{pid}"), status_body("running"));
    }
    backend.push_json("GET", &format!("/status/{pid}"), status_body("completed"));
    backend.respond_json("GET", &format!("/output/{pid}"), json!({ "output": output }));
}

/// Scripts a node whose task reports `failed` with an error.
pub fn script_failure(backend: &MockBackend, node: &str, error: &str) {
    let pid = process_id(node);
    script_start(backend, node);
    backend.respond_json(
        "GET",
        &format!("/status/{pid}"),
        json!({ "status": "failed", "error": error }),
    );
}

/// Scripts a node that never leaves `running`.
pub fn script_running(backend: &MockBackend, node: &str) {
    let pid = process_id(node);
    script_start(backend, node);
    backend.respond_json("GET", &format!("/status/{pid}"), status_body("running"));
    backend.respond_json(
        "POST",
        &format!("/stop/{pid}"),
        json!({ "status": "cancelled", "task_id": pid }),
    );
}
