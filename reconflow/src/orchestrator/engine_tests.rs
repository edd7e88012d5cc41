//! End-to-end scenarios for the orchestrator against a scripted backend.

#[cfg(test)]
mod tests {
    use crate::config::{EngineConfig, PollingMode};
    use crate::core::{NodeId, NodeOutput, NodeStatus, RunParameters};
    use crate::errors::{ReconflowError, TransportError};
    use crate::orchestrator::{NodeOrchestrator, NodeSpec, PipelineGraph};
    use crate::testing::fixtures::{
        fast_config, healthy_backend, process_id, script_failure, script_running, script_start,
        script_success, status_body,
    };
    use crate::testing::MockBackend;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn chain_graph() -> PipelineGraph {
        PipelineGraph::new(vec![
            NodeSpec::new("a"),
            NodeSpec::new("b").depends_on(["a"]),
            NodeSpec::new("c").depends_on(["b"]),
            NodeSpec::new("x"),
        ])
        .unwrap()
    }

    fn orchestrator(backend: &MockBackend, config: EngineConfig) -> NodeOrchestrator {
        NodeOrchestrator::new(config, backend.transport(), chain_graph()).unwrap()
    }

    fn id(name: &str) -> NodeId {
        NodeId::from(name)
    }

    async fn wait_for(orch: &NodeOrchestrator, node: &str, status: NodeStatus) {
        for _ in 0..500 {
            if orch.state(&id(node)).status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("{node} never reached {status}: {:?}", orch.state(&id(node)));
    }

    #[tokio::test]
    async fn test_run_completes_with_output() {
        let backend = healthy_backend();
        script_success(&backend, "a", 2, json!({"status": "success", "count": "42"}));
        let orch = orchestrator(&backend, fast_config());

        let output = orch.run("a").await.unwrap();

        assert_eq!(output.get("count"), Some(&json!("42")));
        let record = orch.state(&id("a"));
        assert_eq!(record.status, NodeStatus::Completed);
        assert_eq!(record.process_id.as_deref(), Some("proc-a"));
        assert!(record.start_time.is_none());
        assert_eq!(orch.output(&id("a")), Some(output));
        assert_eq!(orch.active_tasks(), 0);
        assert_eq!(backend.calls("POST", "/run/a"), 1);
        assert_eq!(backend.calls("GET", "/status/proc-a"), 3);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_node_is_not_started() {
        let backend = healthy_backend();
        script_failure(&backend, "a", "file missing");
        script_start(&backend, "b");
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("a").await.unwrap_err();
        assert!(matches!(err, ReconflowError::RemoteTaskFailed(ref m) if m == "file missing"));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Failed);
        assert_eq!(
            orch.output(&id("a")).unwrap().fail_message(),
            Some("Remote task failed: file missing")
        );

        let err = orch.run("b").await.unwrap_err();
        match err {
            ReconflowError::DependencyFailed { dependency, dependency_status, .. } => {
                assert_eq!(dependency, id("a"));
                assert_eq!(dependency_status, NodeStatus::Failed);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(orch.state(&id("b")).status, NodeStatus::Failed);
        assert!(orch.output(&id("b")).unwrap().fail_message().unwrap().contains("dependency 'a'"));
        assert_eq!(backend.calls("POST", "/run/b"), 0);
    }

    #[tokio::test]
    async fn test_dependency_never_run_blocks_start() {
        let backend = healthy_backend();
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("b").await.unwrap_err();
        assert!(matches!(
            err,
            ReconflowError::DependencyFailed { dependency_status: NodeStatus::Idle, .. }
        ));
        assert_eq!(backend.calls_with_prefix("POST", "/run/"), 0);
    }

    #[tokio::test]
    async fn test_tainted_output_is_never_forwarded() {
        let backend = healthy_backend();
        script_success(
            &backend,
            "a",
            0,
            json!({"status": "failed", "fail_message": "Input file not found"}),
        );
        script_start(&backend, "b");
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("a").await.unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Failed);
        let output = orch.output(&id("a")).unwrap();
        assert!(output.fail_message().unwrap().contains("Input file not found"));

        assert!(orch.run("b").await.is_err());
        assert_eq!(backend.calls("POST", "/run/b"), 0);
    }

    #[tokio::test]
    async fn test_request_carries_transitive_outputs_and_custom_params() {
        let backend = healthy_backend();
        script_success(&backend, "a", 0, json!({"rows": 10}));
        script_success(&backend, "b", 0, json!({"rows": 8}));
        script_success(&backend, "c", 0, json!({"rows": 5}));

        let mut params = Map::new();
        params.insert("threshold".to_string(), json!(0.5));
        let orch = NodeOrchestrator::builder(fast_config(), chain_graph())
            .with_transport(backend.transport())
            .with_parameters(RunParameters::default().with_run_date("2024-03-31"))
            .with_custom_params("c", params)
            .build()
            .unwrap();

        orch.run("a").await.unwrap();
        orch.run("b").await.unwrap();
        orch.run("c").await.unwrap();

        let body = backend.last_body("POST", "/run/c").unwrap();
        assert_eq!(body["parameters"]["expectedRunDate"], "2024-03-31");
        assert_eq!(body["previous_outputs"]["a"], json!({"rows": 10}));
        assert_eq!(body["previous_outputs"]["b"], json!({"rows": 8}));
        assert_eq!(body["custom_params"]["threshold"], json!(0.5));

        let body = backend.last_body("POST", "/run/a").unwrap();
        assert_eq!(body["previous_outputs"], json!({}));
    }

    #[tokio::test]
    async fn test_unhealthy_backend_blocks_start() {
        let backend = MockBackend::new();
        backend.respond_status("GET", "/health", 503, "down");
        script_start(&backend, "a");
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("a").await.unwrap_err();

        assert!(matches!(err, ReconflowError::BackendUnhealthy));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Failed);
        assert_eq!(backend.calls("POST", "/run/a"), 0);
        assert!(!orch.health_state().is_healthy);
    }

    #[tokio::test]
    async fn test_invalid_parameters_make_no_calls() {
        let backend = healthy_backend();
        let orch = orchestrator(&backend, fast_config());
        orch.set_parameters(RunParameters::default().with_run_date("31/03/2024"));

        let err = orch.run("a").await.unwrap_err();

        assert!(matches!(err, ReconflowError::InvalidParameters(_)));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Failed);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unaddressable_node_id_is_never_sent() {
        let backend = healthy_backend();
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("../stop/proc-a").await.unwrap_err();

        assert!(matches!(err, ReconflowError::InvalidParameters(_)));
        assert_eq!(orch.state(&id("../stop/proc-a")).status, NodeStatus::Failed);
        assert_eq!(backend.calls_with_prefix("POST", "/"), 0);
    }

    #[tokio::test]
    async fn test_start_failure_exhausts_retries() {
        let backend = healthy_backend();
        backend.respond_network_error("POST", "/run/a");
        let config = fast_config().with_retry(3, Duration::from_millis(1));
        let orch = orchestrator(&backend, config);

        let err = orch.run("a").await.unwrap_err();

        match err {
            ReconflowError::RetryExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, TransportError::Network(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.calls("POST", "/run/a"), 3);
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Failed);
        assert!(orch.output(&id("a")).unwrap().fail_message().unwrap().starts_with("Gave up after 3 attempts"));
        assert_eq!(orch.active_tasks(), 0);
        assert_eq!(backend.calls_with_prefix("GET", "/status/"), 0);
    }

    #[tokio::test]
    async fn test_attempt_budget_times_out() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        let orch = orchestrator(&backend, fast_config().with_max_poll_attempts(3));

        let err = orch.run("a").await.unwrap_err();

        assert!(matches!(err, ReconflowError::RemoteTaskTimedOut { attempts: 3, .. }));
        assert!(err.to_string().contains("after 3 status checks"));
        let record = orch.state(&id("a"));
        assert_eq!(record.status, NodeStatus::Timeout);
        assert_eq!(record.attempts, 3);
        let output = orch.output(&id("a")).unwrap();
        assert!(output.is_failure());
        assert_eq!(output.fail_message(), record.message.as_deref());
        assert!(output.fail_message().unwrap().contains("status checks ("));
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_late_failure() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        let orch = orchestrator(&backend, fast_config());

        let run = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run("a").await }
        });
        wait_for(&orch, "a", NodeStatus::Running).await;

        assert!(orch.cancel(&id("a")).await);
        backend.respond_json("GET", &format!("/status/{}", process_id("a")), status_body("failed"));

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ReconflowError::LocallyCancelled(_)));
        let record = orch.state(&id("a"));
        assert_eq!(record.status, NodeStatus::Stopped);
        assert_eq!(record.message.as_deref(), Some("Process stopped by user"));
        assert_eq!(orch.output(&id("a")), Some(NodeOutput::stopped()));
        assert_eq!(backend.calls("POST", "/stop/proc-a"), 1);
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_survives_stop_failure() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        backend.respond_network_error("POST", "/stop/proc-a");
        let orch = orchestrator(&backend, fast_config());

        let run = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run("a").await }
        });
        wait_for(&orch, "a", NodeStatus::Running).await;

        assert!(orch.cancel(&id("a")).await);
        assert!(run.await.unwrap().is_err());
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn test_cancel_while_queued_stops_started_task() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        backend.set_route_latency("POST", "/run/a", Duration::from_millis(60));
        let orch = orchestrator(&backend, fast_config());

        let run = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run("a").await }
        });
        wait_for(&orch, "a", NodeStatus::Queued).await;

        assert!(orch.cancel(&id("a")).await);
        let err = run.await.unwrap().unwrap_err();

        assert!(matches!(err, ReconflowError::LocallyCancelled(_)));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Stopped);
        assert_eq!(backend.calls("POST", "/stop/proc-a"), 1);
        assert_eq!(backend.calls_with_prefix("GET", "/status/"), 0);
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_around_start_always_stops_remote_task() {
        for delay_ms in 0..8 {
            let backend = healthy_backend();
            script_running(&backend, "a");
            backend.set_route_latency("POST", "/run/a", Duration::from_millis(4));
            let orch = orchestrator(&backend, fast_config());

            let run = tokio::spawn({
                let orch = orch.clone();
                async move { orch.run("a").await }
            });
            wait_for(&orch, "a", NodeStatus::Queued).await;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            assert!(orch.cancel(&id("a")).await);
            let err = run.await.unwrap().unwrap_err();

            assert!(matches!(err, ReconflowError::LocallyCancelled(_)), "delay {delay_ms}ms");
            assert_eq!(orch.state(&id("a")).status, NodeStatus::Stopped);
            assert_eq!(backend.calls("POST", "/stop/proc-a"), 1, "delay {delay_ms}ms");
            assert_eq!(orch.active_tasks(), 0);
        }
    }

    #[tokio::test]
    async fn test_task_stopped_on_backend_ends_stopped() {
        let backend = healthy_backend();
        script_start(&backend, "a");
        backend.respond_json("GET", &format!("/status/{}", process_id("a")), status_body("stopped"));
        let orch = orchestrator(&backend, fast_config());

        let err = orch.run("a").await.unwrap_err();

        assert!(matches!(err, ReconflowError::LocallyCancelled(_)));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Stopped);
        assert_eq!(orch.output(&id("a")), Some(NodeOutput::stopped()));
        assert_eq!(backend.calls("POST", "/stop/proc-a"), 0);
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_idle_node_is_noop() {
        let backend = healthy_backend();
        let orch = orchestrator(&backend, fast_config());

        assert!(!orch.cancel(&id("a")).await);
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Idle);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_while_active_is_busy() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        let orch = orchestrator(&backend, fast_config());

        let run = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run("a").await }
        });
        wait_for(&orch, "a", NodeStatus::Running).await;
        let generation = orch.state(&id("a")).generation;

        let err = orch.run("a").await.unwrap_err();
        assert!(matches!(err, ReconflowError::NodeBusy(_)));
        assert_eq!(orch.state(&id("a")).generation, generation);
        assert_eq!(backend.calls("POST", "/run/a"), 1);

        orch.cancel(&id("a")).await;
        let _ = run.await;
    }

    #[tokio::test]
    async fn test_stale_delivery_after_rerun_is_ignored() {
        let backend = healthy_backend();
        script_failure(&backend, "a", "first attempt broke");
        let orch = orchestrator(&backend, fast_config());

        assert!(orch.run("a").await.is_err());
        let first = orch.state(&id("a")).generation;

        backend.respond_json("GET", "/status/proc-a", status_body("completed"));
        backend.respond_json("GET", "/output/proc-a", json!({"output": {"rows": 1}}));
        orch.run("a").await.unwrap();
        let record = orch.state(&id("a"));
        assert_eq!(record.generation, first + 1);

        // A late answer from the first run must not override the second.
        let replayed = orch.store().finish(
            &id("a"),
            first,
            NodeStatus::Failed,
            None,
            Some("late".to_string()),
        );
        assert!(!replayed);
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Completed);
        assert_eq!(orch.output(&id("a")).unwrap().get("rows"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_rerun_after_cancel() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        let orch = orchestrator(&backend, fast_config());

        let run = tokio::spawn({
            let orch = orch.clone();
            async move { orch.run("a").await }
        });
        wait_for(&orch, "a", NodeStatus::Running).await;
        orch.cancel(&id("a")).await;
        let _ = run.await;

        backend.respond_json("GET", "/status/proc-a", status_body("completed"));
        backend.respond_json("GET", "/output/proc-a", json!({"output": {"ok": true}}));
        let output = orch.run("a").await.unwrap();

        assert_eq!(output.get("ok"), Some(&json!(true)));
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_pipeline_blocks_dependents_of_failures() {
        let backend = healthy_backend();
        script_success(&backend, "a", 1, json!({"rows": 10}));
        script_failure(&backend, "b", "rules invalid");
        script_start(&backend, "c");
        script_success(&backend, "x", 0, json!({"rows": 2}));
        let orch = orchestrator(&backend, fast_config());

        let summary = orch.run_pipeline().await;

        assert!(!summary.success());
        assert_eq!(summary.statuses[&id("a")], NodeStatus::Completed);
        assert_eq!(summary.statuses[&id("b")], NodeStatus::Failed);
        assert_eq!(summary.statuses[&id("c")], NodeStatus::Failed);
        assert_eq!(summary.statuses[&id("x")], NodeStatus::Completed);
        assert_eq!(summary.completed(), vec![&id("a"), &id("x")]);
        assert!(summary.errors[&id("c")].contains("dependency 'b' is failed"));
        assert_eq!(backend.calls("POST", "/run/c"), 0);
    }

    #[tokio::test]
    async fn test_run_pipeline_completeness_graph() {
        let backend = healthy_backend();
        let graph = PipelineGraph::completeness();
        for node in graph.nodes() {
            script_success(&backend, node.as_str(), 0, json!({"step": node.as_str()}));
        }
        let orch = NodeOrchestrator::new(fast_config(), backend.transport(), graph).unwrap();

        let summary = orch.run_pipeline().await;

        assert!(summary.success(), "{:?}", summary.errors);
        assert_eq!(summary.statuses.len(), 17);
        let body = backend.last_body("POST", "/run/break_rolling_comp").unwrap();
        let forwarded = body["previous_outputs"].as_object().unwrap();
        assert_eq!(forwarded.len(), 16);
        assert_eq!(forwarded["reading_config_comp"], json!({"step": "reading_config_comp"}));
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_tasks() {
        let backend = healthy_backend();
        script_running(&backend, "a");
        script_running(&backend, "x");
        let orch = orchestrator(&backend, fast_config());
        orch.start_health_monitor();

        let runs: Vec<_> = ["a", "x"]
            .into_iter()
            .map(|node| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.run(node).await })
            })
            .collect();
        wait_for(&orch, "a", NodeStatus::Running).await;
        wait_for(&orch, "x", NodeStatus::Running).await;

        orch.shutdown().await;

        for run in runs {
            assert!(matches!(
                run.await.unwrap(),
                Err(ReconflowError::LocallyCancelled(_))
            ));
        }
        assert_eq!(orch.active_tasks(), 0);
        assert_eq!(orch.state(&id("a")).status, NodeStatus::Stopped);
        assert_eq!(orch.state(&id("x")).status, NodeStatus::Stopped);
        assert_eq!(backend.calls("POST", "/stop/proc-a"), 1);
        assert_eq!(backend.calls("POST", "/stop/proc-x"), 1);
    }

    #[tokio::test]
    async fn test_legacy_mode_completes() {
        let backend = healthy_backend();
        script_success(&backend, "a", 3, json!({"rows": 4}));
        let orch = orchestrator(&backend, fast_config().with_mode(PollingMode::Legacy));

        let output = orch.run("a").await.unwrap();

        assert_eq!(output.get("rows"), Some(&json!(4)));
        assert_eq!(backend.calls("GET", "/health"), 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_run() {
        let backend = healthy_backend();
        script_success(&backend, "a", 1, json!({"rows": 1}));
        let orch = orchestrator(&backend, fast_config());
        let mut events = orch.subscribe();

        orch.run("a").await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            statuses.push(event.record.status);
        }
        assert_eq!(statuses.first(), Some(&NodeStatus::Queued));
        assert_eq!(statuses.last(), Some(&NodeStatus::Completed));
        assert!(statuses.contains(&NodeStatus::Running));
    }

    #[tokio::test]
    async fn test_snapshot_lists_touched_nodes() {
        let backend = healthy_backend();
        script_success(&backend, "x", 0, Value::Object(Map::new()));
        let orch = orchestrator(&backend, fast_config());

        orch.run("x").await.unwrap();
        let _ = orch.run("b").await;

        let snapshot = orch.snapshot();
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![id("b"), id("x")]);
    }
}
