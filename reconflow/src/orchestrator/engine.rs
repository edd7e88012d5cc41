//! The node orchestrator.
//!
//! Owns node lifecycle state and drives every run through the same
//! sequence: busy check, parameter validation, health gate (standard mode
//! only), dependency gate, request assembly, start, registration, polling,
//! finalisation.
//! The polling session runs on its own task and reports through an
//! unbounded channel; the consumer applies each event to the store under
//! the run's generation.

use super::graph::PipelineGraph;
use super::store::{NodeEvent, NodeStateStore};
use crate::cancellation::CancellationSet;
use crate::config::{EngineConfig, PollingMode};
use crate::core::{NodeId, NodeOutput, NodeRecord, NodeStatus, RunParameters, RunRequest, TaskHandle};
use crate::errors::{ReconflowError, Result};
use crate::health::{HealthMonitor, HealthState};
use crate::observability::{LoggingTracingEmitter, NodeSpanAttributes, SpanTimer, TracingEmitter};
use crate::polling::{strategy_for, PollEvent, PollingSession, PollingStrategy, SessionContext};
use crate::registry::{RegisteredTask, TaskRegistry};
use crate::transport::{BackendClient, HttpTransport, Transport};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RUN_SPAN: &str = "node.run";
const STOP_REASON: &str = "stopped by operator";

/// Final states of a [`NodeOrchestrator::run_pipeline`] call.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    /// Final status of every node of the graph.
    pub statuses: BTreeMap<NodeId, NodeStatus>,
    /// Error message of every node that did not complete.
    pub errors: BTreeMap<NodeId, String>,
    /// Wall-clock time of the whole run in milliseconds.
    pub duration_ms: f64,
}

impl PipelineSummary {
    /// Whether every node completed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.statuses.values().all(NodeStatus::is_success)
    }

    /// Nodes that completed.
    #[must_use]
    pub fn completed(&self) -> Vec<&NodeId> {
        self.with_status(|s| s.is_success())
    }

    /// Nodes that ended without an output.
    #[must_use]
    pub fn failed(&self) -> Vec<&NodeId> {
        self.with_status(|s| !s.is_success())
    }

    fn with_status(&self, pred: impl Fn(&NodeStatus) -> bool) -> Vec<&NodeId> {
        self.statuses
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(n, _)| n)
            .collect()
    }
}

/// Builder for [`NodeOrchestrator`].
pub struct OrchestratorBuilder {
    config: EngineConfig,
    graph: PipelineGraph,
    transport: Option<Arc<dyn Transport>>,
    parameters: RunParameters,
    custom_params: HashMap<NodeId, Map<String, Value>>,
    emitter: Arc<dyn TracingEmitter>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("base_url", &self.config.base_url)
            .field("nodes", &self.graph.len())
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Uses a custom transport instead of the HTTP client.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the run parameters sent with every start.
    #[must_use]
    pub fn with_parameters(mut self, parameters: RunParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attaches custom parameters to one node.
    #[must_use]
    pub fn with_custom_params(mut self, node: impl Into<NodeId>, params: Map<String, Value>) -> Self {
        self.custom_params.insert(node.into(), params);
        self
    }

    /// Sets the span emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn TracingEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn build(self) -> Result<NodeOrchestrator> {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let client = BackendClient::new(transport, &self.config);
        let health = Arc::new(HealthMonitor::new(
            client.clone(),
            self.config.health_check_interval(),
            self.config.health_probe_timeout(),
        ));
        let strategy = strategy_for(&self.config);
        info!(
            base_url = %self.config.base_url,
            mode = %self.config.mode,
            strategy = strategy.name(),
            nodes = self.graph.len(),
            "Orchestrator ready"
        );

        Ok(NodeOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                graph: self.graph,
                parameters: RwLock::new(self.parameters),
                custom_params: RwLock::new(self.custom_params),
                client,
                health,
                registry: TaskRegistry::new(),
                cancelled: Arc::new(CancellationSet::new()),
                store: NodeStateStore::new(),
                strategy,
                emitter: self.emitter,
                health_tick: Mutex::new(None),
            }),
        })
    }
}

struct Inner {
    config: EngineConfig,
    graph: PipelineGraph,
    parameters: RwLock<RunParameters>,
    custom_params: RwLock<HashMap<NodeId, Map<String, Value>>>,
    client: BackendClient,
    health: Arc<HealthMonitor>,
    registry: TaskRegistry,
    cancelled: Arc<CancellationSet>,
    store: NodeStateStore,
    strategy: Arc<dyn PollingStrategy>,
    emitter: Arc<dyn TracingEmitter>,
    health_tick: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(tick) = self.health_tick.get_mut().take() {
            tick.abort();
        }
    }
}

/// Runs, cancels and tracks pipeline nodes against one backend.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct NodeOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NodeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOrchestrator")
            .field("base_url", &self.inner.config.base_url)
            .field("strategy", &self.inner.strategy.name())
            .field("active", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl NodeOrchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: EngineConfig, graph: PipelineGraph) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            graph,
            transport: None,
            parameters: RunParameters::default(),
            custom_params: HashMap::new(),
            emitter: Arc::new(LoggingTracingEmitter),
        }
    }

    /// Creates an orchestrator over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>, graph: PipelineGraph) -> Result<Self> {
        Self::builder(config, graph).with_transport(transport).build()
    }

    /// Creates an orchestrator talking HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: EngineConfig, graph: PipelineGraph) -> Result<Self> {
        Self::builder(config, graph).build()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &PipelineGraph {
        &self.inner.graph
    }

    /// The backend client, for administrative calls.
    #[must_use]
    pub fn client(&self) -> &BackendClient {
        &self.inner.client
    }

    /// Replaces the run parameters used by subsequent runs.
    pub fn set_parameters(&self, parameters: RunParameters) {
        *self.inner.parameters.write() = parameters;
    }

    /// The current run parameters.
    #[must_use]
    pub fn parameters(&self) -> RunParameters {
        self.inner.parameters.read().clone()
    }

    /// Replaces one node's custom parameters.
    pub fn set_custom_params(&self, node: impl Into<NodeId>, params: Map<String, Value>) {
        self.inner.custom_params.write().insert(node.into(), params);
    }

    /// Starts the fixed-interval health refresh. Idempotent.
    pub fn start_health_monitor(&self) {
        let mut tick = self.inner.health_tick.lock();
        if tick.is_none() {
            *tick = Some(self.inner.health.spawn_background());
        }
    }

    /// Cached backend liveness, probing when stale.
    pub async fn health(&self) -> bool {
        self.inner.health.is_healthy(false).await
    }

    /// The last stored health state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.inner.health.state()
    }

    /// A node's record; idle if never run.
    #[must_use]
    pub fn state(&self, node: &NodeId) -> NodeRecord {
        self.inner.store.get(node)
    }

    /// A node's stored output.
    #[must_use]
    pub fn output(&self, node: &NodeId) -> Option<NodeOutput> {
        self.inner.store.output(node)
    }

    /// Every touched node's record.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<NodeId, NodeRecord> {
        self.inner.store.snapshot()
    }

    /// Subscribes to node state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.store.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &NodeStateStore {
        &self.inner.store
    }

    /// Number of registered remote tasks.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.inner.registry.len()
    }

    /// Runs one node to a terminal state.
    ///
    /// The run continues on its own task if the returned future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// `NodeBusy` without side effects if the node is active; otherwise
    /// the error that moved the node to `failed`, `timeout` or `stopped`.
    pub async fn run(&self, node: impl Into<NodeId>) -> Result<NodeOutput> {
        let node = node.into();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(node).await })
            .await
            .map_err(|e| ReconflowError::RemoteTaskFailed(format!("run task aborted: {e}")))?
    }

    /// Stops a node on behalf of the operator.
    ///
    /// The node becomes `stopped` immediately. The remote stop request is
    /// best effort. Returns false if the node was not active.
    pub async fn cancel(&self, node: &NodeId) -> bool {
        self.inner.cancel(node).await
    }

    /// Runs every node of the graph.
    ///
    /// A node launches once all of its dependencies are terminal;
    /// independent nodes run concurrently. Nodes behind a failed
    /// dependency fail without a start call.
    pub async fn run_pipeline(&self) -> PipelineSummary {
        let start = Instant::now();
        let graph = &self.inner.graph;
        let mut errors = BTreeMap::new();

        let mut in_degree: HashMap<NodeId, usize> = graph
            .nodes()
            .iter()
            .map(|node| (node.clone(), graph.dependencies(node).len()))
            .collect();

        let mut active: FuturesUnordered<JoinHandle<(NodeId, Result<NodeOutput>)>> =
            FuturesUnordered::new();
        for node in graph.topological_order() {
            if in_degree.get(&node) == Some(&0) {
                active.push(self.spawn_run(node));
            }
        }

        while let Some(joined) = active.next().await {
            let (node, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Pipeline node task aborted");
                    continue;
                }
            };
            if let Err(e) = result {
                errors.insert(node.clone(), e.to_string());
            }
            for child in graph.dependents(&node) {
                if let Some(count) = in_degree.get_mut(&child) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        active.push(self.spawn_run(child));
                    }
                }
            }
        }

        let statuses = graph
            .topological_order()
            .into_iter()
            .map(|node| {
                let status = self.inner.store.get(&node).status;
                (node, status)
            })
            .collect();
        let summary = PipelineSummary {
            statuses,
            errors,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            success = summary.success(),
            completed = summary.completed().len(),
            failed = summary.failed().len(),
            duration_ms = summary.duration_ms,
            "Pipeline finished"
        );
        summary
    }

    fn spawn_run(&self, node: NodeId) -> JoinHandle<(NodeId, Result<NodeOutput>)> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.run(node.clone()).await;
            (node, result)
        })
    }

    /// Cancels every registered task and stops the health tick.
    pub async fn shutdown(&self) {
        if let Some(tick) = self.inner.health_tick.lock().take() {
            tick.abort();
        }
        let tasks = self.inner.registry.drain();
        if tasks.is_empty() {
            return;
        }
        info!(count = tasks.len(), "Stopping active tasks");
        let stops = tasks.into_iter().map(|task| {
            let inner = Arc::clone(&self.inner);
            async move {
                let node = task.handle.node_id.clone();
                inner.cancelled.insert(&node);
                task.token.cancel("shutdown");
                inner.store.stop(&node, NodeOutput::stopped());
                inner.stop_remote(&task.handle).await;
            }
        });
        futures::future::join_all(stops).await;
    }
}

/// The output recorded for a node that ended on an error.
fn terminal_output(error: &ReconflowError) -> NodeOutput {
    match error.node_status() {
        NodeStatus::Stopped => NodeOutput::stopped(),
        _ => NodeOutput::failure(error.to_string()),
    }
}

impl Inner {
    async fn run(self: Arc<Self>, node: NodeId) -> Result<NodeOutput> {
        if self.store.get(&node).status.is_active() {
            return Err(ReconflowError::NodeBusy(node));
        }

        let parameters = self.parameters.read().clone();
        if let Err(e) = parameters.validate() {
            return Err(self.reject(&node, e));
        }
        if self.config.mode == PollingMode::Standard && !self.health.is_healthy(false).await {
            return Err(self.reject(&node, ReconflowError::BackendUnhealthy));
        }
        for dependency in self.graph.dependencies(&node) {
            let status = self.store.get(dependency).status;
            if status != NodeStatus::Completed {
                let error = ReconflowError::DependencyFailed {
                    node: node.clone(),
                    dependency: dependency.clone(),
                    dependency_status: status,
                };
                return Err(self.reject(&node, error));
            }
        }

        let request = self.build_request(&node, parameters);
        self.cancelled.remove(&node);
        let Some(generation) = self.store.queue(&node) else {
            return Err(ReconflowError::NodeBusy(node));
        };

        let timer = SpanTimer::start(RUN_SPAN);
        let attributes = NodeSpanAttributes::new(node.as_str());
        self.emitter.span_start(timer.name(), &attributes);

        let started = match self.client.start_task(&node, &request).await {
            Ok(started) => started,
            Err(e) => {
                let error = self.cancelled_or(&node, e);
                let output = terminal_output(&error);
                self.store.finish(&node, generation, error.node_status(), Some(output), Some(error.to_string()));
                self.emit_error(timer, attributes, &error, 0);
                return Err(error);
            }
        };

        let handle = TaskHandle::new(node.clone(), started.task_id.as_str());
        let attributes = attributes.with_process_id(handle.process_id.as_str());
        // Registered before the cancel check so a concurrent cancel either
        // finds the task or is seen here.
        let task = RegisteredTask::new(handle.clone());
        let token = Arc::clone(&task.token);
        self.registry.register(task);
        if self.cancelled.contains(&node) || !self.store.mark_running(&node, generation, &handle.process_id) {
            info!(node = %node, process_id = %handle.process_id, "Node stopped while queued");
            if self.registry.unregister_if(&node, &handle.process_id).is_some() {
                self.stop_remote(&handle).await;
            }
            let error = ReconflowError::LocallyCancelled(node);
            self.emit_error(timer, attributes, &error, 0);
            return Err(error);
        }
        debug!(node = %node, process_id = %handle.process_id, strategy = self.strategy.name(), "Polling");

        let (events, mut receiver) = mpsc::unbounded_channel();
        let context = SessionContext {
            client: self.client.clone(),
            health: Arc::clone(&self.health),
            cancelled: Arc::clone(&self.cancelled),
        };
        let mut session = PollingSession::new(&handle, context, token, events);
        let strategy = Arc::clone(&self.strategy);
        tokio::spawn(async move { strategy.poll(&mut session).await });

        let mut attempts = 0;
        let outcome = loop {
            match receiver.recv().await {
                Some(PollEvent::Progress(progress)) => {
                    attempts = progress.attempt;
                    self.store.progress(&node, generation, &progress);
                }
                Some(PollEvent::Completed(output)) => break Ok(output),
                Some(PollEvent::Failed(e)) => break Err(e),
                None => {
                    break Err(ReconflowError::RemoteTaskFailed(
                        "Polling ended without a result".to_string(),
                    ))
                }
            }
        };
        self.registry.unregister_if(&node, &handle.process_id);

        match outcome {
            Ok(output) => {
                if self.store.finish(&node, generation, NodeStatus::Completed, Some(output.clone()), None) {
                    let attributes = attributes
                        .with_status(NodeStatus::Completed.to_string())
                        .with_attempts(attempts);
                    let duration_ms = timer.finish();
                    self.emitter.span_end(RUN_SPAN, duration_ms, &attributes);
                    Ok(output)
                } else {
                    // Stopped between the last poll and delivery.
                    let error = ReconflowError::LocallyCancelled(node);
                    self.emit_error(timer, attributes, &error, attempts);
                    Err(error)
                }
            }
            Err(error) => {
                let status = error.node_status();
                let output = terminal_output(&error);
                let applied = self.store.finish(&node, generation, status, Some(output), Some(error.to_string()));
                let error = if applied || !self.cancelled.contains(&node) {
                    error
                } else {
                    ReconflowError::LocallyCancelled(node)
                };
                self.emit_error(timer, attributes, &error, attempts);
                Err(error)
            }
        }
    }

    fn build_request(&self, node: &NodeId, parameters: RunParameters) -> RunRequest {
        let mut custom = self
            .graph
            .spec(node)
            .map(|spec| spec.custom_params.clone())
            .unwrap_or_default();
        if let Some(overrides) = self.custom_params.read().get(node) {
            custom.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut request = RunRequest::new(parameters).with_custom_params(custom);
        for ancestor in self.graph.ancestors(node) {
            if self.store.get(&ancestor).status != NodeStatus::Completed {
                continue;
            }
            if let Some(output) = self.store.output(&ancestor) {
                if !request.merge_output(ancestor.clone(), &output) {
                    warn!(node = %node, upstream = %ancestor, "Withholding failed upstream output");
                }
            }
        }
        request
    }

    fn reject(&self, node: &NodeId, error: ReconflowError) -> ReconflowError {
        warn!(node = %node, kind = error.kind(), error = %error, "Node not started");
        self.store.fail_before_launch(node, error.to_string());
        error
    }

    fn cancelled_or(&self, node: &NodeId, error: ReconflowError) -> ReconflowError {
        if self.cancelled.contains(node) {
            ReconflowError::LocallyCancelled(node.clone())
        } else {
            error
        }
    }

    fn emit_error(&self, timer: SpanTimer, attributes: NodeSpanAttributes, error: &ReconflowError, attempts: u32) {
        let attributes = attributes
            .with_status(error.node_status().to_string())
            .with_attempts(attempts)
            .with_error(error.to_string());
        let duration_ms = timer.finish();
        self.emitter.span_error(RUN_SPAN, duration_ms, &attributes);
    }

    async fn cancel(&self, node: &NodeId) -> bool {
        self.cancelled.insert(node);
        let task = self.registry.unregister(node);
        if let Some(task) = &task {
            task.token.cancel(STOP_REASON);
        }
        let stopped = self.store.stop(node, NodeOutput::stopped());
        if stopped {
            info!(node = %node, "Node stopped by operator");
        }
        if let Some(task) = task {
            self.stop_remote(&task.handle).await;
        }
        stopped
    }

    async fn stop_remote(&self, handle: &TaskHandle) {
        match self.client.stop(&handle.process_id).await {
            Ok(response) => debug!(
                node = %handle.node_id,
                process_id = %handle.process_id,
                status = %response.status,
                "Remote task stopped"
            ),
            Err(e) => warn!(
                node = %handle.node_id,
                process_id = %handle.process_id,
                error = %e,
                "Stop request failed"
            ),
        }
    }
}
