//! Per-node lifecycle state and outputs.
//!
//! Every mutation is a short synchronous critical section. Mutations made
//! on behalf of a run carry that run's generation; a delivery whose
//! generation is no longer current is dropped.

use crate::core::{NodeId, NodeOutput, NodeRecord, NodeStatus};
use crate::polling::PollProgress;
use crate::utils::now_utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// A state change, published after the mutation is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEvent {
    /// The node that changed.
    pub node_id: NodeId,
    /// Its record after the change.
    pub record: NodeRecord,
    /// The output on a terminal change: the result on completion, a
    /// failure sentinel otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<NodeId, NodeRecord>,
    outputs: HashMap<NodeId, NodeOutput>,
}

/// The orchestrator's view of every node it has touched.
#[derive(Debug)]
pub struct NodeStateStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<NodeEvent>,
}

impl Default for NodeStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Subscribes to change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// A node's record; idle if never touched.
    #[must_use]
    pub fn get(&self, node: &NodeId) -> NodeRecord {
        self.inner.read().records.get(node).cloned().unwrap_or_default()
    }

    /// A node's stored output.
    #[must_use]
    pub fn output(&self, node: &NodeId) -> Option<NodeOutput> {
        self.inner.read().outputs.get(node).cloned()
    }

    /// Every touched node's record.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<NodeId, NodeRecord> {
        self.inner
            .read()
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Moves a node to `queued` and opens a new generation.
    ///
    /// Returns `None` if the node is already active.
    pub fn queue(&self, node: &NodeId) -> Option<u64> {
        let event = {
            let mut inner = self.inner.write();
            let record = inner.records.entry(node.clone()).or_default();
            if !record.status.can_transition_to(NodeStatus::Queued) {
                return None;
            }
            record.generation += 1;
            record.status = NodeStatus::Queued;
            record.start_time = None;
            record.process_id = None;
            record.attempts = 0;
            record.remote_status = None;
            record.retry_attempt = None;
            record.message = None;
            record.updated_at = Some(now_utc());
            let event = NodeEvent {
                node_id: node.clone(),
                record: record.clone(),
                output: None,
            };
            inner.outputs.remove(node);
            event
        };
        let generation = event.record.generation;
        self.publish(event);
        Some(generation)
    }

    /// Moves a queued node to `running` for the given generation.
    pub fn mark_running(&self, node: &NodeId, generation: u64, process_id: &str) -> bool {
        self.mutate(node, generation, NodeStatus::Running, |record| {
            record.status = NodeStatus::Running;
            record.start_time = Some(now_utc());
            record.process_id = Some(process_id.to_string());
            true
        })
    }

    /// Records a progress observation for a running node.
    pub fn progress(&self, node: &NodeId, generation: u64, progress: &PollProgress) -> bool {
        let event = {
            let mut inner = self.inner.write();
            let Some(record) = inner.records.get_mut(node) else {
                return false;
            };
            if record.generation != generation || record.status != NodeStatus::Running {
                return false;
            }
            record.attempts = progress.attempt;
            record.remote_status = progress.remote_status.as_ref().map(ToString::to_string);
            record.retry_attempt = progress.retry_attempt;
            record.updated_at = Some(now_utc());
            NodeEvent {
                node_id: node.clone(),
                record: record.clone(),
                output: None,
            }
        };
        self.publish(event);
        true
    }

    /// Applies a terminal outcome for the given generation.
    ///
    /// Ignored if the generation is stale or the node is already
    /// terminal. A clean output is stored only together with `completed`;
    /// every other terminal status stores a failure sentinel carrying the
    /// message.
    pub fn finish(
        &self,
        node: &NodeId,
        generation: u64,
        status: NodeStatus,
        output: Option<NodeOutput>,
        message: Option<String>,
    ) -> bool {
        let fallback = message.clone();
        let applied = self.mutate(node, generation, status, |record| {
            record.status = status;
            record.start_time = None;
            record.retry_attempt = None;
            record.message = message;
            true
        });
        if applied {
            self.store_output(node, status, output, fallback);
        } else {
            debug!(node = %node, generation, status = %status, "dropped stale delivery");
        }
        applied
    }

    /// Fails a node that never launched (gate or validation failure).
    pub fn fail_before_launch(&self, node: &NodeId, message: impl Into<String>) -> bool {
        let message = message.into();
        let event = {
            let mut inner = self.inner.write();
            let record = inner.records.entry(node.clone()).or_default();
            if record.status.is_active() {
                return false;
            }
            record.generation += 1;
            record.status = NodeStatus::Failed;
            record.start_time = None;
            record.process_id = None;
            record.attempts = 0;
            record.remote_status = None;
            record.retry_attempt = None;
            record.message = Some(message.clone());
            record.updated_at = Some(now_utc());
            let output = NodeOutput::failure(message);
            let event = NodeEvent {
                node_id: node.clone(),
                record: record.clone(),
                output: Some(output.clone()),
            };
            inner.outputs.insert(node.clone(), output);
            event
        };
        self.publish(event);
        true
    }

    /// Moves an active node to `stopped`, whatever its generation.
    pub fn stop(&self, node: &NodeId, output: NodeOutput) -> bool {
        let generation = self.get(node).generation;
        let applied = self.mutate(node, generation, NodeStatus::Stopped, |record| {
            record.status = NodeStatus::Stopped;
            record.start_time = None;
            record.retry_attempt = None;
            record.message = output.fail_message().map(str::to_string);
            true
        });
        if applied {
            self.store_output(node, NodeStatus::Stopped, Some(output), None);
        }
        applied
    }

    fn store_output(
        &self,
        node: &NodeId,
        status: NodeStatus,
        output: Option<NodeOutput>,
        message: Option<String>,
    ) {
        let output = match status {
            NodeStatus::Completed => output,
            _ if status.is_terminal() => output
                .filter(NodeOutput::is_failure)
                .or_else(|| message.map(NodeOutput::failure)),
            _ => None,
        };
        let event = {
            let mut inner = self.inner.write();
            match &output {
                Some(output) => {
                    inner.outputs.insert(node.clone(), output.clone());
                }
                None => {
                    inner.outputs.remove(node);
                }
            }
            NodeEvent {
                node_id: node.clone(),
                record: inner.records.get(node).cloned().unwrap_or_default(),
                output,
            }
        };
        self.publish(event);
    }

    fn mutate(
        &self,
        node: &NodeId,
        generation: u64,
        next: NodeStatus,
        apply: impl FnOnce(&mut NodeRecord) -> bool,
    ) -> bool {
        let event = {
            let mut inner = self.inner.write();
            let Some(record) = inner.records.get_mut(node) else {
                return false;
            };
            if record.generation != generation || !record.status.can_transition_to(next) {
                return false;
            }
            if !apply(record) {
                return false;
            }
            record.updated_at = Some(now_utc());
            NodeEvent {
                node_id: node.clone(),
                record: record.clone(),
                output: None,
            }
        };
        if !next.is_terminal() {
            self.publish(event);
        }
        true
    }

    fn publish(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RemoteStatus;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn node() -> NodeId {
        NodeId::from("read_src_comp")
    }

    fn progress(attempt: u32, retry_attempt: Option<u32>) -> PollProgress {
        PollProgress {
            attempt,
            max_attempts: 10,
            remote_status: Some(RemoteStatus::Running),
            retry_attempt,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_untouched_node_is_idle() {
        let store = NodeStateStore::new();
        assert_eq!(store.get(&node()).status, NodeStatus::Idle);
        assert!(store.output(&node()).is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        assert_eq!(store.get(&node()).status, NodeStatus::Queued);

        assert!(store.mark_running(&node(), generation, "proc-1"));
        let record = store.get(&node());
        assert_eq!(record.status, NodeStatus::Running);
        assert!(record.start_time.is_some());
        assert_eq!(record.process_id.as_deref(), Some("proc-1"));

        assert!(store.progress(&node(), generation, &progress(3, None)));
        assert_eq!(store.get(&node()).attempts, 3);
        assert_eq!(store.get(&node()).remote_status.as_deref(), Some("running"));

        let output = NodeOutput::new(serde_json::json!({"count": "42"}));
        assert!(store.finish(&node(), generation, NodeStatus::Completed, Some(output.clone()), None));
        let record = store.get(&node());
        assert_eq!(record.status, NodeStatus::Completed);
        assert!(record.start_time.is_none());
        assert_eq!(store.output(&node()), Some(output));
    }

    #[test]
    fn test_queue_rejected_while_active() {
        let store = NodeStateStore::new();
        store.queue(&node()).unwrap();
        assert!(store.queue(&node()).is_none());
    }

    #[test]
    fn test_retrying_is_derived_from_progress() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");

        store.progress(&node(), generation, &progress(1, Some(2)));
        assert_eq!(store.get(&node()).status, NodeStatus::Running);
        assert_eq!(store.get(&node()).display_status(), NodeStatus::Retrying);

        store.progress(&node(), generation, &progress(2, None));
        assert_eq!(store.get(&node()).display_status(), NodeStatus::Running);
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let store = NodeStateStore::new();
        let first = store.queue(&node()).unwrap();
        store.mark_running(&node(), first, "proc-1");
        store.finish(&node(), first, NodeStatus::Failed, None, Some("boom".into()));

        let second = store.queue(&node()).unwrap();
        store.mark_running(&node(), second, "proc-2");

        assert!(!store.finish(&node(), first, NodeStatus::Completed, Some(NodeOutput::default()), None));
        assert!(!store.progress(&node(), first, &progress(9, None)));
        let record = store.get(&node());
        assert_eq!(record.status, NodeStatus::Running);
        assert_eq!(record.process_id.as_deref(), Some("proc-2"));
    }

    #[test]
    fn test_terminal_state_is_not_overwritten() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");

        assert!(store.stop(&node(), NodeOutput::stopped()));
        assert!(!store.finish(&node(), generation, NodeStatus::Failed, None, Some("late".into())));

        let record = store.get(&node());
        assert_eq!(record.status, NodeStatus::Stopped);
        assert_eq!(record.message.as_deref(), Some("Process stopped by user"));
        assert_eq!(store.output(&node()), Some(NodeOutput::stopped()));
    }

    #[test]
    fn test_failed_node_keeps_failure_output() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");
        store.finish(
            &node(),
            generation,
            NodeStatus::Failed,
            Some(NodeOutput::failure("bad")),
            Some("bad".into()),
        );
        let output = store.output(&node()).unwrap();
        assert_eq!(output.fail_message(), Some("bad"));
    }

    #[test]
    fn test_timeout_without_output_stores_sentinel() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");
        store.finish(
            &node(),
            generation,
            NodeStatus::Timeout,
            None,
            Some("Task timed out after 3 status checks".into()),
        );
        let output = store.output(&node()).unwrap();
        assert!(output.is_failure());
        assert_eq!(output.fail_message(), Some("Task timed out after 3 status checks"));
    }

    #[test]
    fn test_clean_output_is_not_kept_on_failure() {
        let store = NodeStateStore::new();
        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");
        store.finish(
            &node(),
            generation,
            NodeStatus::Failed,
            Some(NodeOutput::new(serde_json::json!({"status": "success"}))),
            Some("late failure".into()),
        );
        assert_eq!(store.output(&node()).unwrap().fail_message(), Some("late failure"));
    }

    #[test]
    fn test_stop_requires_active_node() {
        let store = NodeStateStore::new();
        assert!(!store.stop(&node(), NodeOutput::stopped()));
        assert_eq!(store.get(&node()).status, NodeStatus::Idle);
    }

    #[test]
    fn test_fail_before_launch() {
        let store = NodeStateStore::new();
        assert!(store.fail_before_launch(&node(), "Backend is unhealthy"));
        let record = store.get(&node());
        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.generation, 1);
        assert_eq!(
            store.output(&node()).unwrap().fail_message(),
            Some("Backend is unhealthy")
        );

        store.queue(&node()).unwrap();
        assert!(!store.fail_before_launch(&node(), "busy"));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let store = NodeStateStore::new();
        let mut events = store.subscribe();

        let generation = store.queue(&node()).unwrap();
        store.mark_running(&node(), generation, "proc-1");
        store.finish(
            &node(),
            generation,
            NodeStatus::Completed,
            Some(NodeOutput::new(serde_json::json!({"ok": true}))),
            None,
        );

        let statuses: Vec<_> = (0..3)
            .map(|_| events.try_recv().unwrap())
            .map(|e| (e.record.status, e.output.is_some()))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (NodeStatus::Queued, false),
                (NodeStatus::Running, false),
                (NodeStatus::Completed, true),
            ]
        );
        assert!(events.try_recv().is_err());
    }
}
