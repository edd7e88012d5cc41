//! Index of active remote tasks, one per node.

use crate::cancellation::CancellationToken;
use crate::core::{NodeId, TaskHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered task and the token of the session polling it.
#[derive(Debug, Clone)]
pub struct RegisteredTask {
    /// The remote task.
    pub handle: TaskHandle,
    /// Cancels the polling session.
    pub token: Arc<CancellationToken>,
}

impl RegisteredTask {
    /// Creates an entry with a fresh token.
    #[must_use]
    pub fn new(handle: TaskHandle) -> Self {
        Self {
            handle,
            token: Arc::new(CancellationToken::new()),
        }
    }
}

/// Thread-safe registry enforcing at most one active task per node.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<NodeId, RegisteredTask>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task, replacing and cancelling any previous entry.
    pub fn register(&self, task: RegisteredTask) -> Option<RegisteredTask> {
        let node = task.handle.node_id.clone();
        let displaced = self.tasks.write().insert(node.clone(), task);
        if let Some(old) = &displaced {
            tracing::warn!(
                node_id = %node,
                process_id = %old.handle.process_id,
                "Replacing active task registration"
            );
            old.token.cancel("replaced by a newer run");
        }
        displaced
    }

    /// Gets the active task of a node.
    #[must_use]
    pub fn lookup(&self, node: &NodeId) -> Option<RegisteredTask> {
        self.tasks.read().get(node).cloned()
    }

    /// Removes a node's entry.
    pub fn unregister(&self, node: &NodeId) -> Option<RegisteredTask> {
        self.tasks.write().remove(node)
    }

    /// Removes a node's entry only if it still refers to `process_id`.
    pub fn unregister_if(&self, node: &NodeId, process_id: &str) -> Option<RegisteredTask> {
        let mut tasks = self.tasks.write();
        if tasks
            .get(node)
            .is_some_and(|t| t.handle.process_id == process_id)
        {
            tasks.remove(node)
        } else {
            None
        }
    }

    /// All entries, for teardown and display.
    #[must_use]
    pub fn active(&self) -> Vec<RegisteredTask> {
        self.tasks.read().values().cloned().collect()
    }

    /// Removes and returns all entries.
    pub fn drain(&self) -> Vec<RegisteredTask> {
        self.tasks.write().drain().map(|(_, task)| task).collect()
    }

    /// Returns the number of active tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Returns true if no task is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}
