//! The operator's set of cancelled nodes.

use crate::core::NodeId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Node ids the operator cancelled.
///
/// Consulted on the polling error path so that a node the operator
/// stopped ends `stopped` even if its task then reports `failed`.
#[derive(Debug, Default)]
pub struct CancellationSet {
    nodes: Mutex<HashSet<NodeId>>,
}

impl CancellationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a node. Returns true if it was not already marked.
    pub fn insert(&self, node: &NodeId) -> bool {
        self.nodes.lock().insert(node.clone())
    }

    /// Whether the node is marked.
    #[must_use]
    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.lock().contains(node)
    }

    /// Unmarks a node, typically when it is run again.
    pub fn remove(&self, node: &NodeId) -> bool {
        self.nodes.lock().remove(node)
    }

    /// Number of marked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Whether no node is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains_remove() {
        let set = CancellationSet::new();
        let node = NodeId::from("apply_rules_comp");

        assert!(set.insert(&node));
        assert!(!set.insert(&node));
        assert!(set.contains(&node));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&node));
        assert!(!set.contains(&node));
        assert!(set.is_empty());
    }
}
