//! Declared dependency edges between pipeline nodes.
//!
//! The graph is configuration data: loaded from JSON of the form
//! `{"nodes": [{"id": "...", "depends_on": ["..."]}]}` or taken from
//! [`PipelineGraph::completeness`]. Nodes that are not declared have no
//! dependencies.

use crate::core::NodeId;
use crate::errors::{GraphError, ReconflowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One declared node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Step name on the backend.
    pub id: NodeId,
    /// Upstream nodes that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<NodeId>,
    /// Node-specific parameters forwarded with every run.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_params: Map<String, Value>,
}

impl NodeSpec {
    /// Creates a node spec.
    #[must_use]
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            custom_params: Map::new(),
        }
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Adds one custom parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_params.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<NodeSpec>,
}

/// A validated acyclic dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct PipelineGraph {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, NodeSpec>,
}

impl TryFrom<GraphDocument> for PipelineGraph {
    type Error = GraphError;

    fn try_from(doc: GraphDocument) -> std::result::Result<Self, GraphError> {
        Self::new(doc.nodes)
    }
}

impl From<PipelineGraph> for GraphDocument {
    fn from(graph: PipelineGraph) -> Self {
        let mut nodes = graph.nodes;
        Self {
            nodes: graph
                .order
                .iter()
                .filter_map(|id| nodes.remove(id))
                .collect(),
        }
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::completeness()
    }
}

impl PipelineGraph {
    /// Validates and builds a graph.
    ///
    /// # Errors
    ///
    /// Returns a `GraphError` for unaddressable ids, duplicate nodes,
    /// unknown dependencies, or cycles.
    pub fn new(specs: Vec<NodeSpec>) -> std::result::Result<Self, GraphError> {
        let mut order = Vec::with_capacity(specs.len());
        let mut nodes = HashMap::with_capacity(specs.len());
        for spec in specs {
            if !spec.id.is_path_safe() {
                return Err(GraphError::InvalidNodeId(spec.id));
            }
            if nodes.contains_key(&spec.id) {
                return Err(GraphError::DuplicateNode(spec.id));
            }
            order.push(spec.id.clone());
            nodes.insert(spec.id.clone(), spec);
        }

        let graph = Self { order, nodes };
        graph.check_references()?;
        graph.detect_cycles()?;
        Ok(graph)
    }

    /// Parses a graph from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the graph invalid.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ReconflowError::Config(format!("invalid graph: {e}")))
    }

    /// Loads a graph from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReconflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// The built-in completeness-control pipeline.
    ///
    /// Configuration is read once, then the source and target sides run
    /// their own read/harmonise/enrich/transform chains before being
    /// combined and passed through rule application, rule output and
    /// break rolling.
    #[must_use]
    pub fn completeness() -> Self {
        let mut specs = vec![NodeSpec::new("reading_config_comp")];
        for side in ["src", "tgt"] {
            let chain = [
                format!("read_{side}_comp"),
                format!("pre_harmonisation_{side}_comp"),
                format!("harmonisation_{side}_comp"),
                format!("enrichment_file_search_{side}_comp"),
                format!("enrichment_{side}_comp"),
                format!("data_transform_{side}_comp"),
            ];
            let mut upstream = "reading_config_comp".to_string();
            for step in chain {
                specs.push(NodeSpec::new(step.as_str()).depends_on([upstream.as_str()]));
                upstream = step;
            }
        }
        specs.push(
            NodeSpec::new("combine_data_comp")
                .depends_on(["data_transform_src_comp", "data_transform_tgt_comp"]),
        );
        specs.push(NodeSpec::new("apply_rules_comp").depends_on(["combine_data_comp"]));
        specs.push(NodeSpec::new("output_rules_comp").depends_on(["apply_rules_comp"]));
        specs.push(NodeSpec::new("break_rolling_comp").depends_on(["output_rules_comp"]));

        Self::build_static(specs)
    }

    fn build_static(specs: Vec<NodeSpec>) -> Self {
        let order = specs.iter().map(|s| s.id.clone()).collect();
        let nodes = specs.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self { order, nodes }
    }

    /// Number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no node is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether the node is declared.
    #[must_use]
    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Declared nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    /// A node's declaration.
    #[must_use]
    pub fn spec(&self, node: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(node)
    }

    /// Direct dependencies; empty for undeclared nodes.
    #[must_use]
    pub fn dependencies(&self, node: &NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map_or(&[][..], |spec| spec.depends_on.as_slice())
    }

    /// Nodes that directly depend on `node`, in declaration order.
    #[must_use]
    pub fn dependents(&self, node: &NodeId) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.dependencies(id).contains(node))
            .cloned()
            .collect()
    }

    /// All transitive upstream nodes, dependencies before dependents.
    #[must_use]
    pub fn ancestors(&self, node: &NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        for dep in self.dependencies(node) {
            self.visit(dep, &mut visited, &mut result);
        }
        result
    }

    /// Every declared node, dependencies first, ties in declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(self.order.len());
        let mut visited = HashSet::new();
        for node in &self.order {
            self.visit(node, &mut visited, &mut result);
        }
        result
    }

    fn visit(&self, node: &NodeId, visited: &mut HashSet<NodeId>, result: &mut Vec<NodeId>) {
        if !visited.insert(node.clone()) {
            return;
        }
        for dep in self.dependencies(node) {
            self.visit(dep, visited, result);
        }
        result.push(node.clone());
    }

    fn check_references(&self) -> std::result::Result<(), GraphError> {
        for node in &self.order {
            for dep in self.dependencies(node) {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn detect_cycles(&self) -> std::result::Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.order {
            if !visited.contains(node) {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut rec_stack, &mut path) {
                    return Err(GraphError::CycleDetected(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &NodeId,
        visited: &mut HashSet<NodeId>,
        rec_stack: &mut HashSet<NodeId>,
        path: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        visited.insert(node.clone());
        rec_stack.insert(node.clone());
        path.push(node.clone());

        for dep in self.dependencies(node) {
            if !visited.contains(dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_completeness_graph_shape() {
        let graph = PipelineGraph::completeness();
        assert_eq!(graph.len(), 17);
        assert_eq!(
            graph.dependencies(&NodeId::from("combine_data_comp")),
            ids(&["data_transform_src_comp", "data_transform_tgt_comp"]).as_slice()
        );
        assert_eq!(
            graph.dependencies(&NodeId::from("read_tgt_comp")),
            ids(&["reading_config_comp"]).as_slice()
        );
        assert!(graph.dependencies(&NodeId::from("reading_config_comp")).is_empty());
        // The built-in graph passes its own validation.
        assert!(PipelineGraph::new(GraphDocument::from(graph).nodes).is_ok());
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = PipelineGraph::completeness();
        let order = graph.topological_order();
        let position = |name: &str| order.iter().position(|n| n.as_str() == name).unwrap();

        assert_eq!(order.len(), graph.len());
        assert_eq!(position("reading_config_comp"), 0);
        for node in graph.nodes() {
            for dep in graph.dependencies(node) {
                assert!(position(dep.as_str()) < position(node.as_str()));
            }
        }
        assert_eq!(order.last().unwrap().as_str(), "break_rolling_comp");
    }

    #[test]
    fn test_ancestors_are_transitive() {
        let graph = PipelineGraph::new(vec![
            NodeSpec::new("a"),
            NodeSpec::new("b").depends_on(["a"]),
            NodeSpec::new("c").depends_on(["b"]),
            NodeSpec::new("x"),
        ])
        .unwrap();

        assert_eq!(graph.ancestors(&NodeId::from("c")), ids(&["a", "b"]));
        assert!(graph.ancestors(&NodeId::from("x")).is_empty());
        assert!(graph.ancestors(&NodeId::from("undeclared")).is_empty());
    }

    #[test]
    fn test_dependents() {
        let graph = PipelineGraph::completeness();
        assert_eq!(
            graph.dependents(&NodeId::from("reading_config_comp")),
            ids(&["read_src_comp", "read_tgt_comp"])
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = PipelineGraph::new(vec![NodeSpec::new("b").depends_on(["a"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                node: NodeId::from("b"),
                dependency: NodeId::from("a"),
            }
        );
    }

    #[test]
    fn test_unaddressable_node_id_rejected() {
        for bad in ["a/b", "x?y", "frag#1", "has space", ""] {
            let err = PipelineGraph::new(vec![NodeSpec::new(bad)]).unwrap_err();
            assert_eq!(err, GraphError::InvalidNodeId(NodeId::from(bad)));
        }
        assert!(PipelineGraph::new(vec![NodeSpec::new("read_src_comp.v2-b")]).is_ok());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = PipelineGraph::new(vec![NodeSpec::new("a"), NodeSpec::new("a")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(NodeId::from("a")));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = PipelineGraph::new(vec![
            NodeSpec::new("a").depends_on(["c"]),
            NodeSpec::new("b").depends_on(["a"]),
            NodeSpec::new("c").depends_on(["b"]),
        ])
        .unwrap_err();

        match err {
            GraphError::CycleDetected(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_json() {
        let graph = PipelineGraph::from_json(
            r#"{"nodes": [
                {"id": "read"},
                {"id": "transform", "depends_on": ["read"], "custom_params": {"mode": "fast"}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(graph.nodes(), ids(&["read", "transform"]).as_slice());
        let spec = graph.spec(&NodeId::from("transform")).unwrap();
        assert_eq!(spec.custom_params.get("mode"), Some(&Value::from("fast")));
    }

    #[test]
    fn test_from_json_rejects_cycle() {
        let err = PipelineGraph::from_json(
            r#"{"nodes": [{"id": "a", "depends_on": ["a"]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("a -> a"));
    }

    #[test]
    fn test_serialize_keeps_order() {
        let graph = PipelineGraph::new(vec![NodeSpec::new("z"), NodeSpec::new("a").depends_on(["z"])])
            .unwrap();
        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["nodes"][0]["id"], "z");
        assert_eq!(json["nodes"][1]["depends_on"][0], "z");
    }
}
