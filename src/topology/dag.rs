// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Stage dependency graph
//!
//! Derives dependency edges from step-group order and input bindings,
//! rejects cycles and renders the graph for humans.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use super::{StageKind, WorkflowTopology};
use crate::errors::{AphexError, AphexResult};

/// Dependency graph of a topology's stages
pub struct StageGraph {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
    kinds: HashMap<String, StageKind>,
}

impl StageGraph {
    /// Build the graph of a topology
    pub fn build(topology: &WorkflowTopology) -> AphexResult<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut index_to_name = HashMap::new();
        let mut kinds = HashMap::new();

        for (idx, node) in topology.nodes().enumerate() {
            let index = graph.add_node(idx);
            name_to_index.insert(node.name.clone(), index);
            index_to_name.insert(index, node.name.clone());
            kinds.insert(node.name.clone(), node.kind);
        }

        let mut builder = Self {
            graph,
            name_to_index,
            index_to_name,
            kinds,
        };

        // Sequential order: each node waits for the one before it
        let order: Vec<&str> = topology.nodes().map(|n| n.name.as_str()).collect();
        for pair in order.windows(2) {
            builder.add_edge(pair[0], pair[1])?;
        }

        // Data dependencies from input bindings
        for node in topology.nodes() {
            for upstream in node.upstream_stages() {
                builder.add_edge(upstream, &node.name)?;
            }
        }

        builder.validate_acyclic()?;
        Ok(builder)
    }

    fn add_edge(&mut self, from: &str, to: &str) -> AphexResult<()> {
        let (Some(&a), Some(&b)) = (self.name_to_index.get(from), self.name_to_index.get(to)) else {
            return Err(AphexError::TopologyGeneration {
                reason: format!("stage '{}' depends on unknown stage '{}'", to, from),
            });
        };

        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
        Ok(())
    }

    fn validate_acyclic(&self) -> AphexResult<()> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            AphexError::TopologyGeneration {
                reason: format!(
                    "dependency cycle through '{}'",
                    self.index_to_name[&cycle.node_id()]
                ),
            }
        })
    }

    /// Stage names in an order that respects every dependency
    pub fn execution_order(&self) -> AphexResult<Vec<String>> {
        let mut nodes = toposort(&self.graph, None).map_err(|cycle| {
            AphexError::TopologyGeneration {
                reason: format!(
                    "dependency cycle through '{}'",
                    self.index_to_name[&cycle.node_id()]
                ),
            }
        })?;
        // Stable across runs: ties broken by position in the topology
        nodes.sort_by_key(|n| self.graph[*n]);
        Ok(nodes
            .into_iter()
            .map(|n| self.index_to_name[&n].clone())
            .collect())
    }

    /// Stages that must run directly before `stage`, in topology order
    pub fn dependencies(&self, stage: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .collect();
        deps.sort_by_key(|n| self.graph[*n]);
        Some(deps.into_iter().map(|n| self.index_to_name[&n].clone()).collect())
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(node_a), Some(node_b)) = (self.name_to_index.get(a), self.name_to_index.get(b))
        else {
            return false;
        };

        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    fn sorted_edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .collect();
        edges.sort_by_key(|(a, b)| (self.graph[*a], self.graph[*b]));
        edges
            .into_iter()
            .map(|(a, b)| {
                (
                    self.index_to_name[&a].as_str(),
                    self.index_to_name[&b].as_str(),
                )
            })
            .collect()
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> AphexResult<String> {
        let mut out = String::from("graph TD\n");

        for name in self.execution_order()? {
            let id = name.replace('-', "_");
            out.push_str(&format!("    {}[{}]\n", id, name));
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!(
                "    {} --> {}\n",
                from.replace('-', "_"),
                to.replace('-', "_")
            ));
        }

        Ok(out)
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        // Isolated nodes (single-stage graphs)
        let mut isolated: Vec<&NodeIndex> = self
            .name_to_index
            .values()
            .filter(|n| self.graph.neighbors_undirected(**n).count() == 0)
            .collect();
        isolated.sort_by_key(|n| self.graph[**n]);
        for node in isolated {
            out.push_str(&format!("    \"{}\";\n", self.index_to_name[node]));
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self) -> AphexResult<String> {
        let mut out = String::new();

        for (i, name) in self.execution_order()?.iter().enumerate() {
            let deps = self.dependencies(name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, name, self.kinds[name]));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::topology::TopologyGenerator;

    fn topology() -> WorkflowTopology {
        let config = Configuration::from_yaml(
            r#"
build:
  commands: [make]
environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks: [{name: A}]
    tests:
      commands: [make smoke]
  - name: prod
    region: us-east-1
    account: "222222222222"
    stacks: [{name: A}]
"#,
        )
        .unwrap();
        TopologyGenerator::generate(&config, "artifacts").unwrap()
    }

    #[test]
    fn test_order_and_dependencies() {
        let graph = StageGraph::build(&topology()).unwrap();

        assert_eq!(
            graph.execution_order().unwrap(),
            vec!["build", "pipeline-deployment", "deploy-dev", "test-dev", "deploy-prod"]
        );
        assert_eq!(
            graph.dependencies("deploy-dev").unwrap(),
            vec!["build", "pipeline-deployment"]
        );
        assert!(graph.depends_on("test-dev", "build"));
        assert!(graph.depends_on("deploy-prod", "test-dev"));
        assert!(!graph.depends_on("build", "deploy-prod"));
    }

    #[test]
    fn test_text_output() {
        let graph = StageGraph::build(&topology()).unwrap();
        let text = graph.to_text().unwrap();
        assert!(text.starts_with("1. build (build)\n"));
        assert!(text.contains("4. test-dev (test) [depends: deploy-dev]"));
    }

    #[test]
    fn test_dot_and_mermaid() {
        let graph = StageGraph::build(&topology()).unwrap();
        assert!(graph.to_dot().contains("\"deploy-dev\" -> \"test-dev\";"));
        assert!(graph
            .to_mermaid()
            .unwrap()
            .contains("    deploy_dev --> test_dev\n"));
    }
}
