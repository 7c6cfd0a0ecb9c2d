/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Incremental construction of a [`WorkflowDag`].

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::NodeIndex;
use petgraph::{Directed, Graph};

use super::node::{DagEdge, DagNode};
use super::WorkflowDag;
use crate::error::DagError;

/// Collects nodes and edges in any order and validates them on
/// [`build`](WorkflowDagBuilder::build).
///
/// # Examples
///
/// ```rust
/// use tidewater::dag::{DagEdge, WorkflowDagBuilder};
///
/// let dag = WorkflowDagBuilder::new()
///     .edge(DagEdge::new("extract", "load"))
///     .node("load")
///     .node("extract")
///     .build()
///     .unwrap();
///
/// assert_eq!(dag.roots(), vec!["extract"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WorkflowDagBuilder {
    nodes: Vec<(String, bool)>,
    edges: Vec<DagEdge>,
}

impl WorkflowDagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, name: impl Into<String>) -> Self {
        self.nodes.push((name.into(), false));
        self
    }

    /// Declares a node that is treated as done without running.
    pub fn skipped_node(mut self, name: impl Into<String>) -> Self {
        self.nodes.push((name.into(), true));
        self
    }

    pub fn edge(mut self, edge: DagEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn add_node(&mut self, name: impl Into<String>, skip: bool) -> &mut Self {
        self.nodes.push((name.into(), skip));
        self
    }

    pub fn add_edge(&mut self, edge: DagEdge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<WorkflowDag, DagError> {
        let mut declared = HashSet::new();
        for (name, _) in &self.nodes {
            if !declared.insert(name.as_str()) {
                return Err(DagError::DuplicateNode(name.clone()));
            }
        }

        let mut edges: Vec<&DagEdge> = Vec::with_capacity(self.edges.len());
        let mut seen = HashSet::new();
        for edge in &self.edges {
            for endpoint in [edge.from(), edge.to()].into_iter().flatten() {
                if !declared.contains(endpoint) {
                    let (from, to) = edge.endpoints();
                    return Err(DagError::UndeclaredNode {
                        from,
                        to,
                        missing: endpoint.to_string(),
                    });
                }
            }
            if edge.is_concrete() && seen.insert(edge) {
                edges.push(edge);
            }
        }

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for (name, skip) in &self.nodes {
            let node = DagNode::builder(name.clone())
                .in_degrees(
                    edges
                        .iter()
                        .filter(|edge| edge.to() == Some(name.as_str()))
                        .map(|edge| (*edge).clone()),
                )
                .out_degrees(
                    edges
                        .iter()
                        .filter(|edge| edge.from() == Some(name.as_str()))
                        .map(|edge| (*edge).clone()),
                )
                .skip(*skip)
                .build()?;
            nodes.insert(name.clone(), node);
        }

        let order = Self::topological_order(&self.nodes, &edges)?;

        Ok(WorkflowDag { nodes, order })
    }

    fn topological_order(
        declared: &[(String, bool)],
        edges: &[&DagEdge],
    ) -> Result<Vec<String>, DagError> {
        let mut graph = Graph::<String, (), Directed>::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        for (name, _) in declared {
            indices.insert(name.as_str(), graph.add_node(name.clone()));
        }
        for edge in edges {
            let endpoints = edge
                .from()
                .and_then(|from| indices.get(from))
                .zip(edge.to().and_then(|to| indices.get(to)));
            if let Some((&from, &to)) = endpoints {
                graph.add_edge(from, to, ());
            }
        }

        match toposort(&graph, None) {
            Ok(sorted) => Ok(sorted.into_iter().map(|idx| graph[idx].clone()).collect()),
            Err(cycle) => {
                let at = cycle.node_id();
                let cyclic: Vec<Vec<NodeIndex>> = tarjan_scc(&graph)
                    .into_iter()
                    .filter(|component| {
                        component.len() > 1 || graph.contains_edge(component[0], component[0])
                    })
                    .collect();
                let component = cyclic
                    .iter()
                    .find(|component| component.contains(&at))
                    .or_else(|| cyclic.first())
                    .cloned()
                    .unwrap_or_else(|| vec![at]);
                let mut names: Vec<String> =
                    component.into_iter().map(|idx| graph[idx].clone()).collect();
                names.sort();
                Err(DagError::CyclicDependency { cycle: names })
            }
        }
    }
}
