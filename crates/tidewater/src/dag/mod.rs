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

//! # Workflow DAG
//!
//! The immutable task graph a workflow instance executes. Graphs are built
//! through [`WorkflowDagBuilder`], which rejects duplicate nodes, edges to
//! undeclared nodes and cycles, or directly from a [`WorkflowDefinition`].
//!
//! Edges may have a `None` endpoint standing for the virtual root or sink;
//! such edges are accepted but create no adjacency, so a node whose only
//! in-degree is a virtual edge is still a root.
//!
//! ```rust
//! use tidewater::dag::{DagEdge, WorkflowDagBuilder};
//!
//! let dag = WorkflowDagBuilder::new()
//!     .node("a")
//!     .node("b")
//!     .node("c")
//!     .edge(DagEdge::new("a", "b"))
//!     .edge(DagEdge::new("a", "c"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(dag.roots(), vec!["a"]);
//! assert_eq!(dag.successors("a"), vec!["b", "c"]);
//! ```

mod builder;
mod node;

use std::collections::HashMap;

pub use builder::WorkflowDagBuilder;
pub use node::{DagEdge, DagNode, DagNodeBuilder};

use crate::error::DagError;
use crate::models::WorkflowDefinition;

/// A validated, acyclic task graph.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    nodes: HashMap<String, DagNode>,
    /// Topological order, fixed at build time
    order: Vec<String>,
}

impl WorkflowDag {
    /// Builds the DAG of a workflow definition. Disabled tasks become skipped
    /// nodes; relations without a `pre` become virtual root edges.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, DagError> {
        let mut builder = WorkflowDagBuilder::new();
        for task in &definition.tasks {
            builder.add_node(task.name.clone(), !task.enabled);
        }
        for relation in &definition.relations {
            let edge = match &relation.pre {
                Some(pre) => DagEdge::new(pre.clone(), relation.post.clone()),
                None => DagEdge::from_root(relation.post.clone()),
            };
            builder.add_edge(edge);
        }
        builder.build()
    }

    pub fn node(&self, name: &str) -> Option<&DagNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in a dependency-respecting order.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes without predecessors, in topological order.
    pub fn roots(&self) -> Vec<&str> {
        self.ordered_nodes()
            .filter(|node| node.predecessors().next().is_none())
            .map(DagNode::name)
            .collect()
    }

    /// Nodes without successors, in topological order.
    pub fn leaves(&self) -> Vec<&str> {
        self.ordered_nodes()
            .filter(|node| node.successors().next().is_none())
            .map(DagNode::name)
            .collect()
    }

    /// Direct successors of `name`; empty for unknown nodes.
    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.nodes
            .get(name)
            .map(|node| node.successors().collect())
            .unwrap_or_default()
    }

    /// Direct predecessors of `name`; empty for unknown nodes.
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.nodes
            .get(name)
            .map(|node| node.predecessors().collect())
            .unwrap_or_default()
    }

    fn ordered_nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }
}
