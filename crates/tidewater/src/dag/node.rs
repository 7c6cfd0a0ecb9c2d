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

//! DAG nodes and edges.

use crate::error::DagError;

/// A directed edge between two nodes. A `None` endpoint is a virtual root or
/// sink and creates no adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DagEdge {
    from: Option<String>,
    to: Option<String>,
}

impl DagEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    /// An edge from the virtual root into `to`.
    pub fn from_root(to: impl Into<String>) -> Self {
        Self {
            from: None,
            to: Some(to.into()),
        }
    }

    /// An edge from `from` into the virtual sink.
    pub fn to_sink(from: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: None,
        }
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// Both endpoints are real nodes.
    pub fn is_concrete(&self) -> bool {
        self.from.is_some() && self.to.is_some()
    }

    pub(crate) fn endpoints(&self) -> (Option<String>, Option<String>) {
        (self.from.clone(), self.to.clone())
    }
}

/// A node of a workflow DAG with its ordered in- and out-degree edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    name: String,
    in_degrees: Vec<DagEdge>,
    out_degrees: Vec<DagEdge>,
    skip: bool,
}

impl DagNode {
    pub fn builder(name: impl Into<String>) -> DagNodeBuilder {
        DagNodeBuilder {
            name: name.into(),
            in_degrees: Vec::new(),
            out_degrees: Vec::new(),
            skip: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_degrees(&self) -> &[DagEdge] {
        &self.in_degrees
    }

    pub fn out_degrees(&self) -> &[DagEdge] {
        &self.out_degrees
    }

    /// Skipped nodes are treated as done without running.
    pub fn is_skip(&self) -> bool {
        self.skip
    }

    /// Names of the nodes this node depends on, in edge order.
    pub fn predecessors(&self) -> impl Iterator<Item = &str> {
        self.in_degrees.iter().filter_map(DagEdge::from)
    }

    /// Names of the nodes depending on this node, in edge order.
    pub fn successors(&self) -> impl Iterator<Item = &str> {
        self.out_degrees.iter().filter_map(DagEdge::to)
    }
}

/// Builder enforcing that every in-degree edge points at the node and every
/// out-degree edge starts at it.
#[derive(Debug, Clone)]
pub struct DagNodeBuilder {
    name: String,
    in_degrees: Vec<DagEdge>,
    out_degrees: Vec<DagEdge>,
    skip: bool,
}

impl DagNodeBuilder {
    pub fn in_degree(mut self, edge: DagEdge) -> Self {
        self.in_degrees.push(edge);
        self
    }

    pub fn out_degree(mut self, edge: DagEdge) -> Self {
        self.out_degrees.push(edge);
        self
    }

    pub fn in_degrees(mut self, edges: impl IntoIterator<Item = DagEdge>) -> Self {
        self.in_degrees.extend(edges);
        self
    }

    pub fn out_degrees(mut self, edges: impl IntoIterator<Item = DagEdge>) -> Self {
        self.out_degrees.extend(edges);
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn build(self) -> Result<DagNode, DagError> {
        for edge in &self.in_degrees {
            if edge.to() != Some(self.name.as_str()) {
                let (from, to) = edge.endpoints();
                return Err(DagError::InDegreeMismatch {
                    node: self.name,
                    from,
                    to,
                });
            }
        }
        for edge in &self.out_degrees {
            if edge.from() != Some(self.name.as_str()) {
                let (from, to) = edge.endpoints();
                return Err(DagError::OutDegreeMismatch {
                    node: self.name,
                    from,
                    to,
                });
            }
        }

        Ok(DagNode {
            name: self.name,
            in_degrees: self.in_degrees,
            out_degrees: self.out_degrees,
            skip: self.skip,
        })
    }
}
