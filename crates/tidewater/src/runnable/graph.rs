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

//! Execution-time view of a workflow DAG.
//!
//! The DAG itself never changes. This graph tracks, per node, whether an
//! attempt is in flight and which final outcome the node reached, plus the
//! successors chosen by conditions and switch nodes. Readiness follows these
//! rules:
//!
//! - a node is ready once every predecessor succeeded or was skipped;
//! - failure-tolerant nodes (conditions) are ready once every predecessor is
//!   done, whatever the outcome;
//! - a node whose predecessors were all skipped, or that no predecessor's
//!   branch chose, is skipped itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dag::WorkflowDag;

/// Final outcome of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOutcome {
    Success,
    Failure,
    Killed,
    Paused,
    Skipped,
}

impl NodeOutcome {
    /// Outcomes that release dependents.
    pub fn is_passing(&self) -> bool {
        matches!(self, NodeOutcome::Success | NodeOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Blocked,
    Ready,
    Skip,
}

#[derive(Debug, Clone, Default)]
struct NodeRuntime {
    active: bool,
    outcome: Option<NodeOutcome>,
}

#[derive(Debug, Clone)]
pub struct WorkflowExecutionGraph {
    dag: Arc<WorkflowDag>,
    nodes: HashMap<String, NodeRuntime>,
    branches: HashMap<String, HashSet<String>>,
    failure_tolerant: HashSet<String>,
}

impl WorkflowExecutionGraph {
    /// A fresh graph. Nodes flagged `skip` in the DAG start out skipped.
    pub fn new(dag: Arc<WorkflowDag>) -> Self {
        let nodes = dag
            .topological_order()
            .iter()
            .map(|name| {
                let outcome = dag
                    .node(name)
                    .filter(|node| node.is_skip())
                    .map(|_| NodeOutcome::Skipped);
                (
                    name.clone(),
                    NodeRuntime {
                        active: false,
                        outcome,
                    },
                )
            })
            .collect();

        Self {
            dag,
            nodes,
            branches: HashMap::new(),
            failure_tolerant: HashSet::new(),
        }
    }

    pub fn dag(&self) -> &Arc<WorkflowDag> {
        &self.dag
    }

    /// Lets `name` run once all predecessors are done, even if some failed.
    pub fn mark_failure_tolerant(&mut self, name: &str) {
        self.failure_tolerant.insert(name.to_string());
    }

    pub fn mark_active(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.active = true;
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(|node| node.active)
    }

    pub fn has_active(&self) -> bool {
        self.nodes.values().any(|node| node.active)
    }

    /// Active nodes in topological order.
    pub fn active_nodes(&self) -> Vec<String> {
        self.dag
            .topological_order()
            .iter()
            .filter(|name| self.is_active(name))
            .cloned()
            .collect()
    }

    pub fn mark_finished(&mut self, name: &str, outcome: NodeOutcome) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.active = false;
            node.outcome = Some(outcome);
        }
    }

    pub fn outcome(&self, name: &str) -> Option<NodeOutcome> {
        self.nodes.get(name).and_then(|node| node.outcome)
    }

    /// Records the successors a conditions or switch node chose. Edges to any
    /// other successor are not taken.
    pub fn set_branch(&mut self, name: &str, chosen: impl IntoIterator<Item = String>) {
        self.branches
            .insert(name.to_string(), chosen.into_iter().collect());
    }

    fn edge_taken(&self, from: &str, to: &str) -> bool {
        self.branches
            .get(from)
            .map_or(true, |chosen| chosen.contains(to))
    }

    fn readiness(&self, name: &str) -> Readiness {
        let predecessors = self.dag.predecessors(name);
        if predecessors.is_empty() {
            return Readiness::Ready;
        }

        let mut all_skipped = true;
        let mut any_failed = false;
        for predecessor in predecessors {
            match self.outcome(predecessor) {
                None => return Readiness::Blocked,
                Some(NodeOutcome::Success) if self.edge_taken(predecessor, name) => {
                    all_skipped = false;
                }
                Some(NodeOutcome::Success) | Some(NodeOutcome::Skipped) => {}
                Some(_) => {
                    all_skipped = false;
                    any_failed = true;
                }
            }
        }

        if all_skipped {
            Readiness::Skip
        } else if any_failed && !self.failure_tolerant.contains(name) {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    fn is_idle(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .is_some_and(|node| !node.active && node.outcome.is_none())
    }

    /// Idle nodes whose predecessors allow them to start, in topological
    /// order.
    pub fn start_candidates(&self) -> Vec<String> {
        self.dag
            .topological_order()
            .iter()
            .filter(|name| self.is_idle(name) && self.readiness(name) == Readiness::Ready)
            .cloned()
            .collect()
    }

    /// Marks every idle node that can never run as skipped and returns them.
    pub fn propagate_skips(&mut self) -> Vec<String> {
        let mut skipped = Vec::new();
        for name in self.dag.topological_order().to_vec() {
            if self.is_idle(&name) && self.readiness(&name) == Readiness::Skip {
                self.mark_finished(&name, NodeOutcome::Skipped);
                skipped.push(name);
            }
        }
        skipped
    }

    /// Whether any node failed. Killed nodes count as failed unless the
    /// workflow was being stopped.
    pub fn has_failure(&self, stopping: bool) -> bool {
        self.nodes.values().any(|node| match node.outcome {
            Some(NodeOutcome::Failure) => true,
            Some(NodeOutcome::Killed) => !stopping,
            _ => false,
        })
    }

    pub fn has_paused(&self) -> bool {
        self.nodes
            .values()
            .any(|node| node.outcome == Some(NodeOutcome::Paused))
    }

    pub fn is_complete(&self) -> bool {
        self.nodes.values().all(|node| node.outcome.is_some())
    }
}
