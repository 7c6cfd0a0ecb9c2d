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

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::graph::WorkflowExecutionGraph;
use super::task::TaskExecutionRunnable;
use crate::dag::WorkflowDag;
use crate::event::{EventReceiver, LifecycleEvent, TaskEventKind, WorkflowEventBus};
use crate::models::{
    TaskDefinition, TaskExecutionStatus, TaskInstance, TaskKind, WorkflowDefinition,
    WorkflowExecutionStatus, WorkflowInstance,
};

/// Mutable part of a workflow runnable. Only the workflow's bus consumer
/// writes it.
#[derive(Debug)]
pub struct WorkflowExecutionState {
    pub instance: WorkflowInstance,
    pub graph: WorkflowExecutionGraph,
    pub tasks: HashMap<String, TaskExecutionRunnable>,
    /// State recorded when a crashed master relinquished the instance
    pub prior_state: Option<WorkflowExecutionStatus>,
    /// Set once a failure under `FailureStrategy::End` stops new starts
    pub halted: bool,
}

/// A live workflow instance: its graph, its tasks and its event bus.
pub struct WorkflowExecutionRunnable {
    id: i64,
    definition: Arc<WorkflowDefinition>,
    event_bus: WorkflowEventBus,
    receiver: Mutex<Option<EventReceiver>>,
    state: RwLock<WorkflowExecutionState>,
    finished: AtomicBool,
}

impl WorkflowExecutionRunnable {
    /// Wraps `instance` with one pending task runnable per DAG node.
    pub fn new(
        instance: WorkflowInstance,
        definition: Arc<WorkflowDefinition>,
        dag: Arc<WorkflowDag>,
    ) -> Self {
        let id = instance.id;
        let (event_bus, receiver) = WorkflowEventBus::channel(id);
        let mut graph = WorkflowExecutionGraph::new(dag.clone());

        let mut tasks = HashMap::with_capacity(definition.tasks.len());
        for task in definition.tasks.iter().filter(|task| dag.contains(&task.name)) {
            if matches!(task.kind, TaskKind::Conditions { .. }) {
                graph.mark_failure_tolerant(&task.name);
            }
            tasks.insert(
                task.name.clone(),
                TaskExecutionRunnable::new(Arc::new(task.clone()), event_bus.clone()),
            );
        }

        Self {
            id,
            definition,
            event_bus,
            receiver: Mutex::new(Some(receiver)),
            state: RwLock::new(WorkflowExecutionState {
                instance,
                graph,
                tasks,
                prior_state: None,
                halted: false,
            }),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn event_bus(&self) -> &WorkflowEventBus {
        &self.event_bus
    }

    pub fn read(&self) -> RwLockReadGuard<'_, WorkflowExecutionState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, WorkflowExecutionState> {
        self.state.write()
    }

    pub fn state(&self) -> WorkflowExecutionStatus {
        self.state.read().instance.state
    }

    pub fn instance(&self) -> WorkflowInstance {
        self.state.read().instance.clone()
    }

    /// Hands out the receiving half of the bus. Only the first call gets it.
    pub fn take_event_receiver(&self) -> Option<EventReceiver> {
        self.receiver.lock().take()
    }

    pub fn publish(&self, event: impl Into<LifecycleEvent>) -> bool {
        self.event_bus.publish(event)
    }

    /// Publishes a task event pinned to the task's current attempt.
    pub fn publish_task(&self, task_name: &str, kind: TaskEventKind) -> bool {
        self.state
            .read()
            .tasks
            .get(task_name)
            .is_some_and(|task| task.publish(kind))
    }

    /// Marks the workflow done. Its consumer exits after the current event.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn task_definition(&self, task_name: &str) -> Option<Arc<TaskDefinition>> {
        self.state
            .read()
            .tasks
            .get(task_name)
            .map(|task| task.definition().clone())
    }

    pub fn task_instance(&self, task_name: &str) -> Option<TaskInstance> {
        self.state
            .read()
            .tasks
            .get(task_name)
            .and_then(|task| task.task_instance().cloned())
    }

    pub fn task_state(&self, task_name: &str) -> Option<TaskExecutionStatus> {
        self.state
            .read()
            .tasks
            .get(task_name)
            .and_then(TaskExecutionRunnable::state)
    }

    /// Current attempts of every materialized task.
    pub fn task_instances(&self) -> Vec<TaskInstance> {
        self.state
            .read()
            .tasks
            .values()
            .filter_map(|task| task.task_instance().cloned())
            .collect()
    }
}

impl std::fmt::Debug for WorkflowExecutionRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionRunnable")
            .field("id", &self.id)
            .field("definition", &self.definition.name)
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}
