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

use std::sync::Arc;

use crate::event::{TaskEventKind, TaskLifecycleEvent, TimerHandle, WorkflowEventBus};
use crate::models::{TaskDefinition, TaskExecutionStatus, TaskInstance};

/// Whether a task has a persisted attempt yet.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRuntime {
    /// Placeholder until the task's first Start event
    Pending,
    /// The current attempt
    Materialized(TaskInstance),
}

/// Live wrapper around one task of a running workflow.
#[derive(Debug)]
pub struct TaskExecutionRunnable {
    definition: Arc<TaskDefinition>,
    event_bus: WorkflowEventBus,
    runtime: TaskRuntime,
    timeout_timer: Option<TimerHandle>,
    retry_timer: Option<TimerHandle>,
}

impl TaskExecutionRunnable {
    pub fn new(definition: Arc<TaskDefinition>, event_bus: WorkflowEventBus) -> Self {
        Self {
            definition,
            event_bus,
            runtime: TaskRuntime::Pending,
            timeout_timer: None,
            retry_timer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<TaskDefinition> {
        &self.definition
    }

    pub fn event_bus(&self) -> &WorkflowEventBus {
        &self.event_bus
    }

    pub fn runtime(&self) -> &TaskRuntime {
        &self.runtime
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.runtime, TaskRuntime::Materialized(_))
    }

    pub fn task_instance(&self) -> Option<&TaskInstance> {
        match &self.runtime {
            TaskRuntime::Materialized(instance) => Some(instance),
            TaskRuntime::Pending => None,
        }
    }

    pub fn task_instance_mut(&mut self) -> Option<&mut TaskInstance> {
        match &mut self.runtime {
            TaskRuntime::Materialized(instance) => Some(instance),
            TaskRuntime::Pending => None,
        }
    }

    pub fn state(&self) -> Option<TaskExecutionStatus> {
        self.task_instance().map(|instance| instance.state)
    }

    /// Makes `instance` the current attempt. Timers of the previous attempt
    /// are cancelled.
    pub fn materialize(&mut self, instance: TaskInstance) {
        self.cancel_timers();
        self.runtime = TaskRuntime::Materialized(instance);
    }

    /// Publishes an event about the current attempt.
    pub fn publish(&self, kind: TaskEventKind) -> bool {
        self.event_bus.publish(self.event(kind))
    }

    /// Arms the timeout of the current attempt, replacing any earlier one.
    pub fn arm_timeout(&mut self) {
        let Some(timeout) = self.definition.timeout() else {
            return;
        };
        let event = self.event(TaskEventKind::Timeout);
        self.timeout_timer = Some(self.event_bus.publish_delayed(event, timeout));
    }

    /// Schedules an event about the current attempt after `delay`, replacing
    /// any earlier pending retry or dispatch backoff.
    pub fn schedule(&mut self, kind: TaskEventKind, delay: std::time::Duration) {
        let event = self.event(kind);
        self.retry_timer = Some(self.event_bus.publish_delayed(event, delay));
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn cancel_timeout(&mut self) {
        self.timeout_timer = None;
    }

    pub fn cancel_retry(&mut self) {
        self.retry_timer = None;
    }

    pub fn cancel_timers(&mut self) {
        self.cancel_timeout();
        self.cancel_retry();
    }

    fn event(&self, kind: TaskEventKind) -> TaskLifecycleEvent {
        let event = TaskLifecycleEvent::new(self.definition.name.clone(), kind);
        match self.task_instance() {
            Some(instance) => event.for_attempt(instance.id),
            None => event,
        }
    }
}
