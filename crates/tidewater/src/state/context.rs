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

//! Handles given to state actions. Every mutation persists first and is
//! applied to the runnable only once storage accepted it. Runnable guards
//! never outlive a synchronous helper, so none is held across an await.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, error, info, warn};

use super::EngineServices;
use crate::error::EngineError;
use crate::event::{TaskEventKind, WorkflowEventKind, WorkflowLifecycleEvent};
use crate::models::{
    ExecutionType, NewCommand, NewTaskInstance, TaskDefinition, TaskExecutionStatus,
    TaskInstance, WorkflowExecutionStatus, WorkflowInstance,
};
use crate::runnable::{NodeOutcome, TaskExecutionRunnable, WorkflowExecutionRunnable};

/// The task an event targets, with the services to act on it.
pub struct TaskEventContext<'a> {
    pub services: &'a EngineServices,
    pub workflow: &'a Arc<WorkflowExecutionRunnable>,
    pub task_name: &'a str,
}

impl<'a> TaskEventContext<'a> {
    pub fn new(
        services: &'a EngineServices,
        workflow: &'a Arc<WorkflowExecutionRunnable>,
        task_name: &'a str,
    ) -> Self {
        Self {
            services,
            workflow,
            task_name,
        }
    }

    /// The current attempt.
    pub fn task(&self) -> Result<TaskInstance, EngineError> {
        self.workflow
            .task_instance(self.task_name)
            .ok_or_else(|| EngineError::TaskNotMaterialized(self.task_name.to_string()))
    }

    pub fn definition(&self) -> Result<Arc<TaskDefinition>, EngineError> {
        self.workflow
            .task_definition(self.task_name)
            .ok_or_else(|| EngineError::UnknownTask {
                workflow_instance_id: self.workflow.id(),
                task: self.task_name.to_string(),
            })
    }

    pub fn workflow_state(&self) -> WorkflowExecutionStatus {
        self.workflow.state()
    }

    /// Whether the workflow still counts the task as in flight.
    pub fn is_active(&self) -> bool {
        self.workflow.read().graph.is_active(self.task_name)
    }

    fn with_runnable<R>(&self, f: impl FnOnce(&mut TaskExecutionRunnable) -> R) -> Option<R> {
        self.workflow.write().tasks.get_mut(self.task_name).map(f)
    }

    /// Moves the current attempt to `to`, applying `update` on the way.
    pub async fn transition<F>(
        &self,
        to: TaskExecutionStatus,
        update: F,
    ) -> Result<TaskInstance, EngineError>
    where
        F: FnOnce(&mut TaskInstance) + Send,
    {
        let mut task = self.task()?;
        let from = task.state;
        task.state = to;
        update(&mut task);

        self.services.task_instance_dao.update(&task).await?;
        self.with_runnable(|runnable| {
            if let Some(current) = runnable.task_instance_mut() {
                *current = task.clone();
            }
        });

        info!(
            workflow_instance_id = self.workflow.id(),
            task_instance_id = task.id,
            "Task '{}' {} -> {}",
            self.task_name,
            from,
            to
        );
        Ok(task)
    }

    /// Persists a new attempt, makes it current and starts it.
    pub async fn start_attempt(&self, attempt: NewTaskInstance) -> Result<(), EngineError> {
        let task = self.services.task_instance_dao.insert(attempt).await?;
        info!(
            workflow_instance_id = self.workflow.id(),
            task_instance_id = task.id,
            "Task '{}' attempt {} submitted (retry {}{})",
            self.task_name,
            task.id,
            task.retry_times,
            if task.failover { ", failover" } else { "" }
        );
        self.with_runnable(|runnable| runnable.materialize(task));
        self.begin();
        Ok(())
    }

    /// Arms the timeout of the current attempt and queues its dispatch.
    pub fn begin(&self) {
        self.with_runnable(|runnable| {
            runnable.arm_timeout();
            runnable.publish(TaskEventKind::Dispatch);
        });
    }

    pub fn publish(&self, kind: TaskEventKind) -> bool {
        self.workflow.publish_task(self.task_name, kind)
    }

    /// Publishes `kind` for the current attempt after `delay`.
    pub fn schedule(&self, kind: TaskEventKind, delay: Duration) {
        self.with_runnable(|runnable| runnable.schedule(kind, delay));
    }

    pub fn cancel_timeout(&self) {
        self.with_runnable(TaskExecutionRunnable::cancel_timeout);
    }

    pub fn cancel_retry(&self) {
        self.with_runnable(TaskExecutionRunnable::cancel_retry);
    }

    /// Records the task's final outcome in the graph and notifies the
    /// workflow.
    pub fn finish(&self, outcome: NodeOutcome) {
        {
            let mut state = self.workflow.write();
            let branch = state.tasks.get_mut(self.task_name).and_then(|runnable| {
                runnable.cancel_timers();
                runnable.task_instance().and_then(|task| task.branch.clone())
            });
            if outcome == NodeOutcome::Success {
                if let Some(branch) = branch {
                    state.graph.set_branch(self.task_name, branch);
                }
            }
            state.graph.mark_finished(self.task_name, outcome);
        }

        self.workflow.publish(WorkflowLifecycleEvent::new(
            self.workflow.id(),
            WorkflowEventKind::TaskFinished {
                task_name: self.task_name.to_string(),
            },
        ));
    }
}

/// The workflow an event targets, with the services to act on it.
pub struct WorkflowEventContext<'a> {
    pub services: &'a EngineServices,
    pub workflow: &'a Arc<WorkflowExecutionRunnable>,
}

impl<'a> WorkflowEventContext<'a> {
    pub fn new(services: &'a EngineServices, workflow: &'a Arc<WorkflowExecutionRunnable>) -> Self {
        Self { services, workflow }
    }

    pub fn state(&self) -> WorkflowExecutionStatus {
        self.workflow.state()
    }

    /// Moves the workflow to `to`, applying `update` on the way.
    pub async fn transition<F>(
        &self,
        to: WorkflowExecutionStatus,
        update: F,
    ) -> Result<WorkflowInstance, EngineError>
    where
        F: FnOnce(&mut WorkflowInstance) + Send,
    {
        let mut instance = self.workflow.instance();
        let from = instance.state;
        instance.state = to;
        update(&mut instance);

        self.services.workflow_instance_dao.update(&instance).await?;
        self.workflow.write().instance = instance.clone();

        info!(
            workflow_instance_id = instance.id,
            "Workflow '{}' {} -> {}", instance.name, from, to
        );
        Ok(instance)
    }

    /// Sends `kind` to every active task.
    pub fn publish_to_active(&self, kind: TaskEventKind) -> usize {
        let state = self.workflow.read();
        state
            .graph
            .active_nodes()
            .iter()
            .filter_map(|name| state.tasks.get(name))
            .filter(|task| task.publish(kind.clone()))
            .count()
    }

    /// Applies skip propagation, starts whatever became eligible when
    /// `allow_start` is set, and finalizes the workflow once nothing is in
    /// flight.
    pub async fn advance(&self, allow_start: bool) -> Result<(), EngineError> {
        let (skipped, started, idle) = {
            let mut state = self.workflow.write();
            let skipped = state.graph.propagate_skips();
            let started = if allow_start {
                state.graph.start_candidates()
            } else {
                Vec::new()
            };
            for name in &started {
                state.graph.mark_active(name);
            }
            let idle = !state.graph.has_active();
            (skipped, started, idle)
        };

        if !skipped.is_empty() {
            debug!(
                workflow_instance_id = self.workflow.id(),
                "Skipped tasks {:?}", skipped
            );
        }
        for name in &started {
            self.workflow.publish_task(name, TaskEventKind::Start);
        }

        if idle {
            self.finalize().await?;
        }
        Ok(())
    }

    /// Computes and persists the terminal state of a workflow with nothing
    /// left in flight.
    pub async fn finalize(&self) -> Result<(), EngineError> {
        let current = self.state();
        let stopping = current == WorkflowExecutionStatus::ReadyStop;
        let (has_failure, has_paused) = {
            let state = self.workflow.read();
            (state.graph.has_failure(stopping), state.graph.has_paused())
        };

        let final_state = if has_failure {
            WorkflowExecutionStatus::Failure
        } else if stopping {
            WorkflowExecutionStatus::Stop
        } else if current == WorkflowExecutionStatus::ReadyPause || has_paused {
            WorkflowExecutionStatus::Pause
        } else {
            WorkflowExecutionStatus::Success
        };
        self.complete(final_state).await
    }

    /// Persists a terminal state and releases the workflow.
    pub async fn complete(&self, final_state: WorkflowExecutionStatus) -> Result<(), EngineError> {
        self.transition(final_state, |instance| {
            instance.end_time = Some(Utc::now());
        })
        .await?;
        counter!("tidewater_workflows_finished_total", "state" => final_state.as_str())
            .increment(1);
        self.workflow.mark_finished();

        let definition = self.workflow.definition();
        if definition.execution_type == ExecutionType::SerialWait {
            if let Some(next) = self.services.repository.oldest_serial_wait(definition.code) {
                info!(
                    workflow_instance_id = next.id(),
                    "Releasing serial wait instance {} of '{}'",
                    next.id(),
                    definition.name
                );
                next.publish(WorkflowLifecycleEvent::new(
                    next.id(),
                    WorkflowEventKind::Start,
                ));
            }
        }
        Ok(())
    }

    /// Hands the workflow back to the command pipeline: persist `Failover`,
    /// enqueue a recovery command and evict. Storage errors are logged; a
    /// workflow that could not be persisted is recovered by global failover
    /// once this master restarts.
    pub async fn relinquish(&self, reason: &str) -> Result<(), EngineError> {
        let prior_state = self.state();
        warn!(
            workflow_instance_id = self.workflow.id(),
            "Relinquishing workflow instance {} in state {}: {}",
            self.workflow.id(),
            prior_state,
            reason
        );

        match self
            .transition(WorkflowExecutionStatus::Failover, |instance| {
                instance.host = None;
            })
            .await
        {
            Ok(instance) => {
                let command = NewCommand::recover_tolerance_fault(&instance, prior_state);
                match self.services.command_dao.insert(command).await {
                    Ok(command) => info!(
                        workflow_instance_id = instance.id,
                        "Enqueued recovery command {}", command.id
                    ),
                    Err(err) => error!(
                        workflow_instance_id = instance.id,
                        "Failed to enqueue recovery command: {}", err
                    ),
                }
            }
            Err(err) => error!(
                workflow_instance_id = self.workflow.id(),
                "Failed to persist failover state: {}", err
            ),
        }

        self.cancel_timers();
        self.workflow.mark_finished();
        Ok(())
    }

    fn cancel_timers(&self) {
        let mut state = self.workflow.write();
        for task in state.tasks.values_mut() {
            task.cancel_timers();
        }
    }
}
