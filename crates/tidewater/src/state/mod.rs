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

//! # State Actions
//!
//! Lifecycle events are applied by state actions: one set of behaviors per
//! task state and one per workflow state. The [`LifecycleEventDispatcher`]
//! looks up the action for the target's current state and calls the method
//! matching the event kind. Events a state has no behavior for are dropped
//! at debug level.
//!
//! Task events are routed as follows:
//!
//! 1. events pinned to an attempt other than the current one are stale and
//!    dropped;
//! 2. a Start event persists a new attempt when the task has none, or when
//!    its current attempt already reached a final state (retries and
//!    recovered tasks);
//! 3. every other event goes to the action of the attempt's state.
//!
//! A persistence failure while handling an event leaves memory ahead of
//! storage. The workflow then publishes a Failover event to itself and is
//! relinquished to the command pipeline.

mod context;
mod task;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

pub use context::{TaskEventContext, WorkflowEventContext};
pub use task::{TaskStateAction, TaskStateActionFactory};
pub use workflow::{WorkflowStateAction, WorkflowStateActionFactory};

use crate::alert::AlertSender;
use crate::dispatch::TaskDispatcher;
use crate::error::EngineError;
use crate::event::{
    LifecycleEvent, LifecycleEventType, TaskLifecycleEvent, WorkflowEventKind,
    WorkflowLifecycleEvent,
};
use crate::models::{NewTaskInstance, TaskExecutionStatus};
use crate::repository::WorkflowRepository;
use crate::runnable::WorkflowExecutionRunnable;
use crate::storage::{CommandDao, TaskInstanceDao, WorkflowInstanceDao};

/// Collaborators shared by every state action.
pub struct EngineServices {
    pub master_address: String,
    pub command_dao: Arc<dyn CommandDao>,
    pub workflow_instance_dao: Arc<dyn WorkflowInstanceDao>,
    pub task_instance_dao: Arc<dyn TaskInstanceDao>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub alert_sender: Arc<dyn AlertSender>,
    pub repository: Arc<WorkflowRepository>,
    /// Delay before re-publishing a Dispatch that no worker accepted
    pub dispatch_retry_interval: Duration,
}

/// Routes lifecycle events to the state actions of their target.
pub struct LifecycleEventDispatcher {
    services: Arc<EngineServices>,
    task_actions: TaskStateActionFactory,
    workflow_actions: WorkflowStateActionFactory,
}

impl LifecycleEventDispatcher {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            task_actions: TaskStateActionFactory::new(),
            workflow_actions: WorkflowStateActionFactory::new(),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    /// Applies one event to `workflow`. Never fails: errors are logged, and
    /// persistence errors relinquish the workflow.
    pub async fn dispatch(&self, workflow: &Arc<WorkflowExecutionRunnable>, event: LifecycleEvent) {
        let event_type = event.event_type();
        let result = match event {
            LifecycleEvent::Task(event) => self.dispatch_task(workflow, event).await,
            LifecycleEvent::Workflow(event) => self.dispatch_workflow(workflow, event).await,
        };

        if let Err(err) = result {
            error!(
                workflow_instance_id = workflow.id(),
                "Failed to handle {} event: {}", event_type, err
            );
            if err.is_storage()
                && event_type != LifecycleEventType::WorkflowFailover
                && !workflow.is_finished()
            {
                workflow.publish(WorkflowLifecycleEvent::new(
                    workflow.id(),
                    WorkflowEventKind::Failover {
                        reason: err.to_string(),
                    },
                ));
            }
        }
    }

    async fn dispatch_task(
        &self,
        workflow: &Arc<WorkflowExecutionRunnable>,
        event: TaskLifecycleEvent,
    ) -> Result<(), EngineError> {
        let ctx = TaskEventContext::new(&self.services, workflow, &event.task_name);
        let definition = ctx.definition()?;
        let current = workflow.task_instance(&event.task_name);

        if let (Some(expected), Some(current)) = (event.task_instance_id, current.as_ref()) {
            if expected != current.id {
                debug!(
                    workflow_instance_id = workflow.id(),
                    "Dropping stale {} event for attempt {} of task '{}' (current attempt {})",
                    event.event_type(),
                    expected,
                    event.task_name,
                    current.id
                );
                return Ok(());
            }
        }

        if event.event_type() == LifecycleEventType::TaskStart {
            let attempt = match &current {
                None => Some(NewTaskInstance::first_attempt(workflow.id(), &definition)),
                Some(task) => match task.state {
                    TaskExecutionStatus::Failure => Some(NewTaskInstance::retry_of(task)),
                    TaskExecutionStatus::NeedFaultTolerance => {
                        Some(NewTaskInstance::failover_of(task))
                    }
                    TaskExecutionStatus::Pause | TaskExecutionStatus::Kill => {
                        Some(NewTaskInstance::first_attempt(workflow.id(), &definition))
                    }
                    _ => None,
                },
            };
            if let Some(attempt) = attempt {
                return ctx.start_attempt(attempt).await;
            }
        }

        let Some(current) = current else {
            debug!(
                workflow_instance_id = workflow.id(),
                "Dropping {} event for task '{}': no attempt yet",
                event.event_type(),
                event.task_name
            );
            return Ok(());
        };

        match self.task_actions.get(current.state) {
            Some(action) => action.handle(&ctx, event.kind).await,
            None => {
                debug!(
                    workflow_instance_id = workflow.id(),
                    "Dropping {} event for task '{}' in state {}",
                    event.event_type(),
                    event.task_name,
                    current.state
                );
                Ok(())
            }
        }
    }

    async fn dispatch_workflow(
        &self,
        workflow: &Arc<WorkflowExecutionRunnable>,
        event: WorkflowLifecycleEvent,
    ) -> Result<(), EngineError> {
        if event.workflow_instance_id != workflow.id() {
            debug!(
                workflow_instance_id = workflow.id(),
                "Dropping {} event addressed to workflow instance {}",
                event.event_type(),
                event.workflow_instance_id
            );
            return Ok(());
        }

        let state = workflow.state();
        match self.workflow_actions.get(state) {
            Some(action) => {
                let ctx = WorkflowEventContext::new(&self.services, workflow);
                action.handle(&ctx, event.kind).await
            }
            None => {
                debug!(
                    workflow_instance_id = workflow.id(),
                    "Dropping {} event in workflow state {}",
                    event.event_type(),
                    state
                );
                Ok(())
            }
        }
    }
}
