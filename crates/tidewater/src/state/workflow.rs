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

//! Workflow state actions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::context::WorkflowEventContext;
use crate::error::EngineError;
use crate::event::{TaskEventKind, WorkflowEventKind};
use crate::models::{FailureStrategy, WorkflowExecutionStatus};
use crate::runnable::NodeOutcome;

fn ignored(ctx: &WorkflowEventContext<'_>, event: &str) -> Result<(), EngineError> {
    debug!(
        workflow_instance_id = ctx.workflow.id(),
        "Workflow ignores {} in state {}",
        event,
        ctx.state()
    );
    Ok(())
}

/// Behaviors of a workflow in one state. Each method handles one event kind;
/// the defaults drop the event, except Failover which relinquishes the
/// workflow from any live state.
#[async_trait]
pub trait WorkflowStateAction: Send + Sync {
    async fn on_start(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "workflow_start")
    }

    async fn on_task_finished(
        &self,
        ctx: &WorkflowEventContext<'_>,
        _task_name: &str,
    ) -> Result<(), EngineError> {
        ignored(ctx, "workflow_task_finished")
    }

    async fn on_pause(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "workflow_pause")
    }

    async fn on_stop(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "workflow_stop")
    }

    async fn on_failover(
        &self,
        ctx: &WorkflowEventContext<'_>,
        reason: &str,
    ) -> Result<(), EngineError> {
        ctx.relinquish(reason).await
    }

    async fn handle(
        &self,
        ctx: &WorkflowEventContext<'_>,
        kind: WorkflowEventKind,
    ) -> Result<(), EngineError> {
        match kind {
            WorkflowEventKind::Start => self.on_start(ctx).await,
            WorkflowEventKind::TaskFinished { task_name } => {
                self.on_task_finished(ctx, &task_name).await
            }
            WorkflowEventKind::Pause => self.on_pause(ctx).await,
            WorkflowEventKind::Stop => self.on_stop(ctx).await,
            WorkflowEventKind::Failover { reason } => self.on_failover(ctx, &reason).await,
        }
    }
}

/// Maps each live workflow state to its action. Terminal states have none.
pub struct WorkflowStateActionFactory {
    actions: HashMap<WorkflowExecutionStatus, Arc<dyn WorkflowStateAction>>,
}

impl Default for WorkflowStateActionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStateActionFactory {
    pub fn new() -> Self {
        let waiting: Arc<dyn WorkflowStateAction> = Arc::new(WaitingWorkflowAction);
        let mut actions: HashMap<WorkflowExecutionStatus, Arc<dyn WorkflowStateAction>> =
            HashMap::new();
        actions.insert(WorkflowExecutionStatus::Submitted, waiting.clone());
        actions.insert(WorkflowExecutionStatus::SerialWait, waiting.clone());
        actions.insert(WorkflowExecutionStatus::Failover, waiting);
        actions.insert(
            WorkflowExecutionStatus::RunningExecution,
            Arc::new(RunningWorkflowAction),
        );
        actions.insert(
            WorkflowExecutionStatus::ReadyPause,
            Arc::new(ReadyPauseWorkflowAction),
        );
        actions.insert(
            WorkflowExecutionStatus::ReadyStop,
            Arc::new(ReadyStopWorkflowAction),
        );
        Self { actions }
    }

    pub fn get(&self, state: WorkflowExecutionStatus) -> Option<Arc<dyn WorkflowStateAction>> {
        self.actions.get(&state).cloned()
    }
}

async fn request_pause(ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
    ctx.transition(WorkflowExecutionStatus::ReadyPause, |_| {}).await?;
    let notified = ctx.publish_to_active(TaskEventKind::Pause);
    debug!(
        workflow_instance_id = ctx.workflow.id(),
        "Pausing workflow, notified {} active tasks", notified
    );
    ctx.advance(false).await
}

async fn request_stop(ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
    ctx.transition(WorkflowExecutionStatus::ReadyStop, |_| {}).await?;
    let killed = ctx.publish_to_active(TaskEventKind::Kill);
    debug!(
        workflow_instance_id = ctx.workflow.id(),
        "Stopping workflow, killing {} active tasks", killed
    );
    ctx.advance(false).await
}

/// Not yet running: freshly submitted, parked behind a serial predecessor, or
/// relinquished by a crashed master and now being recovered.
struct WaitingWorkflowAction;

#[async_trait]
impl WorkflowStateAction for WaitingWorkflowAction {
    async fn on_start(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        let prior_state = ctx.workflow.read().prior_state;
        let host = ctx.services.master_address.clone();
        ctx.transition(WorkflowExecutionStatus::RunningExecution, move |instance| {
            instance.host = Some(host);
        })
        .await?;

        match prior_state {
            Some(WorkflowExecutionStatus::ReadyStop) => request_stop(ctx).await,
            Some(WorkflowExecutionStatus::ReadyPause) => request_pause(ctx).await,
            _ => ctx.advance(true).await,
        }
    }

    async fn on_pause(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        ctx.complete(WorkflowExecutionStatus::Pause).await
    }

    async fn on_stop(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        ctx.complete(WorkflowExecutionStatus::Stop).await
    }
}

struct RunningWorkflowAction;

#[async_trait]
impl WorkflowStateAction for RunningWorkflowAction {
    async fn on_task_finished(
        &self,
        ctx: &WorkflowEventContext<'_>,
        task_name: &str,
    ) -> Result<(), EngineError> {
        let end_on_failure = ctx.workflow.definition().failure_strategy == FailureStrategy::End;
        let halt = {
            let mut state = ctx.workflow.write();
            let failed = matches!(
                state.graph.outcome(task_name),
                Some(NodeOutcome::Failure) | Some(NodeOutcome::Killed)
            );
            let halt = failed && end_on_failure && !state.halted;
            if halt {
                state.halted = true;
            }
            halt
        };

        if halt {
            info!(
                workflow_instance_id = ctx.workflow.id(),
                "Task '{}' failed, ending workflow", task_name
            );
            ctx.publish_to_active(TaskEventKind::Kill);
        }

        let allow_start = !ctx.workflow.read().halted;
        ctx.advance(allow_start).await
    }

    async fn on_pause(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        request_pause(ctx).await
    }

    async fn on_stop(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        request_stop(ctx).await
    }
}

struct ReadyPauseWorkflowAction;

#[async_trait]
impl WorkflowStateAction for ReadyPauseWorkflowAction {
    async fn on_task_finished(
        &self,
        ctx: &WorkflowEventContext<'_>,
        _task_name: &str,
    ) -> Result<(), EngineError> {
        ctx.advance(false).await
    }

    async fn on_stop(&self, ctx: &WorkflowEventContext<'_>) -> Result<(), EngineError> {
        request_stop(ctx).await
    }
}

struct ReadyStopWorkflowAction;

#[async_trait]
impl WorkflowStateAction for ReadyStopWorkflowAction {
    async fn on_task_finished(
        &self,
        ctx: &WorkflowEventContext<'_>,
        _task_name: &str,
    ) -> Result<(), EngineError> {
        ctx.advance(false).await
    }
}
