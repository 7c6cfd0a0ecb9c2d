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

//! Task state actions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::context::TaskEventContext;
use crate::alert::TaskTimeoutAlert;
use crate::error::EngineError;
use crate::event::TaskEventKind;
use crate::models::{
    NewTaskInstance, TaskDefinition, TaskExecutionStatus, TaskKind, TimeoutStrategy,
    WorkflowExecutionStatus,
};
use crate::runnable::NodeOutcome;

fn ignored(ctx: &TaskEventContext<'_>, event: &str) -> Result<(), EngineError> {
    debug!(
        workflow_instance_id = ctx.workflow.id(),
        "Task '{}' ignores {} in state {:?}",
        ctx.task_name,
        event,
        ctx.workflow.task_state(ctx.task_name)
    );
    Ok(())
}

/// Behaviors of a task attempt in one state. Each method handles one event
/// kind; the defaults drop the event.
#[async_trait]
pub trait TaskStateAction: Send + Sync {
    async fn on_start(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_start")
    }

    async fn on_dispatch(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_dispatch")
    }

    async fn on_running(
        &self,
        ctx: &TaskEventContext<'_>,
        _started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        ignored(ctx, "task_running")
    }

    async fn on_success(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_success")
    }

    async fn on_failure(
        &self,
        ctx: &TaskEventContext<'_>,
        _reason: &str,
    ) -> Result<(), EngineError> {
        ignored(ctx, "task_failure")
    }

    async fn on_retry(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_retry")
    }

    async fn on_timeout(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_timeout")
    }

    async fn on_kill(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_kill")
    }

    async fn on_killed(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_killed")
    }

    async fn on_pause(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_pause")
    }

    async fn on_paused(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ignored(ctx, "task_paused")
    }

    async fn on_failover(
        &self,
        ctx: &TaskEventContext<'_>,
        _worker_address: &str,
        _crash_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        ignored(ctx, "task_failover")
    }

    async fn handle(
        &self,
        ctx: &TaskEventContext<'_>,
        kind: TaskEventKind,
    ) -> Result<(), EngineError> {
        match kind {
            TaskEventKind::Start => self.on_start(ctx).await,
            TaskEventKind::Dispatch => self.on_dispatch(ctx).await,
            TaskEventKind::Running { started_at } => self.on_running(ctx, started_at).await,
            TaskEventKind::Success => self.on_success(ctx).await,
            TaskEventKind::Failure { reason } => self.on_failure(ctx, &reason).await,
            TaskEventKind::Retry => self.on_retry(ctx).await,
            TaskEventKind::Timeout => self.on_timeout(ctx).await,
            TaskEventKind::Kill => self.on_kill(ctx).await,
            TaskEventKind::Killed => self.on_killed(ctx).await,
            TaskEventKind::Pause => self.on_pause(ctx).await,
            TaskEventKind::Paused => self.on_paused(ctx).await,
            TaskEventKind::Failover {
                worker_address,
                crash_time,
            } => self.on_failover(ctx, &worker_address, crash_time).await,
        }
    }
}

/// Maps each task state to its action. Final states have none.
pub struct TaskStateActionFactory {
    actions: HashMap<TaskExecutionStatus, Arc<dyn TaskStateAction>>,
}

impl Default for TaskStateActionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStateActionFactory {
    pub fn new() -> Self {
        let dispatched: Arc<dyn TaskStateAction> = Arc::new(DispatchedTaskAction);
        let mut actions: HashMap<TaskExecutionStatus, Arc<dyn TaskStateAction>> = HashMap::new();
        actions.insert(TaskExecutionStatus::Submitted, Arc::new(SubmittedTaskAction));
        actions.insert(TaskExecutionStatus::Dispatch, dispatched.clone());
        actions.insert(TaskExecutionStatus::RunningExecution, dispatched);
        actions.insert(TaskExecutionStatus::Failure, Arc::new(FailureTaskAction));
        Self { actions }
    }

    pub fn get(&self, state: TaskExecutionStatus) -> Option<Arc<dyn TaskStateAction>> {
        self.actions.get(&state).cloned()
    }
}

async fn finish_as(
    ctx: &TaskEventContext<'_>,
    state: TaskExecutionStatus,
    outcome: NodeOutcome,
) -> Result<(), EngineError> {
    ctx.transition(state, |task| task.end_time = Some(Utc::now())).await?;
    ctx.finish(outcome);
    Ok(())
}

fn handle_timeout(ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
    if !ctx.is_active() {
        debug!(
            workflow_instance_id = ctx.workflow.id(),
            "Discarding timeout of inactive task '{}'", ctx.task_name
        );
        return Ok(());
    }

    let definition = ctx.definition()?;
    let task = ctx.task()?;
    let send_alert = || {
        let alert = TaskTimeoutAlert::new(
            &ctx.workflow.instance(),
            &task,
            definition.timeout_seconds,
            &ctx.workflow.definition().alert_recipients,
        );
        ctx.services.alert_sender.send_task_timeout_alert(alert);
    };

    match &definition.timeout_strategy {
        Some(TimeoutStrategy::Warn) => send_alert(),
        Some(TimeoutStrategy::Failed) => {
            ctx.publish(TaskEventKind::Kill);
        }
        Some(TimeoutStrategy::WarnFailed) => {
            send_alert();
            ctx.publish(TaskEventKind::Kill);
        }
        Some(TimeoutStrategy::Unrecognized(name)) => warn!(
            workflow_instance_id = ctx.workflow.id(),
            "Task '{}' timed out with unknown timeout strategy '{}'", ctx.task_name, name
        ),
        None => warn!(
            workflow_instance_id = ctx.workflow.id(),
            "Task '{}' timed out without a timeout strategy", ctx.task_name
        ),
    }
    Ok(())
}

/// Successors chosen by a conditions or switch task.
fn evaluate_branch(ctx: &TaskEventContext<'_>, definition: &TaskDefinition) -> Vec<String> {
    match &definition.kind {
        TaskKind::Conditions {
            success_branch,
            failure_branch,
        } => {
            let state = ctx.workflow.read();
            let all_passed = state
                .graph
                .dag()
                .predecessors(ctx.task_name)
                .into_iter()
                .all(|name| state.graph.outcome(name).is_some_and(|o| o.is_passing()));
            if all_passed {
                success_branch.clone()
            } else {
                failure_branch.clone()
            }
        }
        TaskKind::Switch {
            cases,
            default_branch,
        } => {
            let state = ctx.workflow.read();
            let params = &state.instance.global_params;
            cases
                .iter()
                .find(|case| params.get(&case.param) == Some(&case.equals))
                .map(|case| vec![case.next.clone()])
                .or_else(|| default_branch.clone().map(|next| vec![next]))
                .unwrap_or_default()
        }
        TaskKind::Normal => Vec::new(),
    }
}

/// A persisted attempt not yet handed to a worker.
struct SubmittedTaskAction;

#[async_trait]
impl TaskStateAction for SubmittedTaskAction {
    async fn on_start(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ctx.begin();
        Ok(())
    }

    async fn on_dispatch(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        match ctx.workflow_state() {
            WorkflowExecutionStatus::ReadyStop => {
                ctx.cancel_retry();
                return finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await;
            }
            WorkflowExecutionStatus::ReadyPause => {
                ctx.cancel_retry();
                return finish_as(ctx, TaskExecutionStatus::Pause, NodeOutcome::Paused).await;
            }
            _ => {}
        }

        let definition = ctx.definition()?;
        if definition.kind.is_logic() {
            let branch = evaluate_branch(ctx, &definition);
            info!(
                workflow_instance_id = ctx.workflow.id(),
                "Task '{}' chose branch {:?}", ctx.task_name, branch
            );
            ctx.transition(TaskExecutionStatus::Success, move |task| {
                let now = Utc::now();
                task.host = None;
                task.start_time = Some(now);
                task.end_time = Some(now);
                task.branch = Some(branch);
            })
            .await?;
            ctx.finish(NodeOutcome::Success);
            return Ok(());
        }

        let task = ctx.task()?;
        let workflow = ctx.workflow.instance();
        match ctx
            .services
            .dispatcher
            .dispatch(&workflow, &task, &definition)
            .await
        {
            Ok(worker) => {
                ctx.transition(TaskExecutionStatus::Dispatch, move |task| {
                    task.host = Some(worker);
                })
                .await?;
            }
            Err(err) => {
                let delay = ctx.services.dispatch_retry_interval;
                warn!(
                    workflow_instance_id = workflow.id,
                    task_instance_id = task.id,
                    "Failed to dispatch task '{}', retrying in {:?}: {}",
                    ctx.task_name,
                    delay,
                    err
                );
                ctx.schedule(TaskEventKind::Dispatch, delay);
            }
        }
        Ok(())
    }

    async fn on_timeout(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        handle_timeout(ctx)
    }

    async fn on_kill(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ctx.cancel_retry();
        finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await
    }

    async fn on_pause(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ctx.cancel_retry();
        finish_as(ctx, TaskExecutionStatus::Pause, NodeOutcome::Paused).await
    }
}

/// An attempt held by a worker, running or about to.
struct DispatchedTaskAction;

#[async_trait]
impl TaskStateAction for DispatchedTaskAction {
    async fn on_running(
        &self,
        ctx: &TaskEventContext<'_>,
        started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if ctx.task()?.state != TaskExecutionStatus::Dispatch {
            return ignored(ctx, "task_running");
        }
        ctx.transition(TaskExecutionStatus::RunningExecution, move |task| {
            task.start_time = Some(started_at);
        })
        .await?;
        Ok(())
    }

    async fn on_success(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        finish_as(ctx, TaskExecutionStatus::Success, NodeOutcome::Success).await
    }

    async fn on_failure(
        &self,
        ctx: &TaskEventContext<'_>,
        reason: &str,
    ) -> Result<(), EngineError> {
        let task = ctx
            .transition(TaskExecutionStatus::Failure, |task| {
                task.end_time = Some(Utc::now());
            })
            .await?;
        ctx.cancel_timeout();

        let definition = ctx.definition()?;
        let can_retry = task.retry_times < definition.max_retry_times
            && ctx.workflow_state() == WorkflowExecutionStatus::RunningExecution;
        if can_retry {
            info!(
                workflow_instance_id = ctx.workflow.id(),
                task_instance_id = task.id,
                "Task '{}' failed ({}), retry {}/{} in {:?}",
                ctx.task_name,
                reason,
                task.retry_times + 1,
                definition.max_retry_times,
                definition.retry_interval()
            );
            ctx.schedule(TaskEventKind::Retry, definition.retry_interval());
        } else {
            warn!(
                workflow_instance_id = ctx.workflow.id(),
                task_instance_id = task.id,
                "Task '{}' failed: {}", ctx.task_name, reason
            );
            ctx.finish(NodeOutcome::Failure);
        }
        Ok(())
    }

    async fn on_timeout(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        handle_timeout(ctx)
    }

    async fn on_kill(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        let task = ctx.task()?;
        match ctx.services.dispatcher.kill(&task).await {
            Ok(()) => {
                debug!(
                    workflow_instance_id = ctx.workflow.id(),
                    task_instance_id = task.id,
                    "Kill of task '{}' requested", ctx.task_name
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    workflow_instance_id = ctx.workflow.id(),
                    task_instance_id = task.id,
                    "Failed to reach worker to kill task '{}', marking it killed: {}",
                    ctx.task_name,
                    err
                );
                finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await
            }
        }
    }

    async fn on_killed(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await
    }

    async fn on_pause(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        let task = ctx.task()?;
        if let Err(err) = ctx.services.dispatcher.pause(&task).await {
            warn!(
                workflow_instance_id = ctx.workflow.id(),
                task_instance_id = task.id,
                "Failed to notify worker of pause for task '{}': {}", ctx.task_name, err
            );
        }
        Ok(())
    }

    async fn on_paused(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        finish_as(ctx, TaskExecutionStatus::Pause, NodeOutcome::Paused).await
    }

    async fn on_failover(
        &self,
        ctx: &TaskEventContext<'_>,
        worker_address: &str,
        crash_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let task = ctx.task()?;
        if task.host.as_deref() != Some(worker_address) || task.submit_time >= crash_time {
            return ignored(ctx, "task_failover");
        }

        warn!(
            workflow_instance_id = ctx.workflow.id(),
            task_instance_id = task.id,
            "Worker {} lost task '{}', resubmitting", worker_address, ctx.task_name
        );
        let lost = ctx
            .transition(TaskExecutionStatus::NeedFaultTolerance, |task| {
                task.end_time = Some(Utc::now());
            })
            .await?;
        ctx.start_attempt(NewTaskInstance::failover_of(&lost)).await
    }
}

/// A failed attempt waiting for its retry interval.
struct FailureTaskAction;

#[async_trait]
impl TaskStateAction for FailureTaskAction {
    async fn on_retry(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        match ctx.workflow_state() {
            WorkflowExecutionStatus::ReadyStop => {
                finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await
            }
            WorkflowExecutionStatus::ReadyPause => {
                finish_as(ctx, TaskExecutionStatus::Pause, NodeOutcome::Paused).await
            }
            _ => {
                let failed = ctx.task()?;
                ctx.start_attempt(NewTaskInstance::retry_of(&failed)).await
            }
        }
    }

    async fn on_kill(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ctx.cancel_retry();
        finish_as(ctx, TaskExecutionStatus::Kill, NodeOutcome::Killed).await
    }

    async fn on_pause(&self, ctx: &TaskEventContext<'_>) -> Result<(), EngineError> {
        ctx.cancel_retry();
        finish_as(ctx, TaskExecutionStatus::Pause, NodeOutcome::Paused).await
    }
}
