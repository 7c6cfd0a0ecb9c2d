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

//! Turns a claimed command into a workflow runnable.
//!
//! | Command | Instance | Tasks |
//! |---|---|---|
//! | `StartProcess`, `Scheduler`, `ComplementData` | new | all pending |
//! | `RepeatRunning` | finished instance rerun | all pending |
//! | `StartFailureTaskProcess`, `RecoverSuspendedProcess` | finished instance rerun | succeeded tasks kept |
//! | `RecoverToleranceFaultProcess` | relinquished instance | restored from their last attempt |
//! | `RecoverSerialWait` | parked instance | all pending |

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::dag::WorkflowDag;
use crate::error::CommandError;
use crate::models::{
    Command, CommandType, ExecutionType, NewWorkflowInstance, TaskExecutionStatus, TaskInstance,
    WorkflowDefinition, WorkflowExecutionStatus, WorkflowInstance,
};
use crate::runnable::{NodeOutcome, WorkflowExecutionRunnable};
use crate::state::EngineServices;
use crate::storage::WorkflowDefinitionDao;

/// Where a restored task goes in the execution graph.
enum Restore {
    /// Final; the node is done
    Finished(NodeOutcome),
    /// Still running on a worker that agreed to report here
    Adopted,
    /// Eligible to start again once its predecessors allow
    Pending,
}

pub struct WorkflowBootstrapper {
    services: Arc<EngineServices>,
    definition_dao: Arc<dyn WorkflowDefinitionDao>,
}

impl WorkflowBootstrapper {
    pub fn new(
        services: Arc<EngineServices>,
        definition_dao: Arc<dyn WorkflowDefinitionDao>,
    ) -> Self {
        Self {
            services,
            definition_dao,
        }
    }

    pub async fn bootstrap(
        &self,
        command: &Command,
    ) -> Result<Arc<WorkflowExecutionRunnable>, CommandError> {
        match command.command_type {
            CommandType::StartProcess | CommandType::Scheduler | CommandType::ComplementData => {
                self.create_instance(command).await
            }
            CommandType::RepeatRunning => self.rerun(command, false).await,
            CommandType::StartFailureTaskProcess | CommandType::RecoverSuspendedProcess => {
                self.rerun(command, true).await
            }
            CommandType::RecoverToleranceFaultProcess => {
                self.recover_tolerance_fault(command).await
            }
            CommandType::RecoverSerialWait => self.recover_serial_wait(command).await,
            CommandType::Pause | CommandType::Stop => {
                Err(CommandError::UnsupportedCommand(command.command_type))
            }
        }
    }

    async fn load_definition(
        &self,
        code: i64,
        version: i32,
    ) -> Result<(Arc<WorkflowDefinition>, Arc<WorkflowDag>), CommandError> {
        let definition = self
            .definition_dao
            .query_by_code_version(code, version)
            .await?
            .ok_or(CommandError::DefinitionNotFound { code, version })?;
        let dag = WorkflowDag::from_definition(&definition)?;
        Ok((Arc::new(definition), Arc::new(dag)))
    }

    async fn load_instance(&self, command: &Command) -> Result<WorkflowInstance, CommandError> {
        let id = command
            .workflow_instance_id
            .ok_or(CommandError::MissingWorkflowInstance {
                command_id: command.id,
                command_type: command.command_type,
            })?;
        self.services
            .workflow_instance_dao
            .find(id)
            .await?
            .ok_or(CommandError::WorkflowInstanceNotFound(id))
    }

    async fn create_instance(
        &self,
        command: &Command,
    ) -> Result<Arc<WorkflowExecutionRunnable>, CommandError> {
        let (definition, dag) = self
            .load_definition(
                command.workflow_definition_code,
                command.workflow_definition_version,
            )
            .await?;

        let state = match definition.execution_type {
            ExecutionType::Parallel => WorkflowExecutionStatus::Submitted,
            serial => {
                let in_flight = self
                    .services
                    .workflow_instance_dao
                    .count_running_by_definition(definition.code)
                    .await?;
                match (in_flight, serial) {
                    (0, _) => WorkflowExecutionStatus::Submitted,
                    (_, ExecutionType::SerialWait) => WorkflowExecutionStatus::SerialWait,
                    _ => WorkflowExecutionStatus::Stop,
                }
            }
        };

        let now = Utc::now();
        let mut instance = self
            .services
            .workflow_instance_dao
            .insert(NewWorkflowInstance {
                name: format!("{}-{}", definition.name, now.format("%Y%m%d%H%M%S%3f")),
                definition_code: definition.code,
                definition_version: definition.version,
                state,
                host: Some(self.services.master_address.clone()),
                command_type: command.command_type,
                start_time: now,
                global_params: command.global_params(),
            })
            .await?;

        match state {
            WorkflowExecutionStatus::Stop => {
                instance.end_time = Some(now);
                self.services.workflow_instance_dao.update(&instance).await?;
                info!(
                    workflow_instance_id = instance.id,
                    "Discarded instance of '{}': another instance is still running",
                    definition.name
                );
            }
            WorkflowExecutionStatus::SerialWait => info!(
                workflow_instance_id = instance.id,
                "Instance of '{}' waits for earlier instances", definition.name
            ),
            _ => info!(
                workflow_instance_id = instance.id,
                "Created instance {} of '{}'", instance.id, definition.name
            ),
        }

        Ok(Arc::new(WorkflowExecutionRunnable::new(
            instance, definition, dag,
        )))
    }

    /// Reruns a finished instance, optionally keeping its succeeded tasks.
    async fn rerun(
        &self,
        command: &Command,
        keep_succeeded: bool,
    ) -> Result<Arc<WorkflowExecutionRunnable>, CommandError> {
        let mut instance = self.load_instance(command).await?;
        if !instance.state.is_finished() {
            return Err(CommandError::InvalidWorkflowState {
                id: instance.id,
                state: instance.state,
            });
        }
        let (definition, dag) = self
            .load_definition(instance.definition_code, instance.definition_version)
            .await?;

        instance.state = WorkflowExecutionStatus::Submitted;
        instance.host = Some(self.services.master_address.clone());
        instance.command_type = command.command_type;
        instance.restart_time = Some(Utc::now());
        instance.end_time = None;
        instance.run_times += 1;
        instance.global_params.extend(command.global_params());
        self.services.workflow_instance_dao.update(&instance).await?;
        info!(
            workflow_instance_id = instance.id,
            "Rerunning instance {} of '{}' ({})",
            instance.id,
            definition.name,
            command.command_type
        );

        let runnable = Arc::new(WorkflowExecutionRunnable::new(instance, definition, dag));
        if keep_succeeded {
            let tasks = self
                .services
                .task_instance_dao
                .query_latest_by_workflow_instance(runnable.id())
                .await?;
            for task in tasks {
                if task.state == TaskExecutionStatus::Success {
                    restore(&runnable, task, Restore::Finished(NodeOutcome::Success));
                }
            }
        }
        Ok(runnable)
    }

    /// Picks up an instance relinquished by a crashed master. Tasks resume
    /// from their last attempt; attempts still held by a live worker are
    /// taken over instead of rerun.
    async fn recover_tolerance_fault(
        &self,
        command: &Command,
    ) -> Result<Arc<WorkflowExecutionRunnable>, CommandError> {
        let mut instance = self.load_instance(command).await?;
        if instance.state != WorkflowExecutionStatus::Failover {
            return Err(CommandError::InvalidWorkflowState {
                id: instance.id,
                state: instance.state,
            });
        }
        let (definition, dag) = self
            .load_definition(instance.definition_code, instance.definition_version)
            .await?;

        // A parked serial instance goes back to waiting while any other
        // instance of its definition is in flight.
        if command.prior_state() == Some(WorkflowExecutionStatus::SerialWait) {
            let others = self
                .services
                .workflow_instance_dao
                .count_running_by_definition(definition.code)
                .await?
                .saturating_sub(1);
            if others > 0 {
                instance.state = WorkflowExecutionStatus::SerialWait;
                instance.host = Some(self.services.master_address.clone());
                self.services.workflow_instance_dao.update(&instance).await?;
                info!(
                    workflow_instance_id = instance.id,
                    "Recovered instance {} waits again behind {} earlier instances",
                    instance.id,
                    others
                );
                return Ok(Arc::new(WorkflowExecutionRunnable::new(
                    instance, definition, dag,
                )));
            }
        }

        let runnable = Arc::new(WorkflowExecutionRunnable::new(instance, definition, dag));
        runnable.write().prior_state = command.prior_state();

        let tasks = self
            .services
            .task_instance_dao
            .query_latest_by_workflow_instance(runnable.id())
            .await?;
        let mut adopted = 0;
        for task in tasks {
            let Some(definition) = runnable.task_definition(&task.name) else {
                continue;
            };
            let placement = match task.state {
                TaskExecutionStatus::Success => Restore::Finished(NodeOutcome::Success),
                TaskExecutionStatus::Kill => Restore::Finished(NodeOutcome::Killed),
                TaskExecutionStatus::Pause => Restore::Finished(NodeOutcome::Paused),
                TaskExecutionStatus::Failure if task.retry_times >= definition.max_retry_times => {
                    Restore::Finished(NodeOutcome::Failure)
                }
                TaskExecutionStatus::Dispatch | TaskExecutionStatus::RunningExecution => {
                    if self.take_over(&task).await {
                        adopted += 1;
                        Restore::Adopted
                    } else {
                        let mut lost = task.clone();
                        lost.state = TaskExecutionStatus::NeedFaultTolerance;
                        lost.end_time = Some(Utc::now());
                        self.services.task_instance_dao.update(&lost).await?;
                        restore(&runnable, lost, Restore::Pending);
                        continue;
                    }
                }
                _ => Restore::Pending,
            };
            restore(&runnable, task, placement);
        }

        info!(
            workflow_instance_id = runnable.id(),
            "Recovering instance {} (prior state {:?}, {} tasks taken over)",
            runnable.id(),
            command.prior_state(),
            adopted
        );
        Ok(runnable)
    }

    async fn take_over(&self, task: &TaskInstance) -> bool {
        match self.services.dispatcher.take_over(task).await {
            Ok(adopted) => adopted,
            Err(err) => {
                warn!(
                    task_instance_id = task.id,
                    "Could not take over task '{}' from {:?}: {}", task.name, task.host, err
                );
                false
            }
        }
    }

    async fn recover_serial_wait(
        &self,
        command: &Command,
    ) -> Result<Arc<WorkflowExecutionRunnable>, CommandError> {
        let mut instance = self.load_instance(command).await?;
        if instance.state != WorkflowExecutionStatus::SerialWait {
            return Err(CommandError::InvalidWorkflowState {
                id: instance.id,
                state: instance.state,
            });
        }
        let (definition, dag) = self
            .load_definition(instance.definition_code, instance.definition_version)
            .await?;

        instance.state = WorkflowExecutionStatus::Submitted;
        instance.host = Some(self.services.master_address.clone());
        self.services.workflow_instance_dao.update(&instance).await?;
        Ok(Arc::new(WorkflowExecutionRunnable::new(
            instance, definition, dag,
        )))
    }
}

fn restore(runnable: &WorkflowExecutionRunnable, task: TaskInstance, placement: Restore) {
    let mut guard = runnable.write();
    let state = &mut *guard;
    let name = task.name.clone();
    let branch = task.branch.clone();
    let Some(runtime) = state.tasks.get_mut(&name) else {
        return;
    };
    runtime.materialize(task);

    match placement {
        Restore::Finished(outcome) => {
            if let (NodeOutcome::Success, Some(branch)) = (outcome, branch) {
                state.graph.set_branch(&name, branch);
            }
            state.graph.mark_finished(&name, outcome);
        }
        Restore::Adopted => {
            runtime.arm_timeout();
            state.graph.mark_active(&name);
        }
        Restore::Pending => {}
    }
}
