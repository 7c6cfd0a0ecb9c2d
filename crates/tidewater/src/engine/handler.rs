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

use tracing::{debug, info};

use super::bootstrap::WorkflowBootstrapper;
use crate::error::CommandError;
use crate::event::{WorkflowEventBusCoordinator, WorkflowEventKind, WorkflowLifecycleEvent};
use crate::models::{Command, CommandType, WorkflowExecutionStatus};
use crate::state::EngineServices;

/// What handling a command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A runnable was registered and started
    Started,
    /// A runnable was registered but parked in `SerialWait`
    Registered,
    /// The instance was created already finished (serial discard)
    Discarded,
    /// A control command was applied to an existing instance
    Controlled,
}

/// Handles one command end to end: claim, bootstrap, register, start.
pub struct CommandHandler {
    services: Arc<EngineServices>,
    bootstrapper: WorkflowBootstrapper,
    coordinator: Arc<WorkflowEventBusCoordinator>,
}

impl CommandHandler {
    pub fn new(
        services: Arc<EngineServices>,
        bootstrapper: WorkflowBootstrapper,
        coordinator: Arc<WorkflowEventBusCoordinator>,
    ) -> Self {
        Self {
            services,
            bootstrapper,
            coordinator,
        }
    }

    pub async fn handle(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        self.claim(command).await?;

        if command.command_type.is_control() {
            return self.handle_control(command).await;
        }

        if command.command_type == CommandType::RecoverSerialWait {
            let local = command
                .workflow_instance_id
                .and_then(|id| self.services.repository.get(id));
            if let Some(runnable) = local {
                info!(
                    workflow_instance_id = runnable.id(),
                    "Releasing local serial wait instance {}",
                    runnable.id()
                );
                runnable.publish(WorkflowLifecycleEvent::new(
                    runnable.id(),
                    WorkflowEventKind::Start,
                ));
                return Ok(CommandOutcome::Controlled);
            }
        }

        let runnable = self.bootstrapper.bootstrap(command).await?;
        let id = runnable.id();
        let state = runnable.state();
        if state.is_finished() {
            return Ok(CommandOutcome::Discarded);
        }

        self.services.repository.insert(runnable.clone())?;
        if let Err(err) = self.coordinator.attach(runnable.clone()) {
            self.services.repository.remove(id);
            return Err(err.into());
        }

        if state == WorkflowExecutionStatus::SerialWait {
            return Ok(CommandOutcome::Registered);
        }
        runnable.publish(WorkflowLifecycleEvent::new(id, WorkflowEventKind::Start));
        Ok(CommandOutcome::Started)
    }

    /// Deletes the command; losing the race to another master is an error
    /// the engine treats as benign.
    async fn claim(&self, command: &Command) -> Result<(), CommandError> {
        if self.services.command_dao.delete(command.id).await? {
            Ok(())
        } else {
            Err(CommandError::DuplicateHandle {
                command_id: command.id,
            })
        }
    }

    async fn handle_control(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let id = command
            .workflow_instance_id
            .ok_or(CommandError::MissingWorkflowInstance {
                command_id: command.id,
                command_type: command.command_type,
            })?;
        let (kind, target) = match command.command_type {
            CommandType::Pause => (WorkflowEventKind::Pause, WorkflowExecutionStatus::Pause),
            CommandType::Stop => (WorkflowEventKind::Stop, WorkflowExecutionStatus::Stop),
            other => return Err(CommandError::UnsupportedCommand(other)),
        };

        if let Some(runnable) = self.services.repository.get(id) {
            runnable.publish(WorkflowLifecycleEvent::new(id, kind));
            return Ok(CommandOutcome::Controlled);
        }

        let instance = self
            .services
            .workflow_instance_dao
            .find(id)
            .await?
            .ok_or(CommandError::WorkflowInstanceNotFound(id))?;
        match instance.state {
            WorkflowExecutionStatus::SerialWait
            | WorkflowExecutionStatus::Failover
            | WorkflowExecutionStatus::Submitted => {
                self.services
                    .workflow_instance_dao
                    .update_state(id, target)
                    .await?;
                info!(
                    workflow_instance_id = id,
                    "Workflow instance {} {} -> {} without an owner",
                    id,
                    instance.state,
                    target
                );
                Ok(CommandOutcome::Controlled)
            }
            state if state.is_finished() => {
                debug!(
                    workflow_instance_id = id,
                    "Ignoring {} for finished workflow instance {}", command.command_type, id
                );
                Ok(CommandOutcome::Controlled)
            }
            _ => Err(CommandError::NotOwned {
                id,
                host: instance.host.unwrap_or_default(),
            }),
        }
    }
}
