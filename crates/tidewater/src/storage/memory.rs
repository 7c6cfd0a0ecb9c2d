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

//! In-memory storage backends.
//!
//! Each DAO keeps its rows in a `BTreeMap` behind a `parking_lot` lock and
//! hands out ids from an atomic sequence. Every DAO can be switched
//! unavailable to exercise the engine's error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::{
    command_slot, CommandDao, TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao,
};
use crate::error::StorageError;
use crate::models::{
    Command, ErrorCommand, NewCommand, NewTaskInstance, NewWorkflowInstance, TaskInstance,
    WorkflowDefinition, WorkflowExecutionStatus, WorkflowInstance,
};

#[derive(Debug)]
struct Availability(AtomicBool);

impl Default for Availability {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl Availability {
    fn set(&self, available: bool) {
        self.0.store(available, Ordering::SeqCst);
    }

    fn check(&self, backend: &str) -> Result<(), StorageError> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!("{} is offline", backend)))
        }
    }
}

#[derive(Debug)]
struct Sequence(AtomicI64);

impl Default for Sequence {
    fn default() -> Self {
        Self(AtomicI64::new(1))
    }
}

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Pending commands and the error table.
#[derive(Debug, Default)]
pub struct MemoryCommandDao {
    commands: Mutex<BTreeMap<i64, Command>>,
    errors: Mutex<Vec<ErrorCommand>>,
    ids: Sequence,
    availability: Availability,
}

impl MemoryCommandDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StorageError::Unavailable`] while false.
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Snapshot of all pending commands ordered by id.
    pub fn pending(&self) -> Vec<Command> {
        self.commands.lock().values().cloned().collect()
    }
}

#[async_trait]
impl CommandDao for MemoryCommandDao {
    async fn insert(&self, command: NewCommand) -> Result<Command, StorageError> {
        self.availability.check("command store")?;
        let command = Command {
            id: self.ids.next(),
            command_type: command.command_type,
            workflow_definition_code: command.workflow_definition_code,
            workflow_definition_version: command.workflow_definition_version,
            workflow_instance_id: command.workflow_instance_id,
            command_params: command.command_params,
            created_at: Utc::now(),
        };
        self.commands.lock().insert(command.id, command.clone());
        Ok(command)
    }

    async fn query_command_by_id_slot(
        &self,
        slot: usize,
        total_slots: usize,
        id_step: i64,
        limit: usize,
    ) -> Result<Vec<Command>, StorageError> {
        self.availability.check("command store")?;
        Ok(self
            .commands
            .lock()
            .values()
            .filter(|command| command_slot(command.id, id_step, total_slots) == slot)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, command_id: i64) -> Result<bool, StorageError> {
        self.availability.check("command store")?;
        Ok(self.commands.lock().remove(&command_id).is_some())
    }

    async fn move_to_error(&self, command: &Command, message: &str) -> Result<(), StorageError> {
        self.availability.check("command store")?;
        self.commands.lock().remove(&command.id);
        self.errors.lock().push(ErrorCommand {
            command: command.clone(),
            message: message.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_error_commands(&self) -> Result<Vec<ErrorCommand>, StorageError> {
        self.availability.check("command store")?;
        Ok(self.errors.lock().clone())
    }
}

/// Workflow instances.
#[derive(Debug, Default)]
pub struct MemoryWorkflowInstanceDao {
    instances: RwLock<BTreeMap<i64, WorkflowInstance>>,
    ids: Sequence,
    availability: Availability,
}

impl MemoryWorkflowInstanceDao {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Snapshot of every instance ordered by id.
    pub fn list(&self) -> Vec<WorkflowInstance> {
        self.instances.read().values().cloned().collect()
    }

    /// Stores a fully formed instance, keeping its id. Used to seed state
    /// left behind by another master.
    pub fn seed(&self, instance: WorkflowInstance) {
        self.ids.0.fetch_max(instance.id + 1, Ordering::SeqCst);
        self.instances.write().insert(instance.id, instance);
    }
}

#[async_trait]
impl WorkflowInstanceDao for MemoryWorkflowInstanceDao {
    async fn insert(
        &self,
        instance: NewWorkflowInstance,
    ) -> Result<WorkflowInstance, StorageError> {
        self.availability.check("workflow instance store")?;
        let instance = WorkflowInstance {
            id: self.ids.next(),
            name: instance.name,
            definition_code: instance.definition_code,
            definition_version: instance.definition_version,
            state: instance.state,
            host: instance.host,
            command_type: instance.command_type,
            start_time: instance.start_time,
            restart_time: None,
            end_time: None,
            run_times: 1,
            global_params: instance.global_params,
        };
        self.instances.write().insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn find(&self, id: i64) -> Result<Option<WorkflowInstance>, StorageError> {
        self.availability.check("workflow instance store")?;
        Ok(self.instances.read().get(&id).cloned())
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), StorageError> {
        self.availability.check("workflow instance store")?;
        match self.instances.write().get_mut(&instance.id) {
            Some(stored) => {
                *stored = instance.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "workflow instance",
                id: instance.id,
            }),
        }
    }

    async fn update_state(
        &self,
        id: i64,
        state: WorkflowExecutionStatus,
    ) -> Result<(), StorageError> {
        self.availability.check("workflow instance store")?;
        match self.instances.write().get_mut(&id) {
            Some(stored) => {
                stored.state = state;
                if state.is_finished() {
                    stored.end_time = Some(Utc::now());
                }
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "workflow instance",
                id,
            }),
        }
    }

    async fn query_need_failover_workflow_instances(
        &self,
        host: &str,
    ) -> Result<Vec<WorkflowInstance>, StorageError> {
        self.availability.check("workflow instance store")?;
        Ok(self
            .instances
            .read()
            .values()
            .filter(|instance| {
                instance.state.needs_failover() && instance.host.as_deref() == Some(host)
            })
            .cloned()
            .collect())
    }

    async fn query_need_failover_masters(&self) -> Result<Vec<String>, StorageError> {
        self.availability.check("workflow instance store")?;
        let mut hosts: Vec<String> = self
            .instances
            .read()
            .values()
            .filter(|instance| instance.state.needs_failover())
            .filter_map(|instance| instance.host.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        hosts.sort();
        Ok(hosts)
    }

    async fn count_running_by_definition(
        &self,
        definition_code: i64,
    ) -> Result<usize, StorageError> {
        self.availability.check("workflow instance store")?;
        Ok(self
            .instances
            .read()
            .values()
            .filter(|instance| {
                instance.definition_code == definition_code
                    && (instance.state.needs_failover()
                        || instance.state == WorkflowExecutionStatus::Failover)
            })
            .count())
    }
}

/// Task attempts.
#[derive(Debug, Default)]
pub struct MemoryTaskInstanceDao {
    tasks: RwLock<BTreeMap<i64, TaskInstance>>,
    ids: Sequence,
    availability: Availability,
}

impl MemoryTaskInstanceDao {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Every attempt of a workflow instance ordered by id.
    pub fn list_by_workflow_instance(&self, workflow_instance_id: i64) -> Vec<TaskInstance> {
        self.tasks
            .read()
            .values()
            .filter(|task| task.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect()
    }

    /// Stores a fully formed attempt, keeping its id.
    pub fn seed(&self, task: TaskInstance) {
        self.ids.0.fetch_max(task.id + 1, Ordering::SeqCst);
        self.tasks.write().insert(task.id, task);
    }
}

#[async_trait]
impl TaskInstanceDao for MemoryTaskInstanceDao {
    async fn insert(&self, task: NewTaskInstance) -> Result<TaskInstance, StorageError> {
        self.availability.check("task instance store")?;
        let task = TaskInstance {
            id: self.ids.next(),
            workflow_instance_id: task.workflow_instance_id,
            task_code: task.task_code,
            name: task.name,
            task_type: task.task_type,
            state: task.state,
            host: None,
            submit_time: task.submit_time,
            first_submit_time: task.first_submit_time,
            start_time: None,
            end_time: None,
            retry_times: task.retry_times,
            failover: task.failover,
            branch: None,
        };
        self.tasks.write().insert(task.id, task.clone());
        Ok(task)
    }

    async fn update(&self, task: &TaskInstance) -> Result<(), StorageError> {
        self.availability.check("task instance store")?;
        match self.tasks.write().get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "task instance",
                id: task.id,
            }),
        }
    }

    async fn find(&self, id: i64) -> Result<Option<TaskInstance>, StorageError> {
        self.availability.check("task instance store")?;
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn query_latest_by_workflow_instance(
        &self,
        workflow_instance_id: i64,
    ) -> Result<Vec<TaskInstance>, StorageError> {
        self.availability.check("task instance store")?;
        let mut latest: HashMap<i64, TaskInstance> = HashMap::new();
        for task in self
            .tasks
            .read()
            .values()
            .filter(|task| task.workflow_instance_id == workflow_instance_id)
        {
            // Values iterate in id order, so later attempts overwrite earlier ones.
            latest.insert(task.task_code, task.clone());
        }
        let mut tasks: Vec<TaskInstance> = latest.into_values().collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }
}

/// Workflow definitions keyed by `(code, version)`.
#[derive(Debug, Default)]
pub struct MemoryWorkflowDefinitionDao {
    definitions: RwLock<HashMap<(i64, i32), WorkflowDefinition>>,
}

impl MemoryWorkflowDefinitionDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowDefinitionDao for MemoryWorkflowDefinitionDao {
    async fn insert(&self, definition: WorkflowDefinition) -> Result<(), StorageError> {
        self.definitions
            .write()
            .insert((definition.code, definition.version), definition);
        Ok(())
    }

    async fn query_by_code_version(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, StorageError> {
        Ok(self.definitions.read().get(&(code, version)).cloned())
    }
}
