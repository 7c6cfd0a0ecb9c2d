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

//! Storage abstraction consumed by the master.
//!
//! The engine never talks to a database directly; it goes through the data
//! access traits below. Backends implement them against whatever durable store
//! the deployment uses. The [`memory`] module ships non-durable reference
//! implementations used by the CLI and the test suite.
//!
//! Two operations carry cluster-wide guarantees every backend must provide:
//!
//! - [`CommandDao::delete`] is the claim: exactly one caller may observe
//!   `true` for a given command id.
//! - [`CommandDao::query_command_by_id_slot`] must only return commands with
//!   `(id / id_step) % total_slots == slot`.

pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{
    Command, ErrorCommand, NewCommand, NewTaskInstance, NewWorkflowInstance, TaskInstance,
    WorkflowDefinition, WorkflowExecutionStatus, WorkflowInstance,
};

pub use memory::{
    MemoryCommandDao, MemoryTaskInstanceDao, MemoryWorkflowDefinitionDao,
    MemoryWorkflowInstanceDao,
};

/// Returns the slot a command id belongs to.
pub fn command_slot(command_id: i64, id_step: i64, total_slots: usize) -> usize {
    if total_slots == 0 {
        return 0;
    }
    let step = id_step.max(1);
    (command_id / step).rem_euclid(total_slots as i64) as usize
}

/// Access to the pending-command queue and its error table.
#[async_trait]
pub trait CommandDao: Send + Sync {
    async fn insert(&self, command: NewCommand) -> Result<Command, StorageError>;

    /// Oldest commands of one slot, at most `limit`, ordered by id.
    async fn query_command_by_id_slot(
        &self,
        slot: usize,
        total_slots: usize,
        id_step: i64,
        limit: usize,
    ) -> Result<Vec<Command>, StorageError>;

    /// Claims a command by deleting it. Returns false if it was already gone.
    async fn delete(&self, command_id: i64) -> Result<bool, StorageError>;

    /// Removes the command if still pending and records it in the error
    /// table with `message`.
    async fn move_to_error(&self, command: &Command, message: &str) -> Result<(), StorageError>;

    async fn list_error_commands(&self) -> Result<Vec<ErrorCommand>, StorageError>;
}

/// Access to workflow instances.
#[async_trait]
pub trait WorkflowInstanceDao: Send + Sync {
    async fn insert(&self, instance: NewWorkflowInstance)
        -> Result<WorkflowInstance, StorageError>;

    async fn find(&self, id: i64) -> Result<Option<WorkflowInstance>, StorageError>;

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), StorageError>;

    async fn update_state(
        &self,
        id: i64,
        state: WorkflowExecutionStatus,
    ) -> Result<(), StorageError>;

    /// Instances owned by `host` that are in a state a live master would
    /// still be driving.
    async fn query_need_failover_workflow_instances(
        &self,
        host: &str,
    ) -> Result<Vec<WorkflowInstance>, StorageError>;

    /// Distinct hosts owning at least one instance that needs failover.
    async fn query_need_failover_masters(&self) -> Result<Vec<String>, StorageError>;

    /// Instances of a definition that are still in flight, used by the serial
    /// execution policies.
    async fn count_running_by_definition(&self, definition_code: i64)
        -> Result<usize, StorageError>;
}

/// Access to task attempts.
#[async_trait]
pub trait TaskInstanceDao: Send + Sync {
    async fn insert(&self, task: NewTaskInstance) -> Result<TaskInstance, StorageError>;

    async fn update(&self, task: &TaskInstance) -> Result<(), StorageError>;

    async fn find(&self, id: i64) -> Result<Option<TaskInstance>, StorageError>;

    /// The most recent attempt of every task of a workflow instance.
    async fn query_latest_by_workflow_instance(
        &self,
        workflow_instance_id: i64,
    ) -> Result<Vec<TaskInstance>, StorageError>;
}

/// Access to versioned workflow definitions.
#[async_trait]
pub trait WorkflowDefinitionDao: Send + Sync {
    async fn insert(&self, definition: WorkflowDefinition) -> Result<(), StorageError>;

    async fn query_by_code_version(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, StorageError>;
}
