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

//! # Workflow Repository
//!
//! Registry of the workflow runnables a master is currently driving, keyed by
//! workflow instance id. A runnable is inserted once when its command is
//! bootstrapped and removed once when it reaches a terminal state or is
//! relinquished. Failover consults it to avoid recovering an instance this
//! master already runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::RepositoryError;
use crate::models::WorkflowExecutionStatus;
use crate::runnable::WorkflowExecutionRunnable;

#[derive(Default)]
pub struct WorkflowRepository {
    workflows: RwLock<HashMap<i64, Arc<WorkflowExecutionRunnable>>>,
}

impl WorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, runnable: Arc<WorkflowExecutionRunnable>) -> Result<(), RepositoryError> {
        let id = runnable.id();
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&id) {
            return Err(RepositoryError::AlreadyRegistered(id));
        }
        workflows.insert(id, runnable);
        debug!("Registered workflow instance {}", id);
        Ok(())
    }

    pub fn get(&self, workflow_instance_id: i64) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.workflows.read().get(&workflow_instance_id).cloned()
    }

    pub fn contains(&self, workflow_instance_id: i64) -> bool {
        self.workflows.read().contains_key(&workflow_instance_id)
    }

    pub fn remove(&self, workflow_instance_id: i64) -> Option<Arc<WorkflowExecutionRunnable>> {
        let removed = self.workflows.write().remove(&workflow_instance_id);
        if removed.is_some() {
            debug!("Removed workflow instance {}", workflow_instance_id);
        }
        removed
    }

    pub fn list(&self) -> Vec<Arc<WorkflowExecutionRunnable>> {
        self.workflows.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }

    /// The oldest local instance of a definition parked in `SerialWait`.
    pub fn oldest_serial_wait(
        &self,
        definition_code: i64,
    ) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.workflows
            .read()
            .values()
            .filter(|runnable| {
                runnable.definition().code == definition_code
                    && runnable.state() == WorkflowExecutionStatus::SerialWait
            })
            .min_by_key(|runnable| runnable.id())
            .cloned()
    }
}
