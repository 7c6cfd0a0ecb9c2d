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

//! Master-to-worker RPC contract.
//!
//! Workers report progress back asynchronously; the embedding application
//! feeds those reports into the owning workflow through
//! [`MasterServer::report_task_event`](crate::MasterServer::report_task_event).

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::models::{TaskDefinition, TaskInstance, WorkflowInstance};

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Hands a task attempt to a worker of the task's group and returns the
    /// chosen worker's address.
    async fn dispatch(
        &self,
        workflow: &WorkflowInstance,
        task: &TaskInstance,
        definition: &TaskDefinition,
    ) -> Result<String, DispatchError>;

    /// Asks the worker running `task` to kill it. The worker acknowledges
    /// with a Killed report.
    async fn kill(&self, task: &TaskInstance) -> Result<(), DispatchError>;

    /// Tells the worker its workflow is pausing. Most task types ignore it
    /// and run to completion.
    async fn pause(&self, task: &TaskInstance) -> Result<(), DispatchError>;

    /// Asks the worker recorded on `task` whether it still runs the attempt
    /// and, if so, to report to this master from now on.
    async fn take_over(&self, task: &TaskInstance) -> Result<bool, DispatchError>;
}
