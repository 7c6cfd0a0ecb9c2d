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

//! Domain records exchanged with storage: commands, workflow and task
//! instances, and workflow definitions.

pub mod command;
pub mod definition;
pub mod task_instance;
pub mod workflow_instance;

pub use command::{
    Command, CommandType, ErrorCommand, NewCommand, GLOBAL_PARAMS_PARAM, PRIOR_STATE_PARAM,
};
pub use definition::{
    ExecutionType, FailureStrategy, SwitchCase, TaskDefinition, TaskKind, TaskRelation,
    TimeoutStrategy, WorkflowDefinition,
};
pub use task_instance::{NewTaskInstance, TaskExecutionStatus, TaskInstance};
pub use workflow_instance::{NewWorkflowInstance, WorkflowExecutionStatus, WorkflowInstance};
