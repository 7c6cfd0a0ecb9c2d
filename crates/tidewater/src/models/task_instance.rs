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

//! Task Instance Model
//!
//! A task instance is one attempt at running a task of a workflow instance.
//! Retries and worker failover create new attempts; the previous attempt keeps
//! its terminal state for auditing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::TaskDefinition;

/// Lifecycle states of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStatus {
    Submitted,
    /// Handed to a worker, not yet reported running
    Dispatch,
    RunningExecution,
    Pause,
    Kill,
    Success,
    Failure,
    /// Attempt lost with its worker; superseded by a new attempt
    NeedFaultTolerance,
}

impl TaskExecutionStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecutionStatus::Submitted => "SUBMITTED",
            TaskExecutionStatus::Dispatch => "DISPATCH",
            TaskExecutionStatus::RunningExecution => "RUNNING_EXECUTION",
            TaskExecutionStatus::Pause => "PAUSE",
            TaskExecutionStatus::Kill => "KILL",
            TaskExecutionStatus::Success => "SUCCESS",
            TaskExecutionStatus::Failure => "FAILURE",
            TaskExecutionStatus::NeedFaultTolerance => "NEED_FAULT_TOLERANCE",
        }
    }

    /// Parses a status from its string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUBMITTED" => Some(TaskExecutionStatus::Submitted),
            "DISPATCH" => Some(TaskExecutionStatus::Dispatch),
            "RUNNING_EXECUTION" => Some(TaskExecutionStatus::RunningExecution),
            "PAUSE" => Some(TaskExecutionStatus::Pause),
            "KILL" => Some(TaskExecutionStatus::Kill),
            "SUCCESS" => Some(TaskExecutionStatus::Success),
            "FAILURE" => Some(TaskExecutionStatus::Failure),
            "NEED_FAULT_TOLERANCE" => Some(TaskExecutionStatus::NeedFaultTolerance),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskExecutionStatus::Success
                | TaskExecutionStatus::Failure
                | TaskExecutionStatus::Kill
                | TaskExecutionStatus::Pause
                | TaskExecutionStatus::NeedFaultTolerance
        )
    }

    /// True while a worker holds the attempt.
    pub fn is_on_worker(&self) -> bool {
        matches!(
            self,
            TaskExecutionStatus::Dispatch | TaskExecutionStatus::RunningExecution
        )
    }
}

impl std::fmt::Display for TaskExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task attempt record (domain type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: i64,
    pub workflow_instance_id: i64,
    pub task_code: i64,
    /// Name of the DAG node this attempt runs
    pub name: String,
    pub task_type: String,
    pub state: TaskExecutionStatus,
    /// Address of the worker running the attempt
    pub host: Option<String>,
    pub submit_time: DateTime<Utc>,
    pub first_submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub retry_times: u32,
    /// Created because the previous attempt's worker died
    pub failover: bool,
    /// Successors chosen by a conditions or switch task
    pub branch: Option<Vec<String>>,
}

/// Structure for creating new task attempt records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskInstance {
    pub workflow_instance_id: i64,
    pub task_code: i64,
    pub name: String,
    pub task_type: String,
    pub state: TaskExecutionStatus,
    pub submit_time: DateTime<Utc>,
    pub first_submit_time: DateTime<Utc>,
    pub retry_times: u32,
    pub failover: bool,
}

impl NewTaskInstance {
    /// The first attempt of a task.
    pub fn first_attempt(workflow_instance_id: i64, definition: &TaskDefinition) -> Self {
        let now = Utc::now();
        Self {
            workflow_instance_id,
            task_code: definition.code,
            name: definition.name.clone(),
            task_type: definition.task_type.clone(),
            state: TaskExecutionStatus::Submitted,
            submit_time: now,
            first_submit_time: now,
            retry_times: 0,
            failover: false,
        }
    }

    /// A retry of a failed attempt.
    pub fn retry_of(previous: &TaskInstance) -> Self {
        Self {
            retry_times: previous.retry_times + 1,
            failover: false,
            ..Self::following(previous)
        }
    }

    /// A replacement for an attempt lost with its worker. Failover attempts
    /// do not consume the retry budget.
    pub fn failover_of(previous: &TaskInstance) -> Self {
        Self {
            failover: true,
            ..Self::following(previous)
        }
    }

    fn following(previous: &TaskInstance) -> Self {
        Self {
            workflow_instance_id: previous.workflow_instance_id,
            task_code: previous.task_code,
            name: previous.name.clone(),
            task_type: previous.task_type.clone(),
            state: TaskExecutionStatus::Submitted,
            submit_time: Utc::now(),
            first_submit_time: previous.first_submit_time,
            retry_times: previous.retry_times,
            failover: previous.failover,
        }
    }
}
