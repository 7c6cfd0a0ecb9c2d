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

//! Workflow Instance Model
//!
//! A workflow instance is one execution of a versioned workflow definition.
//! The owning master is recorded in `host`; failover uses it to find work
//! orphaned by a crashed master.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::command::CommandType;

/// Lifecycle states of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExecutionStatus {
    Submitted,
    RunningExecution,
    /// Pause requested; waiting for active tasks to finish
    ReadyPause,
    Pause,
    /// Stop requested; waiting for active tasks to be killed
    ReadyStop,
    Stop,
    Failure,
    Success,
    /// Parked behind an earlier instance of the same definition
    SerialWait,
    /// Orphaned by a crashed master, awaiting a recovery command
    Failover,
}

impl WorkflowExecutionStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowExecutionStatus::Submitted => "SUBMITTED",
            WorkflowExecutionStatus::RunningExecution => "RUNNING_EXECUTION",
            WorkflowExecutionStatus::ReadyPause => "READY_PAUSE",
            WorkflowExecutionStatus::Pause => "PAUSE",
            WorkflowExecutionStatus::ReadyStop => "READY_STOP",
            WorkflowExecutionStatus::Stop => "STOP",
            WorkflowExecutionStatus::Failure => "FAILURE",
            WorkflowExecutionStatus::Success => "SUCCESS",
            WorkflowExecutionStatus::SerialWait => "SERIAL_WAIT",
            WorkflowExecutionStatus::Failover => "FAILOVER",
        }
    }

    /// Parses a status from its string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUBMITTED" => Some(WorkflowExecutionStatus::Submitted),
            "RUNNING_EXECUTION" => Some(WorkflowExecutionStatus::RunningExecution),
            "READY_PAUSE" => Some(WorkflowExecutionStatus::ReadyPause),
            "PAUSE" => Some(WorkflowExecutionStatus::Pause),
            "READY_STOP" => Some(WorkflowExecutionStatus::ReadyStop),
            "STOP" => Some(WorkflowExecutionStatus::Stop),
            "FAILURE" => Some(WorkflowExecutionStatus::Failure),
            "SUCCESS" => Some(WorkflowExecutionStatus::Success),
            "SERIAL_WAIT" => Some(WorkflowExecutionStatus::SerialWait),
            "FAILOVER" => Some(WorkflowExecutionStatus::Failover),
            _ => None,
        }
    }

    /// Terminal states. A finished instance is evicted from its master.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionStatus::Success
                | WorkflowExecutionStatus::Failure
                | WorkflowExecutionStatus::Stop
                | WorkflowExecutionStatus::Pause
        )
    }

    /// States an instance can be in while a master owns it; these are the
    /// states master failover looks for.
    pub fn needs_failover(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionStatus::Submitted
                | WorkflowExecutionStatus::RunningExecution
                | WorkflowExecutionStatus::ReadyPause
                | WorkflowExecutionStatus::ReadyStop
                | WorkflowExecutionStatus::SerialWait
        )
    }
}

impl std::fmt::Display for WorkflowExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A workflow instance record (domain type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: i64,
    pub name: String,
    pub definition_code: i64,
    pub definition_version: i32,
    pub state: WorkflowExecutionStatus,
    /// Address of the owning master
    pub host: Option<String>,
    /// Command that created or last restarted the instance
    pub command_type: CommandType,
    pub start_time: DateTime<Utc>,
    pub restart_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub run_times: u32,
    pub global_params: Map<String, Value>,
}

impl WorkflowInstance {
    /// When the current run began: the restart time if the instance was
    /// restarted, the original start time otherwise.
    pub fn last_start_time(&self) -> DateTime<Utc> {
        self.restart_time.unwrap_or(self.start_time)
    }
}

/// Structure for creating new workflow instance records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflowInstance {
    pub name: String,
    pub definition_code: i64,
    pub definition_version: i32,
    pub state: WorkflowExecutionStatus,
    pub host: Option<String>,
    pub command_type: CommandType,
    pub start_time: DateTime<Utc>,
    pub global_params: Map<String, Value>,
}
