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

//! Command Model
//!
//! Commands are the queued instructions masters consume: start a workflow,
//! rerun or recover an existing instance, or pause/stop a live one. Every
//! command is consumed exactly once; the master that deletes it first owns it.
//! Commands whose handling fails are moved to the error table together with
//! the captured error chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::workflow_instance::{WorkflowExecutionStatus, WorkflowInstance};

/// Name of the command parameter carrying the state a failed-over workflow
/// was in when its master died.
pub const PRIOR_STATE_PARAM: &str = "prior_state";

/// Name of the command parameter carrying start-up global parameters.
pub const GLOBAL_PARAMS_PARAM: &str = "global_params";

/// Kinds of command a master can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Manual start of a new workflow instance
    StartProcess,
    /// Start of a new workflow instance by the scheduler
    Scheduler,
    /// Backfill run for a past date range
    ComplementData,
    /// Rerun a finished instance from scratch
    RepeatRunning,
    /// Rerun only the failed tasks of a finished instance
    StartFailureTaskProcess,
    /// Resume a paused or stopped instance
    RecoverSuspendedProcess,
    /// Recover an instance orphaned by a crashed master
    RecoverToleranceFaultProcess,
    /// Release an instance parked by the serial-wait policy
    RecoverSerialWait,
    /// Pause a running instance
    Pause,
    /// Stop a running instance
    Stop,
}

impl CommandType {
    /// Returns the string representation of the command type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::StartProcess => "START_PROCESS",
            CommandType::Scheduler => "SCHEDULER",
            CommandType::ComplementData => "COMPLEMENT_DATA",
            CommandType::RepeatRunning => "REPEAT_RUNNING",
            CommandType::StartFailureTaskProcess => "START_FAILURE_TASK_PROCESS",
            CommandType::RecoverSuspendedProcess => "RECOVER_SUSPENDED_PROCESS",
            CommandType::RecoverToleranceFaultProcess => "RECOVER_TOLERANCE_FAULT_PROCESS",
            CommandType::RecoverSerialWait => "RECOVER_SERIAL_WAIT",
            CommandType::Pause => "PAUSE",
            CommandType::Stop => "STOP",
        }
    }

    /// Parses a command type from its string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "START_PROCESS" => Some(CommandType::StartProcess),
            "SCHEDULER" => Some(CommandType::Scheduler),
            "COMPLEMENT_DATA" => Some(CommandType::ComplementData),
            "REPEAT_RUNNING" => Some(CommandType::RepeatRunning),
            "START_FAILURE_TASK_PROCESS" => Some(CommandType::StartFailureTaskProcess),
            "RECOVER_SUSPENDED_PROCESS" => Some(CommandType::RecoverSuspendedProcess),
            "RECOVER_TOLERANCE_FAULT_PROCESS" => Some(CommandType::RecoverToleranceFaultProcess),
            "RECOVER_SERIAL_WAIT" => Some(CommandType::RecoverSerialWait),
            "PAUSE" => Some(CommandType::Pause),
            "STOP" => Some(CommandType::Stop),
            _ => None,
        }
    }

    /// Returns true for commands that act on a live instance instead of
    /// bootstrapping one.
    pub fn is_control(&self) -> bool {
        matches!(self, CommandType::Pause | CommandType::Stop)
    }

    /// Returns true for commands that create a brand new workflow instance.
    pub fn creates_instance(&self) -> bool {
        matches!(
            self,
            CommandType::StartProcess | CommandType::Scheduler | CommandType::ComplementData
        )
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pending command (domain type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Monotonic identifier, also the sharding key
    pub id: i64,
    pub command_type: CommandType,
    pub workflow_definition_code: i64,
    pub workflow_definition_version: i32,
    /// Target instance for rerun, recover and control commands
    pub workflow_instance_id: Option<i64>,
    pub command_params: Value,
    pub created_at: DateTime<Utc>,
}

/// Structure for creating new command records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommand {
    pub command_type: CommandType,
    pub workflow_definition_code: i64,
    pub workflow_definition_version: i32,
    pub workflow_instance_id: Option<i64>,
    pub command_params: Value,
}

impl NewCommand {
    /// A manual start of the given definition version.
    pub fn start(workflow_definition_code: i64, workflow_definition_version: i32) -> Self {
        Self {
            command_type: CommandType::StartProcess,
            workflow_definition_code,
            workflow_definition_version,
            workflow_instance_id: None,
            command_params: json!({}),
        }
    }

    /// A command targeting an existing workflow instance.
    pub fn for_instance(command_type: CommandType, instance: &WorkflowInstance) -> Self {
        Self {
            command_type,
            workflow_definition_code: instance.definition_code,
            workflow_definition_version: instance.definition_version,
            workflow_instance_id: Some(instance.id),
            command_params: json!({}),
        }
    }

    /// A recovery command for an instance orphaned by a crashed master.
    pub fn recover_tolerance_fault(
        instance: &WorkflowInstance,
        prior_state: WorkflowExecutionStatus,
    ) -> Self {
        Self::for_instance(CommandType::RecoverToleranceFaultProcess, instance)
            .with_param(PRIOR_STATE_PARAM, json!(prior_state.as_str()))
    }

    pub fn with_type(mut self, command_type: CommandType) -> Self {
        self.command_type = command_type;
        self
    }

    /// Sets one entry of the command parameters object.
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        if !self.command_params.is_object() {
            self.command_params = json!({});
        }
        if let Some(params) = self.command_params.as_object_mut() {
            params.insert(key.to_string(), value);
        }
        self
    }
}

impl Command {
    /// The prior workflow state recorded by master failover, if any.
    pub fn prior_state(&self) -> Option<WorkflowExecutionStatus> {
        self.command_params
            .get(PRIOR_STATE_PARAM)
            .and_then(Value::as_str)
            .and_then(WorkflowExecutionStatus::from_str)
    }

    /// Global parameters supplied at start, if any.
    pub fn global_params(&self) -> serde_json::Map<String, Value> {
        self.command_params
            .get(GLOBAL_PARAMS_PARAM)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// A command whose handling failed, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCommand {
    pub command: Command,
    /// Flattened error chain
    pub message: String,
    pub failed_at: DateTime<Utc>,
}
