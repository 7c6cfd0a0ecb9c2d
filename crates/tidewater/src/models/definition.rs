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

//! Workflow Definition Model
//!
//! Versioned workflow definitions as the master reads them: the task list,
//! the relations between tasks, and the execution policies. Definitions can
//! be loaded from TOML:
//!
//! ```toml
//! code = 1
//! version = 1
//! name = "nightly-etl"
//!
//! [[tasks]]
//! code = 10
//! name = "extract"
//! timeout_seconds = 600
//! timeout_strategy = "WARNFAILED"
//!
//! [[tasks]]
//! code = 11
//! name = "load"
//!
//! [[relations]]
//! pre = "extract"
//! post = "load"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How concurrent instances of the same definition are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    /// Instances run side by side
    #[default]
    Parallel,
    /// New instances park until earlier ones finish
    SerialWait,
    /// New instances are discarded while an earlier one runs
    SerialDiscard,
}

/// What the workflow does when a task fails for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    /// Keep running branches that do not depend on the failed task
    #[default]
    Continue,
    /// Kill active tasks and start nothing new
    End,
}

/// Reaction to a task exceeding its timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeoutStrategy {
    /// Send an alert only
    Warn,
    /// Kill the task
    Failed,
    /// Send an alert, then kill the task
    WarnFailed,
    /// Any value this master does not know; logged and otherwise ignored
    Unrecognized(String),
}

impl TimeoutStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            TimeoutStrategy::Warn => "WARN",
            TimeoutStrategy::Failed => "FAILED",
            TimeoutStrategy::WarnFailed => "WARNFAILED",
            TimeoutStrategy::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for TimeoutStrategy {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "WARN" => TimeoutStrategy::Warn,
            "FAILED" => TimeoutStrategy::Failed,
            "WARNFAILED" | "WARN_FAILED" => TimeoutStrategy::WarnFailed,
            _ => TimeoutStrategy::Unrecognized(raw),
        }
    }
}

impl From<TimeoutStrategy> for String {
    fn from(strategy: TimeoutStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl std::fmt::Display for TimeoutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One case of a switch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Global parameter to inspect
    pub param: String,
    /// Value the parameter must equal
    pub equals: Value,
    /// Successor to follow when the case matches
    pub next: String,
}

/// Whether a task runs on a worker or is evaluated by the master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Dispatched to a worker
    #[default]
    Normal,
    /// Follows `success_branch` if every predecessor succeeded, otherwise
    /// `failure_branch`
    Conditions {
        #[serde(default)]
        success_branch: Vec<String>,
        #[serde(default)]
        failure_branch: Vec<String>,
    },
    /// Follows the first case whose parameter matches, or `default_branch`
    Switch {
        #[serde(default)]
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default_branch: Option<String>,
    },
}

impl TaskKind {
    /// Logic tasks are evaluated on the master and never dispatched.
    pub fn is_logic(&self) -> bool {
        !matches!(self, TaskKind::Normal)
    }
}

fn default_task_type() -> String {
    "SHELL".to_string()
}

fn default_worker_group() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A task of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub code: i64,
    /// Unique within the workflow; doubles as the DAG node name
    pub name: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub kind: TaskKind,
    /// Disabled tasks are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_retry_times: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
    /// Zero disables the timeout
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub timeout_strategy: Option<TimeoutStrategy>,
    #[serde(default = "default_worker_group")]
    pub worker_group: String,
    #[serde(default)]
    pub params: Value,
}

impl TaskDefinition {
    /// A normal, enabled task with no retries and no timeout.
    pub fn new(code: i64, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            task_type: default_task_type(),
            kind: TaskKind::Normal,
            enabled: true,
            max_retry_times: 0,
            retry_interval_seconds: 0,
            timeout_seconds: 0,
            timeout_strategy: None,
            worker_group: default_worker_group(),
            params: Value::Null,
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timeout(mut self, seconds: u64, strategy: TimeoutStrategy) -> Self {
        self.timeout_seconds = seconds;
        self.timeout_strategy = Some(strategy);
        self
    }

    pub fn with_retries(mut self, max_retry_times: u32, retry_interval_seconds: u64) -> Self {
        self.max_retry_times = max_retry_times;
        self.retry_interval_seconds = retry_interval_seconds;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }
}

/// A dependency between two tasks. A missing `pre` marks a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRelation {
    #[serde(default)]
    pub pre: Option<String>,
    pub post: String,
}

impl TaskRelation {
    pub fn new(pre: impl Into<String>, post: impl Into<String>) -> Self {
        Self {
            pre: Some(pre.into()),
            post: post.into(),
        }
    }
}

/// A versioned workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub code: i64,
    pub version: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub relations: Vec<TaskRelation>,
    #[serde(default)]
    pub execution_type: ExecutionType,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    /// Recipients of task timeout alerts
    #[serde(default)]
    pub alert_recipients: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(code: i64, version: i32, name: impl Into<String>) -> Self {
        Self {
            code,
            version,
            name: name.into(),
            description: None,
            tasks: Vec::new(),
            relations: Vec::new(),
            execution_type: ExecutionType::Parallel,
            failure_strategy: FailureStrategy::Continue,
            alert_recipients: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_relation(mut self, pre: &str, post: &str) -> Self {
        self.relations.push(TaskRelation::new(pre, post));
        self
    }

    pub fn with_execution_type(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = execution_type;
        self
    }

    pub fn with_failure_strategy(mut self, failure_strategy: FailureStrategy) -> Self {
        self.failure_strategy = failure_strategy;
        self
    }

    pub fn with_alert_recipients(mut self, recipients: Vec<String>) -> Self {
        self.alert_recipients = recipients;
        self
    }

    /// Looks up a task by name.
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Parses a definition from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
