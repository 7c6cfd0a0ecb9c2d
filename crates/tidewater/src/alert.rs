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

//! Alert delivery.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{TaskInstance, WorkflowInstance};

/// A task ran past its configured timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTimeoutAlert {
    pub workflow_instance_id: i64,
    pub workflow_name: String,
    pub task_instance_id: i64,
    pub task_name: String,
    pub worker: Option<String>,
    pub timeout_seconds: u64,
    pub recipients: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

impl TaskTimeoutAlert {
    pub fn new(
        workflow: &WorkflowInstance,
        task: &TaskInstance,
        timeout_seconds: u64,
        recipients: &[String],
    ) -> Self {
        Self {
            workflow_instance_id: workflow.id,
            workflow_name: workflow.name.clone(),
            task_instance_id: task.id,
            task_name: task.name.clone(),
            worker: task.host.clone(),
            timeout_seconds,
            recipients: recipients.to_vec(),
            raised_at: Utc::now(),
        }
    }
}

/// Sends alerts. Implementations must not block the caller; delivery is
/// fire-and-forget.
pub trait AlertSender: Send + Sync {
    fn send_task_timeout_alert(&self, alert: TaskTimeoutAlert);
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSender;

impl AlertSender for LoggingAlertSender {
    fn send_task_timeout_alert(&self, alert: TaskTimeoutAlert) {
        warn!(
            workflow_instance_id = alert.workflow_instance_id,
            task_instance_id = alert.task_instance_id,
            recipients = ?alert.recipients,
            "Task '{}' of workflow '{}' exceeded its {}s timeout",
            alert.task_name,
            alert.workflow_name,
            alert.timeout_seconds
        );
    }
}
