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

//! # Lifecycle Events
//!
//! Every state change of a workflow or task is driven by a lifecycle event
//! published to the workflow's own [`WorkflowEventBus`]. One consumer per
//! workflow, spawned by [`WorkflowEventBusCoordinator`], applies them strictly
//! in publish order. Timers for timeouts and retries are delayed publishes
//! into the same bus.
//!
//! Task events may carry the id of the attempt they concern. Events naming an
//! attempt other than the current one are stale and dropped.

mod bus;
mod timer;

use std::fmt;

use chrono::{DateTime, Utc};

pub use bus::{EventReceiver, WorkflowEventBus, WorkflowEventBusCoordinator};
pub use timer::TimerHandle;

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventKind {
    /// Materialize the task if needed and begin an attempt
    Start,
    /// Hand the attempt to a worker
    Dispatch,
    /// Worker reports the attempt running
    Running { started_at: DateTime<Utc> },
    /// Worker reports success
    Success,
    /// Worker reports failure
    Failure { reason: String },
    /// Retry interval elapsed
    Retry,
    /// Timeout elapsed
    Timeout,
    /// Kill requested by the master
    Kill,
    /// Worker acknowledges a kill
    Killed,
    /// Pause requested by the master
    Pause,
    /// Worker acknowledges a pause
    Paused,
    /// The worker running the attempt left the cluster
    Failover {
        worker_address: String,
        crash_time: DateTime<Utc>,
    },
}

/// An event targeting one task of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLifecycleEvent {
    pub task_name: String,
    pub kind: TaskEventKind,
    /// Attempt the event concerns; `None` targets whatever attempt is current
    pub task_instance_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TaskLifecycleEvent {
    pub fn new(task_name: impl Into<String>, kind: TaskEventKind) -> Self {
        Self {
            task_name: task_name.into(),
            kind,
            task_instance_id: None,
            created_at: Utc::now(),
        }
    }

    /// Pins the event to one attempt.
    pub fn for_attempt(mut self, task_instance_id: i64) -> Self {
        self.task_instance_id = Some(task_instance_id);
        self
    }

    pub fn event_type(&self) -> LifecycleEventType {
        match self.kind {
            TaskEventKind::Start => LifecycleEventType::TaskStart,
            TaskEventKind::Dispatch => LifecycleEventType::TaskDispatch,
            TaskEventKind::Running { .. } => LifecycleEventType::TaskRunning,
            TaskEventKind::Success => LifecycleEventType::TaskSuccess,
            TaskEventKind::Failure { .. } => LifecycleEventType::TaskFailure,
            TaskEventKind::Retry => LifecycleEventType::TaskRetry,
            TaskEventKind::Timeout => LifecycleEventType::TaskTimeout,
            TaskEventKind::Kill => LifecycleEventType::TaskKill,
            TaskEventKind::Killed => LifecycleEventType::TaskKilled,
            TaskEventKind::Pause => LifecycleEventType::TaskPause,
            TaskEventKind::Paused => LifecycleEventType::TaskPaused,
            TaskEventKind::Failover { .. } => LifecycleEventType::TaskFailover,
        }
    }
}

/// What happened to a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEventKind {
    Start,
    /// A task reached a final outcome
    TaskFinished { task_name: String },
    Pause,
    Stop,
    /// Relinquish the workflow so another bootstrap recovers it
    Failover { reason: String },
}

/// An event targeting a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLifecycleEvent {
    pub workflow_instance_id: i64,
    pub kind: WorkflowEventKind,
    pub created_at: DateTime<Utc>,
}

impl WorkflowLifecycleEvent {
    pub fn new(workflow_instance_id: i64, kind: WorkflowEventKind) -> Self {
        Self {
            workflow_instance_id,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> LifecycleEventType {
        match self.kind {
            WorkflowEventKind::Start => LifecycleEventType::WorkflowStart,
            WorkflowEventKind::TaskFinished { .. } => LifecycleEventType::WorkflowTaskFinished,
            WorkflowEventKind::Pause => LifecycleEventType::WorkflowPause,
            WorkflowEventKind::Stop => LifecycleEventType::WorkflowStop,
            WorkflowEventKind::Failover { .. } => LifecycleEventType::WorkflowFailover,
        }
    }
}

/// Any event carried by a workflow bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Task(TaskLifecycleEvent),
    Workflow(WorkflowLifecycleEvent),
}

impl LifecycleEvent {
    pub fn event_type(&self) -> LifecycleEventType {
        match self {
            LifecycleEvent::Task(event) => event.event_type(),
            LifecycleEvent::Workflow(event) => event.event_type(),
        }
    }
}

impl From<TaskLifecycleEvent> for LifecycleEvent {
    fn from(event: TaskLifecycleEvent) -> Self {
        LifecycleEvent::Task(event)
    }
}

impl From<WorkflowLifecycleEvent> for LifecycleEvent {
    fn from(event: WorkflowLifecycleEvent) -> Self {
        LifecycleEvent::Workflow(event)
    }
}

/// Stable names of every event kind, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventType {
    TaskStart,
    TaskDispatch,
    TaskRunning,
    TaskSuccess,
    TaskFailure,
    TaskRetry,
    TaskTimeout,
    TaskKill,
    TaskKilled,
    TaskPause,
    TaskPaused,
    TaskFailover,
    WorkflowStart,
    WorkflowTaskFinished,
    WorkflowPause,
    WorkflowStop,
    WorkflowFailover,
}

impl LifecycleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::TaskStart => "task_start",
            LifecycleEventType::TaskDispatch => "task_dispatch",
            LifecycleEventType::TaskRunning => "task_running",
            LifecycleEventType::TaskSuccess => "task_success",
            LifecycleEventType::TaskFailure => "task_failure",
            LifecycleEventType::TaskRetry => "task_retry",
            LifecycleEventType::TaskTimeout => "task_timeout",
            LifecycleEventType::TaskKill => "task_kill",
            LifecycleEventType::TaskKilled => "task_killed",
            LifecycleEventType::TaskPause => "task_pause",
            LifecycleEventType::TaskPaused => "task_paused",
            LifecycleEventType::TaskFailover => "task_failover",
            LifecycleEventType::WorkflowStart => "workflow_start",
            LifecycleEventType::WorkflowTaskFinished => "workflow_task_finished",
            LifecycleEventType::WorkflowPause => "workflow_pause",
            LifecycleEventType::WorkflowStop => "workflow_stop",
            LifecycleEventType::WorkflowFailover => "workflow_failover",
        }
    }

    pub fn is_task_event(&self) -> bool {
        self.as_str().starts_with("task_")
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
