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

//! Timeout handling under a paused clock.

use std::time::Duration;

use tidewater::{
    TaskDefinition, TaskEventKind, TaskExecutionStatus, TimeoutStrategy, WorkflowDefinition,
    WorkflowExecutionStatus,
};

use crate::fixtures::{single_task_definition, wait_for, TestHarness, WORKER};

fn timed(code: i64, strategy: TimeoutStrategy) -> WorkflowDefinition {
    single_task_definition(
        code,
        TaskDefinition::new(code * 10 + 1, "crunch").with_timeout(60, strategy),
    )
    .with_alert_recipients(vec!["oncall@example.com".to_string()])
}

async fn wait_for_kills(harness: &TestHarness, count: usize) {
    let dispatcher = harness.dispatcher.clone();
    wait_for("kill request", move || dispatcher.killed().len() >= count).await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_strategy_kills_the_task() {
    let harness = TestHarness::new();
    let id = harness.start(&timed(1, TimeoutStrategy::Failed)).await;
    harness.wait_for_dispatches(1).await;
    harness.report(
        id,
        "crunch",
        TaskEventKind::Running {
            started_at: chrono::Utc::now(),
        },
    );
    harness
        .wait_for_task_state(id, "crunch", TaskExecutionStatus::RunningExecution)
        .await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    wait_for_kills(&harness, 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.dispatcher.killed().len(), 1);
    assert!(harness.alerts.alerts().is_empty());

    harness.report(id, "crunch", TaskEventKind::Killed);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
    assert_eq!(
        harness.attempts(id, "crunch")[0].state,
        TaskExecutionStatus::Kill
    );
}

#[tokio::test(start_paused = true)]
async fn test_warn_strategy_only_alerts() {
    let harness = TestHarness::new();
    let id = harness.start(&timed(2, TimeoutStrategy::Warn)).await;
    harness.wait_for_dispatches(1).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    let alerts = harness.alerts.clone();
    wait_for("timeout alert", move || alerts.alerts().len() == 1).await;

    let alert = harness.alerts.alerts().remove(0);
    assert_eq!(alert.workflow_instance_id, id);
    assert_eq!(alert.task_name, "crunch");
    assert_eq!(alert.worker.as_deref(), Some(WORKER));
    assert_eq!(alert.timeout_seconds, 60);
    assert_eq!(alert.recipients, vec!["oncall@example.com".to_string()]);

    harness.report(id, "crunch", TaskEventKind::Success);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    assert!(harness.dispatcher.killed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_warn_failed_strategy_alerts_and_kills() {
    let harness = TestHarness::new();
    let id = harness.start(&timed(3, TimeoutStrategy::WarnFailed)).await;
    harness.wait_for_dispatches(1).await;
    harness.report(
        id,
        "crunch",
        TaskEventKind::Running {
            started_at: chrono::Utc::now(),
        },
    );
    harness
        .wait_for_task_state(id, "crunch", TaskExecutionStatus::RunningExecution)
        .await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    wait_for_kills(&harness, 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.dispatcher.killed().len(), 1);
    assert_eq!(harness.alerts.alerts().len(), 1);

    harness.report(id, "crunch", TaskEventKind::Killed);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_success_is_discarded() {
    let harness = TestHarness::new();
    let id = harness.start(&timed(4, TimeoutStrategy::WarnFailed)).await;
    harness.wait_for_dispatches(1).await;

    harness.report(id, "crunch", TaskEventKind::Success);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(harness.alerts.alerts().is_empty());
    assert!(harness.dispatcher.killed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_of_succeeded_task_changes_nothing() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(6, 1, "timed-pipeline")
        .with_task(TaskDefinition::new(61, "extract").with_timeout(60, TimeoutStrategy::WarnFailed))
        .with_task(TaskDefinition::new(62, "transform"))
        .with_relation("extract", "transform")
        .with_alert_recipients(vec!["oncall@example.com".to_string()]);
    let id = harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;

    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;
    harness
        .wait_for_task_state(id, "extract", TaskExecutionStatus::Success)
        .await;

    harness.report(id, "extract", TaskEventKind::Timeout);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(harness.alerts.alerts().is_empty());
    assert!(harness.dispatcher.killed().is_empty());
    let attempts = harness.attempts(id, "extract");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, TaskExecutionStatus::Success);
    assert_eq!(
        harness.instance(id).state,
        WorkflowExecutionStatus::RunningExecution
    );
    assert!(harness.master.repository().contains(id));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_of_undispatched_task_kills_it_locally() {
    let harness = TestHarness::new();
    harness.dispatcher.set_reject_dispatch(true);
    let id = harness.start(&timed(5, TimeoutStrategy::Failed)).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;

    assert_eq!(harness.dispatcher.dispatch_count(), 0);
    assert!(harness.dispatcher.killed().is_empty());
    assert_eq!(
        harness.attempts(id, "crunch")[0].state,
        TaskExecutionStatus::Kill
    );
}
