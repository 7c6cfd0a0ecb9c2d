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

use std::time::Duration;

use tidewater::{
    CommandType, FailureStrategy, TaskDefinition, TaskEventKind, TaskExecutionStatus,
    WorkflowDefinition, WorkflowExecutionStatus,
};

use crate::fixtures::{conditions_definition, linear_definition, wait_for, TestHarness};

#[tokio::test]
async fn test_linear_workflow_runs_to_success() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(1)).await;

    for (count, task) in ["extract", "transform", "load"].into_iter().enumerate() {
        harness.wait_for_dispatches(count + 1).await;
        harness.report(id, task, TaskEventKind::Success);
    }

    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    harness.wait_for_eviction(id).await;
    assert_eq!(
        harness.dispatcher.dispatched_names(),
        vec!["extract", "transform", "load"]
    );
    assert!(harness.instance(id).end_time.is_some());
    assert_eq!(harness.master.live_workflow_count(), 0);
}

#[tokio::test]
async fn test_running_report_records_start_time() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(1)).await;
    harness.wait_for_dispatches(1).await;

    harness.report(
        id,
        "extract",
        TaskEventKind::Running {
            started_at: chrono::Utc::now(),
        },
    );
    harness
        .wait_for_task_state(id, "extract", TaskExecutionStatus::RunningExecution)
        .await;

    let attempt = harness.attempts(id, "extract").pop().unwrap();
    assert!(attempt.start_time.is_some());
    assert_eq!(attempt.host.as_deref(), Some(crate::fixtures::WORKER));
}

#[tokio::test]
async fn test_conditions_task_follows_success_branch() {
    let harness = TestHarness::new();
    let id = harness.start(&conditions_definition(2)).await;

    harness.wait_for_dispatches(1).await;
    harness.report(id, "check", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;
    harness.report(id, "publish", TaskEventKind::Success);

    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["check", "publish"]);
    assert!(harness.attempts(id, "repair").is_empty());

    let gate = harness.attempts(id, "gate").pop().unwrap();
    assert_eq!(gate.state, TaskExecutionStatus::Success);
    assert_eq!(gate.branch, Some(vec!["publish".to_string()]));
    assert!(gate.host.is_none());
}

#[tokio::test]
async fn test_conditions_task_follows_failure_branch() {
    let harness = TestHarness::new();
    let id = harness.start(&conditions_definition(3)).await;

    harness.wait_for_dispatches(1).await;
    harness.report(
        id,
        "check",
        TaskEventKind::Failure {
            reason: "exit code 1".to_string(),
        },
    );
    harness.wait_for_dispatches(2).await;
    harness.report(id, "repair", TaskEventKind::Success);

    // The failed check still fails the workflow.
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["check", "repair"]);
}

#[tokio::test]
async fn test_failed_task_is_retried() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(4, 1, "flaky")
        .with_task(TaskDefinition::new(41, "fetch").with_retries(1, 1));
    let id = harness.start(&definition).await;

    harness.wait_for_dispatches(1).await;
    harness.report(
        id,
        "fetch",
        TaskEventKind::Failure {
            reason: "timeout talking to upstream".to_string(),
        },
    );
    harness.wait_for_dispatches(2).await;
    harness.report(id, "fetch", TaskEventKind::Success);

    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    let attempts = harness.attempts(id, "fetch");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].state, TaskExecutionStatus::Failure);
    assert_eq!(attempts[1].retry_times, 1);
    assert_eq!(attempts[1].state, TaskExecutionStatus::Success);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_workflow() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(5, 1, "fragile")
        .with_task(TaskDefinition::new(51, "fetch"))
        .with_task(TaskDefinition::new(52, "store"))
        .with_relation("fetch", "store");
    let id = harness.start(&definition).await;

    harness.wait_for_dispatches(1).await;
    harness.report(
        id,
        "fetch",
        TaskEventKind::Failure {
            reason: "boom".to_string(),
        },
    );

    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["fetch"]);
}

#[tokio::test]
async fn test_pause_waits_for_active_tasks() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(6)).await;
    harness.wait_for_dispatches(1).await;

    harness.master.pause_workflow(id).unwrap();
    let dispatcher = harness.dispatcher.clone();
    wait_for("pause request", move || dispatcher.paused().len() == 1).await;
    harness
        .wait_for_state(id, WorkflowExecutionStatus::ReadyPause)
        .await;

    harness.report(id, "extract", TaskEventKind::Success);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Pause)
        .await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["extract"]);
}

#[tokio::test]
async fn test_stop_kills_active_tasks() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(7)).await;
    harness.wait_for_dispatches(1).await;

    harness.master.stop_workflow(id).unwrap();
    let dispatcher = harness.dispatcher.clone();
    wait_for("kill request", move || dispatcher.killed().len() == 1).await;

    harness.report(id, "extract", TaskEventKind::Killed);
    harness.wait_for_state(id, WorkflowExecutionStatus::Stop).await;
    assert_eq!(
        harness.attempts(id, "extract")[0].state,
        TaskExecutionStatus::Kill
    );
}

#[tokio::test]
async fn test_stop_with_unreachable_worker_marks_task_killed() {
    let harness = TestHarness::new();
    harness.dispatcher.set_kill_unreachable(true);
    let id = harness.start(&linear_definition(8)).await;
    harness.wait_for_dispatches(1).await;

    harness.master.stop_workflow(id).unwrap();

    harness.wait_for_state(id, WorkflowExecutionStatus::Stop).await;
    assert!(harness.dispatcher.killed().is_empty());
}

#[tokio::test]
async fn test_control_of_unknown_workflow_is_rejected() {
    let harness = TestHarness::new();
    assert!(harness.master.pause_workflow(404).is_err());
    assert!(harness.master.stop_workflow(404).is_err());
}

#[tokio::test]
async fn test_end_strategy_kills_parallel_branches() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(9, 1, "fan-out")
        .with_task(TaskDefinition::new(91, "left"))
        .with_task(TaskDefinition::new(92, "right"))
        .with_task(TaskDefinition::new(93, "after_left"))
        .with_relation("left", "after_left")
        .with_failure_strategy(FailureStrategy::End);
    let id = harness.start(&definition).await;
    harness.wait_for_dispatches(2).await;

    harness.report(
        id,
        "left",
        TaskEventKind::Failure {
            reason: "bad input".to_string(),
        },
    );
    let dispatcher = harness.dispatcher.clone();
    wait_for("kill of the parallel branch", move || {
        dispatcher.killed().iter().any(|task| task.name == "right")
    })
    .await;
    harness.report(id, "right", TaskEventKind::Killed);

    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
    assert!(harness.attempts(id, "after_left").is_empty());
}

#[tokio::test]
async fn test_dispatch_is_retried_until_a_worker_accepts() {
    let harness = TestHarness::new();
    harness.dispatcher.set_reject_dispatch(true);
    let id = harness.start(&linear_definition(10)).await;
    harness
        .wait_for_task_state(id, "extract", TaskExecutionStatus::Submitted)
        .await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(harness.dispatcher.dispatch_count(), 0);

    harness.dispatcher.set_reject_dispatch(false);
    harness.wait_for_dispatches(1).await;
    harness
        .wait_for_task_state(id, "extract", TaskExecutionStatus::Dispatch)
        .await;
    assert_eq!(harness.attempts(id, "extract").len(), 1);
}

#[tokio::test]
async fn test_storage_failure_relinquishes_workflow() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(11)).await;
    harness.wait_for_dispatches(1).await;

    harness.tasks.set_available(false);
    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_eviction(id).await;

    let instance = harness.instance(id);
    assert_eq!(instance.state, WorkflowExecutionStatus::Failover);
    assert!(instance.host.is_none());

    let pending = harness.commands.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].command_type,
        CommandType::RecoverToleranceFaultProcess
    );
    assert_eq!(pending[0].workflow_instance_id, Some(id));
    assert_eq!(
        pending[0].prior_state(),
        Some(WorkflowExecutionStatus::RunningExecution)
    );
}
