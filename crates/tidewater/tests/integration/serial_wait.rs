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

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Map;
use tidewater::engine::CycleOutcome;
use tidewater::{
    CommandType, ExecutionType, FailoverEvent, TaskDefinition, TaskEventKind, WorkflowDefinition,
    WorkflowExecutionStatus, WorkflowInstance,
};

use crate::fixtures::{single_task_definition, TestHarness};

fn serial(code: i64, execution_type: ExecutionType) -> WorkflowDefinition {
    single_task_definition(code, TaskDefinition::new(code * 10 + 1, "nightly"))
        .with_execution_type(execution_type)
}

async fn submit_next(harness: &TestHarness, definition: &WorkflowDefinition) -> i64 {
    harness.submit(definition).await;
    harness.run_cycle().await;
    harness.latest_instance(definition.code).unwrap().id
}

#[tokio::test]
async fn test_serial_wait_parks_until_predecessor_finishes() {
    let harness = TestHarness::new();
    let definition = serial(1, ExecutionType::SerialWait);
    let first = harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;

    let second = submit_next(&harness, &definition).await;
    assert_ne!(first, second);
    assert_eq!(
        harness.instance(second).state,
        WorkflowExecutionStatus::SerialWait
    );
    assert!(harness.master.repository().contains(second));
    assert_eq!(harness.dispatcher.dispatch_count(), 1);

    harness.report(first, "nightly", TaskEventKind::Success);
    harness
        .wait_for_state(first, WorkflowExecutionStatus::Success)
        .await;
    harness.wait_for_dispatches(2).await;
    harness
        .wait_for_state(second, WorkflowExecutionStatus::RunningExecution)
        .await;
    assert_eq!(harness.dispatcher.dispatched()[1].workflow_instance_id, second);
}

#[tokio::test]
async fn test_serial_wait_releases_in_submission_order() {
    let harness = TestHarness::new();
    let definition = serial(2, ExecutionType::SerialWait);
    let first = harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;
    let second = submit_next(&harness, &definition).await;
    let third = submit_next(&harness, &definition).await;

    harness.report(first, "nightly", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;

    assert_eq!(harness.dispatcher.dispatched()[1].workflow_instance_id, second);
    assert_eq!(
        harness.instance(third).state,
        WorkflowExecutionStatus::SerialWait
    );
}

#[tokio::test]
async fn test_manual_release_starts_a_waiting_instance() {
    let harness = TestHarness::new();
    let definition = serial(3, ExecutionType::SerialWait);
    harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;
    let second = submit_next(&harness, &definition).await;

    harness.master.release_serial_wait(second).await.unwrap();

    harness.wait_for_dispatches(2).await;
    harness
        .wait_for_state(second, WorkflowExecutionStatus::RunningExecution)
        .await;
}

#[tokio::test]
async fn test_release_of_unowned_instance_enqueues_recovery() {
    let harness = TestHarness::new();
    let definition = serial(4, ExecutionType::SerialWait);
    harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;
    let second = submit_next(&harness, &definition).await;
    harness.master.repository().remove(second);

    harness.master.release_serial_wait(second).await.unwrap();
    let pending = harness.commands.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].workflow_instance_id, Some(second));

    assert!(matches!(
        harness.run_cycle().await,
        CycleOutcome::Processed { handled: 1, .. }
    ));
    harness.wait_for_dispatches(2).await;
    harness
        .wait_for_state(second, WorkflowExecutionStatus::RunningExecution)
        .await;
}

#[tokio::test]
async fn test_serial_discard_drops_overlapping_instance() {
    let harness = TestHarness::new();
    let definition = serial(5, ExecutionType::SerialDiscard);
    harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;

    let second = submit_next(&harness, &definition).await;

    let discarded = harness.instance(second);
    assert_eq!(discarded.state, WorkflowExecutionStatus::Stop);
    assert!(discarded.end_time.is_some());
    assert!(!harness.master.repository().contains(second));
    assert_eq!(harness.dispatcher.dispatch_count(), 1);
}

const CRASHED_MASTER: &str = "m2:5678";

fn parked_on_crashed_master(id: i64, definition_code: i64) -> WorkflowInstance {
    WorkflowInstance {
        id,
        name: "nightly-parked".to_string(),
        definition_code,
        definition_version: 1,
        state: WorkflowExecutionStatus::SerialWait,
        host: Some(CRASHED_MASTER.to_string()),
        command_type: CommandType::StartProcess,
        start_time: Utc::now() - ChronoDuration::minutes(5),
        restart_time: None,
        end_time: None,
        run_times: 1,
        global_params: Map::new(),
    }
}

async fn fail_over_crashed_master(harness: &TestHarness) {
    let recovered = harness
        .master
        .failover_coordinator()
        .handle(FailoverEvent::MasterFailover {
            master_address: CRASHED_MASTER.to_string(),
            event_time: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn test_recovered_serial_instance_keeps_waiting() {
    let harness = TestHarness::new();
    let definition = serial(7, ExecutionType::SerialWait);
    let first = harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;

    harness.instances.seed(parked_on_crashed_master(900, 7));
    fail_over_crashed_master(&harness).await;
    assert_eq!(
        harness.run_cycle().await,
        CycleOutcome::Processed {
            handled: 1,
            duplicates: 0,
            failed: 0
        }
    );

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(harness.dispatcher.dispatch_count(), 1);
    let parked = harness.instance(900);
    assert_eq!(parked.state, WorkflowExecutionStatus::SerialWait);
    assert_eq!(parked.host.as_deref(), Some(crate::fixtures::MASTER));
    assert!(harness.master.repository().contains(900));

    harness.report(first, "nightly", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;
    assert_eq!(harness.dispatcher.dispatched()[1].workflow_instance_id, 900);
    harness
        .wait_for_state(900, WorkflowExecutionStatus::RunningExecution)
        .await;
}

#[tokio::test]
async fn test_recovered_serial_instance_starts_when_alone() {
    let harness = TestHarness::new();
    let definition = serial(8, ExecutionType::SerialWait);
    harness.deploy(&definition).await;

    harness.instances.seed(parked_on_crashed_master(901, 8));
    fail_over_crashed_master(&harness).await;
    harness.run_cycle().await;

    harness.wait_for_dispatches(1).await;
    assert_eq!(harness.dispatcher.dispatched()[0].workflow_instance_id, 901);
    harness
        .wait_for_state(901, WorkflowExecutionStatus::RunningExecution)
        .await;
}
