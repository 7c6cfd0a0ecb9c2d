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

use std::sync::Arc;

use serde_json::json;
use tidewater::engine::CycleOutcome;
use tidewater::models::{SwitchCase, GLOBAL_PARAMS_PARAM};
use tidewater::{
    CommandDao, CommandType, InMemoryCluster, MasterConfig, MasterServer, NewCommand, SystemLoad,
    TaskDefinition, TaskEventKind, TaskKind, WorkflowDefinition, WorkflowExecutionStatus,
};

use crate::fixtures::{linear_definition, TestHarness};

/// A second master over the same storage that believes it is alone in the
/// cluster, so both masters claim every command.
fn overlapping_master(harness: &TestHarness) -> MasterServer {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.register_master("m2:5678");
    let master = MasterServer::builder()
        .config(
            MasterConfig::builder()
                .master_address("m2:5678")
                .build()
                .unwrap(),
        )
        .command_dao(harness.commands.clone())
        .workflow_instance_dao(harness.instances.clone())
        .task_instance_dao(harness.tasks.clone())
        .workflow_definition_dao(harness.definitions.clone())
        .cluster(cluster.clone(), cluster)
        .dispatcher(harness.dispatcher.clone())
        .load_monitor(harness.load.clone())
        .build()
        .unwrap();
    master.slot_manager().refresh();
    master
}

#[tokio::test]
async fn test_command_claimed_by_two_masters_runs_once() {
    let harness = TestHarness::new();
    let other = overlapping_master(&harness);
    let definition = linear_definition(1);
    harness.deploy(&definition).await;
    harness.submit(&definition).await;

    let (first, second) = tokio::join!(
        harness.master.command_engine().run_cycle(),
        other.command_engine().run_cycle()
    );

    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| format!("{:?}", outcome));
    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Processed {
                handled: 0,
                duplicates: 1,
                failed: 0
            },
            CycleOutcome::Processed {
                handled: 1,
                duplicates: 0,
                failed: 0
            },
        ]
    );
    assert_eq!(harness.instances.list().len(), 1);
    assert!(harness.commands.list_error_commands().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_shard_is_idle() {
    let harness = TestHarness::new();
    assert_eq!(harness.run_cycle().await, CycleOutcome::Idle);
}

#[tokio::test]
async fn test_missing_definition_moves_command_to_error_table() {
    let harness = TestHarness::new();
    let command = harness
        .commands
        .insert(NewCommand::start(999, 1))
        .await
        .unwrap();

    assert_eq!(
        harness.run_cycle().await,
        CycleOutcome::Processed {
            handled: 0,
            duplicates: 0,
            failed: 1
        }
    );

    let errors = harness.commands.list_error_commands().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].command.id, command.id);
    assert!(errors[0]
        .message
        .contains("Workflow definition 999 version 1 not found"));
    assert!(harness.commands.pending().is_empty());
}

#[tokio::test]
async fn test_cyclic_definition_is_rejected() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(2, 1, "loop")
        .with_task(TaskDefinition::new(21, "ping"))
        .with_task(TaskDefinition::new(22, "pong"))
        .with_relation("ping", "pong")
        .with_relation("pong", "ping");
    harness.deploy(&definition).await;
    harness.submit(&definition).await;

    harness.run_cycle().await;

    let errors = harness.commands.list_error_commands().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Cyclic"));
    assert!(harness.instances.list().is_empty());
}

#[tokio::test]
async fn test_overloaded_master_leaves_commands_pending() {
    let harness = TestHarness::new();
    let definition = linear_definition(3);
    harness.deploy(&definition).await;
    harness.submit(&definition).await;
    harness.load.set(SystemLoad {
        cpu_usage: 0.95,
        ..SystemLoad::default()
    });

    assert_eq!(harness.run_cycle().await, CycleOutcome::Overloaded);
    assert_eq!(harness.commands.pending().len(), 1);

    harness.load.set(SystemLoad::default());
    assert!(matches!(
        harness.run_cycle().await,
        CycleOutcome::Processed { handled: 1, .. }
    ));
}

#[tokio::test]
async fn test_saturated_workflow_pool_stops_fetching() {
    let harness = TestHarness::with_config(|config| config.max_live_workflows(1));
    let definition = linear_definition(4);
    harness.start(&definition).await;
    harness.submit(&definition).await;

    assert_eq!(harness.master.live_workflow_count(), 1);
    assert_eq!(harness.run_cycle().await, CycleOutcome::Overloaded);
    assert_eq!(harness.commands.pending().len(), 1);
}

#[tokio::test]
async fn test_unavailable_command_store_fails_the_cycle() {
    let harness = TestHarness::new();
    harness.commands.set_available(false);
    assert!(harness.master.command_engine().run_cycle().await.is_err());
}

#[tokio::test]
async fn test_stop_command_reaches_live_workflow() {
    let harness = TestHarness::new();
    harness.dispatcher.set_kill_unreachable(true);
    let id = harness.start(&linear_definition(5)).await;
    harness.wait_for_dispatches(1).await;

    let instance = harness.instance(id);
    harness
        .commands
        .insert(NewCommand::for_instance(CommandType::Stop, &instance))
        .await
        .unwrap();
    harness.run_cycle().await;

    harness.wait_for_state(id, WorkflowExecutionStatus::Stop).await;
}

#[tokio::test]
async fn test_pause_command_for_unowned_instance_updates_storage() {
    let harness = TestHarness::new();
    let definition = linear_definition(6).with_execution_type(tidewater::ExecutionType::SerialWait);
    harness.start(&definition).await;
    harness.submit(&definition).await;
    harness.run_cycle().await;
    let waiting = harness.latest_instance(6).unwrap();
    assert_eq!(waiting.state, WorkflowExecutionStatus::SerialWait);

    // Forget the parked instance locally, as if its master had gone away.
    harness.master.repository().remove(waiting.id);
    harness
        .commands
        .insert(NewCommand::for_instance(CommandType::Pause, &waiting))
        .await
        .unwrap();
    harness.run_cycle().await;

    assert_eq!(
        harness.instance(waiting.id).state,
        WorkflowExecutionStatus::Pause
    );
}

#[tokio::test]
async fn test_repeat_running_reruns_finished_instance() {
    let harness = TestHarness::new();
    let definition =
        WorkflowDefinition::new(7, 1, "once").with_task(TaskDefinition::new(71, "only"));
    let id = harness.start(&definition).await;
    harness.wait_for_dispatches(1).await;
    harness.report(id, "only", TaskEventKind::Success);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    harness.wait_for_eviction(id).await;

    let finished = harness.instance(id);
    harness
        .commands
        .insert(NewCommand::for_instance(CommandType::RepeatRunning, &finished))
        .await
        .unwrap();
    harness.run_cycle().await;

    harness.wait_for_dispatches(2).await;
    let rerun = harness.instance(id);
    assert_eq!(rerun.run_times, 2);
    assert!(rerun.restart_time.is_some());
    assert!(rerun.end_time.is_none());
    assert_eq!(harness.attempts(id, "only").len(), 2);
}

#[tokio::test]
async fn test_rerun_of_failed_tasks_keeps_succeeded_ones() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(8)).await;
    harness.wait_for_dispatches(1).await;
    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;
    harness.report(
        id,
        "transform",
        TaskEventKind::Failure {
            reason: "schema mismatch".to_string(),
        },
    );
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Failure)
        .await;
    harness.wait_for_eviction(id).await;

    let failed = harness.instance(id);
    harness
        .commands
        .insert(NewCommand::for_instance(
            CommandType::StartFailureTaskProcess,
            &failed,
        ))
        .await
        .unwrap();
    harness.run_cycle().await;

    harness.wait_for_dispatches(3).await;
    assert_eq!(
        harness.dispatcher.dispatched_names(),
        vec!["extract", "transform", "transform"]
    );
    assert_eq!(harness.attempts(id, "extract").len(), 1);
}

#[tokio::test]
async fn test_switch_task_routes_on_global_params() {
    let harness = TestHarness::new();
    let definition = WorkflowDefinition::new(9, 1, "regional")
        .with_task(TaskDefinition::new(91, "route").with_kind(TaskKind::Switch {
            cases: vec![SwitchCase {
                param: "region".to_string(),
                equals: json!("eu"),
                next: "eu_load".to_string(),
            }],
            default_branch: Some("us_load".to_string()),
        }))
        .with_task(TaskDefinition::new(92, "eu_load"))
        .with_task(TaskDefinition::new(93, "us_load"))
        .with_relation("route", "eu_load")
        .with_relation("route", "us_load");
    harness.deploy(&definition).await;
    harness
        .commands
        .insert(
            NewCommand::start(9, 1).with_param(GLOBAL_PARAMS_PARAM, json!({ "region": "eu" })),
        )
        .await
        .unwrap();
    harness.run_cycle().await;
    let id = harness.latest_instance(9).unwrap().id;

    harness.wait_for_dispatches(1).await;
    harness.report(id, "eu_load", TaskEventKind::Success);
    harness
        .wait_for_state(id, WorkflowExecutionStatus::Success)
        .await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["eu_load"]);
    assert!(harness.attempts(id, "us_load").is_empty());
}
