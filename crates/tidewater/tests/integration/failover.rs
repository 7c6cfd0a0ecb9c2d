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
use tidewater::{
    CommandType, FailoverEvent, TaskEventKind, TaskExecutionStatus, WorkflowExecutionStatus,
    WorkflowInstance,
};

use crate::fixtures::{linear_definition, wait_for, TestHarness, MASTER, WORKER};

const CRASHED_MASTER: &str = "m2:5678";

fn orphan(id: i64, definition_code: i64, state: WorkflowExecutionStatus) -> WorkflowInstance {
    WorkflowInstance {
        id,
        name: "etl-orphan".to_string(),
        definition_code,
        definition_version: 1,
        state,
        host: Some(CRASHED_MASTER.to_string()),
        command_type: CommandType::StartProcess,
        start_time: Utc::now() - ChronoDuration::minutes(5),
        restart_time: None,
        end_time: None,
        run_times: 1,
        global_params: Map::new(),
    }
}

#[tokio::test]
async fn test_master_failover_recovers_orphaned_workflow() {
    let harness = TestHarness::new();
    let definition = linear_definition(1);
    harness.deploy(&definition).await;
    harness
        .instances
        .seed(orphan(100, 1, WorkflowExecutionStatus::RunningExecution));

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
    assert_eq!(harness.instance(100).state, WorkflowExecutionStatus::Failover);

    harness.run_cycle().await;
    for (count, task) in ["extract", "transform", "load"].into_iter().enumerate() {
        harness.wait_for_dispatches(count + 1).await;
        harness.report(100, task, TaskEventKind::Success);
    }

    harness
        .wait_for_state(100, WorkflowExecutionStatus::Success)
        .await;
    assert_eq!(harness.instance(100).host.as_deref(), Some(MASTER));
}

#[tokio::test]
async fn test_recovery_keeps_finished_tasks() {
    let harness = TestHarness::new();
    let definition = linear_definition(2);
    harness.deploy(&definition).await;
    harness
        .instances
        .seed(orphan(200, 2, WorkflowExecutionStatus::RunningExecution));
    let mut extract = tidewater::TaskInstance {
        id: 500,
        workflow_instance_id: 200,
        task_code: 21,
        name: "extract".to_string(),
        task_type: "SHELL".to_string(),
        state: TaskExecutionStatus::Success,
        host: Some(WORKER.to_string()),
        submit_time: Utc::now() - ChronoDuration::minutes(4),
        first_submit_time: Utc::now() - ChronoDuration::minutes(4),
        start_time: None,
        end_time: None,
        retry_times: 0,
        failover: false,
        branch: None,
    };
    extract.end_time = Some(Utc::now() - ChronoDuration::minutes(3));
    harness.tasks.seed(extract);

    harness
        .master
        .failover_coordinator()
        .handle(FailoverEvent::MasterFailover {
            master_address: CRASHED_MASTER.to_string(),
            event_time: Utc::now(),
        })
        .await
        .unwrap();
    harness.run_cycle().await;

    harness.wait_for_dispatches(1).await;
    assert_eq!(harness.dispatcher.dispatched_names(), vec!["transform"]);
}

#[tokio::test]
async fn test_master_failover_skips_workflows_started_after_the_crash() {
    let harness = TestHarness::new();
    harness.deploy(&linear_definition(3)).await;
    let mut fresh = orphan(300, 3, WorkflowExecutionStatus::RunningExecution);
    fresh.start_time = Utc::now() + ChronoDuration::minutes(1);
    harness.instances.seed(fresh);

    let recovered = harness
        .master
        .failover_coordinator()
        .handle(FailoverEvent::MasterFailover {
            master_address: CRASHED_MASTER.to_string(),
            event_time: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(recovered, 0);
    assert!(harness.commands.pending().is_empty());
}

#[tokio::test]
async fn test_worker_failover_resubmits_lost_tasks() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(4)).await;
    harness
        .wait_for_task_state(id, "extract", TaskExecutionStatus::Dispatch)
        .await;

    let failed_over = harness
        .master
        .failover_coordinator()
        .handle(FailoverEvent::WorkerFailover {
            worker_address: WORKER.to_string(),
            event_time: Utc::now() + ChronoDuration::seconds(1),
        })
        .await
        .unwrap();
    assert_eq!(failed_over, 1);

    harness.wait_for_dispatches(2).await;
    let attempts = harness.attempts(id, "extract");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].state, TaskExecutionStatus::NeedFaultTolerance);
    assert!(attempts[1].failover);

    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_dispatches(3).await;
    assert_eq!(
        harness.dispatcher.dispatched_names(),
        vec!["extract", "extract", "transform"]
    );
}

#[tokio::test]
async fn test_worker_failover_ignores_tasks_submitted_after_the_crash() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(5)).await;
    harness.wait_for_dispatches(1).await;

    harness
        .master
        .failover_coordinator()
        .handle(FailoverEvent::WorkerFailover {
            worker_address: WORKER.to_string(),
            event_time: Utc::now() - ChronoDuration::minutes(1),
        })
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(harness.dispatcher.dispatch_count(), 1);
    assert_eq!(harness.attempts(id, "extract").len(), 1);
}

#[tokio::test]
async fn test_worker_leaving_the_cluster_triggers_failover() {
    let harness = TestHarness::with_config(|config| config.enable_global_failover(false));
    harness.master.start().await.unwrap();

    let definition = linear_definition(6);
    harness.deploy(&definition).await;
    harness.submit(&definition).await;
    harness.wait_for_dispatches(1).await;

    harness.cluster.remove_worker(WORKER);
    harness.wait_for_dispatches(2).await;
    assert!(harness.dispatcher.dispatched()[1].failover);

    harness.master.shutdown().await;
    assert!(!harness.master.is_running().await);
}

#[tokio::test]
async fn test_master_leaving_the_cluster_triggers_failover() {
    let harness = TestHarness::with_config(|config| config.enable_global_failover(false));
    harness.cluster.register_master(CRASHED_MASTER);
    harness.deploy(&linear_definition(7)).await;
    harness
        .instances
        .seed(orphan(700, 7, WorkflowExecutionStatus::RunningExecution));
    harness.master.start().await.unwrap();

    harness.cluster.remove_master(CRASHED_MASTER);

    // Recovery is picked up by the running command engine.
    harness.wait_for_dispatches(1).await;
    harness
        .wait_for_state(700, WorkflowExecutionStatus::RunningExecution)
        .await;
    assert!(harness.master.repository().contains(700));
    assert!(!harness.cluster.is_locked("/lock/failover/master"));

    harness.master.shutdown().await;
}

#[tokio::test]
async fn test_global_failover_at_startup_recovers_dead_masters() {
    let harness = TestHarness::new();
    harness.deploy(&linear_definition(8)).await;
    harness
        .instances
        .seed(orphan(800, 8, WorkflowExecutionStatus::ReadyStop));

    harness.master.start().await.unwrap();

    // The stop requested before the crash is carried out after recovery.
    let dispatcher = harness.dispatcher.clone();
    let instances = harness.instances.clone();
    wait_for("recovered stop", move || {
        dispatcher.dispatch_count() == 0
            && instances
                .list()
                .iter()
                .any(|instance| {
                    instance.id == 800 && instance.state == WorkflowExecutionStatus::Stop
                })
    })
    .await;

    harness.master.shutdown().await;
}

#[tokio::test]
async fn test_relinquished_workflow_adopts_tasks_still_running() {
    let harness = TestHarness::new();
    let id = harness.start(&linear_definition(9)).await;
    harness.wait_for_dispatches(1).await;

    harness.tasks.set_available(false);
    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_eviction(id).await;
    harness.tasks.set_available(true);

    harness.dispatcher.set_accept_take_over(true);
    harness.run_cycle().await;
    harness
        .wait_for_state(id, WorkflowExecutionStatus::RunningExecution)
        .await;
    assert_eq!(harness.dispatcher.dispatch_count(), 1);

    harness.report(id, "extract", TaskEventKind::Success);
    harness.wait_for_dispatches(2).await;
    assert_eq!(
        harness.dispatcher.dispatched_names(),
        vec!["extract", "transform"]
    );
}
