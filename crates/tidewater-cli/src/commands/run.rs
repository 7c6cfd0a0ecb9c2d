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

//! Implementation of the `run` command.
//!
//! Starts a master over in-memory storage and a simulated worker pool,
//! submits one StartProcess command for the definition and waits for the
//! instance to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tidewater::{
    CommandDao, DispatchError, InMemoryCluster, MasterConfig, MasterServer, MemoryCommandDao,
    MemoryTaskInstanceDao, MemoryWorkflowDefinitionDao, MemoryWorkflowInstanceDao, NewCommand,
    TaskDefinition, TaskDispatcher, TaskEventKind, TaskInstance, TaskLifecycleEvent,
    WorkflowDefinition, WorkflowDefinitionDao, WorkflowInstance,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

const WORKERS: [&str; 2] = ["sim-worker-1:1234", "sim-worker-2:1234"];

pub struct RunOptions {
    pub max_task_millis: u64,
    pub fail_task: Option<String>,
}

type Report = (i64, TaskLifecycleEvent);

/// Workers that run every task for a random while and report back through a
/// channel, the way real workers report over RPC.
struct SimulatedWorkerPool {
    reports: mpsc::UnboundedSender<Report>,
    max_task_millis: u64,
    fail_task: Option<String>,
}

impl SimulatedWorkerPool {
    fn report(&self, task: &TaskInstance, kind: TaskEventKind) {
        let event = TaskLifecycleEvent::new(task.name.clone(), kind).for_attempt(task.id);
        let _ = self.reports.send((task.workflow_instance_id, event));
    }
}

#[async_trait]
impl TaskDispatcher for SimulatedWorkerPool {
    async fn dispatch(
        &self,
        _workflow: &WorkflowInstance,
        task: &TaskInstance,
        _definition: &TaskDefinition,
    ) -> Result<String, DispatchError> {
        let (worker, delay) = {
            let mut rng = rand::thread_rng();
            (
                WORKERS[rng.gen_range(0..WORKERS.len())],
                rng.gen_range(0..=self.max_task_millis),
            )
        };
        let fails = self.fail_task.as_deref() == Some(task.name.as_str());

        let reports = self.reports.clone();
        let task = task.clone();
        tokio::spawn(async move {
            let pinned = |kind| {
                (
                    task.workflow_instance_id,
                    TaskLifecycleEvent::new(task.name.clone(), kind).for_attempt(task.id),
                )
            };
            let _ = reports.send(pinned(TaskEventKind::Running {
                started_at: Utc::now(),
            }));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let outcome = if fails {
                TaskEventKind::Failure {
                    reason: "simulated failure".to_string(),
                }
            } else {
                TaskEventKind::Success
            };
            let _ = reports.send(pinned(outcome));
        });

        Ok(worker.to_string())
    }

    async fn kill(&self, task: &TaskInstance) -> Result<(), DispatchError> {
        self.report(task, TaskEventKind::Killed);
        Ok(())
    }

    async fn pause(&self, task: &TaskInstance) -> Result<(), DispatchError> {
        self.report(task, TaskEventKind::Paused);
        Ok(())
    }

    async fn take_over(&self, _task: &TaskInstance) -> Result<bool, DispatchError> {
        Ok(false)
    }
}

/// Run the run command.
pub async fn run(
    config: MasterConfig,
    definition: WorkflowDefinition,
    options: RunOptions,
) -> Result<()> {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.register_master(config.master_address());
    for worker in WORKERS {
        cluster.register_worker(worker);
    }

    let commands = Arc::new(MemoryCommandDao::new());
    let instances = Arc::new(MemoryWorkflowInstanceDao::new());
    let tasks = Arc::new(MemoryTaskInstanceDao::new());
    let definitions = Arc::new(MemoryWorkflowDefinitionDao::new());
    let (reports, mut incoming) = mpsc::unbounded_channel();
    let workers = Arc::new(SimulatedWorkerPool {
        reports,
        max_task_millis: options.max_task_millis,
        fail_task: options.fail_task,
    });

    let master = MasterServer::builder()
        .config(config)
        .command_dao(commands.clone())
        .workflow_instance_dao(instances.clone())
        .task_instance_dao(tasks.clone())
        .workflow_definition_dao(definitions.clone())
        .cluster(cluster.clone(), cluster)
        .dispatcher(workers)
        .build()
        .context("Failed to build master")?;

    let code = definition.code;
    let version = definition.version;
    definitions
        .insert(definition)
        .await
        .context("Failed to store workflow definition")?;
    master.start().await.context("Failed to start master")?;
    let command = commands
        .insert(NewCommand::start(code, version))
        .await
        .context("Failed to submit start command")?;
    info!("Submitted command {} for workflow {} v{}", command.id, code, version);

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    let finished = loop {
        tokio::select! {
            Some((workflow_instance_id, event)) = incoming.recv() => {
                if let Err(err) = master.report_task_event(workflow_instance_id, event) {
                    warn!("Dropping worker report: {}", err);
                }
            }
            _ = poll.tick() => {
                let done = instances
                    .list()
                    .into_iter()
                    .find(|instance| {
                        instance.definition_code == code && instance.state.is_finished()
                    });
                if let Some(instance) = done {
                    break Some(instance);
                }
            }
            _ = tokio::signal::ctrl_c() => break None,
        }
    };
    master.shutdown().await;

    let instance = finished.ok_or_else(|| anyhow!("Interrupted before the workflow finished"))?;
    println!(
        "Workflow instance {} ('{}') finished: {}",
        instance.id, instance.name, instance.state
    );
    for attempt in tasks.list_by_workflow_instance(instance.id) {
        println!(
            "  {:<20} {:<12} retry {} on {}",
            attempt.name,
            attempt.state.to_string(),
            attempt.retry_times,
            attempt.host.as_deref().unwrap_or("master")
        );
    }
    Ok(())
}
