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

//! Shared fixtures for the integration tests: a single master wired to
//! in-memory collaborators, plus a dispatcher and alert sender that record
//! what the engine asked of them.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidewater::engine::CycleOutcome;
use tidewater::models::TaskKind;
use tidewater::{
    AlertSender, Command, DispatchError, InMemoryCluster, MasterConfig, MasterConfigBuilder,
    MasterServer, MemoryCommandDao, MemoryTaskInstanceDao, MemoryWorkflowDefinitionDao,
    MemoryWorkflowInstanceDao, NewCommand, SystemLoad, SystemLoadMonitor, TaskDefinition,
    TaskDispatcher, TaskEventKind, TaskExecutionStatus, TaskInstance, TaskLifecycleEvent,
    TaskTimeoutAlert, WorkflowDefinition, WorkflowExecutionStatus, WorkflowInstance,
};

pub const MASTER: &str = "m1:5678";
pub const WORKER: &str = "w1:1234";

/// Accepts every dispatch onto [`WORKER`] and records each call.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<TaskInstance>>,
    killed: Mutex<Vec<TaskInstance>>,
    paused: Mutex<Vec<TaskInstance>>,
    reject_dispatch: AtomicBool,
    kill_unreachable: AtomicBool,
    accept_take_over: AtomicBool,
}

impl RecordingDispatcher {
    pub fn dispatched(&self) -> Vec<TaskInstance> {
        self.dispatched.lock().clone()
    }

    pub fn dispatched_names(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .iter()
            .map(|task| task.name.clone())
            .collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().len()
    }

    pub fn killed(&self) -> Vec<TaskInstance> {
        self.killed.lock().clone()
    }

    pub fn paused(&self) -> Vec<TaskInstance> {
        self.paused.lock().clone()
    }

    pub fn set_reject_dispatch(&self, reject: bool) {
        self.reject_dispatch.store(reject, Ordering::SeqCst);
    }

    pub fn set_kill_unreachable(&self, unreachable: bool) {
        self.kill_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_accept_take_over(&self, accept: bool) {
        self.accept_take_over.store(accept, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _workflow: &WorkflowInstance,
        task: &TaskInstance,
        definition: &TaskDefinition,
    ) -> Result<String, DispatchError> {
        if self.reject_dispatch.load(Ordering::SeqCst) {
            return Err(DispatchError::NoWorkerAvailable(
                definition.worker_group.clone(),
            ));
        }
        self.dispatched.lock().push(task.clone());
        Ok(WORKER.to_string())
    }

    async fn kill(&self, task: &TaskInstance) -> Result<(), DispatchError> {
        if self.kill_unreachable.load(Ordering::SeqCst) {
            return Err(DispatchError::WorkerUnreachable {
                worker: WORKER.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.killed.lock().push(task.clone());
        Ok(())
    }

    async fn pause(&self, task: &TaskInstance) -> Result<(), DispatchError> {
        self.paused.lock().push(task.clone());
        Ok(())
    }

    async fn take_over(&self, _task: &TaskInstance) -> Result<bool, DispatchError> {
        Ok(self.accept_take_over.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingAlertSender {
    alerts: Mutex<Vec<TaskTimeoutAlert>>,
}

impl RecordingAlertSender {
    pub fn alerts(&self) -> Vec<TaskTimeoutAlert> {
        self.alerts.lock().clone()
    }
}

impl AlertSender for RecordingAlertSender {
    fn send_task_timeout_alert(&self, alert: TaskTimeoutAlert) {
        self.alerts.lock().push(alert);
    }
}

/// Reports whatever load the test sets; idle by default.
#[derive(Default)]
pub struct FixedLoadMonitor {
    load: Mutex<SystemLoad>,
}

impl FixedLoadMonitor {
    pub fn set(&self, load: SystemLoad) {
        *self.load.lock() = load;
    }
}

impl SystemLoadMonitor for FixedLoadMonitor {
    fn current_load(&self) -> SystemLoad {
        *self.load.lock()
    }
}

/// One master over in-memory storage, with one live worker.
pub struct TestHarness {
    pub cluster: Arc<InMemoryCluster>,
    pub commands: Arc<MemoryCommandDao>,
    pub instances: Arc<MemoryWorkflowInstanceDao>,
    pub tasks: Arc<MemoryTaskInstanceDao>,
    pub definitions: Arc<MemoryWorkflowDefinitionDao>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub alerts: Arc<RecordingAlertSender>,
    pub load: Arc<FixedLoadMonitor>,
    pub master: MasterServer,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|builder| builder)
    }

    pub fn with_config(configure: impl FnOnce(MasterConfigBuilder) -> MasterConfigBuilder) -> Self {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.register_master(MASTER);
        cluster.register_worker(WORKER);

        let config = configure(
            MasterConfig::builder()
                .master_address(MASTER)
                .fetch_interval(Duration::from_millis(20))
                .dispatch_retry_interval(Duration::from_millis(100)),
        )
        .build()
        .expect("test configuration is valid");

        let commands = Arc::new(MemoryCommandDao::new());
        let instances = Arc::new(MemoryWorkflowInstanceDao::new());
        let tasks = Arc::new(MemoryTaskInstanceDao::new());
        let definitions = Arc::new(MemoryWorkflowDefinitionDao::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let alerts = Arc::new(RecordingAlertSender::default());
        let load = Arc::new(FixedLoadMonitor::default());

        let master = MasterServer::builder()
            .config(config)
            .command_dao(commands.clone())
            .workflow_instance_dao(instances.clone())
            .task_instance_dao(tasks.clone())
            .workflow_definition_dao(definitions.clone())
            .cluster(cluster.clone(), cluster.clone())
            .dispatcher(dispatcher.clone())
            .alert_sender(alerts.clone())
            .load_monitor(load.clone())
            .build()
            .expect("master builds");
        master.slot_manager().refresh();

        Self {
            cluster,
            commands,
            instances,
            tasks,
            definitions,
            dispatcher,
            alerts,
            load,
            master,
        }
    }

    pub async fn deploy(&self, definition: &WorkflowDefinition) {
        use tidewater::WorkflowDefinitionDao;
        self.definitions
            .insert(definition.clone())
            .await
            .expect("definition stored");
    }

    pub async fn submit(&self, definition: &WorkflowDefinition) -> Command {
        use tidewater::CommandDao;
        self.commands
            .insert(NewCommand::start(definition.code, definition.version))
            .await
            .expect("command stored")
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.master
            .command_engine()
            .run_cycle()
            .await
            .expect("fetch succeeds")
    }

    /// Deploys, submits and bootstraps one instance; returns its id.
    pub async fn start(&self, definition: &WorkflowDefinition) -> i64 {
        self.deploy(definition).await;
        self.submit(definition).await;
        self.run_cycle().await;
        self.latest_instance(definition.code)
            .expect("instance created")
            .id
    }

    pub fn latest_instance(&self, definition_code: i64) -> Option<WorkflowInstance> {
        self.instances
            .list()
            .into_iter()
            .filter(|instance| instance.definition_code == definition_code)
            .last()
    }

    pub fn instance(&self, id: i64) -> WorkflowInstance {
        self.instances
            .list()
            .into_iter()
            .find(|instance| instance.id == id)
            .expect("instance exists")
    }

    pub fn report(&self, workflow_instance_id: i64, task: &str, kind: TaskEventKind) {
        self.master
            .report_task_event(workflow_instance_id, TaskLifecycleEvent::new(task, kind))
            .expect("workflow is live");
    }

    pub fn attempts(&self, workflow_instance_id: i64, task: &str) -> Vec<TaskInstance> {
        self.tasks
            .list_by_workflow_instance(workflow_instance_id)
            .into_iter()
            .filter(|attempt| attempt.name == task)
            .collect()
    }

    pub async fn wait_for_dispatches(&self, count: usize) {
        let dispatcher = self.dispatcher.clone();
        wait_for(&format!("{} dispatches", count), move || {
            dispatcher.dispatch_count() >= count
        })
        .await;
    }

    pub async fn wait_for_state(&self, workflow_instance_id: i64, state: WorkflowExecutionStatus) {
        let instances = self.instances.clone();
        wait_for(&format!("instance {} in {}", workflow_instance_id, state), move || {
            instances
                .list()
                .iter()
                .any(|instance| instance.id == workflow_instance_id && instance.state == state)
        })
        .await;
    }

    pub async fn wait_for_task_state(
        &self,
        workflow_instance_id: i64,
        task: &str,
        state: TaskExecutionStatus,
    ) {
        let tasks = self.tasks.clone();
        let name = task.to_string();
        wait_for(&format!("task '{}' in {}", task, state), move || {
            tasks
                .list_by_workflow_instance(workflow_instance_id)
                .iter()
                .filter(|attempt| attempt.name == name)
                .last()
                .is_some_and(|attempt| attempt.state == state)
        })
        .await;
    }

    pub async fn wait_for_eviction(&self, workflow_instance_id: i64) {
        let repository = self.master.repository().clone();
        wait_for(&format!("eviction of {}", workflow_instance_id), move || {
            !repository.contains(workflow_instance_id)
        })
        .await;
    }
}

/// Polls `condition` every 10ms, panicking after five seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// `extract -> transform -> load`.
pub fn linear_definition(code: i64) -> WorkflowDefinition {
    WorkflowDefinition::new(code, 1, "etl")
        .with_task(TaskDefinition::new(code * 10 + 1, "extract"))
        .with_task(TaskDefinition::new(code * 10 + 2, "transform"))
        .with_task(TaskDefinition::new(code * 10 + 3, "load"))
        .with_relation("extract", "transform")
        .with_relation("transform", "load")
}

/// A single task workflow.
pub fn single_task_definition(code: i64, task: TaskDefinition) -> WorkflowDefinition {
    WorkflowDefinition::new(code, 1, "single").with_task(task)
}

/// `check -> gate`, where the gate follows `publish` if check succeeded and
/// `repair` otherwise.
pub fn conditions_definition(code: i64) -> WorkflowDefinition {
    WorkflowDefinition::new(code, 1, "gated")
        .with_task(TaskDefinition::new(code * 10 + 1, "check"))
        .with_task(
            TaskDefinition::new(code * 10 + 2, "gate").with_kind(TaskKind::Conditions {
                success_branch: vec!["publish".to_string()],
                failure_branch: vec!["repair".to_string()],
            }),
        )
        .with_task(TaskDefinition::new(code * 10 + 3, "publish"))
        .with_task(TaskDefinition::new(code * 10 + 4, "repair"))
        .with_relation("check", "gate")
        .with_relation("gate", "publish")
        .with_relation("gate", "repair")
}
