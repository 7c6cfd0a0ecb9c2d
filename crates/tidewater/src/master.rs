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

//! # Master Server
//!
//! [`MasterServer`] owns one master's engine: the command engine loop, the
//! failover listener, the per-workflow bus consumers and the repository of
//! live workflows. It is assembled from collaborators through
//! [`MasterServerBuilder`]; everything that touches storage, workers or the
//! cluster is supplied by the embedding application.
//!
//! ```rust,ignore
//! let master = MasterServer::builder()
//!     .config(config)
//!     .command_dao(commands)
//!     .workflow_instance_dao(instances)
//!     .task_instance_dao(tasks)
//!     .workflow_definition_dao(definitions)
//!     .cluster(cluster.clone(), cluster)
//!     .dispatcher(dispatcher)
//!     .build()?;
//!
//! master.start().await?;
//! // Worker reports flow back in through report_task_event.
//! master.report_task_event(workflow_id, TaskLifecycleEvent::new("extract", TaskEventKind::Success))?;
//! master.shutdown().await;
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};

use crate::alert::{AlertSender, LoggingAlertSender};
use crate::cluster::{ClusterLock, ClusterMembership};
use crate::config::MasterConfig;
use crate::dispatch::TaskDispatcher;
use crate::engine::{
    CommandEngine, CommandHandler, IdSlotBasedCommandFetcher, MasterSlotManager,
    WorkflowBootstrapper,
};
use crate::error::MasterError;
use crate::event::{
    TaskLifecycleEvent, WorkflowEventBusCoordinator, WorkflowEventKind, WorkflowLifecycleEvent,
};
use crate::failover::FailoverCoordinator;
use crate::load::{SysinfoLoadMonitor, SystemLoadMonitor};
use crate::models::{CommandType, NewCommand, WorkflowExecutionStatus};
use crate::repository::WorkflowRepository;
use crate::state::{EngineServices, LifecycleEventDispatcher};
use crate::storage::{CommandDao, TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao};

/// Background services of a started master.
#[derive(Default)]
struct RuntimeHandles {
    engine_handle: Option<tokio::task::JoinHandle<()>>,
    failover_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

pub struct MasterServer {
    config: MasterConfig,
    services: Arc<EngineServices>,
    slot_manager: Arc<MasterSlotManager>,
    coordinator: Arc<WorkflowEventBusCoordinator>,
    engine: Arc<CommandEngine>,
    failover: Arc<FailoverCoordinator>,
    membership: Arc<dyn ClusterMembership>,
    runtime_handles: Mutex<RuntimeHandles>,
}

impl MasterServer {
    pub fn builder() -> MasterServerBuilder {
        MasterServerBuilder::default()
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Starts the background services.
    ///
    /// With global failover enabled, orphaned instances of dead masters and
    /// of this master's previous incarnation are re-enqueued first, before
    /// the first fetch.
    pub async fn start(&self) -> Result<(), MasterError> {
        let mut handles = self.runtime_handles.lock().await;
        if handles.shutdown_sender.is_some() {
            return Err(MasterError::AlreadyRunning);
        }

        info!(
            "Starting master {} (fetch size {})",
            self.config.master_address(),
            self.config.fetch_size()
        );
        self.slot_manager.refresh();

        let membership_events = self.membership.subscribe();
        if self.config.enable_global_failover() {
            if let Err(err) = self.failover.global_master_failover().await {
                error!("Global master failover failed: {}", err);
            }
        }

        let (shutdown_tx, engine_shutdown_rx) = broadcast::channel(1);
        let failover_shutdown_rx = shutdown_tx.subscribe();

        let engine = self.engine.clone();
        let engine_handle = tokio::spawn(async move {
            engine.run(engine_shutdown_rx).await;
        });

        let failover = self.failover.clone();
        let failover_handle = tokio::spawn(async move {
            failover
                .listen(membership_events, failover_shutdown_rx)
                .await;
        });

        handles.engine_handle = Some(engine_handle);
        handles.failover_handle = Some(failover_handle);
        handles.shutdown_sender = Some(shutdown_tx);
        Ok(())
    }

    /// Stops the background services and every workflow consumer. Live
    /// workflows stay persisted as they are; global failover picks them up
    /// when a master with this address starts again.
    pub async fn shutdown(&self) {
        let mut handles = self.runtime_handles.lock().await;

        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = handles.engine_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = handles.failover_handle.take() {
            let _ = handle.await;
        }

        self.coordinator.shutdown();
        info!(
            "Master {} stopped with {} live workflows",
            self.config.master_address(),
            self.services.repository.len()
        );
    }

    pub async fn is_running(&self) -> bool {
        self.runtime_handles.lock().await.shutdown_sender.is_some()
    }

    /// Feeds a worker report into the workflow that owns the task.
    pub fn report_task_event(
        &self,
        workflow_instance_id: i64,
        event: TaskLifecycleEvent,
    ) -> Result<(), MasterError> {
        let runnable = self
            .services
            .repository
            .get(workflow_instance_id)
            .ok_or(MasterError::WorkflowNotRunning(workflow_instance_id))?;
        if runnable.publish(event) {
            Ok(())
        } else {
            Err(MasterError::WorkflowNotRunning(workflow_instance_id))
        }
    }

    /// Requests a pause of a workflow running on this master. Active tasks
    /// finish; nothing new starts.
    pub fn pause_workflow(&self, workflow_instance_id: i64) -> Result<(), MasterError> {
        self.control(workflow_instance_id, WorkflowEventKind::Pause)
    }

    /// Requests a stop of a workflow running on this master. Active tasks are
    /// killed.
    pub fn stop_workflow(&self, workflow_instance_id: i64) -> Result<(), MasterError> {
        self.control(workflow_instance_id, WorkflowEventKind::Stop)
    }

    fn control(
        &self,
        workflow_instance_id: i64,
        kind: WorkflowEventKind,
    ) -> Result<(), MasterError> {
        let runnable = self
            .services
            .repository
            .get(workflow_instance_id)
            .ok_or(MasterError::WorkflowNotRunning(workflow_instance_id))?;
        runnable.publish(WorkflowLifecycleEvent::new(workflow_instance_id, kind));
        Ok(())
    }

    /// Lets a `SerialWait` instance run. A local instance starts at once;
    /// one parked elsewhere gets a `RecoverSerialWait` command.
    pub async fn release_serial_wait(&self, workflow_instance_id: i64) -> Result<(), MasterError> {
        if let Some(runnable) = self.services.repository.get(workflow_instance_id) {
            if runnable.state() == WorkflowExecutionStatus::SerialWait {
                runnable.publish(WorkflowLifecycleEvent::new(
                    workflow_instance_id,
                    WorkflowEventKind::Start,
                ));
            }
            return Ok(());
        }

        let instance = self
            .services
            .workflow_instance_dao
            .find(workflow_instance_id)
            .await?
            .ok_or(MasterError::WorkflowNotRunning(workflow_instance_id))?;
        if instance.state != WorkflowExecutionStatus::SerialWait {
            return Ok(());
        }
        self.services
            .command_dao
            .insert(NewCommand::for_instance(
                CommandType::RecoverSerialWait,
                &instance,
            ))
            .await?;
        Ok(())
    }

    pub fn repository(&self) -> &Arc<WorkflowRepository> {
        &self.services.repository
    }

    pub fn live_workflow_count(&self) -> usize {
        self.services.repository.len()
    }

    pub fn command_engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }

    pub fn failover_coordinator(&self) -> &Arc<FailoverCoordinator> {
        &self.failover
    }

    pub fn slot_manager(&self) -> &Arc<MasterSlotManager> {
        &self.slot_manager
    }
}

/// Builder for [`MasterServer`].
///
/// Storage, cluster and dispatcher collaborators are required. Alerts default
/// to [`LoggingAlertSender`] and load sampling to [`SysinfoLoadMonitor`].
#[derive(Default)]
pub struct MasterServerBuilder {
    config: Option<MasterConfig>,
    command_dao: Option<Arc<dyn CommandDao>>,
    workflow_instance_dao: Option<Arc<dyn WorkflowInstanceDao>>,
    task_instance_dao: Option<Arc<dyn TaskInstanceDao>>,
    workflow_definition_dao: Option<Arc<dyn WorkflowDefinitionDao>>,
    membership: Option<Arc<dyn ClusterMembership>>,
    lock: Option<Arc<dyn ClusterLock>>,
    dispatcher: Option<Arc<dyn TaskDispatcher>>,
    alert_sender: Option<Arc<dyn AlertSender>>,
    load_monitor: Option<Arc<dyn SystemLoadMonitor>>,
}

impl MasterServerBuilder {
    pub fn config(mut self, config: MasterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn command_dao(mut self, dao: Arc<dyn CommandDao>) -> Self {
        self.command_dao = Some(dao);
        self
    }

    pub fn workflow_instance_dao(mut self, dao: Arc<dyn WorkflowInstanceDao>) -> Self {
        self.workflow_instance_dao = Some(dao);
        self
    }

    pub fn task_instance_dao(mut self, dao: Arc<dyn TaskInstanceDao>) -> Self {
        self.task_instance_dao = Some(dao);
        self
    }

    pub fn workflow_definition_dao(mut self, dao: Arc<dyn WorkflowDefinitionDao>) -> Self {
        self.workflow_definition_dao = Some(dao);
        self
    }

    /// Sets the membership view and the lock service, usually the same
    /// coordination client.
    pub fn cluster(
        mut self,
        membership: Arc<dyn ClusterMembership>,
        lock: Arc<dyn ClusterLock>,
    ) -> Self {
        self.membership = Some(membership);
        self.lock = Some(lock);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn alert_sender(mut self, alert_sender: Arc<dyn AlertSender>) -> Self {
        self.alert_sender = Some(alert_sender);
        self
    }

    pub fn load_monitor(mut self, load_monitor: Arc<dyn SystemLoadMonitor>) -> Self {
        self.load_monitor = Some(load_monitor);
        self
    }

    pub fn build(self) -> Result<MasterServer, MasterError> {
        let config = self.config.unwrap_or_default();
        let command_dao = self
            .command_dao
            .ok_or(MasterError::MissingCollaborator("command_dao"))?;
        let workflow_instance_dao = self
            .workflow_instance_dao
            .ok_or(MasterError::MissingCollaborator("workflow_instance_dao"))?;
        let task_instance_dao = self
            .task_instance_dao
            .ok_or(MasterError::MissingCollaborator("task_instance_dao"))?;
        let workflow_definition_dao = self
            .workflow_definition_dao
            .ok_or(MasterError::MissingCollaborator("workflow_definition_dao"))?;
        let membership = self
            .membership
            .ok_or(MasterError::MissingCollaborator("cluster membership"))?;
        let lock = self
            .lock
            .ok_or(MasterError::MissingCollaborator("cluster lock"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(MasterError::MissingCollaborator("dispatcher"))?;
        let alert_sender = self
            .alert_sender
            .unwrap_or_else(|| Arc::new(LoggingAlertSender));
        let load_monitor = self
            .load_monitor
            .unwrap_or_else(|| Arc::new(SysinfoLoadMonitor::new()));

        let repository = Arc::new(WorkflowRepository::new());
        let services = Arc::new(EngineServices {
            master_address: config.master_address().to_string(),
            command_dao: command_dao.clone(),
            workflow_instance_dao: workflow_instance_dao.clone(),
            task_instance_dao,
            dispatcher,
            alert_sender,
            repository: repository.clone(),
            dispatch_retry_interval: config.dispatch_retry_interval(),
        });

        let event_dispatcher = Arc::new(LifecycleEventDispatcher::new(services.clone()));
        let coordinator = Arc::new(WorkflowEventBusCoordinator::new(
            event_dispatcher,
            repository.clone(),
        ));

        let slot_manager = Arc::new(MasterSlotManager::new(
            config.master_address(),
            membership.clone(),
        ));
        let fetcher = Arc::new(IdSlotBasedCommandFetcher::new(
            slot_manager.clone(),
            command_dao.clone(),
            config.fetch_size(),
            config.id_step(),
        ));
        let handler = Arc::new(CommandHandler::new(
            services.clone(),
            WorkflowBootstrapper::new(services.clone(), workflow_definition_dao),
            coordinator.clone(),
        ));
        let engine = Arc::new(CommandEngine::new(
            config.clone(),
            fetcher,
            handler,
            command_dao.clone(),
            load_monitor,
            repository.clone(),
        ));

        let failover = Arc::new(FailoverCoordinator::new(
            config.master_address(),
            config.failover_lock_path(),
            membership.clone(),
            lock,
            workflow_instance_dao,
            command_dao,
            repository,
        ));

        Ok(MasterServer {
            config,
            services,
            slot_manager,
            coordinator,
            engine,
            failover,
            membership,
            runtime_handles: Mutex::new(RuntimeHandles::default()),
        })
    }
}
