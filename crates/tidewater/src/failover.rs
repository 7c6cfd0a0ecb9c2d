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

//! # Failover
//!
//! Recovers work left behind when a cluster member dies.
//!
//! - **Master failover** marks every instance the dead master still owned as
//!   `Failover` and enqueues a `RecoverToleranceFaultProcess` command for it.
//!   Whichever master's slot holds that command picks the instance up. The
//!   scan runs under a cluster-wide lock so two masters reacting to the same
//!   crash do not enqueue the instance twice.
//! - **Worker failover** is local: each master scans its own runnables for
//!   attempts on the dead worker and publishes a task Failover event, which
//!   the task state machine turns into a fresh attempt.
//! - **Global master failover** runs at startup and after missed membership
//!   events. It fails over every owner that is no longer live, plus this
//!   master's own previous incarnation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterLock, ClusterMembership, MembershipChange, MembershipEvent, NodeRole};
use crate::error::FailoverError;
use crate::event::{TaskEventKind, TaskLifecycleEvent};
use crate::models::{NewCommand, TaskExecutionStatus, WorkflowExecutionStatus};
use crate::repository::WorkflowRepository;
use crate::storage::{CommandDao, WorkflowInstanceDao};

/// A failover trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    GlobalMasterFailover,
    MasterFailover {
        master_address: String,
        event_time: DateTime<Utc>,
    },
    WorkerFailover {
        worker_address: String,
        event_time: DateTime<Utc>,
    },
}

pub struct FailoverCoordinator {
    master_address: String,
    started_at: DateTime<Utc>,
    lock_path: String,
    membership: Arc<dyn ClusterMembership>,
    lock: Arc<dyn ClusterLock>,
    workflow_instance_dao: Arc<dyn WorkflowInstanceDao>,
    command_dao: Arc<dyn CommandDao>,
    repository: Arc<WorkflowRepository>,
}

impl FailoverCoordinator {
    pub fn new(
        master_address: impl Into<String>,
        lock_path: impl Into<String>,
        membership: Arc<dyn ClusterMembership>,
        lock: Arc<dyn ClusterLock>,
        workflow_instance_dao: Arc<dyn WorkflowInstanceDao>,
        command_dao: Arc<dyn CommandDao>,
        repository: Arc<WorkflowRepository>,
    ) -> Self {
        Self {
            master_address: master_address.into(),
            started_at: Utc::now(),
            lock_path: lock_path.into(),
            membership,
            lock,
            workflow_instance_dao,
            command_dao,
            repository,
        }
    }

    /// When this master process started. Instances it owned before that
    /// belong to a previous incarnation.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Handles one trigger and returns how many workflows or tasks were
    /// failed over.
    pub async fn handle(&self, event: FailoverEvent) -> Result<usize, FailoverError> {
        match event {
            FailoverEvent::GlobalMasterFailover => self.global_master_failover().await,
            FailoverEvent::MasterFailover {
                master_address,
                event_time,
            } => self.master_failover(&master_address, event_time).await,
            FailoverEvent::WorkerFailover {
                worker_address,
                event_time,
            } => Ok(self.worker_failover(&worker_address, event_time)),
        }
    }

    pub async fn global_master_failover(&self) -> Result<usize, FailoverError> {
        let live: HashSet<String> = self.membership.live_masters().into_iter().collect();
        let owners = self.workflow_instance_dao.query_need_failover_masters().await?;

        let mut total = 0;
        for owner in owners {
            if owner == self.master_address {
                continue;
            }
            if live.contains(&owner) {
                continue;
            }
            total += self.master_failover(&owner, Utc::now()).await?;
        }
        total += self
            .master_failover(&self.master_address, self.started_at)
            .await?;

        info!("Global master failover recovered {} workflow instances", total);
        Ok(total)
    }

    /// Fails over the instances `master_address` owned and started before
    /// `event_time`. Instances this master is already running are skipped.
    pub async fn master_failover(
        &self,
        master_address: &str,
        event_time: DateTime<Utc>,
    ) -> Result<usize, FailoverError> {
        self.lock.acquire(&self.lock_path).await?;
        let result = self.fail_over_master(master_address, event_time).await;
        if let Err(err) = self.lock.release(&self.lock_path).await {
            error!("Failed to release failover lock {}: {}", self.lock_path, err);
        }
        result
    }

    async fn fail_over_master(
        &self,
        master_address: &str,
        event_time: DateTime<Utc>,
    ) -> Result<usize, FailoverError> {
        let candidates = self
            .workflow_instance_dao
            .query_need_failover_workflow_instances(master_address)
            .await?;

        let mut recovered = 0;
        for mut instance in candidates {
            if instance.last_start_time() >= event_time {
                debug!(
                    workflow_instance_id = instance.id,
                    "Skipping instance {} started after the failover event", instance.id
                );
                continue;
            }
            if self.repository.contains(instance.id) {
                continue;
            }

            let prior_state = instance.state;
            instance.state = WorkflowExecutionStatus::Failover;
            instance.host = None;
            self.workflow_instance_dao.update(&instance).await?;
            self.command_dao
                .insert(NewCommand::recover_tolerance_fault(&instance, prior_state))
                .await?;

            counter!("tidewater_failover_workflows_total").increment(1);
            info!(
                workflow_instance_id = instance.id,
                "Failed over workflow instance {} from master {} (was {})",
                instance.id,
                master_address,
                prior_state
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Publishes a Failover event for every local attempt the worker was
    /// running when it left. The task state machine does the rest.
    pub fn worker_failover(&self, worker_address: &str, event_time: DateTime<Utc>) -> usize {
        let mut published = 0;
        for runnable in self.repository.list() {
            for task in runnable.task_instances() {
                let on_worker = matches!(
                    task.state,
                    TaskExecutionStatus::Dispatch | TaskExecutionStatus::RunningExecution
                );
                if !on_worker
                    || task.host.as_deref() != Some(worker_address)
                    || task.submit_time >= event_time
                {
                    continue;
                }

                let event = TaskLifecycleEvent::new(
                    task.name.clone(),
                    TaskEventKind::Failover {
                        worker_address: worker_address.to_string(),
                        crash_time: event_time,
                    },
                )
                .for_attempt(task.id);
                if runnable.publish(event) {
                    counter!("tidewater_failover_tasks_total").increment(1);
                    published += 1;
                }
            }
        }

        if published > 0 {
            info!(
                "Worker {} left the cluster, failing over {} task instances",
                worker_address, published
            );
        }
        published
    }

    /// Reacts to membership removals until `shutdown` fires.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        self.listen(self.membership.subscribe(), shutdown).await
    }

    /// Like [`run`](Self::run), over a feed subscribed by the caller so no
    /// change between subscribing and spawning is missed.
    pub async fn listen(
        &self,
        mut events: broadcast::Receiver<MembershipEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Failover coordinator listening for membership changes");

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Failover coordinator shutting down");
                    break;
                }
                event = events.recv() => event,
            };

            let trigger = match event {
                Ok(event) if event.change == MembershipChange::Removed => match event.role {
                    NodeRole::Master if event.address == self.master_address => continue,
                    NodeRole::Master => FailoverEvent::MasterFailover {
                        master_address: event.address,
                        event_time: event.event_time,
                    },
                    NodeRole::Worker => FailoverEvent::WorkerFailover {
                        worker_address: event.address,
                        event_time: event.event_time,
                    },
                },
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        "Missed {} membership events, running global master failover",
                        missed
                    );
                    FailoverEvent::GlobalMasterFailover
                }
                Err(RecvError::Closed) => {
                    info!("Membership feed closed, failover coordinator stopping");
                    break;
                }
            };

            if let Err(err) = self.handle(trigger.clone()).await {
                error!("Failover {:?} failed: {}", trigger, err);
            }
        }
    }
}
