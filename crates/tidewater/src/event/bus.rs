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

//! Per-workflow event queue and its consumer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::timer::TimerHandle;
use super::LifecycleEvent;
use crate::error::RepositoryError;
use crate::repository::WorkflowRepository;
use crate::runnable::WorkflowExecutionRunnable;
use crate::state::LifecycleEventDispatcher;

pub type EventReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Sending half of a workflow's event queue.
///
/// The queue is unbounded: handlers publish follow-on events into the very
/// bus they are consuming, which would deadlock on a full bounded channel.
#[derive(Debug, Clone)]
pub struct WorkflowEventBus {
    workflow_instance_id: i64,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl WorkflowEventBus {
    pub fn channel(workflow_instance_id: i64) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                workflow_instance_id,
                sender,
            },
            receiver,
        )
    }

    pub fn workflow_instance_id(&self) -> i64 {
        self.workflow_instance_id
    }

    /// Enqueues an event. Returns false once the consumer is gone.
    pub fn publish(&self, event: impl Into<LifecycleEvent>) -> bool {
        let event = event.into();
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!(
                    workflow_instance_id = self.workflow_instance_id,
                    "Dropping {} event: workflow is no longer consuming", event_type
                );
                false
            }
        }
    }

    /// Publishes `event` after `delay` unless the returned handle is
    /// cancelled or dropped first.
    pub fn publish_delayed(
        &self,
        event: impl Into<LifecycleEvent>,
        delay: Duration,
    ) -> TimerHandle {
        let bus = self.clone();
        let event = event.into();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.publish(event);
        });
        TimerHandle::new(task.abort_handle())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawns and tracks one consumer per live workflow.
///
/// A consumer applies its workflow's events in order through the
/// [`LifecycleEventDispatcher`]. Once the workflow is finished the consumer
/// evicts it from the repository and exits.
pub struct WorkflowEventBusCoordinator {
    dispatcher: Arc<LifecycleEventDispatcher>,
    repository: Arc<WorkflowRepository>,
    consumers: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl WorkflowEventBusCoordinator {
    pub fn new(
        dispatcher: Arc<LifecycleEventDispatcher>,
        repository: Arc<WorkflowRepository>,
    ) -> Self {
        Self {
            dispatcher,
            repository,
            consumers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts consuming the runnable's bus. A runnable can be attached once.
    pub fn attach(&self, runnable: Arc<WorkflowExecutionRunnable>) -> Result<(), RepositoryError> {
        let id = runnable.id();
        let mut receiver = runnable
            .take_event_receiver()
            .ok_or(RepositoryError::BusAlreadyAttached(id))?;

        let dispatcher = self.dispatcher.clone();
        let repository = self.repository.clone();
        let consumers_ref = self.consumers.clone();

        // Held across the spawn so the consumer cannot deregister before it
        // is registered.
        let mut consumers = self.consumers.lock();
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                dispatcher.dispatch(&runnable, event).await;
                if runnable.is_finished() {
                    break;
                }
            }
            repository.remove(id);
            consumers_ref.lock().remove(&id);
            info!(
                workflow_instance_id = id,
                "Workflow instance {} finished with state {}, evicted",
                id,
                runnable.state()
            );
        });
        consumers.insert(id, handle);
        Ok(())
    }

    pub fn is_attached(&self, workflow_instance_id: i64) -> bool {
        self.consumers.lock().contains_key(&workflow_instance_id)
    }

    pub fn attached_count(&self) -> usize {
        self.consumers.lock().len()
    }

    /// Stops the consumer of one workflow without evicting it.
    pub fn detach(&self, workflow_instance_id: i64) {
        if let Some(handle) = self.consumers.lock().remove(&workflow_instance_id) {
            handle.abort();
        }
    }

    /// Stops every consumer.
    pub fn shutdown(&self) {
        let handles: Vec<(i64, JoinHandle<()>)> = self.consumers.lock().drain().collect();
        for (id, handle) in handles {
            debug!(workflow_instance_id = id, "Stopping workflow event consumer");
            handle.abort();
        }
    }
}
