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

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use super::{ClusterLock, ClusterMembership, MembershipChange, MembershipEvent, NodeRole};
use crate::error::ClusterError;

const EVENT_CAPACITY: usize = 256;

/// Process-local membership registry and lock service.
pub struct InMemoryCluster {
    masters: RwLock<BTreeSet<String>>,
    workers: RwLock<BTreeSet<String>>,
    version: AtomicU64,
    events: broadcast::Sender<MembershipEvent>,
    held_locks: Mutex<HashSet<String>>,
    lock_released: Notify,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            masters: RwLock::new(BTreeSet::new()),
            workers: RwLock::new(BTreeSet::new()),
            version: AtomicU64::new(0),
            events,
            held_locks: Mutex::new(HashSet::new()),
            lock_released: Notify::new(),
        }
    }

    pub fn register_master(&self, address: &str) {
        self.change(NodeRole::Master, MembershipChange::Added, address);
    }

    pub fn remove_master(&self, address: &str) {
        self.change(NodeRole::Master, MembershipChange::Removed, address);
    }

    pub fn register_worker(&self, address: &str) {
        self.change(NodeRole::Worker, MembershipChange::Added, address);
    }

    pub fn remove_worker(&self, address: &str) {
        self.change(NodeRole::Worker, MembershipChange::Removed, address);
    }

    /// True while some caller holds the lock at `path`.
    pub fn is_locked(&self, path: &str) -> bool {
        self.held_locks.lock().contains(path)
    }

    fn change(&self, role: NodeRole, change: MembershipChange, address: &str) {
        let members = match role {
            NodeRole::Master => &self.masters,
            NodeRole::Worker => &self.workers,
        };
        let changed = match change {
            MembershipChange::Added => members.write().insert(address.to_string()),
            MembershipChange::Removed => members.write().remove(address),
        };
        if !changed {
            return;
        }

        self.version.fetch_add(1, Ordering::SeqCst);
        debug!("Cluster membership changed: {:?} {:?} {}", role, change, address);
        // No subscribers is fine.
        let _ = self.events.send(MembershipEvent {
            role,
            change,
            address: address.to_string(),
            event_time: Utc::now(),
        });
    }
}

impl ClusterMembership for InMemoryCluster {
    fn live_masters(&self) -> Vec<String> {
        self.masters.read().iter().cloned().collect()
    }

    fn live_workers(&self) -> Vec<String> {
        self.workers.read().iter().cloned().collect()
    }

    fn membership_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ClusterLock for InMemoryCluster {
    async fn acquire(&self, path: &str) -> Result<(), ClusterError> {
        loop {
            let released = self.lock_released.notified();
            {
                let mut held = self.held_locks.lock();
                if held.insert(path.to_string()) {
                    return Ok(());
                }
            }
            released.await;
        }
    }

    async fn release(&self, path: &str) -> Result<(), ClusterError> {
        let removed = self.held_locks.lock().remove(path);
        if !removed {
            return Err(ClusterError::LockNotHeld(path.to_string()));
        }
        self.lock_released.notify_waiters();
        Ok(())
    }
}
