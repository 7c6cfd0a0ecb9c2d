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

//! Cluster coordination seen from a master: who is alive, and a
//! cluster-wide mutual exclusion lock.
//!
//! Production deployments back these traits with a coordination service
//! (ZooKeeper, etcd, a database heartbeat table). [`InMemoryCluster`]
//! implements both for single-process runs and tests.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::ClusterError;

pub use memory::InMemoryCluster;

/// Role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Master,
    Worker,
}

/// Whether a member joined or left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipChange {
    Added,
    Removed,
}

/// A change in cluster membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub role: NodeRole,
    pub change: MembershipChange,
    pub address: String,
    /// When the coordination service observed the change
    pub event_time: DateTime<Utc>,
}

/// Live view of cluster membership.
pub trait ClusterMembership: Send + Sync {
    fn live_masters(&self) -> Vec<String>;

    fn live_workers(&self) -> Vec<String>;

    /// Monotonic counter bumped on every membership change.
    fn membership_version(&self) -> u64;

    /// Subscribes to membership changes from now on.
    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;
}

/// Cluster-wide mutual exclusion keyed by path.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Waits until the lock is held by the caller.
    async fn acquire(&self, path: &str) -> Result<(), ClusterError>;

    async fn release(&self, path: &str) -> Result<(), ClusterError>;
}
