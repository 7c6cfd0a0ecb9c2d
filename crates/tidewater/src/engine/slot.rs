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

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::cluster::ClusterMembership;

/// The shard of the command backlog assigned to this master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub current_slot: usize,
    pub total_slots: usize,
    /// Membership version the assignment was derived from
    pub membership_version: u64,
}

/// Derives this master's slot from the sorted list of live masters.
pub struct MasterSlotManager {
    master_address: String,
    membership: Arc<dyn ClusterMembership>,
    assignment: RwLock<Option<SlotAssignment>>,
}

impl MasterSlotManager {
    pub fn new(master_address: impl Into<String>, membership: Arc<dyn ClusterMembership>) -> Self {
        Self {
            master_address: master_address.into(),
            membership,
            assignment: RwLock::new(None),
        }
    }

    /// Recomputes the assignment. Returns `None` while this master is not a
    /// live member.
    pub fn refresh(&self) -> Option<SlotAssignment> {
        // Read the version first: a change racing with the listing below
        // then invalidates the assignment on the next check.
        let membership_version = self.membership.membership_version();
        let mut masters = self.membership.live_masters();
        masters.sort();
        masters.dedup();

        let assignment = masters
            .iter()
            .position(|address| address == &self.master_address)
            .map(|current_slot| SlotAssignment {
                current_slot,
                total_slots: masters.len(),
                membership_version,
            });

        match &assignment {
            Some(slot) => info!(
                "Master {} assigned slot {}/{} (membership version {})",
                self.master_address, slot.current_slot, slot.total_slots, membership_version
            ),
            None => warn!(
                "Master {} is not a live cluster member, fetching nothing",
                self.master_address
            ),
        }
        *self.assignment.write() = assignment;
        assignment
    }

    pub fn current(&self) -> Option<SlotAssignment> {
        *self.assignment.read()
    }

    /// False when there is no assignment or membership changed since it was
    /// derived.
    pub fn check_slot_valid(&self) -> bool {
        match self.current() {
            Some(slot) => slot.membership_version == self.membership.membership_version(),
            None => false,
        }
    }
}
