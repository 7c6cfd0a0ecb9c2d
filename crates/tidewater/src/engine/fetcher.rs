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
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use tracing::debug;

use super::slot::MasterSlotManager;
use crate::error::StorageError;
use crate::models::Command;
use crate::storage::CommandDao;

/// Source of the commands this master should handle next.
#[async_trait]
pub trait CommandFetcher: Send + Sync {
    async fn fetch_commands(&self) -> Result<Vec<Command>, StorageError>;
}

/// Fetches the oldest commands of this master's slot.
pub struct IdSlotBasedCommandFetcher {
    slot_manager: Arc<MasterSlotManager>,
    command_dao: Arc<dyn CommandDao>,
    fetch_size: usize,
    id_step: i64,
}

impl IdSlotBasedCommandFetcher {
    pub fn new(
        slot_manager: Arc<MasterSlotManager>,
        command_dao: Arc<dyn CommandDao>,
        fetch_size: usize,
        id_step: i64,
    ) -> Self {
        Self {
            slot_manager,
            command_dao,
            fetch_size,
            id_step,
        }
    }

    pub fn slot_manager(&self) -> &Arc<MasterSlotManager> {
        &self.slot_manager
    }
}

#[async_trait]
impl CommandFetcher for IdSlotBasedCommandFetcher {
    /// Returns nothing for a cycle whose slot assignment went stale; the
    /// assignment is refreshed for the next one.
    async fn fetch_commands(&self) -> Result<Vec<Command>, StorageError> {
        if !self.slot_manager.check_slot_valid() {
            self.slot_manager.refresh();
            return Ok(Vec::new());
        }
        let Some(slot) = self.slot_manager.current() else {
            return Ok(Vec::new());
        };

        let started = Instant::now();
        let commands = self
            .command_dao
            .query_command_by_id_slot(
                slot.current_slot,
                slot.total_slots,
                self.id_step,
                self.fetch_size,
            )
            .await?;
        histogram!("tidewater_command_fetch_seconds").record(started.elapsed().as_secs_f64());

        if !commands.is_empty() {
            debug!(
                "Fetched {} commands from slot {}/{}",
                commands.len(),
                slot.current_slot,
                slot.total_slots
            );
        }
        Ok(commands)
    }
}
