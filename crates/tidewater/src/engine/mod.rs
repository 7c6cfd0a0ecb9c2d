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

//! # Command Engine
//!
//! Every master runs one [`CommandEngine`]. Each cycle it:
//!
//! 1. checks host load and pool saturation, skipping the cycle when overloaded
//! 2. fetches the commands of its slot through a [`CommandFetcher`]
//! 3. hands each command to the [`CommandHandler`], bounded by a semaphore
//!
//! Slots come from the [`MasterSlotManager`]: a master with slot `s` of `n`
//! only sees commands whose `id % n == s`, so no two masters with a
//! consistent membership view fetch the same command. Claiming a command
//! deletes it, which settles races across membership changes.

mod bootstrap;
mod command_engine;
mod fetcher;
mod handler;
mod slot;

pub use bootstrap::WorkflowBootstrapper;
pub use command_engine::{CommandEngine, CycleOutcome};
pub use fetcher::{CommandFetcher, IdSlotBasedCommandFetcher};
pub use handler::{CommandHandler, CommandOutcome};
pub use slot::{MasterSlotManager, SlotAssignment};
