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

//! The driver loop of a master: check load, fetch this master's shard of
//! commands, handle the batch concurrently, repeat.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::fetcher::CommandFetcher;
use super::handler::CommandHandler;
use crate::config::MasterConfig;
use crate::error::StorageError;
use crate::load::SystemLoadMonitor;
use crate::models::Command;
use crate::repository::WorkflowRepository;
use crate::storage::CommandDao;

/// Result of one engine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Load protection tripped; nothing was fetched
    Overloaded,
    /// The shard was empty
    Idle,
    Processed {
        handled: usize,
        duplicates: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandResult {
    Handled,
    Duplicate,
    Failed,
}

pub struct CommandEngine {
    config: MasterConfig,
    fetcher: Arc<dyn CommandFetcher>,
    handler: Arc<CommandHandler>,
    command_dao: Arc<dyn CommandDao>,
    load_monitor: Arc<dyn SystemLoadMonitor>,
    repository: Arc<WorkflowRepository>,
    semaphore: Arc<Semaphore>,
}

impl CommandEngine {
    pub fn new(
        config: MasterConfig,
        fetcher: Arc<dyn CommandFetcher>,
        handler: Arc<CommandHandler>,
        command_dao: Arc<dyn CommandDao>,
        load_monitor: Arc<dyn SystemLoadMonitor>,
        repository: Arc<WorkflowRepository>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_bootstraps()));
        Self {
            config,
            fetcher,
            handler,
            command_dao,
            load_monitor,
            repository,
            semaphore,
        }
    }

    /// Runs one fetch-and-handle cycle. Only fetch errors are returned;
    /// failures of individual commands land in the error table.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, StorageError> {
        let mut load = self.load_monitor.current_load();
        load.pool_saturation =
            self.repository.len() as f64 / self.config.max_live_workflows().max(1) as f64;
        if self.config.load_protection().is_overloaded(&load) {
            counter!("tidewater_master_overload_total").increment(1);
            warn!(
                cpu_usage = load.cpu_usage,
                memory_usage = load.memory_usage,
                pool_saturation = load.pool_saturation,
                "Master is overloaded, skipping command fetch"
            );
            return Ok(CycleOutcome::Overloaded);
        }

        let commands = self.fetcher.fetch_commands().await?;
        if commands.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        let handles: Vec<_> = commands
            .into_iter()
            .map(|command| {
                let semaphore = self.semaphore.clone();
                let handler = self.handler.clone();
                let command_dao = self.command_dao.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return CommandResult::Failed;
                    };
                    process(&handler, command_dao.as_ref(), command).await
                })
            })
            .collect();

        let mut handled = 0;
        let mut duplicates = 0;
        let mut failed = 0;
        for result in join_all(handles).await {
            match result {
                Ok(CommandResult::Handled) => handled += 1,
                Ok(CommandResult::Duplicate) => duplicates += 1,
                Ok(CommandResult::Failed) => failed += 1,
                Err(err) => {
                    error!("Command handling task panicked: {}", err);
                    failed += 1;
                }
            }
        }

        Ok(CycleOutcome::Processed {
            handled,
            duplicates,
            failed,
        })
    }

    /// Loops until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Command engine started (fetch size {}, interval {:?})",
            self.config.fetch_size(),
            self.config.fetch_interval()
        );

        loop {
            let pause = match self.run_cycle().await {
                Ok(CycleOutcome::Processed {
                    handled,
                    duplicates,
                    failed,
                }) => {
                    debug!(
                        "Cycle handled {} commands ({} duplicates, {} failed)",
                        handled, duplicates, failed
                    );
                    None
                }
                Ok(_) => Some(self.config.fetch_interval()),
                Err(err) => {
                    error!("Failed to fetch commands: {}", err);
                    Some(self.config.fetch_error_backoff())
                }
            };

            match pause {
                Some(pause) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    _ => break,
                },
            }
        }

        info!("Command engine stopped");
    }
}

async fn process(
    handler: &CommandHandler,
    command_dao: &dyn CommandDao,
    command: Command,
) -> CommandResult {
    match handler.handle(&command).await {
        Ok(outcome) => {
            counter!("tidewater_commands_consumed_total").increment(1);
            debug!(
                "Command {} ({}) handled: {:?}",
                command.id, command.command_type, outcome
            );
            CommandResult::Handled
        }
        Err(err) if err.is_duplicate() => {
            warn!(
                "Command {} ({}) was claimed by another master, skipping",
                command.id, command.command_type
            );
            CommandResult::Duplicate
        }
        Err(err) => {
            let message = error_chain(&err);
            counter!("tidewater_commands_failed_total").increment(1);
            error!(
                "Failed to handle command {} ({}): {}",
                command.id, command.command_type, message
            );
            if let Err(store_err) = command_dao.move_to_error(&command, &message).await {
                error!(
                    "Failed to move command {} to the error table: {}",
                    command.id, store_err
                );
            }
            CommandResult::Failed
        }
    }
}

/// Joins an error with its sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
