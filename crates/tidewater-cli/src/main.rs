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

//! Tidewater CLI - validate workflow definitions and run a single-process
//! master against in-memory storage.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidewater::{MasterConfig, WorkflowDefinition};

mod commands;

/// Tidewater - master-side engine of a distributed DAG workflow orchestrator
#[derive(Parser)]
#[command(name = "tidewater")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Master configuration file (can also be set via TIDEWATER_CONFIG)
    #[arg(long, env = "TIDEWATER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Address this master registers under, overriding the configuration
    #[arg(long, global = true)]
    master_address: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a workflow definition and print its execution order
    Validate {
        /// Workflow definition file (TOML)
        definition: PathBuf,
    },
    /// Run a workflow definition to completion on an in-memory master
    Run {
        /// Workflow definition file (TOML)
        definition: PathBuf,

        /// Upper bound of the simulated task duration in milliseconds
        #[arg(long, default_value_t = 500)]
        max_task_millis: u64,

        /// Task the simulated workers report as failed
        #[arg(long)]
        fail_task: Option<String>,
    },
}

fn load_config(path: Option<&Path>, master_address: Option<&str>) -> Result<MasterConfig> {
    let config = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?;
            MasterConfig::from_toml_str(&source)
                .with_context(|| format!("Invalid configuration {}", path.display()))?
        }
        None => MasterConfig::default(),
    };

    match master_address {
        Some(address) => config
            .into_builder()
            .master_address(address)
            .build()
            .context("Invalid --master-address"),
        None => Ok(config),
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow definition {}", path.display()))?;
    WorkflowDefinition::from_toml_str(&source)
        .with_context(|| format!("Invalid workflow definition {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tidewater::init_logging(cli.verbose.then_some("debug"));

    match &cli.command {
        Commands::Validate { definition } => {
            let definition = load_definition(definition)?;
            commands::validate::run(&definition)?;
        }
        Commands::Run {
            definition,
            max_task_millis,
            fail_task,
        } => {
            let config = load_config(cli.config.as_deref(), cli.master_address.as_deref())?;
            let definition = load_definition(definition)?;
            let options = commands::run::RunOptions {
                max_task_millis: *max_task_millis,
                fail_task: fail_task.clone(),
            };
            commands::run::run(config, definition, options).await?;
        }
    }

    Ok(())
}
