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

//! Error types for every layer of the master engine.
//!
//! Each layer owns its own enum; higher layers wrap lower ones with `#[from]`
//! so that `?` composes and the full chain stays available through
//! [`std::error::Error::source`]. The command engine flattens that chain into
//! the message stored alongside a failed command.

use thiserror::Error;

use crate::models::{CommandType, WorkflowExecutionStatus};

/// Errors raised while building or querying a workflow DAG.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("Duplicate DAG node: '{0}'")]
    DuplicateNode(String),

    #[error("Edge {from:?} -> {to:?} references undeclared node '{missing}'")]
    UndeclaredNode {
        from: Option<String>,
        to: Option<String>,
        missing: String,
    },

    #[error("In-degree edge {from:?} -> {to:?} does not point at node '{node}'")]
    InDegreeMismatch {
        node: String,
        from: Option<String>,
        to: Option<String>,
    },

    #[error("Out-degree edge {from:?} -> {to:?} does not start at node '{node}'")]
    OutDegreeMismatch {
        node: String,
        from: Option<String>,
        to: Option<String>,
    },

    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Unknown DAG node: '{0}'")]
    UnknownNode(String),
}

/// Errors raised by storage collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: i64 },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the cluster coordination service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Lock '{0}' is not held")]
    LockNotHeld(String),

    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the worker RPC layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No worker available in group '{0}'")]
    NoWorkerAvailable(String),

    #[error("Worker {worker} unreachable: {message}")]
    WorkerUnreachable { worker: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors raised by the in-process workflow repository and bus coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Workflow instance {0} is already registered")]
    AlreadyRegistered(i64),

    #[error("Event bus of workflow instance {0} is already attached")]
    BusAlreadyAttached(i64),
}

/// Errors raised while a state action handles a lifecycle event.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Unknown task '{task}' in workflow instance {workflow_instance_id}")]
    UnknownTask {
        workflow_instance_id: i64,
        task: String,
    },

    #[error("Task '{0}' has no materialized instance")]
    TaskNotMaterialized(String),
}

impl EngineError {
    /// Persistence failures leave the in-memory view ahead of storage; the
    /// workflow relinquishes itself when one occurs.
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

/// Errors raised while handling a single command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command {command_id} was already handled by another master")]
    DuplicateHandle { command_id: i64 },

    #[error("Workflow definition {code} version {version} not found")]
    DefinitionNotFound { code: i64, version: i32 },

    #[error("Workflow instance {0} not found")]
    WorkflowInstanceNotFound(i64),

    #[error("Command {command_id} of type {command_type} carries no workflow instance id")]
    MissingWorkflowInstance {
        command_id: i64,
        command_type: CommandType,
    },

    #[error("Workflow instance {id} cannot be handled in state {state}")]
    InvalidWorkflowState {
        id: i64,
        state: WorkflowExecutionStatus,
    },

    #[error("Workflow instance {id} is owned by master {host}")]
    NotOwned { id: i64, host: String },

    #[error("Command type {0} cannot bootstrap a workflow")]
    UnsupportedCommand(CommandType),

    #[error("Invalid workflow DAG: {0}")]
    Dag(#[from] DagError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl CommandError {
    /// Another master claimed the command first.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CommandError::DuplicateHandle { .. })
    }
}

/// Errors raised by the failover coordinator.
#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while loading master configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the master server.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("Master server is missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Master server is already running")]
    AlreadyRunning,

    #[error("Workflow instance {0} is not running on this master")]
    WorkflowNotRunning(i64),
}
