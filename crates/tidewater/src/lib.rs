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

//! # Tidewater
//!
//! Tidewater is the master-side execution engine of a distributed DAG workflow
//! orchestrator. A cluster of interchangeable masters shares a backlog of
//! commands; each master fetches its shard, turns every command into an
//! in-memory workflow runnable, and drives that runnable to a terminal state
//! through a per-workflow lifecycle event bus. Work orphaned by a crashed
//! master or worker is detected through cluster membership and re-injected as
//! recovery commands.
//!
//! ## Layout
//!
//! - [`dag`]: the validated task graph every workflow instance is built over
//! - [`models`]: commands, workflow/task instances and workflow definitions
//! - [`runnable`]: workflow and task runnables plus the execution graph
//! - [`event`]: lifecycle events, the per-workflow bus and delayed publishes
//! - [`state`]: task and workflow state actions driven by the bus
//! - [`engine`]: slot-based command fetching, bootstrapping and the driver loop
//! - [`failover`]: master and worker failover
//! - [`master`]: the [`MasterServer`] that wires everything together
//! - [`storage`], [`cluster`], [`dispatch`], [`alert`], [`load`]: the narrow
//!   traits the engine consumes, with in-memory implementations
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidewater::prelude::*;
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.register_master("10.0.0.1:5678");
//!
//! let master = MasterServer::builder()
//!     .config(MasterConfig::builder().master_address("10.0.0.1:5678").build()?)
//!     .command_dao(Arc::new(MemoryCommandDao::new()))
//!     .workflow_instance_dao(Arc::new(MemoryWorkflowInstanceDao::new()))
//!     .task_instance_dao(Arc::new(MemoryTaskInstanceDao::new()))
//!     .workflow_definition_dao(Arc::new(MemoryWorkflowDefinitionDao::new()))
//!     .cluster(cluster.clone(), cluster)
//!     .dispatcher(my_dispatcher)
//!     .build()?;
//!
//! master.start().await?;
//! ```

pub mod alert;
pub mod cluster;
pub mod config;
pub mod dag;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod failover;
pub mod load;
pub mod logging;
pub mod master;
pub mod models;
pub mod repository;
pub mod runnable;
pub mod state;
pub mod storage;

pub use alert::{AlertSender, LoggingAlertSender, TaskTimeoutAlert};
pub use cluster::{
    ClusterLock, ClusterMembership, InMemoryCluster, MembershipChange, MembershipEvent, NodeRole,
};
pub use config::{MasterConfig, MasterConfigBuilder};
pub use dag::{DagEdge, DagNode, WorkflowDag, WorkflowDagBuilder};
pub use dispatch::TaskDispatcher;
pub use engine::{
    CommandEngine, CommandFetcher, CommandHandler, CommandOutcome, CycleOutcome,
    IdSlotBasedCommandFetcher, MasterSlotManager, SlotAssignment, WorkflowBootstrapper,
};
pub use error::{
    ClusterError, CommandError, ConfigError, DagError, DispatchError, EngineError, FailoverError,
    MasterError, RepositoryError, StorageError,
};
pub use event::{
    LifecycleEvent, LifecycleEventType, TaskEventKind, TaskLifecycleEvent, TimerHandle,
    WorkflowEventBus, WorkflowEventBusCoordinator, WorkflowEventKind, WorkflowLifecycleEvent,
};
pub use failover::{FailoverCoordinator, FailoverEvent};
pub use load::{LoadProtection, SysinfoLoadMonitor, SystemLoad, SystemLoadMonitor};
pub use logging::{init_logging, init_test_logging};
pub use master::{MasterServer, MasterServerBuilder};
pub use models::{
    Command, CommandType, ErrorCommand, ExecutionType, FailureStrategy, NewCommand,
    NewTaskInstance, NewWorkflowInstance, TaskDefinition, TaskExecutionStatus, TaskInstance,
    TaskKind, TimeoutStrategy, WorkflowDefinition, WorkflowExecutionStatus, WorkflowInstance,
};
pub use repository::WorkflowRepository;
pub use runnable::{
    NodeOutcome, TaskExecutionRunnable, TaskRuntime, WorkflowExecutionGraph,
    WorkflowExecutionRunnable,
};
pub use state::{EngineServices, LifecycleEventDispatcher};
pub use storage::{
    CommandDao, MemoryCommandDao, MemoryTaskInstanceDao, MemoryWorkflowDefinitionDao,
    MemoryWorkflowInstanceDao, TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao,
};

/// Commonly used types for embedding a master.
pub mod prelude {
    pub use crate::{
        AlertSender, ClusterLock, ClusterMembership, Command, CommandDao, CommandType,
        InMemoryCluster, MasterConfig, MasterServer, MemoryCommandDao, MemoryTaskInstanceDao,
        MemoryWorkflowDefinitionDao, MemoryWorkflowInstanceDao, NewCommand, TaskDispatcher,
        TaskEventKind, TaskLifecycleEvent, WorkflowDefinition, WorkflowExecutionStatus,
    };
}
