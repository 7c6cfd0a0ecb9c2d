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

//! # Runnables
//!
//! In-memory execution wrappers. A [`WorkflowExecutionRunnable`] owns the
//! workflow instance, its [`WorkflowExecutionGraph`], one
//! [`TaskExecutionRunnable`] per DAG node and the sending half of its event
//! bus. Task runnables stay [`TaskRuntime::Pending`] until their first Start
//! event persists an attempt.

mod graph;
mod task;
mod workflow;

pub use graph::{NodeOutcome, WorkflowExecutionGraph};
pub use task::{TaskExecutionRunnable, TaskRuntime};
pub use workflow::{WorkflowExecutionRunnable, WorkflowExecutionState};
