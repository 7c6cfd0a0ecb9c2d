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

//! Implementation of the `validate` command.

use anyhow::{Context, Result};
use tidewater::{WorkflowDag, WorkflowDefinition};

/// Builds the DAG of `definition` and renders one line per task in
/// execution order.
pub fn describe(definition: &WorkflowDefinition) -> Result<Vec<String>> {
    let dag = WorkflowDag::from_definition(definition)
        .with_context(|| format!("Workflow '{}' is not a valid DAG", definition.name))?;

    Ok(dag
        .topological_order()
        .iter()
        .enumerate()
        .map(|(position, name)| {
            let predecessors = dag.predecessors(name);
            let mut line = format!("{:>3}. {}", position + 1, name);
            if !predecessors.is_empty() {
                line.push_str(&format!(" (after {})", predecessors.join(", ")));
            }
            if dag.node(name).is_some_and(|node| node.is_skip()) {
                line.push_str(" [skipped]");
            }
            line
        })
        .collect())
}

/// Run the validate command.
pub fn run(definition: &WorkflowDefinition) -> Result<()> {
    let lines = describe(definition)?;
    println!(
        "Workflow '{}' (code {}, version {}) is valid: {} tasks, {:?} execution",
        definition.name,
        definition.code,
        definition.version,
        lines.len(),
        definition.execution_type
    );
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
