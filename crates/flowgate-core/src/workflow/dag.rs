//! Dependency layering and cycle detection.
//!
//! Uses `petgraph` to model step dependencies as a directed graph. Topological
//! sort detects cycles, and depth-based grouping produces layers where every
//! step's dependencies lie in strictly earlier layers.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::definition::{StepDefinition, WorkflowError};

/// Group steps into dependency layers for a parallel run.
///
/// 1. Build a `DiGraph` with step names as nodes and `depends_on` edges.
/// 2. Run `petgraph::algo::toposort` to reject cycles.
/// 3. Compute each node's depth (max dependency depth + 1).
/// 4. Group steps by depth, keeping declaration order inside a layer.
///
/// Index 0 is the first layer to execute.
pub fn build_execution_plan(
    steps: &[StepDefinition],
) -> Result<Vec<Vec<&StepDefinition>>, WorkflowError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let name_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // Edge from dependency -> dependent
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

    for (to_idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let from_idx = name_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(nodes[*from_idx], nodes[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let idx = graph[cycle.node_id()];
        WorkflowError::CycleDetected(steps[idx].name.clone())
    })?;

    // Root nodes have depth 0
    let mut depths = vec![0usize; steps.len()];
    for node in sorted {
        let idx = graph[node];
        depths[idx] = steps[idx]
            .depends_on
            .iter()
            .filter_map(|dep| name_to_idx.get(dep.as_str()))
            .map(|&dep_idx| depths[dep_idx] + 1)
            .max()
            .unwrap_or(0);
    }

    let max_depth = depths.iter().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<&StepDefinition>> = vec![vec![]; max_depth + 1];
    for (idx, step) in steps.iter().enumerate() {
        layers[depths[idx]].push(step);
    }

    Ok(layers)
}

/// Plan for a sequential run: one singleton layer per step, in declaration order.
///
/// No graph analysis happens here; a step whose dependency is declared later
/// simply fails its dependency check at run time.
pub fn sequential_plan(steps: &[StepDefinition]) -> Vec<Vec<&StepDefinition>> {
    steps.iter().map(|s| vec![s]).collect()
}

/// Validate that steps form a DAG (no cycles, all references exist).
pub fn validate_dag(steps: &[StepDefinition]) -> Result<(), WorkflowError> {
    build_execution_plan(steps).map(|_| ())
}
