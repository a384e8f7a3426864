//! Step dependency scheduling.
//!
//! Steps are layered into waves via topological grouping: a wave
//! contains every unscheduled step whose dependencies all belong to
//! strictly earlier waves, so the members of one wave can run
//! concurrently. Graph errors (dangling dependency names, cycles) are
//! detected here, before any step executes.

use crate::definition::Step;
use crate::error::PlanError;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// An execution plan: waves of step names, in execution order.
///
/// Declaration order is preserved within each wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Returns the waves.
    #[must_use]
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Returns the number of waves.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Total number of planned steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

/// Computes an execution plan for the given step list.
///
/// # Errors
///
/// - [`PlanError::DuplicateStep`] when two steps share a name
/// - [`PlanError::InvalidDependency`] when a dependency names no step
/// - [`PlanError::DependencyCycle`] when layering cannot make progress
pub fn plan(steps: &[Step]) -> Result<ExecutionPlan, PlanError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for step in steps {
        if indices.contains_key(step.name.as_str()) {
            return Err(PlanError::DuplicateStep {
                name: step.name.clone(),
            });
        }
        let idx = graph.add_node(step.name.clone());
        indices.insert(&step.name, idx);
    }

    for step in steps {
        let step_idx = indices[step.name.as_str()];
        for dependency in &step.depends_on {
            let Some(&dep_idx) = indices.get(dependency.as_str()) else {
                return Err(PlanError::InvalidDependency {
                    step: step.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            graph.add_edge(dep_idx, step_idx, ());
        }
    }

    let mut waves = Vec::new();
    let mut scheduled: HashSet<NodeIndex> = HashSet::new();

    while scheduled.len() < graph.node_count() {
        // Declaration order: node indices follow insertion order.
        let wave: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|idx| !scheduled.contains(idx))
            .filter(|idx| {
                graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .all(|dep| scheduled.contains(&dep))
            })
            .collect();

        if wave.is_empty() {
            let remaining: Vec<String> = graph
                .node_indices()
                .filter(|idx| !scheduled.contains(idx))
                .map(|idx| graph[idx].clone())
                .collect();
            return Err(PlanError::DependencyCycle { steps: remaining });
        }

        scheduled.extend(&wave);
        waves.push(wave.into_iter().map(|idx| graph[idx].clone()).collect());
    }

    Ok(ExecutionPlan { waves })
}
