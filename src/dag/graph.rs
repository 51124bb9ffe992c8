// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::{Dependency, TasksConfig};
use crate::errors::{Result, WoomError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct TaskNode {
    /// Direct dependencies, with their cycle offsets.
    deps: Vec<Dependency>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// Task dependency graph with a fixed topological order.
///
/// Acyclicity is already checked in `config::validate`; the order computed
/// here is deterministic (ties broken by task name).
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
    order: Vec<String>,
}

impl TaskGraph {
    pub fn from_config(tasks: &TasksConfig) -> Result<Self> {
        let mut nodes: HashMap<String, TaskNode> = HashMap::new();

        for (name, task) in tasks.iter() {
            nodes.insert(
                name.clone(),
                TaskNode {
                    deps: task.after.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for (name, task) in tasks.iter() {
            for dep in task.after.iter() {
                if let Some(dep_node) = nodes.get_mut(&dep.task) {
                    if !dep_node.dependents.contains(name) {
                        dep_node.dependents.push(name.clone());
                    }
                }
            }
        }

        Ok(Self {
            order: topological_order(tasks)?,
            nodes,
        })
    }

    /// Task names, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, name: &str) -> &[Dependency] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

/// Kahn-style ordering driven by petgraph, picking the smallest ready name
/// first so that the result does not depend on hash order.
fn topological_order(tasks: &TasksConfig) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in tasks.names() {
        graph.add_node(name);
    }
    for (name, task) in tasks.iter() {
        for dep in task.after.iter().filter(|d| d.cycle_offset == 0) {
            graph.add_edge(dep.task.as_str(), name.as_str(), ());
        }
    }

    // Fail with a clear message if validation was bypassed.
    toposort(&graph, None).map_err(|cycle| {
        WoomError::config(format!(
            "cycle detected in task dependencies involving task '{}'",
            cycle.node_id()
        ))
    })?;

    let mut indegree: HashMap<&str, usize> = graph
        .nodes()
        .map(|n| {
            let count = graph
                .neighbors_directed(n, petgraph::Direction::Incoming)
                .count();
            (n, count)
        })
        .collect();

    let mut ready: std::collections::BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        for succ in graph.neighbors_directed(next, petgraph::Direction::Outgoing) {
            if let Some(d) = indegree.get_mut(succ) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(succ);
                }
            }
        }
    }
    Ok(order)
}
