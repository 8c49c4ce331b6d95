//! Dependency analysis for a batch of tasks.
//!
//! This module builds the per-batch [`DependencyGraph`] (task dependencies
//! merged with the dependencies of the registered resources), detects
//! cycles, and splits the graph into levels of tasks that can run
//! concurrently.

use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::registry::Registry;
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Adjacency map from a namespace to the namespaces it depends on.
///
/// Keys are kept sorted so that levels and cycle reports come out in a
/// stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no dependencies. Existing nodes are left untouched.
    pub fn add_node(&mut self, namespace: &str) {
        self.nodes.entry(namespace.to_string()).or_default();
    }

    /// Record that `node` depends on `dependency`.
    ///
    /// Both ends become nodes, so the leveling pass never meets a
    /// dependency without a key of its own.
    pub fn add_dependency(&mut self, node: &str, dependency: &str) {
        self.add_node(dependency);
        self.nodes
            .entry(node.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    /// Dependencies of a node, if the node exists.
    pub fn dependencies(&self, namespace: &str) -> Option<&BTreeSet<String>> {
        self.nodes.get(namespace)
    }

    /// Nodes that list `namespace` as a dependency.
    pub fn dependents(&self, namespace: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, deps)| deps.contains(namespace))
            .map(|(node, _)| node.as_str())
            .collect()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.nodes.contains_key(namespace)
    }

    /// All node names in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(BTreeSet::len).sum()
    }

    /// Find every cycle reachable by depth-first search.
    ///
    /// Each cycle is reported as the path from the first repeated node back
    /// to itself, e.g. `["A", "B", "C", "A"]`.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let has_self_loop = self.nodes.iter().any(|(node, deps)| deps.contains(node));
        if !has_self_loop && !is_cyclic_directed(&self.to_graph_map()) {
            return Vec::new();
        }

        find_cycles(self.nodes(), |node| {
            self.nodes
                .get(node)
                .map(|deps| deps.iter().map(String::as_str).collect())
                .unwrap_or_default()
        })
    }

    /// Split the graph into execution levels using Kahn's algorithm.
    ///
    /// Level 0 holds the nodes without dependencies; every later level holds
    /// the nodes whose dependencies all sit in earlier levels. Each level is
    /// sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] when no node is free of
    /// dependencies, or when some nodes can never be placed. In the latter
    /// case the unplaced nodes are listed.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (node, deps) in &self.nodes {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(node.as_str());
            }
        }

        let mut current: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(node, _)| node.as_str())
            .collect();

        if current.is_empty() {
            return Err(Error::unresolved(Vec::new()));
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next: BTreeSet<&str> = BTreeSet::new();

            for node in &current {
                for dependent in dependents.get(node).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            next.insert(*dependent);
                        }
                    }
                }
            }

            levels.push(current.iter().map(|n| n.to_string()).collect());
            current = next.into_iter().collect();
        }

        if placed < self.len() {
            let placed_nodes: HashSet<&str> = levels.iter().flatten().map(String::as_str).collect();
            let unresolved = self
                .nodes()
                .filter(|node| !placed_nodes.contains(node))
                .map(str::to_string)
                .collect();
            return Err(Error::unresolved(unresolved));
        }

        Ok(levels)
    }

    /// Length of the longest dependency chain below `node`.
    ///
    /// Leaves and unknown nodes have depth 0. Cycles are cut where they
    /// close, so this terminates on any graph.
    pub fn dependency_depth(&self, node: &str) -> usize {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        match self.nodes.get_key_value(node) {
            Some((key, _)) => self.depth_of(key, &mut memo, &mut visiting),
            None => 0,
        }
    }

    fn depth_of<'a>(
        &'a self,
        node: &'a str,
        memo: &mut HashMap<&'a str, usize>,
        visiting: &mut HashSet<&'a str>,
    ) -> usize {
        if let Some(&depth) = memo.get(node) {
            return depth;
        }
        let Some(deps) = self.nodes.get(node) else {
            return 0;
        };
        if !visiting.insert(node) {
            return 0;
        }

        let depth = deps
            .iter()
            .map(|dep| 1 + self.depth_of(dep, memo, visiting))
            .max()
            .unwrap_or(0);

        visiting.remove(node);
        memo.insert(node, depth);
        depth
    }

    fn to_graph_map(&self) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for (node, deps) in &self.nodes {
            graph.add_node(node.as_str());
            for dep in deps {
                graph.add_edge(node.as_str(), dep.as_str(), ());
            }
        }
        graph
    }
}

/// Depth-first cycle search over an adjacency function.
///
/// Every node not yet visited is used as a root, so disconnected cycles
/// are all found. When a neighbour is already on the active path the
/// cycle is the path slice from that neighbour onward, closed by the
/// neighbour itself.
pub(crate) fn find_cycles<'a, R, F>(roots: R, neighbors: F) -> Vec<Vec<String>>
where
    R: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Vec<&'a str>,
{
    let mut search = CycleSearch {
        neighbors,
        visited: HashSet::new(),
        path: Vec::new(),
        on_path: HashSet::new(),
        cycles: Vec::new(),
    };

    for root in roots {
        if !search.visited.contains(root) {
            search.visit(root);
        }
    }

    search.cycles
}

struct CycleSearch<'a, F> {
    neighbors: F,
    visited: HashSet<&'a str>,
    path: Vec<&'a str>,
    on_path: HashSet<&'a str>,
    cycles: Vec<Vec<String>>,
}

impl<'a, F> CycleSearch<'a, F>
where
    F: Fn(&str) -> Vec<&'a str>,
{
    fn visit(&mut self, node: &'a str) {
        self.visited.insert(node);
        self.path.push(node);
        self.on_path.insert(node);

        for next in (self.neighbors)(node) {
            if self.on_path.contains(next) {
                if let Some(start) = self.path.iter().position(|n| *n == next) {
                    let mut cycle: Vec<String> =
                        self.path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(next.to_string());
                    self.cycles.push(cycle);
                }
            } else if !self.visited.contains(next) {
                self.visit(next);
            }
        }

        self.path.pop();
        self.on_path.remove(node);
    }
}

/// Tasks that may run concurrently, tagged with their level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub level: usize,
    pub tasks: Vec<Task>,
}

impl ParallelGroup {
    pub fn new(level: usize, tasks: Vec<Task>) -> Self {
        Self { level, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Namespaces of the tasks in this group, in group order.
    pub fn namespaces(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.namespace.as_str()).collect()
    }
}

/// Builds dependency graphs and execution levels for task batches.
///
/// With a registry attached, each task's graph node also picks up the
/// dependencies declared by the resource registered under its namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyAnalyzer<'a> {
    registry: Option<&'a Registry>,
}

impl<'a> DependencyAnalyzer<'a> {
    /// Create an analyzer that only looks at explicit task dependencies.
    pub fn new() -> Self {
        Self { registry: None }
    }

    /// Create an analyzer that merges registered resource dependencies.
    pub fn with_registry(registry: &'a Registry) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// Build the dependency graph for a batch.
    pub fn build_graph(&self, tasks: &[Task]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();

        for task in tasks {
            graph.add_node(&task.namespace);
            for dep in self.dependencies_of(task) {
                graph.add_dependency(&task.namespace, dep);
            }
        }

        graph
    }

    /// Cycles in a batch graph. See [`DependencyGraph::detect_cycles`].
    pub fn detect_cycles(&self, graph: &DependencyGraph) -> Vec<Vec<String>> {
        graph.detect_cycles()
    }

    /// Levels of a batch graph. See [`DependencyGraph::topological_levels`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] if the graph cannot be leveled.
    pub fn topological_levels(&self, graph: &DependencyGraph) -> Result<Vec<Vec<String>>> {
        graph.topological_levels()
    }

    /// Longest dependency chain below `node`.
    pub fn dependency_depth(&self, graph: &DependencyGraph, node: &str) -> usize {
        graph.dependency_depth(node)
    }

    /// Group a batch into ordered levels of concurrently runnable tasks.
    ///
    /// Nodes that only appear as dependencies (no task in the batch targets
    /// them) take part in leveling but are left out of the groups. Levels
    /// that end up empty are skipped; the remaining groups keep their
    /// original level numbers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] with the cycle paths if the
    /// batch graph contains a cycle.
    pub fn group_parallel_tasks(&self, tasks: &[Task]) -> Result<Vec<ParallelGroup>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let graph = self.build_graph(tasks);

        let cycles = graph.detect_cycles();
        if !cycles.is_empty() {
            return Err(Error::cycles(cycles));
        }

        let levels = graph.topological_levels()?;

        let mut by_namespace: HashMap<&str, Vec<&Task>> = HashMap::new();
        for task in tasks {
            by_namespace.entry(task.namespace.as_str()).or_default().push(task);
        }

        let dependency_only: Vec<&str> = graph
            .nodes()
            .filter(|node| !by_namespace.contains_key(node))
            .collect();
        if !dependency_only.is_empty() {
            debug!(nodes = ?dependency_only, "dependency-only nodes left out of scheduled groups");
        }

        let groups = levels
            .iter()
            .enumerate()
            .filter_map(|(level, namespaces)| {
                let level_tasks: Vec<Task> = namespaces
                    .iter()
                    .filter_map(|ns| by_namespace.get(ns.as_str()))
                    .flatten()
                    .map(|task| (*task).clone())
                    .collect();
                if level_tasks.is_empty() {
                    None
                } else {
                    Some(ParallelGroup::new(level, level_tasks))
                }
            })
            .collect();

        Ok(groups)
    }

    /// Dependencies that neither a task in the batch nor the registry can
    /// satisfy, one message per task and missing dependency.
    pub fn validate_task_dependencies(&self, tasks: &[Task]) -> Vec<String> {
        let targets: HashSet<&str> = tasks.iter().map(|t| t.namespace.as_str()).collect();
        let mut problems = Vec::new();

        for task in tasks {
            for dep in self.dependencies_of(task) {
                let in_batch = targets.contains(dep);
                let registered = self.registry.is_some_and(|r| r.exists(dep));
                if !in_batch && !registered {
                    problems.push(format!(
                        "Task '{}' depends on '{}', which is neither in the batch nor registered",
                        task.namespace, dep
                    ));
                }
            }
        }

        problems
    }

    /// Graph nodes that no task in the batch targets.
    pub fn dependency_only_nodes(&self, tasks: &[Task]) -> Vec<String> {
        let targets: HashSet<&str> = tasks.iter().map(|t| t.namespace.as_str()).collect();
        self.build_graph(tasks)
            .nodes()
            .filter(|node| !targets.contains(node))
            .map(str::to_string)
            .collect()
    }

    /// Explicit dependencies followed by registered ones, without repeats.
    fn dependencies_of<'t>(&self, task: &'t Task) -> Vec<&'t str>
    where
        'a: 't,
    {
        let mut deps: Vec<&'t str> = Vec::new();
        for dep in &task.explicit_dependencies {
            if !deps.contains(&dep.as_str()) {
                deps.push(dep);
            }
        }
        if let Some(resource) = self.registry.and_then(|r| r.get(&task.namespace)) {
            for dep in &resource.dependencies {
                if !deps.contains(&dep.as_str()) {
                    deps.push(dep);
                }
            }
        }
        deps
    }
}
