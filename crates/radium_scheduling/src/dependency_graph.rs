//! Dependency graph for task scheduling.

use petgraph::{
    Directed, Direction,
    algo::{self, Cycle},
    graphmap::GraphMap,
};

/// A graph describing the dependencies between the tasks registered in a
/// frame. Nodes are the indices of the tasks in registration order, and each
/// edge is directed from a task to a task depending on it.
#[derive(Debug)]
pub(crate) struct TaskDependencyGraph {
    graph: GraphMap<usize, (), Directed>,
}

impl TaskDependencyGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: GraphMap::new(),
        }
    }

    pub(crate) fn add_task(&mut self, task_idx: usize) {
        self.graph.add_node(task_idx);
    }

    /// Adds an edge making `dependent_idx` wait for `dependency_idx`.
    /// Returns `false` if the edge already existed.
    pub(crate) fn add_dependency(&mut self, dependency_idx: usize, dependent_idx: usize) -> bool {
        self.graph
            .add_edge(dependency_idx, dependent_idx, ())
            .is_none()
    }

    pub(crate) fn has_dependency(&self, dependency_idx: usize, dependent_idx: usize) -> bool {
        self.graph.contains_edge(dependency_idx, dependent_idx)
    }

    pub(crate) fn n_dependencies(&self, task_idx: usize) -> usize {
        self.graph
            .neighbors_directed(task_idx, Direction::Incoming)
            .count()
    }

    pub(crate) fn find_dependent_task_indices(
        &self,
        task_idx: usize,
    ) -> impl Iterator<Item = usize> + '_ {
        // Outgoing edges lead to tasks depending on this one
        self.graph
            .neighbors_directed(task_idx, Direction::Outgoing)
    }

    pub(crate) fn dependencies(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.graph
            .all_edges()
            .map(|(dependency_idx, dependent_idx, _)| (dependency_idx, dependent_idx))
    }

    /// Returns the task indices ordered so that every task without
    /// dependencies comes first, and every task comes after all the tasks it
    /// depends on.
    ///
    /// # Errors
    /// Returns a [`Cycle`] holding one of the involved task indices if the
    /// tasks have circular dependencies.
    pub(crate) fn obtain_ordered_task_indices(&self) -> Result<Vec<usize>, Cycle<usize>> {
        let n_tasks = self.graph.node_count();
        let mut sorted_indices = Vec::with_capacity(n_tasks);

        let mut independent_indices: Vec<_> = self
            .graph
            .nodes()
            .filter(|&task_idx| self.n_dependencies(task_idx) == 0)
            .collect();
        independent_indices.sort_unstable();

        sorted_indices.extend_from_slice(&independent_indices);

        if n_tasks > independent_indices.len() {
            let topologically_sorted_indices = algo::toposort(&self.graph, None)?;

            sorted_indices.extend(
                topologically_sorted_indices
                    .into_iter()
                    .filter(|&task_idx| self.n_dependencies(task_idx) > 0),
            );
        }

        assert_eq!(sorted_indices.len(), n_tasks);

        Ok(sorted_indices)
    }

    pub(crate) fn clear(&mut self) {
        self.graph.clear();
    }
}
