//! Update Scheduler
//!
//! The scheduler owns the node table and determines the order in which dirty
//! nodes should be updated. It ensures that dependencies are always updated
//! before their dependents.
//!
//! # Algorithm
//!
//! One propagation pass:
//!
//! 1. Start from every source written since the last pass.
//! 2. Walk dependents breadth-first with a visited set, marking each node
//!    "maybe dirty". A node reachable along several paths is collected once.
//! 3. Sort the collected nodes topologically (Kahn), counting only edges
//!    inside the collected set.
//! 4. The caller processes the nodes in that order. Lazy nodes stay marked
//!    until read; eager nodes verify their inputs and re-run if one advanced.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use super::node::{Node, NodeId};

/// The update scheduler manages the dependency graph and coordinates updates.
pub(crate) struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies().keys() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Add a dependency edge: `dependent` read `dependency` at `version`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId, version: u64) {
        if dependency == dependent
            || !self.nodes.contains_key(&dependency)
            || !self.nodes.contains_key(&dependent)
        {
            return;
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency, version);
        }
    }

    /// Remove a dependency edge.
    #[cfg(test)]
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace every dependency of `dependent` with `reads`.
    pub fn replace_dependencies(&mut self, dependent: NodeId, reads: &[(NodeId, u64)]) {
        let old = match self.nodes.get_mut(&dependent) {
            Some(node) => node.clear_dependencies(),
            None => return,
        };
        for dep_id in old {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(dependent);
            }
        }
        for &(dependency, version) in reads {
            self.add_edge(dependency, dependent, version);
        }
    }

    /// Mark everything downstream of `sources` as maybe dirty.
    ///
    /// Returns the affected node IDs in topological order.
    pub fn mark_changed(&mut self, sources: &[NodeId]) -> Vec<NodeId> {
        let affected = self.mark_downstream(sources);
        // Sort topologically so dependencies are processed first
        self.topological_sort(affected)
    }

    /// Mark everything downstream of `sources` as maybe dirty without
    /// ordering it. Returns the affected node IDs in visit order.
    pub fn mark_downstream(&mut self, sources: &[NodeId]) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the sources' direct dependents
        for source_id in sources {
            if let Some(source) = self.nodes.get(source_id) {
                queue.extend(source.dependents().iter().copied());
            }
        }

        // BFS to propagate maybe-dirty status
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                to_process.push(node_id);

                // Propagate to dependents
                queue.extend(node.dependents().iter().copied());
            }
        }

        to_process
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .keys()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent_id);
                        }
                    }
                }
            }
        }

        // Edges only come from successful reads, so a cycle should never
        // survive here. Keep any leftovers rather than dropping them.
        if result.len() < nodes.len() {
            let placed: HashSet<_> = result.iter().copied().collect();
            let leftover: Vec<_> = nodes.into_iter().filter(|id| !placed.contains(id)).collect();
            debug!(count = leftover.len(), "unordered nodes appended to pass");
            result.extend(leftover);
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
