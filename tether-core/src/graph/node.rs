//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::error::TetherResult;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node. Caches its value and recomputes lazily on read.
    Computed,

    /// A synchronous subscriber, re-run as soon as propagation reaches it.
    Watcher,

    /// An asynchronous subscriber, re-triggered as soon as propagation
    /// reaches it.
    AsyncEffect,
}

impl NodeKind {
    /// Eager nodes run during propagation; lazy ones wait to be read.
    pub fn is_eager(&self) -> bool {
        matches!(self, NodeKind::Watcher | NodeKind::AsyncEffect)
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. One of its dependencies changed,
    /// but we have not yet verified if the actual input versions advanced.
    MaybeDirty,

    /// The node definitely needs to recompute.
    Dirty,
}

/// Callback surface the graph uses to drive a node it does not own.
pub(crate) trait Reactive {
    /// Bring the node up to date: recompute a stale computed, re-run a stale
    /// watcher or effect. Fresh nodes do nothing.
    fn update(&self) -> TetherResult<()>;
}

/// A node in the dependency graph.
pub(crate) struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Bumped whenever the node's observable value changes.
    version: u64,

    /// Current dirty state.
    dirty: DirtyState,

    /// Nodes read during the last evaluation, with the version each had
    /// when it was read.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this node during their last evaluation.
    dependents: IndexSet<NodeId>,

    /// The node's owner. Weak so the graph never keeps a node alive.
    reaction: Option<Weak<dyn Reactive>>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            version: 0,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Computed | NodeKind::Watcher | NodeKind::AsyncEffect => {
                    DirtyState::Dirty
                }
            },
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
            reaction: None,
        }
    }

    /// Create a new source node.
    #[cfg(test)]
    pub fn source(id: NodeId) -> Self {
        Self::new(id, NodeKind::Source)
    }

    pub(crate) fn with_reaction(mut self, reaction: Weak<dyn Reactive>) -> Self {
        self.reaction = Some(reaction);
        self
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record an observable change.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    #[cfg(test)]
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (a dependency might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    /// Add a dependency (a node that this node read at `version`).
    pub fn add_dependency(&mut self, node_id: NodeId, version: u64) {
        self.dependencies.insert(node_id, version);
    }

    /// Remove a dependency.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Get all dependencies with their captured versions.
    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Clear all dependencies, returning the ids that were removed.
    pub fn clear_dependencies(&mut self) -> Vec<NodeId> {
        self.dependencies.drain(..).map(|(id, _)| id).collect()
    }

    pub(crate) fn reaction(&self) -> Option<std::rc::Rc<dyn Reactive>> {
        self.reaction.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("dirty", &self.dirty)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source(NodeId::new());
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert_eq!(node.version(), 0);
    }

    #[test]
    fn computed_node_starts_dirty() {
        let node = Node::new(NodeId::new(), NodeKind::Computed);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert!(!node.kind().is_eager());
        assert!(NodeKind::Watcher.is_eager());
    }

    #[test]
    fn dependency_management() {
        let mut node = Node::new(NodeId::new(), NodeKind::Computed);
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        node.add_dependency(dep1, 3);
        node.add_dependency(dep2, 0);

        assert_eq!(node.dependencies().get(&dep1), Some(&3));
        assert!(node.dependencies().contains_key(&dep2));
        assert_eq!(node.dependencies().len(), 2);

        node.remove_dependency(dep1);
        assert!(!node.dependencies().contains_key(&dep1));
        assert_eq!(node.clear_dependencies(), vec![dep2]);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::new(NodeId::new(), NodeKind::Watcher);

        // Start dirty
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // Maybe dirty never downgrades dirty
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.mark_clean();
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn versions_only_grow() {
        let mut node = Node::source(NodeId::new());
        assert_eq!(node.bump_version(), 1);
        assert_eq!(node.bump_version(), 2);
    }
}
