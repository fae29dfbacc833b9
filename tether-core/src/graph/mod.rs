//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive sources and the computations that read them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent sources (signals) or computations (computeds, watchers,
//!   async effects)
//! - Edges represent dependencies: if A read B during its last evaluation,
//!   there is an edge from B to A, labelled with B's version at that time
//!
//! When a source changes, we traverse the graph to find all affected nodes
//! and mark them maybe dirty. A node then compares the versions it captured
//! with the current ones to decide whether it actually needs to recompute.
//!
//! # Design Decisions
//!
//! 1. The graph is an explicit [`Graph`] value rather than a process-wide
//!    registry, so several graphs can coexist.
//!
//! 2. The node table is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.
//!
//! 4. The graph holds only weak references to the reactive values that own
//!    its nodes. Dropping the last handle removes the node.

mod context;
mod frame;
mod node;
mod scheduler;

pub use context::Graph;
pub use node::{NodeId, NodeKind};

pub(crate) use node::Reactive;
