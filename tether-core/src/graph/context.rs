//! Graph Context
//!
//! [`Graph`] is the explicit context every reactive node belongs to. It owns
//! the node table (through the update scheduler), the evaluation frame
//! stack and the queue of source writes that still need a propagation pass.
//!
//! # Propagation
//!
//! A write bumps the source's version and marks everything downstream
//! "maybe dirty" right away, so lazy reads made before the pass still see
//! the change. The pass itself then walks the affected nodes in topological
//! order and brings every eager node up to date. Computeds stay marked until
//! somebody reads them.
//!
//! Writes that happen while a pass runs, inside [`Graph::batch`], or while a
//! node is evaluating are queued and flushed as a following pass once the
//! graph is idle again.
//!
//! # Threading
//!
//! A graph is single-threaded (`!Send`). Independent graphs never share
//! state, so tests can build as many as they like.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use super::frame::{Frame, FrameGuard};
use super::node::{DirtyState, Node, NodeId, NodeKind, Reactive};
use super::scheduler::UpdateScheduler;
use crate::config::GraphConfig;
use crate::error::{TetherError, TetherResult};

struct GraphInner {
    config: GraphConfig,
    scheduler: RefCell<UpdateScheduler>,
    frames: RefCell<Vec<Frame>>,
    /// Sources written since the last pass.
    pending: RefCell<IndexSet<NodeId>>,
    flushing: Cell<bool>,
    batch_depth: Cell<usize>,
}

/// A dependency-graph context. Cloning shares the same graph.
///
/// # Example
///
/// ```rust
/// use tether_core::{Computed, Graph, Signal};
///
/// let graph = Graph::new();
/// let count = Signal::new(&graph, 2);
/// let doubled = {
///     let count = count.clone();
///     Computed::new(&graph, move || Ok(count.get()? * 2))
/// };
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Rc<GraphInner>,
}

impl Graph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::from_config(GraphConfig::default())
    }

    /// Create a graph with a validated configuration.
    pub fn with_config(config: GraphConfig) -> TetherResult<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: GraphConfig) -> Self {
        Self {
            inner: Rc::new(GraphInner {
                config,
                scheduler: RefCell::new(UpdateScheduler::new()),
                frames: RefCell::new(Vec::new()),
                pending: RefCell::new(IndexSet::new()),
                flushing: Cell::new(false),
                batch_depth: Cell::new(0),
            }),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    /// Run `f` with propagation held back, then run one pass for every
    /// write it made.
    ///
    /// Nested batches flush only when the outermost one returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> TetherResult<R> {
        let depth = &self.inner.batch_depth;
        depth.set(depth.get() + 1);
        let result = {
            let _restore = DepthGuard(depth);
            f()
        };
        self.flush_if_idle()?;
        Ok(result)
    }

    /// Run `f` without recording any of its reads as dependencies of the
    /// node currently evaluating.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let frame = FrameGuard::enter(&self.inner.frames, None);
        let result = f();
        frame.finish();
        result
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.scheduler.borrow().node_count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.scheduler.borrow().get_node(id).is_some()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.inner.scheduler.borrow().get_node(id).map(Node::kind)
    }

    /// Current version of a node, `None` once it has been removed.
    pub fn version(&self, id: NodeId) -> Option<u64> {
        self.inner.scheduler.borrow().get_node(id).map(Node::version)
    }

    /// Nodes `id` read during its last evaluation.
    pub fn upstream(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(|node| node.dependencies().keys().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes that read `id` during their last evaluation.
    pub fn downstream(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default()
    }

    /// True while `id` is somewhere on the evaluation stack.
    pub fn is_evaluating(&self, id: NodeId) -> bool {
        self.inner
            .frames
            .borrow()
            .iter()
            .any(|frame| frame.node() == Some(id))
    }

    /// The node whose evaluation is innermost, if reads are being tracked.
    pub fn current_node(&self) -> Option<NodeId> {
        self.inner.frames.borrow().last().and_then(Frame::node)
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn register(
        &self,
        kind: NodeKind,
        reaction: Option<std::rc::Weak<dyn Reactive>>,
    ) -> NodeId {
        let mut node = Node::new(NodeId::new(), kind);
        if let Some(reaction) = reaction {
            node = node.with_reaction(reaction);
        }
        let id = self.inner.scheduler.borrow_mut().add_node(node);
        trace!(label = %self.label(), node = %id, ?kind, "node registered");
        id
    }

    /// Remove a node and unlink it from its neighbours. Dependents are
    /// marked dirty so their next evaluation observes the removal.
    pub(crate) fn unregister(&self, id: NodeId) {
        let removed = self.inner.scheduler.borrow_mut().remove_node(id);
        let Some(node) = removed else {
            return;
        };
        {
            let mut scheduler = self.inner.scheduler.borrow_mut();
            for dependent in node.dependents() {
                if let Some(dependent) = scheduler.get_node_mut(*dependent) {
                    dependent.mark_dirty();
                }
            }
        }
        self.inner.pending.borrow_mut().shift_remove(&id);
        debug!(label = %self.label(), node = %id, kind = ?node.kind(), "node disposed");
    }

    // ------------------------------------------------------------------
    // Reads, writes and evaluation
    // ------------------------------------------------------------------

    /// Record a read of `id` on the current frame.
    pub(crate) fn track_read(&self, id: NodeId) {
        let version = match self.inner.scheduler.borrow().get_node(id) {
            Some(node) => node.version(),
            None => return,
        };
        if let Some(frame) = self.inner.frames.borrow_mut().last_mut() {
            frame.record(id, version);
        }
    }

    /// Record a write to source `id`: bump its version, mark downstream,
    /// and run a propagation pass unless the graph is busy.
    pub(crate) fn notify_write(&self, id: NodeId) -> TetherResult<()> {
        {
            let mut scheduler = self.inner.scheduler.borrow_mut();
            let Some(node) = scheduler.get_node_mut(id) else {
                return Err(TetherError::UseAfterFree { what: "graph node" });
            };
            let version = node.bump_version();
            let marked = scheduler.mark_downstream(&[id]);
            trace!(
                label = %self.label(),
                node = %id,
                version,
                marked = marked.len(),
                "source written"
            );
        }
        self.inner.pending.borrow_mut().insert(id);
        self.flush_if_idle()
    }

    /// Run `f` as the evaluation of `id`, recording its reads as the node's
    /// new upstream set.
    ///
    /// The node is left clean only if `f` succeeded and nothing it read
    /// changed while it ran.
    pub(crate) fn evaluate<R>(
        &self,
        id: NodeId,
        f: impl FnOnce() -> TetherResult<R>,
    ) -> TetherResult<R> {
        if self.is_evaluating(id) {
            return Err(TetherError::CycleDetected { node: id });
        }
        let limit = self.inner.config.max_depth;
        if self.inner.frames.borrow().len() >= limit {
            return Err(TetherError::DepthExceeded { limit });
        }

        let frame = FrameGuard::enter(&self.inner.frames, Some(id));
        let result = f();
        let reads = frame.finish();

        let mut scheduler = self.inner.scheduler.borrow_mut();
        if scheduler.get_node(id).is_none() {
            // Disposed during its own evaluation.
            return result;
        }
        scheduler.replace_dependencies(id, &reads);
        let settled = result.is_ok()
            && reads.iter().all(|(dep, captured)| {
                scheduler
                    .get_node(*dep)
                    .map_or(true, |node| node.version() == *captured)
            });
        if let Some(node) = scheduler.get_node_mut(id) {
            if settled {
                node.mark_clean();
            } else {
                node.mark_dirty();
            }
        }
        drop(scheduler);

        debug!(
            label = %self.label(),
            node = %id,
            reads = reads.len(),
            ok = result.is_ok(),
            "node evaluated"
        );
        result
    }

    /// True if `id` must re-evaluate before its cached state can be used.
    ///
    /// A maybe-dirty node brings its upstream computeds up to date first and
    /// then compares each upstream version with the one it captured.
    pub(crate) fn is_stale(&self, id: NodeId) -> TetherResult<bool> {
        let upstream: Vec<(NodeId, u64)> = {
            let scheduler = self.inner.scheduler.borrow();
            let node = scheduler
                .get_node(id)
                .ok_or(TetherError::UseAfterFree { what: "graph node" })?;
            match node.dirty_state() {
                DirtyState::Clean => return Ok(false),
                DirtyState::Dirty => return Ok(true),
                DirtyState::MaybeDirty => node
                    .dependencies()
                    .iter()
                    .map(|(dep, version)| (*dep, *version))
                    .collect(),
            }
        };

        for (dep, captured) in upstream {
            let reaction = self
                .inner
                .scheduler
                .borrow()
                .get_node(dep)
                .filter(|node| node.kind() == NodeKind::Computed)
                .and_then(Node::reaction);
            if let Some(reaction) = reaction {
                if let Err(error) = reaction.update() {
                    // The failure surfaces when the dependent re-reads it.
                    trace!(node = %id, upstream = %dep, %error, "upstream refresh failed");
                    return Ok(true);
                }
            }
            match self.version(dep) {
                Some(current) if current == captured => {}
                _ => return Ok(true),
            }
        }

        if let Some(node) = self.inner.scheduler.borrow_mut().get_node_mut(id) {
            node.mark_clean();
        }
        Ok(false)
    }

    /// Record an observable change of a derived node.
    pub(crate) fn bump_version(&self, id: NodeId) -> Option<u64> {
        self.inner
            .scheduler
            .borrow_mut()
            .get_node_mut(id)
            .map(Node::bump_version)
    }

    /// Flush queued writes if no pass, batch or tracked evaluation is active.
    pub(crate) fn flush_if_idle(&self) -> TetherResult<()> {
        let busy = self.inner.flushing.get()
            || self.inner.batch_depth.get() > 0
            || self.inner.frames.borrow().iter().any(Frame::is_tracked);
        if busy || self.inner.pending.borrow().is_empty() {
            return Ok(());
        }
        self.flush()
    }

    fn flush(&self) -> TetherResult<()> {
        self.inner.flushing.set(true);
        let _reset = FlagGuard(&self.inner.flushing);

        let limit = self.inner.config.max_flush_passes;
        let mut passes = 0;
        loop {
            let sources: Vec<NodeId> = self.inner.pending.borrow_mut().drain(..).collect();
            if sources.is_empty() {
                return Ok(());
            }
            passes += 1;
            if passes > limit {
                warn!(
                    label = %self.label(),
                    passes = limit,
                    "propagation did not settle, dropping queued writes"
                );
                return Err(TetherError::PropagationLimit { passes: limit });
            }
            self.run_pass(passes, &sources);
        }
    }

    fn run_pass(&self, pass: usize, sources: &[NodeId]) {
        let order = self.inner.scheduler.borrow_mut().mark_changed(sources);
        debug!(
            label = %self.label(),
            pass,
            sources = sources.len(),
            affected = order.len(),
            "propagation pass"
        );

        for id in order {
            let reaction = self
                .inner
                .scheduler
                .borrow()
                .get_node(id)
                .filter(|node| node.kind().is_eager())
                .and_then(Node::reaction);
            let Some(reaction) = reaction else {
                continue;
            };
            if let Err(error) = reaction.update() {
                warn!(label = %self.label(), node = %id, %error, "node update failed");
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("label", &self.label())
            .field("nodes", &self.node_count())
            .field("pending", &self.inner.pending.borrow().len())
            .finish()
    }
}

struct FlagGuard<'a>(&'a Cell<bool>);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}
