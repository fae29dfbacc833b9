//! Signal Implementation
//!
//! A Signal is the source node of a graph. It holds a value and a version.
//!
//! # How Signals Work
//!
//! 1. When a signal is read inside an evaluation (computed, watcher, async
//!    effect body), the read is recorded together with the signal's version.
//!
//! 2. Every write bumps the version and starts a propagation pass, or queues
//!    one if the graph is busy.
//!
//! 3. Dependents compare versions to decide whether to re-run.
//!
//! # Memory Layout
//!
//! Clones share one [`Rc`] around the signal state, and the value itself
//! lives in a [`RefCell`]. The node is removed from the graph when the last
//! clone goes away, or earlier through [`Signal::dispose`].

use std::cell::Cell;
use std::fmt;

use crate::error::{TetherError, TetherResult};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::ownership::{Rc, RefCell};

struct SignalInner<T> {
    id: NodeId,
    graph: Graph,
    value: RefCell<T>,
    disposed: Cell<bool>,
}

/// A reactive source holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use tether_core::{Graph, Signal};
///
/// let graph = Graph::new();
/// let count = Signal::new(&graph, 0);
///
/// count.set(5).unwrap();
/// count.update(|n| *n += 1).unwrap();
/// assert_eq!(count.get().unwrap(), 6);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new source node in `graph`.
    pub fn new(graph: &Graph, value: T) -> Self {
        let id = graph.register(NodeKind::Source, None);
        let inner = SignalInner {
            id,
            graph: graph.clone(),
            value: RefCell::new(value),
            disposed: Cell::new(false),
        };
        Self {
            inner: Rc::with_teardown(inner, |inner: &mut SignalInner<T>| {
                inner.graph.unregister(inner.id)
            }),
        }
    }
}

impl<T> Signal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of writes so far, `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        self.inner.graph.version(self.inner.id)
    }

    /// Read the value by reference, recording a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> TetherResult<R> {
        self.ensure_alive()?;
        self.inner.graph.track_read(self.inner.id);
        self.inner.value.with(f)
    }

    /// Read the value by reference without recording a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> TetherResult<R> {
        self.ensure_alive()?;
        self.inner.value.with(f)
    }

    /// Replace the value and propagate.
    pub fn set(&self, value: T) -> TetherResult<()> {
        self.ensure_alive()?;
        drop(self.inner.value.replace(value)?);
        self.inner.graph.notify_write(self.inner.id)
    }

    /// Mutate the value in place and propagate.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> TetherResult<()> {
        self.ensure_alive()?;
        self.inner.value.with_mut(f)?;
        self.inner.graph.notify_write(self.inner.id)
    }

    /// Remove the signal from its graph. Every clone observes the disposal.
    pub fn dispose(&self) {
        if !self.inner.disposed.replace(true) {
            self.inner.graph.unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    fn ensure_alive(&self) -> TetherResult<()> {
        if self.inner.disposed.get() {
            return Err(TetherError::UseAfterFree { what: "signal" });
        }
        Ok(())
    }
}

impl<T: Clone> Signal<T> {
    /// Read the value, recording a dependency.
    pub fn get(&self) -> TetherResult<T> {
        self.with(T::clone)
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> TetherResult<T> {
        self.with_untracked(T::clone)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
