//! Watcher Implementation
//!
//! A Watcher is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Watchers Work
//!
//! 1. When created, the watcher runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When a propagation pass reaches it, the watcher checks whether any
//!    input actually advanced and, if so, re-runs synchronously.
//!
//! 3. Each run replaces the old dependencies with the ones it read.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; watchers do not.
//! - Computeds are lazy (compute on access); watchers are eager (run when
//!   deps change).
//!
//! # Lifetime
//!
//! The returned handle keeps the watcher alive. Dropping the last clone, or
//! calling [`Watcher::dispose`], detaches it from the graph.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::{TetherError, TetherResult};
use crate::graph::{Graph, NodeId, NodeKind, Reactive};

struct WatcherInner {
    id: NodeId,
    graph: Graph,
    body: Box<dyn Fn() -> TetherResult<()>>,
    /// Number of times the body has run.
    runs: Cell<usize>,
    last_error: RefCell<Option<TetherError>>,
    disposed: Cell<bool>,
}

impl WatcherInner {
    fn execute(&self) {
        if self.disposed.get() {
            return;
        }
        self.runs.set(self.runs.get() + 1);

        let outcome = self.graph.evaluate(self.id, || (self.body)());
        match outcome {
            Ok(()) => {
                *self.last_error.borrow_mut() = None;
            }
            Err(error) => {
                warn!(node = %self.id, %error, "watcher failed");
                *self.last_error.borrow_mut() = Some(error);
            }
        }
        debug!(node = %self.id, runs = self.runs.get(), "watcher ran");
    }
}

impl Reactive for WatcherInner {
    fn update(&self) -> TetherResult<()> {
        if self.disposed.get() {
            return Ok(());
        }
        if self.graph.is_stale(self.id)? {
            self.execute();
        }
        Ok(())
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// An eager subscriber that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tether_core::{Graph, Signal, Watcher};
///
/// let graph = Graph::new();
/// let count = Signal::new(&graph, 0);
/// let seen = Rc::new(Cell::new(0));
///
/// let _watcher = {
///     let (count, seen) = (count.clone(), seen.clone());
///     Watcher::new(&graph, move || {
///         seen.set(count.get()?);
///         Ok(())
///     })
///     .unwrap()
/// };
///
/// count.set(5).unwrap();
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher and run it once.
    ///
    /// Errors returned by the body are logged and kept in
    /// [`last_error`](Self::last_error); they do not fail construction. The
    /// only error returned here is from flushing writes the first run made.
    pub fn new<F>(graph: &Graph, body: F) -> TetherResult<Self>
    where
        F: Fn() -> TetherResult<()> + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<WatcherInner>| {
            let reaction: Weak<dyn Reactive> = weak.clone();
            WatcherInner {
                id: graph.register(NodeKind::Watcher, Some(reaction)),
                graph: graph.clone(),
                body: Box::new(body),
                runs: Cell::new(0),
                last_error: RefCell::new(None),
                disposed: Cell::new(false),
            }
        });

        // Run immediately to establish dependencies
        inner.execute();
        graph.flush_if_idle()?;

        Ok(Self { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the body now, whether or not an input changed.
    pub fn run(&self) -> TetherResult<()> {
        if self.inner.disposed.get() {
            return Err(TetherError::UseAfterFree { what: "watcher" });
        }
        self.inner.execute();
        self.inner.graph.flush_if_idle()
    }

    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// The error returned by the most recent run, if it failed.
    pub fn last_error(&self) -> Option<TetherError> {
        self.inner.last_error.borrow().clone()
    }

    /// Detach the watcher. It never runs again.
    pub fn dispose(&self) {
        if !self.inner.disposed.replace(true) {
            self.inner.graph.unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("runs", &self.inner.runs.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
