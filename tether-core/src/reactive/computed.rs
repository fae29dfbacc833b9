//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! the nodes it read has moved to a newer version.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its function and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the
//!    cached value without calling the function.
//!
//! 3. When a source upstream is written, the computed is marked "maybe
//!    dirty".
//!
//! 4. On next access, the computed compares the versions it captured with
//!    the current ones, pulling upstream computeds first.
//!
//! 5. If an input advanced, recompute. Otherwise, mark clean and return the
//!    cache.
//!
//! After a recomputation the computed bumps its own version only if the new
//! result differs from the cached one. Dependents of a computed whose result
//! did not change therefore stay put.
//!
//! # Equality
//!
//! [`Computed::new`] compares results with `PartialEq`. Use
//! [`Computed::with_equality`] for types without it, or to compare by
//! identity.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{TetherError, TetherResult};
use crate::graph::{Graph, NodeId, NodeKind, Reactive};
use crate::ownership::RefCell;

type Compute<T> = Box<dyn Fn() -> TetherResult<T>>;
type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

struct ComputedInner<T> {
    id: NodeId,
    graph: Graph,
    compute: Compute<T>,
    equal: Equality<T>,
    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,
    /// Number of times the function ran.
    runs: Cell<usize>,
    disposed: Cell<bool>,
}

impl<T> ComputedInner<T> {
    /// Bring the cache up to date.
    fn refresh(&self) -> TetherResult<()> {
        if self.disposed.get() {
            return Err(TetherError::UseAfterFree { what: "computed" });
        }
        if self.graph.is_evaluating(self.id) {
            return Err(TetherError::CycleDetected { node: self.id });
        }
        if !self.graph.is_stale(self.id)? {
            return Ok(());
        }

        self.runs.set(self.runs.get() + 1);
        let next = self.graph.evaluate(self.id, || (self.compute)())?;

        let changed = self.value.with(|cached| match cached {
            Some(previous) => !(self.equal)(previous, &next),
            None => true,
        })?;
        if changed {
            self.value.replace(Some(next))?;
            let version = self.graph.bump_version(self.id);
            debug!(node = %self.id, ?version, "computed value changed");
        } else {
            debug!(node = %self.id, "computed value unchanged");
        }
        Ok(())
    }
}

impl<T> Reactive for ComputedInner<T> {
    fn update(&self) -> TetherResult<()> {
        self.refresh()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The function returns a [`TetherResult`] so reads inside it can use `?`.
/// A failed evaluation leaves the previous cache in place and the node
/// dirty, so the next read tries again.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a computed that compares results with `PartialEq`.
    ///
    /// The function is not run immediately. It runs on first access.
    pub fn new<F>(graph: &Graph, compute: F) -> Self
    where
        F: Fn() -> TetherResult<T> + 'static,
    {
        Self::with_equality(graph, compute, T::eq)
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed with a custom result comparison.
    pub fn with_equality<F, E>(graph: &Graph, compute: F, equal: E) -> Self
    where
        F: Fn() -> TetherResult<T> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let reaction: Weak<dyn Reactive> = weak.clone();
            ComputedInner {
                id: graph.register(NodeKind::Computed, Some(reaction)),
                graph: graph.clone(),
                compute: Box::new(compute),
                equal: Box::new(equal),
                value: RefCell::new(None),
                runs: Cell::new(0),
                disposed: Cell::new(false),
            }
        });
        Self { inner }
    }
}

impl<T> Computed<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Version of the cached value, `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        self.inner.graph.version(self.inner.id)
    }

    /// Number of times the function has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Read the current value by reference, recomputing if necessary.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> TetherResult<R> {
        if let Err(error) = self.inner.refresh() {
            // A failed read is still a dependency, so the reader hears when
            // the failure clears.
            if !matches!(error, TetherError::CycleDetected { .. }) {
                self.inner.graph.track_read(self.inner.id);
            }
            return Err(error);
        }
        self.inner.graph.track_read(self.inner.id);
        let result = self.inner.value.with(|cached| cached.as_ref().map(f))?;
        self.inner.graph.flush_if_idle()?;
        result.ok_or(TetherError::UseAfterFree { what: "computed" })
    }

    /// True if a cached value exists.
    pub fn has_value(&self) -> bool {
        self.inner
            .value
            .with(|cached| cached.is_some())
            .unwrap_or(false)
    }

    /// Remove the computed from its graph and drop its cache.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.graph.unregister(self.inner.id);
        // Fails only while the cache is borrowed by a reader; the cache
        // then goes away with the last handle instead.
        let _ = self.inner.value.replace(None);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl<T: Clone> Computed<T> {
    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> TetherResult<T> {
        self.with(T::clone)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .field("runs", &self.inner.runs.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
