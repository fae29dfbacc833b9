//! Tether Core
//!
//! This crate provides ownership primitives, cooperative locks and a
//! reactive dependency graph. It implements:
//!
//! - Reference-counted handles with explicit counts and teardown hooks
//! - Runtime-checked interior mutability
//! - Cooperative mutex and reader-writer locks with FIFO queues
//! - Reactive primitives (signals, computeds, watchers, async effects)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `ownership`: `Rc`, `Weak`, `Arc`, `RefCell` and their composites
//! - `sync`: `Mutex`, `RwLock`, `ArcMutex` and their shared queue
//! - `graph`: the dependency graph context and propagation scheduler
//! - `reactive`: nodes that live in a graph
//! - `config` / `error`: graph configuration and the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_core::{Computed, Graph, Signal, Watcher};
//!
//! let graph = Graph::new();
//!
//! // Create a signal
//! let count = Signal::new(&graph, 0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(&graph, move || Ok(count.get()? * 2))
//! };
//!
//! // Create a watcher
//! let last = Rc::new(Cell::new(0));
//! let _watcher = {
//!     let (doubled, last) = (doubled.clone(), last.clone());
//!     Watcher::new(&graph, move || {
//!         last.set(doubled.get()?);
//!         Ok(())
//!     })
//!     .unwrap()
//! };
//!
//! // Update the signal; the watcher re-runs synchronously
//! count.set(5).unwrap();
//! assert_eq!(last.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod ownership;
pub mod reactive;
pub mod sync;

pub use config::GraphConfig;
pub use error::{TetherError, TetherResult};
pub use graph::{Graph, NodeId, NodeKind};
pub use ownership::{
    Arc, ArcWeak, BorrowKind, BorrowState, Rc, RcRefCell, Ref, RefCell, RefMut, Weak,
};
pub use reactive::{AsyncEffect, Computed, Signal, Watcher};
pub use sync::{
    ArcMutex, CancellationToken, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
