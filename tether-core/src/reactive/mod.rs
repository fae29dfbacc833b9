//! Reactive Primitives
//!
//! This module implements the reactive nodes that live in a
//! [`Graph`](crate::graph::Graph): signals, computeds, watchers and async
//! effects.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within an evaluation (such as a computed or watcher), the read is recorded
//! with the signal's current version. Writing the signal bumps the version
//! and notifies everything downstream.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of the nodes it read has a newer version than the one captured.
//!
//! ## Watchers
//!
//! A Watcher is a side-effecting computation that runs whenever its
//! dependencies change. Watchers are eager: a propagation pass re-runs them
//! right away.
//!
//! ## Async Effects
//!
//! An AsyncEffect is a watcher whose body starts a future. Only the output of
//! the latest run is applied; older outputs are discarded when they resolve.
//!
//! # Implementation Notes
//!
//! Dependencies are detected automatically: each graph keeps a stack of
//! evaluation frames and every read is recorded on the innermost one. Nodes
//! hold their graph explicitly, so nothing here relies on thread-local or
//! global state.

mod async_effect;
mod computed;
mod signal;
mod watcher;

pub use async_effect::AsyncEffect;
pub use computed::Computed;
pub use signal::Signal;
pub use watcher::Watcher;
