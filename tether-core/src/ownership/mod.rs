//! Ownership Primitives
//!
//! Reference-counted handles and runtime-checked interior mutability with
//! explicit, observable counts and borrow state.
//!
//! # Handles
//!
//! - [`Rc`] / [`Weak`]: single-context shared ownership.
//! - [`Arc`] / [`ArcWeak`]: the same contract for values shared between
//!   tasks; counts are guarded by a lock instead of a plain cell.
//!
//! Values are torn down deterministically when the strong count reaches zero,
//! which matters for resources that must be released at a known point rather
//! than whenever the allocator gets to them.
//!
//! # Cells
//!
//! - [`RefCell`]: at most one exclusive borrow or any number of shared ones.
//!   Violations are reported as errors, never tolerated.
//! - [`RcRefCell`]: `Rc<RefCell<T>>` whose clones share one borrow state.

mod arc;
mod rc;
mod rc_refcell;
mod refcell;

pub use arc::{Arc, ArcWeak};
pub use rc::{Rc, Weak};
pub use rc_refcell::RcRefCell;
pub use refcell::{BorrowKind, BorrowState, Ref, RefCell, RefMut};
