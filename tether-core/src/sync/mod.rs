//! Cooperative Synchronization
//!
//! Locks for state that several cooperative tasks touch across suspension
//! points. Acquisition never blocks a thread: a request that cannot be
//! granted parks a continuation on the lock's FIFO queue and the task
//! suspends until a release resumes it.
//!
//! # Types
//!
//! - [`Mutex`]: exclusive access.
//! - [`RwLock`]: shared or exclusive access with writer-priority queueing.
//! - [`ArcMutex`]: a [`Mutex`] shared through an [`Arc`](crate::Arc).
//!
//! # Failure
//!
//! Contention never fails; it waits. The only failure is an explicit
//! [`CancellationToken`] firing while the request is still queued, reported
//! as [`AcquireCancelled`](crate::TetherError::AcquireCancelled). Dropping a
//! pending acquire future also withdraws it.
//!
//! No deadlock detection is done. Avoiding cyclic acquisition is the
//! caller's job.

mod arc_mutex;
mod mutex;
mod queue;
mod rwlock;

pub use arc_mutex::ArcMutex;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use tokio_util::sync::CancellationToken;
