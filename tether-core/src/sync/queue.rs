//! Lock Queue
//!
//! The shared core of [`Mutex`](super::Mutex) and [`RwLock`](super::RwLock).
//! It decides who holds the lock and parks everyone else as an explicit
//! continuation (a oneshot sender) in a FIFO queue.
//!
//! # Grant rules
//!
//! - A request is granted on arrival only if it is compatible with the
//!   current holders *and* nobody is queued. A queued writer therefore blocks
//!   every reader that arrives after it (writer priority).
//! - On release the queue head is granted if compatible. An exclusive head is
//!   granted alone; a shared head is granted together with the contiguous run
//!   of shared requests behind it.
//!
//! Every state change happens inside one `parking_lot` critical section that
//! never spans an `.await`.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{TetherError, TetherResult};

/// The kind of access a request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Shared,
    Exclusive,
}

struct Waiter {
    id: u64,
    access: Access,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct QueueState {
    readers: usize,
    writer: bool,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

impl QueueState {
    fn is_compatible(&self, access: Access) -> bool {
        match access {
            Access::Exclusive => !self.writer && self.readers == 0,
            Access::Shared => !self.writer,
        }
    }

    fn grant(&mut self, access: Access) {
        match access {
            Access::Exclusive => self.writer = true,
            Access::Shared => self.readers += 1,
        }
    }

    fn release(&mut self, access: Access) {
        match access {
            Access::Exclusive => self.writer = false,
            Access::Shared => self.readers = self.readers.saturating_sub(1),
        }
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.waiters.iter().position(|w| w.id == id)
    }

    /// Grant the next compatible run of waiters.
    fn wake_waiters(&mut self) {
        loop {
            let Some(access) = self.waiters.front().map(|w| w.access) else {
                break;
            };
            if !self.is_compatible(access) {
                break;
            }
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.grant(access);
            if waiter.grant.send(()).is_err() {
                // The waiting side is gone; hand the grant to the next one.
                self.release(access);
                continue;
            }
            trace!(id = waiter.id, ?access, "queued lock request granted");
            if access == Access::Exclusive {
                break;
            }
        }
    }
}

pub(crate) struct LockQueue {
    state: Mutex<QueueState>,
}

impl LockQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Grant `access` right now if the rules allow it.
    pub(crate) fn try_acquire(&self, access: Access) -> bool {
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.is_compatible(access) {
            state.grant(access);
            true
        } else {
            false
        }
    }

    /// Wait until `access` is granted.
    pub(crate) async fn acquire(&self, access: Access) {
        let Some(mut pending) = self.enqueue(access) else {
            return;
        };
        pending.granted().await;
        // The sender is consumed only by a grant, so reaching here means we
        // hold the lock.
        pending.done = true;
    }

    /// Wait until `access` is granted or `token` is cancelled, whichever
    /// comes first. A grant that already happened wins over cancellation.
    pub(crate) async fn acquire_cancellable(
        &self,
        access: Access,
        token: &CancellationToken,
    ) -> TetherResult<()> {
        let Some(mut pending) = self.enqueue(access) else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = pending.granted() => {}
            _ = token.cancelled() => {}
        }
        pending.resolve()
    }

    /// Give back one grant of `access` and wake whoever is next.
    pub(crate) fn release(&self, access: Access) {
        let mut state = self.state.lock();
        state.release(access);
        state.wake_waiters();
    }

    /// Number of requests waiting in the queue.
    pub(crate) fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub(crate) fn readers(&self) -> usize {
        self.state.lock().readers
    }

    pub(crate) fn has_writer(&self) -> bool {
        self.state.lock().writer
    }

    /// Either grant immediately (`None`) or park a continuation.
    fn enqueue(&self, access: Access) -> Option<Pending<'_>> {
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.is_compatible(access) {
            state.grant(access);
            trace!(?access, "lock granted immediately");
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        let (grant, granted) = oneshot::channel();
        state.waiters.push_back(Waiter { id, access, grant });
        trace!(id, ?access, queued = state.waiters.len(), "lock request queued");
        Some(Pending {
            queue: self,
            id,
            access,
            granted,
            done: false,
        })
    }
}

/// A queued request. Dropping it before completion withdraws the request, or
/// returns the grant if it raced in.
struct Pending<'a> {
    queue: &'a LockQueue,
    id: u64,
    access: Access,
    granted: oneshot::Receiver<()>,
    done: bool,
}

impl Pending<'_> {
    async fn granted(&mut self) {
        // An error means the sender was dropped without a grant; `resolve`
        // sorts that out from the queue state.
        let _ = (&mut self.granted).await;
    }

    /// Settle the request from the queue state: still queued means it was
    /// cancelled, otherwise it was granted.
    fn resolve(mut self) -> TetherResult<()> {
        self.done = true;
        let mut state = self.queue.state.lock();
        match state.position(self.id) {
            Some(pos) => {
                state.waiters.remove(pos);
                trace!(id = self.id, "queued lock request cancelled");
                // A withdrawn writer may have been holding back readers.
                state.wake_waiters();
                Err(TetherError::AcquireCancelled)
            }
            None => Ok(()),
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.queue.state.lock();
        match state.position(self.id) {
            Some(pos) => {
                state.waiters.remove(pos);
            }
            None => state.release(self.access),
        }
        state.wake_waiters();
    }
}
