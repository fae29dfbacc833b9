//! Cooperative Mutex
//!
//! An exclusive lock whose `lock()` suspends the calling task instead of
//! blocking the thread. Waiters are served strictly in arrival order.
//!
//! There is no deadlock detection. Tasks that take several locks must take
//! them in a consistent order.

use std::fmt;
use std::ops::{Deref, DerefMut};

use tokio_util::sync::CancellationToken;

use super::queue::{Access, LockQueue};
use crate::error::TetherResult;

/// A cooperative exclusive-access lock.
///
/// # Example
///
/// ```rust
/// # tokio_test_block_on(async {
/// use tether_core::Mutex;
///
/// let mutex = Mutex::new(0);
/// *mutex.lock().await += 1;
/// assert_eq!(*mutex.lock().await, 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Mutex<T> {
    queue: LockQueue,
    // Only touched by the current grant holder, so it is never contended.
    value: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            queue: LockQueue::new(),
            value: parking_lot::Mutex::new(value),
        }
    }

    /// Acquire the lock, waiting behind earlier requests if necessary.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.queue.acquire(Access::Exclusive).await;
        self.guard()
    }

    /// Like [`lock`](Self::lock), but gives up with
    /// [`AcquireCancelled`](crate::TetherError::AcquireCancelled) if `token`
    /// fires while the request is still queued.
    pub async fn lock_cancellable(
        &self,
        token: &CancellationToken,
    ) -> TetherResult<MutexGuard<'_, T>> {
        self.queue
            .acquire_cancellable(Access::Exclusive, token)
            .await?;
        Ok(self.guard())
    }

    /// Acquire only if that can happen without waiting.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.queue
            .try_acquire(Access::Exclusive)
            .then(|| self.guard())
    }

    pub fn is_locked(&self) -> bool {
        self.queue.has_writer()
    }

    /// Number of requests waiting for the lock.
    pub fn queued(&self) -> usize {
        self.queue.queued()
    }

    /// Direct access through a unique reference; no queueing needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            inner: self.value.lock(),
            _grant: Grant {
                queue: &self.queue,
                access: Access::Exclusive,
            },
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Hands a grant back to its queue when dropped.
///
/// Guards declare it after the storage guard so the storage is unlocked
/// before the next waiter is woken.
pub(crate) struct Grant<'a> {
    pub(crate) queue: &'a LockQueue,
    pub(crate) access: Access,
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        self.queue.release(self.access);
    }
}

/// Exclusive access to the value inside a [`Mutex`].
pub struct MutexGuard<'a, T> {
    inner: parking_lot::MutexGuard<'a, T>,
    _grant: Grant<'a>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;

    #[tokio::test]
    async fn second_request_waits_for_release() {
        let mutex = Mutex::new(0);
        let mut first = mutex.lock().await;
        *first += 1;

        let second = mutex.lock();
        tokio::pin!(second);
        assert!(futures_util::poll!(&mut second).is_pending());
        assert_eq!(mutex.queued(), 1);

        drop(first);
        let mut second = second.await;
        *second += 1;
        assert_eq!(*second, 2);
        assert_eq!(mutex.queued(), 0);
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let mutex = Mutex::new(Vec::new());
        let held = mutex.lock().await;

        let a = async {
            mutex.lock().await.push('a');
        };
        let b = async {
            mutex.lock().await.push('b');
        };
        let c = async {
            mutex.lock().await.push('c');
        };
        tokio::pin!(a, b, c);
        assert!(futures_util::poll!(&mut a).is_pending());
        assert!(futures_util::poll!(&mut b).is_pending());
        assert!(futures_util::poll!(&mut c).is_pending());

        drop(held);
        // Polled in reverse; grants still follow the queue.
        tokio::join!(c, b, a);
        assert_eq!(*mutex.lock().await, vec!['a', 'b', 'c']);
    }

    #[tokio::test]
    async fn cancelled_request_leaves_the_queue() {
        let mutex = Mutex::new(());
        let held = mutex.lock().await;
        let token = CancellationToken::new();

        let waiting = mutex.lock_cancellable(&token);
        tokio::pin!(waiting);
        assert!(futures_util::poll!(&mut waiting).is_pending());

        token.cancel();
        assert_eq!(waiting.await.unwrap_err(), TetherError::AcquireCancelled);
        assert_eq!(mutex.queued(), 0);

        drop(held);
        assert!(mutex.try_lock().is_some());
    }

    #[tokio::test]
    async fn cancellation_after_grant_is_ignored() {
        let mutex = Mutex::new(5);
        let token = CancellationToken::new();
        token.cancel();

        // Uncontended: granted on arrival, the token is never consulted.
        let guard = mutex.lock_cancellable(&token).await.unwrap();
        assert_eq!(*guard, 5);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_strand_the_lock() {
        let mutex = Mutex::new(());
        let held = mutex.lock().await;
        {
            let abandoned = mutex.lock();
            tokio::pin!(abandoned);
            assert!(futures_util::poll!(&mut abandoned).is_pending());
        }
        assert_eq!(mutex.queued(), 0);
        drop(held);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Mutex::new(1);
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }
}
