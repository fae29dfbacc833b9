//! Shared-Ownership Lock
//!
//! `ArcMutex<T>` is an [`Arc`] around a [`Mutex`]. Clones share the one
//! lock and its waiter queue; they never create independent locks.

use std::fmt;

use tokio_util::sync::CancellationToken;

use super::mutex::{Mutex, MutexGuard};
use crate::error::TetherResult;
use crate::ownership::{Arc, ArcWeak};

pub struct ArcMutex<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> ArcMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Create a lock whose value is handed to `teardown` when the last owner
    /// goes away.
    pub fn with_teardown<F>(value: T, teardown: F) -> Self
    where
        T: 'static,
        F: FnOnce(&mut T) + Send + 'static,
    {
        Self {
            inner: Arc::with_teardown(Mutex::new(value), move |mutex: &mut Mutex<T>| {
                teardown(mutex.get_mut())
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    pub async fn lock_cancellable(
        &self,
        token: &CancellationToken,
    ) -> TetherResult<MutexGuard<'_, T>> {
        self.inner.lock_cancellable(token).await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn queued(&self) -> usize {
        self.inner.queued()
    }

    pub fn downgrade(&self) -> ArcWeak<Mutex<T>> {
        Arc::downgrade(&self.inner)
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for ArcMutex<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for ArcMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcMutex")
            .field("strong", &self.strong_count())
            .field("lock", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn clones_share_one_queue() {
        let a = ArcMutex::new(0);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.strong_count(), 2);

        let held = a.lock().await;
        let waiting = b.lock();
        tokio::pin!(waiting);
        assert!(futures_util::poll!(&mut waiting).is_pending());
        assert_eq!(a.queued(), 1);

        drop(held);
        *waiting.await += 1;
        assert_eq!(*a.lock().await, 1);
    }

    #[tokio::test]
    async fn teardown_runs_when_last_owner_drops() {
        let released = std::sync::Arc::new(AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&released);
        let a = ArcMutex::with_teardown(vec![1u8; 4], move |buf: &mut Vec<u8>| {
            buf.clear();
            flag.store(true, Ordering::SeqCst);
        });
        let b = a.clone();

        drop(a);
        assert!(!released.load(Ordering::SeqCst));
        drop(b);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tasks_on_a_local_set_take_turns() {
        let shared = ArcMutex::new(Vec::new());
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                let handles: Vec<_> = (0..3)
                    .map(|i| {
                        let shared = shared.clone();
                        tokio::task::spawn_local(async move {
                            let mut guard = shared.lock().await;
                            guard.push(i);
                            tokio::task::yield_now().await;
                            guard.push(i);
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            })
            .await;

        let log = shared.lock().await;
        assert_eq!(*log, vec![0, 0, 1, 1, 2, 2]);
    }
}
