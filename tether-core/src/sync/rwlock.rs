//! Cooperative Reader-Writer Lock
//!
//! Any number of readers or one writer. Queueing is writer-priority: once a
//! write request is waiting, readers that arrive later line up behind it
//! instead of joining the current readers, so a steady stream of readers
//! cannot starve a writer.

use std::fmt;
use std::ops::{Deref, DerefMut};

use tokio_util::sync::CancellationToken;

use super::mutex::Grant;
use super::queue::{Access, LockQueue};
use crate::error::TetherResult;

pub struct RwLock<T> {
    queue: LockQueue,
    value: parking_lot::RwLock<T>,
}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            queue: LockQueue::new(),
            value: parking_lot::RwLock::new(value),
        }
    }

    /// Acquire shared access.
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.queue.acquire(Access::Shared).await;
        self.read_guard()
    }

    /// Acquire exclusive access.
    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.queue.acquire(Access::Exclusive).await;
        self.write_guard()
    }

    pub async fn read_cancellable(
        &self,
        token: &CancellationToken,
    ) -> TetherResult<RwLockReadGuard<'_, T>> {
        self.queue.acquire_cancellable(Access::Shared, token).await?;
        Ok(self.read_guard())
    }

    pub async fn write_cancellable(
        &self,
        token: &CancellationToken,
    ) -> TetherResult<RwLockWriteGuard<'_, T>> {
        self.queue
            .acquire_cancellable(Access::Exclusive, token)
            .await?;
        Ok(self.write_guard())
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.queue
            .try_acquire(Access::Shared)
            .then(|| self.read_guard())
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.queue
            .try_acquire(Access::Exclusive)
            .then(|| self.write_guard())
    }

    /// Number of shared holders right now.
    pub fn readers(&self) -> usize {
        self.queue.readers()
    }

    pub fn is_write_locked(&self) -> bool {
        self.queue.has_writer()
    }

    pub fn queued(&self) -> usize {
        self.queue.queued()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, T> {
        RwLockReadGuard {
            inner: self.value.read(),
            _grant: Grant {
                queue: &self.queue,
                access: Access::Shared,
            },
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, T> {
        RwLockWriteGuard {
            inner: self.value.write(),
            _grant: Grant {
                queue: &self.queue,
                access: Access::Exclusive,
            },
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("readers", &self.readers())
            .field("writer", &self.is_write_locked())
            .field("queued", &self.queued())
            .finish()
    }
}

pub struct RwLockReadGuard<'a, T> {
    inner: parking_lot::RwLockReadGuard<'a, T>,
    _grant: Grant<'a>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

pub struct RwLockWriteGuard<'a, T> {
    inner: parking_lot::RwLockWriteGuard<'a, T>,
    _grant: Grant<'a>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;

    #[tokio::test]
    async fn many_readers_hold_at_once() {
        let lock = RwLock::new(3);
        let a = lock.read().await;
        let b = lock.read().await;
        let c = lock.read().await;
        assert_eq!(*a + *b + *c, 9);
        assert_eq!(lock.readers(), 3);
        assert!(lock.try_write().is_none());
    }

    #[tokio::test]
    async fn queued_writer_blocks_later_readers() {
        let lock = RwLock::new(0);
        let r1 = lock.read().await;
        let r2 = lock.read().await;

        let writer = lock.write();
        tokio::pin!(writer);
        assert!(futures_util::poll!(&mut writer).is_pending());

        let late_reader = lock.read();
        tokio::pin!(late_reader);
        assert!(futures_util::poll!(&mut late_reader).is_pending());
        assert!(lock.try_read().is_none());
        assert_eq!(lock.queued(), 2);

        drop(r1);
        assert!(futures_util::poll!(&mut late_reader).is_pending());
        drop(r2);

        let mut w = writer.await;
        *w = 42;
        assert!(futures_util::poll!(&mut late_reader).is_pending());
        drop(w);

        assert_eq!(*late_reader.await, 42);
    }

    #[tokio::test]
    async fn release_wakes_whole_reader_run() {
        let lock = RwLock::new(());
        let w = lock.write().await;

        let r1 = lock.read();
        let r2 = lock.read();
        tokio::pin!(r1, r2);
        assert!(futures_util::poll!(&mut r1).is_pending());
        assert!(futures_util::poll!(&mut r2).is_pending());

        drop(w);
        assert_eq!(lock.readers(), 2);
        let (_g1, _g2) = tokio::join!(r1, r2);
        assert_eq!(lock.queued(), 0);
    }

    #[tokio::test]
    async fn cancelling_queued_writer_releases_readers_behind_it() {
        let lock = RwLock::new(());
        let r1 = lock.read().await;
        let token = CancellationToken::new();

        let writer = lock.write_cancellable(&token);
        let reader = lock.read();
        tokio::pin!(writer, reader);
        assert!(futures_util::poll!(&mut writer).is_pending());
        assert!(futures_util::poll!(&mut reader).is_pending());

        token.cancel();
        assert!(matches!(writer.await, Err(TetherError::AcquireCancelled)));

        // The reader no longer has a writer ahead of it.
        let _r2 = reader.await;
        assert_eq!(lock.readers(), 2);
        drop(r1);
    }
}
