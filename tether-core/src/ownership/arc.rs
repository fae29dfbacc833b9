//! Cross-Task Reference Counting
//!
//! `Arc<T>` has the same counting rules as [`Rc`](super::Rc) but keeps its
//! slot state behind a `parking_lot::Mutex`, so handles can move between
//! tasks and threads when `T: Send + Sync`. Each clone, drop and upgrade is a
//! single critical section.
//!
//! Arc is the handle type composed with the cooperative locks
//! (see [`ArcMutex`](crate::sync::ArcMutex)).

use std::fmt;
use std::ops::Deref;
use std::sync::Arc as Shared;

use parking_lot::Mutex;
use tracing::trace;

type Teardown<T> = Box<dyn FnOnce(&mut T) + Send>;

struct SlotState<T> {
    strong: usize,
    weak: usize,
    value: Option<Shared<T>>,
    teardown: Option<Teardown<T>>,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

/// A shared-ownership handle intended for values shared across tasks.
pub struct Arc<T> {
    slot: Shared<Slot<T>>,
    /// Released before the strong count is decremented.
    value: Option<Shared<T>>,
}

impl<T> Arc<T> {
    /// Create a handle over a fresh slot.
    pub fn new(value: T) -> Self {
        Self::from_parts(value, None)
    }

    /// Create a handle with a teardown hook run when the last strong handle
    /// is dropped.
    pub fn with_teardown<F>(value: T, teardown: F) -> Self
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        Self::from_parts(value, Some(Box::new(teardown)))
    }

    fn from_parts(value: T, teardown: Option<Teardown<T>>) -> Self {
        let value = Shared::new(value);
        let slot = Shared::new(Slot {
            state: Mutex::new(SlotState {
                strong: 1,
                weak: 0,
                value: Some(Shared::clone(&value)),
                teardown,
            }),
        });
        Self {
            slot,
            value: Some(value),
        }
    }

    pub fn downgrade(this: &Self) -> ArcWeak<T> {
        this.slot.state.lock().weak += 1;
        ArcWeak {
            slot: Some(Shared::clone(&this.slot)),
        }
    }

    pub fn strong_count(this: &Self) -> usize {
        this.slot.state.lock().strong
    }

    pub fn weak_count(this: &Self) -> usize {
        this.slot.state.lock().weak
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Shared::ptr_eq(&this.slot, &other.slot)
    }
}

impl<T> Clone for Arc<T> {
    fn clone(&self) -> Self {
        let strong = {
            let mut state = self.slot.state.lock();
            state.strong += 1;
            state.strong
        };
        trace!(strong, "arc cloned");
        Self {
            slot: Shared::clone(&self.slot),
            value: self.value.clone(),
        }
    }
}

impl<T> Drop for Arc<T> {
    fn drop(&mut self) {
        // Once strong reaches zero the slot copy must be the only one left.
        self.value.take();

        let (value, teardown, reclaimed) = {
            let mut state = self.slot.state.lock();
            state.strong -= 1;
            if state.strong > 0 {
                trace!(strong = state.strong, "arc released");
                return;
            }
            (state.value.take(), state.teardown.take(), state.weak == 0)
        };

        if let (Some(mut value), Some(teardown)) = (value, teardown) {
            let value = Shared::get_mut(&mut value)
                .expect("arc value still shared after the last strong drop");
            teardown(value);
        }
        trace!(reclaimed, "arc value torn down");
    }
}

impl<T> Deref for Arc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_deref()
            .expect("live arc handle holds its value")
    }
}

impl<T: fmt::Debug> fmt::Debug for Arc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Weak counterpart of [`Arc`].
pub struct ArcWeak<T> {
    slot: Option<Shared<Slot<T>>>,
}

impl<T> ArcWeak<T> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Obtain a strong handle if the value is still alive.
    pub fn upgrade(&self) -> Option<Arc<T>> {
        let slot = self.slot.as_ref()?;
        let mut state = slot.state.lock();
        if state.strong == 0 {
            return None;
        }
        let value = Shared::clone(state.value.as_ref()?);
        state.strong += 1;
        Some(Arc {
            slot: Shared::clone(slot),
            value: Some(value),
        })
    }

    pub fn strong_count(&self) -> usize {
        self.slot.as_ref().map_or(0, |slot| slot.state.lock().strong)
    }

    pub fn weak_count(&self) -> usize {
        self.slot.as_ref().map_or(0, |slot| slot.state.lock().weak)
    }
}

impl<T> Default for ArcWeak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ArcWeak<T> {
    fn clone(&self) -> Self {
        if let Some(slot) = &self.slot {
            slot.state.lock().weak += 1;
        }
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Drop for ArcWeak<T> {
    fn drop(&mut self) {
        if let Some(slot) = &self.slot {
            let mut state = slot.state.lock();
            state.weak -= 1;
            if state.weak == 0 && state.strong == 0 {
                trace!("arc slot reclaimed");
            }
        }
    }
}

impl<T> fmt::Debug for ArcWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcWeak")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn arc_is_send_and_sync_for_sync_values() {
        assert_send_sync::<Arc<u64>>();
        assert_send_sync::<ArcWeak<String>>();
    }

    #[test]
    fn clones_across_threads_settle_to_one() {
        let torn_down = Shared::new(AtomicUsize::new(0));
        let counter = Shared::clone(&torn_down);
        let arc = Arc::with_teardown(7u64, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let local = arc.clone();
                std::thread::spawn(move || {
                    let extra = local.clone();
                    assert_eq!(*extra, 7);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Arc::strong_count(&arc), 1);
        drop(arc);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_last_drops_tear_down_exactly_once() {
        use std::sync::Barrier;

        for _ in 0..2_000 {
            let torn_down = Shared::new(AtomicUsize::new(0));
            let counter = Shared::clone(&torn_down);
            let arc = Arc::with_teardown(vec![1u8; 4], move |v: &mut Vec<u8>| {
                assert_eq!(v.len(), 4);
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let other = arc.clone();
            let barrier = Shared::new(Barrier::new(2));

            let remote = {
                let barrier = Shared::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    drop(other);
                })
            };
            barrier.wait();
            drop(arc);
            remote.join().unwrap();

            assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn weak_upgrade_stops_after_last_drop() {
        let arc = Arc::new(3);
        let weak = Arc::downgrade(&arc);
        assert_eq!(*weak.upgrade().unwrap(), 3);
        drop(arc);
        assert!(weak.upgrade().is_none());
        assert_eq!(weak.weak_count(), 1);
    }
}
