//! Single-Context Reference Counting
//!
//! `Rc<T>` and `Weak<T>` keep explicit strong/weak counts in a shared slot.
//! The counts, not the allocator, decide when the value is torn down:
//!
//! 1. `Rc::new` creates a slot with `strong = 1, weak = 0`.
//! 2. Cloning a strong handle bumps `strong`; `downgrade` bumps `weak`.
//! 3. When `strong` drops from 1 to 0 the teardown hook (if any) runs with
//!    `&mut T` and the value is dropped, right then.
//! 4. The slot itself goes away once no handle of either kind remains.
//!
//! Every count transition is a single borrow of the slot state with no user
//! code running in the middle, so `Weak::upgrade` is an indivisible
//! check-and-increment.
//!
//! Strong cycles are never collected. Back-references must be `Weak`.

use std::cell::RefCell as StateCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc as Shared;

use tracing::trace;

type Teardown<T> = Box<dyn FnOnce(&mut T)>;

struct SlotState<T> {
    strong: usize,
    weak: usize,
    /// Present while `strong > 0`; `upgrade` clones it into the new handle.
    value: Option<Shared<T>>,
    teardown: Option<Teardown<T>>,
}

struct Slot<T> {
    state: StateCell<SlotState<T>>,
}

/// A reference-counted shared-ownership handle.
///
/// # Example
///
/// ```rust
/// use tether_core::Rc;
///
/// let a = Rc::new(5);
/// let b = a.clone();
/// assert_eq!(Rc::strong_count(&a), 2);
///
/// let weak = Rc::downgrade(&a);
/// drop(a);
/// drop(b);
/// assert!(weak.upgrade().is_none());
/// ```
pub struct Rc<T> {
    slot: Shared<Slot<T>>,
    /// Released before the strong count is decremented.
    value: Option<Shared<T>>,
}

impl<T> Rc<T> {
    /// Create a handle over a fresh slot.
    pub fn new(value: T) -> Self {
        Self::from_parts(value, None)
    }

    /// Create a handle whose value is passed to `teardown` when the last
    /// strong handle is dropped, before the value itself is dropped.
    pub fn with_teardown<F>(value: T, teardown: F) -> Self
    where
        F: FnOnce(&mut T) + 'static,
    {
        Self::from_parts(value, Some(Box::new(teardown)))
    }

    fn from_parts(value: T, teardown: Option<Teardown<T>>) -> Self {
        let value = Shared::new(value);
        let slot = Shared::new(Slot {
            state: StateCell::new(SlotState {
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

    /// Create a non-owning handle to the same slot.
    pub fn downgrade(this: &Self) -> Weak<T> {
        this.slot.state.borrow_mut().weak += 1;
        Weak {
            slot: Some(Shared::clone(&this.slot)),
        }
    }

    /// Number of live strong handles.
    pub fn strong_count(this: &Self) -> usize {
        this.slot.state.borrow().strong
    }

    /// Number of live weak handles.
    pub fn weak_count(this: &Self) -> usize {
        this.slot.state.borrow().weak
    }

    /// True if both handles point at the same slot.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Shared::ptr_eq(&this.slot, &other.slot)
    }
}

impl<T> Clone for Rc<T> {
    fn clone(&self) -> Self {
        let strong = {
            let mut state = self.slot.state.borrow_mut();
            state.strong += 1;
            state.strong
        };
        trace!(strong, "rc cloned");
        Self {
            slot: Shared::clone(&self.slot),
            value: self.value.clone(),
        }
    }
}

impl<T> Drop for Rc<T> {
    fn drop(&mut self) {
        self.value.take();

        let (value, teardown, reclaimed) = {
            let mut state = self.slot.state.borrow_mut();
            state.strong -= 1;
            if state.strong > 0 {
                trace!(strong = state.strong, "rc released");
                return;
            }
            (state.value.take(), state.teardown.take(), state.weak == 0)
        };

        // Every handle releases its copy before counting down, so the slot
        // copy is the last reference here.
        if let (Some(mut value), Some(teardown)) = (value, teardown) {
            let value = Shared::get_mut(&mut value)
                .expect("rc value still shared after the last strong drop");
            teardown(value);
        }
        trace!(reclaimed, "rc value torn down");
    }
}

impl<T> Deref for Rc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_deref()
            .expect("live rc handle holds its value")
    }
}

impl<T: fmt::Debug> fmt::Debug for Rc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for Rc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: PartialEq> PartialEq for Rc<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

/// A non-owning handle that can try to regain ownership.
pub struct Weak<T> {
    /// `None` for a weak created with [`Weak::new`].
    slot: Option<Shared<Slot<T>>>,
}

impl<T> Weak<T> {
    /// A weak handle that is not attached to any slot and never upgrades.
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Obtain a strong handle if the value is still alive.
    pub fn upgrade(&self) -> Option<Rc<T>> {
        let slot = self.slot.as_ref()?;
        let mut state = slot.state.borrow_mut();
        if state.strong == 0 {
            return None;
        }
        let value = Shared::clone(state.value.as_ref()?);
        state.strong += 1;
        trace!(strong = state.strong, "weak upgraded");
        Some(Rc {
            slot: Shared::clone(slot),
            value: Some(value),
        })
    }

    /// Number of live strong handles, 0 for a detached weak.
    pub fn strong_count(&self) -> usize {
        self.slot
            .as_ref()
            .map_or(0, |slot| slot.state.borrow().strong)
    }

    /// Number of live weak handles, 0 for a detached weak.
    pub fn weak_count(&self) -> usize {
        self.slot.as_ref().map_or(0, |slot| slot.state.borrow().weak)
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(slot) = &self.slot {
            slot.state.borrow_mut().weak += 1;
        }
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(slot) = &self.slot {
            let mut state = slot.state.borrow_mut();
            state.weak -= 1;
            if state.weak == 0 && state.strong == 0 {
                trace!("rc slot reclaimed");
            }
        }
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}
