//! Runtime-Checked Interior Mutability
//!
//! `RefCell<T>` tracks an explicit [`BorrowState`] and rejects any borrow
//! that would break the shared-xor-exclusive rule with
//! [`TetherError::BorrowConflict`]. Guards revert the state when dropped,
//! which includes unwinding out of a panicking closure.

use std::cell::{Cell, RefCell as Storage};
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{TetherError, TetherResult};

/// The kind of borrow being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowKind {
    Shared,
    Exclusive,
}

/// Current borrow state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorrowState {
    #[default]
    Unborrowed,
    /// Number of live shared guards, always >= 1.
    Shared(usize),
    Exclusive,
}

/// A mutable memory location with runtime-checked borrow rules.
pub struct RefCell<T> {
    state: Cell<BorrowState>,
    // The storage is only touched while our own state machine permits it.
    value: Storage<T>,
}

impl<T> RefCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Cell::new(BorrowState::Unborrowed),
            value: Storage::new(value),
        }
    }

    /// Acquire a shared guard.
    ///
    /// Fails while an exclusive guard is alive.
    pub fn borrow(&self) -> TetherResult<Ref<'_, T>> {
        let next = match self.state.get() {
            BorrowState::Unborrowed => BorrowState::Shared(1),
            BorrowState::Shared(n) => BorrowState::Shared(n + 1),
            state @ BorrowState::Exclusive => {
                return Err(conflict(BorrowKind::Shared, state));
            }
        };
        let inner = self
            .value
            .try_borrow()
            .map_err(|_| conflict(BorrowKind::Shared, self.state.get()))?;
        self.state.set(next);
        Ok(Ref {
            inner,
            state: &self.state,
        })
    }

    /// Acquire the exclusive guard.
    ///
    /// Fails while any guard is alive.
    pub fn borrow_mut(&self) -> TetherResult<RefMut<'_, T>> {
        let state = self.state.get();
        if state != BorrowState::Unborrowed {
            return Err(conflict(BorrowKind::Exclusive, state));
        }
        let inner = self
            .value
            .try_borrow_mut()
            .map_err(|_| conflict(BorrowKind::Exclusive, state))?;
        self.state.set(BorrowState::Exclusive);
        Ok(RefMut {
            inner,
            state: &self.state,
        })
    }

    /// Run `f` with a shared borrow held for its duration.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> TetherResult<R> {
        let guard = self.borrow()?;
        Ok(f(&guard))
    }

    /// Run `f` with the exclusive borrow held for its duration.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> TetherResult<R> {
        let mut guard = self.borrow_mut()?;
        Ok(f(&mut guard))
    }

    /// Swap in a new value, returning the old one.
    pub fn replace(&self, value: T) -> TetherResult<T> {
        self.with_mut(|slot| std::mem::replace(slot, value))
    }

    pub fn borrow_state(&self) -> BorrowState {
        self.state.get()
    }

    /// Mutable access through a unique reference; no runtime check needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Clone> RefCell<T> {
    /// Clone the value out under a shared borrow.
    pub fn get(&self) -> TetherResult<T> {
        self.with(T::clone)
    }
}

impl<T: Default> Default for RefCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("RefCell");
        match self.borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &format_args!("<borrowed>")),
        };
        out.finish()
    }
}

fn conflict(requested: BorrowKind, state: BorrowState) -> TetherError {
    TetherError::BorrowConflict { requested, state }
}

/// Shared guard returned by [`RefCell::borrow`].
#[derive(Debug)]
pub struct Ref<'a, T> {
    inner: std::cell::Ref<'a, T>,
    state: &'a Cell<BorrowState>,
}

impl<T> Deref for Ref<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> Drop for Ref<'_, T> {
    fn drop(&mut self) {
        let next = match self.state.get() {
            BorrowState::Shared(n) if n > 1 => BorrowState::Shared(n - 1),
            _ => BorrowState::Unborrowed,
        };
        self.state.set(next);
    }
}

/// Exclusive guard returned by [`RefCell::borrow_mut`].
pub struct RefMut<'a, T> {
    inner: std::cell::RefMut<'a, T>,
    state: &'a Cell<BorrowState>,
}

impl<T> Deref for RefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for RefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for RefMut<'_, T> {
    fn drop(&mut self) {
        self.state.set(BorrowState::Unborrowed);
    }
}
