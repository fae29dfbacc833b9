//! Shared + Mutable Composite
//!
//! `RcRefCell<T>` is an [`Rc`] around a [`RefCell`]. Every clone shares the
//! same interior cell, so a borrow taken through one owner is visible to the
//! borrow checks of all the others.

use std::fmt;

use super::rc::{Rc, Weak};
use super::refcell::{BorrowState, Ref, RefCell, RefMut};
use crate::error::TetherResult;

pub struct RcRefCell<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> RcRefCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    pub fn borrow(&self) -> TetherResult<Ref<'_, T>> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> TetherResult<RefMut<'_, T>> {
        self.inner.borrow_mut()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> TetherResult<R> {
        self.inner.with(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> TetherResult<R> {
        self.inner.with_mut(f)
    }

    pub fn replace(&self, value: T) -> TetherResult<T> {
        self.inner.replace(value)
    }

    pub fn borrow_state(&self) -> BorrowState {
        self.inner.borrow_state()
    }

    /// Non-owning handle to the shared cell.
    pub fn downgrade(&self) -> Weak<RefCell<T>> {
        Rc::downgrade(&self.inner)
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> RcRefCell<T> {
    pub fn get(&self) -> TetherResult<T> {
        self.inner.get()
    }
}

impl<T> Clone for RcRefCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> From<Rc<RefCell<T>>> for RcRefCell<T> {
    fn from(inner: Rc<RefCell<T>>) -> Self {
        Self { inner }
    }
}

impl<T: fmt::Debug> fmt::Debug for RcRefCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcRefCell")
            .field("strong", &self.strong_count())
            .field("cell", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;

    #[test]
    fn clones_share_one_borrow_state() {
        let a = RcRefCell::new(vec![1]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));

        let guard = a.borrow_mut().unwrap();
        assert!(matches!(
            b.borrow(),
            Err(TetherError::BorrowConflict { .. })
        ));
        assert_eq!(b.borrow_state(), BorrowState::Exclusive);
        drop(guard);

        b.with_mut(|v| v.push(2)).unwrap();
        assert_eq!(a.get().unwrap(), vec![1, 2]);
    }

    #[test]
    fn weak_handle_outlives_owners_without_keeping_value() {
        let a = RcRefCell::new(5);
        let weak = a.downgrade();
        assert_eq!(a.strong_count(), 1);

        let revived: RcRefCell<i32> = weak.upgrade().unwrap().into();
        assert_eq!(a.strong_count(), 2);
        drop(revived);
        drop(a);

        assert!(weak.upgrade().is_none());
    }
}
