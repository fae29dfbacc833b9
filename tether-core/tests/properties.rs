//! Property tests for counts, borrow state and lock ordering.

use std::cell::Cell;
use std::rc::Rc as StdRc;

use futures_util::future::join_all;
use proptest::prelude::*;
use tether_core::{BorrowState, Mutex, Rc, RefCell};

proptest! {
    #[test]
    fn strong_count_tracks_clones_and_drops(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let torn_down = StdRc::new(Cell::new(0));
        let hook = torn_down.clone();
        let root = Rc::with_teardown((), move |_: &mut ()| hook.set(hook.get() + 1));

        let mut clones = Vec::new();
        let (mut cloned, mut dropped) = (0usize, 0usize);
        for clone in ops {
            if clone {
                clones.push(root.clone());
                cloned += 1;
            } else if clones.pop().is_some() {
                dropped += 1;
            }
            prop_assert_eq!(Rc::strong_count(&root), 1 + cloned - dropped);
        }

        let weak = Rc::downgrade(&root);
        let upgraded = weak.upgrade();
        prop_assert!(upgraded.is_some());
        prop_assert_eq!(Rc::strong_count(&root), 2 + cloned - dropped);
        drop(upgraded);

        drop(clones);
        prop_assert_eq!(torn_down.get(), 0);
        drop(root);
        prop_assert_eq!(torn_down.get(), 1);
        prop_assert!(weak.upgrade().is_none());
    }

    #[test]
    fn shared_borrows_stack_and_unwind(readers in 1usize..16) {
        let cell = RefCell::new(0u8);
        let guards: Vec<_> = (0..readers).map(|_| cell.borrow().unwrap()).collect();

        prop_assert_eq!(cell.borrow_state(), BorrowState::Shared(readers));
        prop_assert!(cell.borrow_mut().is_err());

        drop(guards);
        prop_assert_eq!(cell.borrow_state(), BorrowState::Unborrowed);
        prop_assert!(cell.borrow_mut().is_ok());
    }

    #[test]
    fn mutex_grants_follow_arrival_order(count in 1usize..12) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let order = runtime.block_on(async {
            let mutex = Mutex::new(Vec::new());
            let held = mutex.lock().await;

            let mut waiters: Vec<_> = (0..count)
                .map(|i| {
                    let mutex = &mutex;
                    Box::pin(async move { mutex.lock().await.push(i) })
                })
                .collect();
            for waiter in waiters.iter_mut() {
                assert!(futures_util::poll!(waiter.as_mut()).is_pending());
            }

            drop(held);
            join_all(waiters.into_iter().rev()).await;
            mutex.into_inner()
        });

        prop_assert_eq!(order, (0..count).collect::<Vec<_>>());
    }
}
