//! Async Effect
//!
//! An `AsyncEffect` is a watcher whose body starts asynchronous work. The
//! body runs synchronously inside the graph (so its reads are tracked) and
//! returns a future; the future is queued for the effect's driver task and
//! its output is handed to `apply` when it resolves.
//!
//! The driver is spawned on the current [`LocalSet`] when the effect is
//! created. Triggering only queues work, so writes that reach the effect
//! from outside the `LocalSet` are picked up the next time it runs.
//!
//! # Stale Results
//!
//! Every trigger is tagged with a run id that only grows. When a future
//! resolves, its output is applied only if its run id is still the latest
//! one issued; otherwise it is dropped and counted as discarded. In-flight
//! work is never aborted.
//!
//! Only reads made by the body before it returns its future are tracked.
//! Reads inside the future happen outside any evaluation.
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures_util::future::LocalBoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::error::{TetherError, TetherResult};
use crate::graph::{Graph, NodeId, NodeKind, Reactive};

type Body<T> = Box<dyn Fn() -> TetherResult<LocalBoxFuture<'static, T>>>;

/// Runs handed from the effect to its driver task.
#[derive(Default)]
struct RunQueue {
    incoming: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    wake: Notify,
    /// Queued or polling, not yet resolved.
    in_flight: Cell<usize>,
    settled: Notify,
    closed: Cell<bool>,
}

impl RunQueue {
    fn push(&self, run: LocalBoxFuture<'static, ()>) {
        self.in_flight.set(self.in_flight.get() + 1);
        self.incoming.borrow_mut().push(run);
        self.wake.notify_one();
    }

    fn resolved(&self) {
        let left = self.in_flight.get().saturating_sub(1);
        self.in_flight.set(left);
        if left == 0 {
            self.settled.notify_waiters();
        }
    }

    fn close(&self) {
        self.closed.set(true);
        self.wake.notify_one();
    }
}

/// Poll every queued run until the effect is gone and nothing is left.
async fn drive(queue: Rc<RunQueue>) {
    let mut runs = FuturesUnordered::new();
    loop {
        runs.extend(queue.incoming.borrow_mut().drain(..));
        if runs.is_empty() {
            if queue.closed.get() {
                break;
            }
            queue.wake.notified().await;
            continue;
        }
        tokio::select! {
            Some(()) = runs.next() => queue.resolved(),
            () = queue.wake.notified() => {}
        }
    }
    trace!("async effect driver stopped");
}

struct EffectInner<T> {
    id: NodeId,
    graph: Graph,
    body: Body<T>,
    apply: Box<dyn Fn(T)>,
    this: Weak<EffectInner<T>>,
    latest_run: Cell<u64>,
    applied_run: Cell<u64>,
    discarded: Cell<usize>,
    runs: Rc<RunQueue>,
    last_error: RefCell<Option<TetherError>>,
    disposed: Cell<bool>,
}

impl<T: 'static> EffectInner<T> {
    fn start(&self) {
        if self.disposed.get() {
            return;
        }
        let run = self.latest_run.get() + 1;
        self.latest_run.set(run);

        let future = match self.graph.evaluate(self.id, || (self.body)()) {
            Ok(future) => future,
            Err(error) => {
                warn!(node = %self.id, run, %error, "async effect body failed");
                *self.last_error.borrow_mut() = Some(error);
                return;
            }
        };
        *self.last_error.borrow_mut() = None;

        let effect = self.this.clone();
        self.runs.push(
            async move {
                let output = future.await;
                if let Some(effect) = effect.upgrade() {
                    effect.finish(run, output);
                }
            }
            .boxed_local(),
        );
        debug!(
            node = %self.id,
            run,
            in_flight = self.runs.in_flight.get(),
            "async effect started"
        );
    }

    fn finish(&self, run: u64, output: T) {
        if self.disposed.get() || run != self.latest_run.get() {
            self.discarded.set(self.discarded.get() + 1);
            debug!(
                node = %self.id,
                run,
                latest = self.latest_run.get(),
                "stale async result discarded"
            );
            return;
        }
        self.applied_run.set(run);
        (self.apply)(output);
    }
}

impl<T: 'static> Reactive for EffectInner<T> {
    fn update(&self) -> TetherResult<()> {
        if self.disposed.get() {
            return Ok(());
        }
        if self.graph.is_stale(self.id)? {
            self.start();
        }
        Ok(())
    }
}

impl<T> Drop for EffectInner<T> {
    fn drop(&mut self) {
        self.runs.close();
        self.graph.unregister(self.id);
    }
}

/// An eager subscriber whose body yields a future.
///
/// Must be created inside a [`tokio::task::LocalSet`], which also has to
/// be running for queued runs to make progress.
pub struct AsyncEffect<T> {
    inner: Rc<EffectInner<T>>,
}

impl<T: 'static> AsyncEffect<T> {
    /// Create the effect and start its first run.
    ///
    /// `body` is re-run whenever a node it read changes. `apply` receives the
    /// output of the latest run only.
    pub fn new<B, Fut, A>(graph: &Graph, body: B, apply: A) -> TetherResult<Self>
    where
        B: Fn() -> TetherResult<Fut> + 'static,
        Fut: Future<Output = T> + 'static,
        A: Fn(T) + 'static,
    {
        let runs = Rc::new(RunQueue::default());
        tokio::task::spawn_local(drive(Rc::clone(&runs)));

        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner<T>>| {
            let reaction: Weak<dyn Reactive> = weak.clone();
            EffectInner {
                id: graph.register(NodeKind::AsyncEffect, Some(reaction)),
                graph: graph.clone(),
                body: Box::new(move || body().map(FutureExt::boxed_local)),
                apply: Box::new(apply),
                this: weak.clone(),
                latest_run: Cell::new(0),
                applied_run: Cell::new(0),
                discarded: Cell::new(0),
                runs,
                last_error: RefCell::new(None),
                disposed: Cell::new(false),
            }
        });

        inner.start();
        graph.flush_if_idle()?;

        Ok(Self { inner })
    }

    /// Start a new run now, superseding any run still in flight.
    pub fn trigger(&self) -> TetherResult<()> {
        if self.inner.disposed.get() {
            return Err(TetherError::UseAfterFree {
                what: "async effect",
            });
        }
        self.inner.start();
        self.inner.graph.flush_if_idle()
    }
}

impl<T> AsyncEffect<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Wait until every queued run has resolved, including runs started by
    /// `apply` callbacks along the way.
    pub async fn settle(&self) {
        let runs = &self.inner.runs;
        loop {
            let settled = runs.settled.notified();
            if runs.in_flight.get() == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Run id of the most recent trigger.
    pub fn latest_run(&self) -> u64 {
        self.inner.latest_run.get()
    }

    /// Run id whose output was last applied, 0 if none yet.
    pub fn applied_run(&self) -> u64 {
        self.inner.applied_run.get()
    }

    /// Number of outputs dropped because a newer run had started.
    pub fn discarded(&self) -> usize {
        self.inner.discarded.get()
    }

    /// The error returned by the most recent body call, if it failed.
    pub fn last_error(&self) -> Option<TetherError> {
        self.inner.last_error.borrow().clone()
    }

    /// Detach the effect. Outputs of runs still in flight are discarded.
    pub fn dispose(&self) {
        if !self.inner.disposed.replace(true) {
            self.inner.graph.unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl<T> Clone for AsyncEffect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AsyncEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEffect")
            .field("id", &self.inner.id)
            .field("latest_run", &self.inner.latest_run.get())
            .field("applied_run", &self.inner.applied_run.get())
            .field("discarded", &self.inner.discarded.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn applies_the_output_of_the_first_run() {
        LocalSet::new()
            .run_until(async {
                let graph = Graph::new();
                let seen = Rc::new(Cell::new(0));
                let effect = {
                    let seen = seen.clone();
                    AsyncEffect::new(&graph, || Ok(async { 7 }), move |n| seen.set(n)).unwrap()
                };

                effect.settle().await;
                assert_eq!(seen.get(), 7);
                assert_eq!(effect.applied_run(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn only_the_latest_run_is_applied() {
        LocalSet::new()
            .run_until(async {
                let graph = Graph::new();
                let senders: Rc<RefCell<Vec<oneshot::Sender<&'static str>>>> = Default::default();
                let applied = Rc::new(RefCell::new(Vec::new()));

                let effect = {
                    let (senders, applied) = (senders.clone(), applied.clone());
                    AsyncEffect::new(
                        &graph,
                        move || {
                            let (tx, rx) = oneshot::channel();
                            senders.borrow_mut().push(tx);
                            Ok(async move { rx.await.unwrap_or("dropped") })
                        },
                        move |out| applied.borrow_mut().push(out),
                    )
                    .unwrap()
                };
                effect.trigger().unwrap();
                assert_eq!(effect.latest_run(), 2);

                let mut pending = std::mem::take(&mut *senders.borrow_mut());
                let second = pending.pop().unwrap();
                let first = pending.pop().unwrap();
                second.send("second").unwrap();
                first.send("first").unwrap();
                effect.settle().await;

                assert_eq!(*applied.borrow(), vec!["second"]);
                assert_eq!(effect.discarded(), 1);
                assert_eq!(effect.applied_run(), 2);
            })
            .await;
    }

    #[tokio::test]
    async fn reruns_when_a_tracked_read_changes() {
        LocalSet::new()
            .run_until(async {
                let graph = Graph::new();
                let query = Signal::new(&graph, 1);
                let result = Rc::new(Cell::new(0));

                let effect = {
                    let (query, result) = (query.clone(), result.clone());
                    AsyncEffect::new(
                        &graph,
                        move || {
                            let q = query.get()?;
                            Ok(async move {
                                tokio::task::yield_now().await;
                                q * 100
                            })
                        },
                        move |n| result.set(n),
                    )
                    .unwrap()
                };

                query.set(2).unwrap();
                effect.settle().await;

                assert_eq!(effect.latest_run(), 2);
                assert_eq!(result.get(), 200);
                assert_eq!(effect.discarded(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn disposal_discards_in_flight_output() {
        LocalSet::new()
            .run_until(async {
                let graph = Graph::new();
                let applied = Rc::new(Cell::new(false));
                let effect = {
                    let applied = applied.clone();
                    AsyncEffect::new(
                        &graph,
                        || Ok(tokio::task::yield_now()),
                        move |()| applied.set(true),
                    )
                    .unwrap()
                };

                effect.dispose();
                effect.settle().await;

                assert!(!applied.get());
                assert_eq!(effect.discarded(), 1);
                assert_eq!(
                    effect.trigger(),
                    Err(TetherError::UseAfterFree {
                        what: "async effect"
                    })
                );
            })
            .await;
    }

    #[tokio::test]
    async fn writes_outside_the_local_set_are_queued() {
        let local = LocalSet::new();
        let graph = Graph::new();
        let query = Signal::new(&graph, 1);
        let result = Rc::new(Cell::new(0));

        let effect = local
            .run_until(async {
                let (query, result) = (query.clone(), result.clone());
                AsyncEffect::new(
                    &graph,
                    move || {
                        let q = query.get()?;
                        Ok(async move { q * 100 })
                    },
                    move |n| result.set(n),
                )
                .unwrap()
            })
            .await;

        query.set(2).unwrap();
        assert_eq!(effect.latest_run(), 2);

        local.run_until(effect.settle()).await;
        assert_eq!(result.get(), 200);
        assert_eq!(effect.applied_run(), 2);
    }

    #[tokio::test]
    async fn body_errors_start_no_run() {
        LocalSet::new()
            .run_until(async {
                let graph = Graph::new();
                let effect = AsyncEffect::new(
                    &graph,
                    || Err::<std::future::Ready<()>, _>(TetherError::Config("offline".into())),
                    |()| {},
                )
                .unwrap();

                effect.settle().await;
                assert_eq!(effect.latest_run(), 1);
                assert_eq!(effect.applied_run(), 0);
                assert_eq!(
                    effect.last_error(),
                    Some(TetherError::Config("offline".into()))
                );
            })
            .await;
    }
}
