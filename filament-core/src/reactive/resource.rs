//! Async Resources
//!
//! A [`Resource`] bridges asynchronous work into the graph. It tracks a
//! synchronous input, runs an async fetcher with it on the runtime's
//! [`Spawner`], and publishes the result into a signal once the task
//! resolves. From there ordinary propagation takes over.
//!
//! Every fetch gets a generation number. When a task resolves after a newer
//! one has started, its result is dropped, so only the most recently
//! started fetch is ever observable.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use tracing::{debug, warn};

use super::context::untrack;
use super::effect::Effect;
use super::memo::Memo;
use super::owner::Owner;
use super::runtime::{batch, Reactive, Runtime};
use super::signal::Signal;
use super::stored::StoredValue;
use crate::error::{throw, ReactiveError, Result};
use crate::graph::NodeId;

/// Executor used to drive resource fetchers.
pub trait Spawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Spawns fetchers with [`tokio::task::spawn_local`].
///
/// # Panics
///
/// Spawning panics unless it happens inside a [`tokio::task::LocalSet`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

/// A value loaded asynchronously from a tracked input.
///
/// # Example
///
/// ```rust,no_run
/// use filament_core::reactive::{Resource, Signal};
///
/// # async fn demo() {
/// let user_id = Signal::new(1);
/// let user = Resource::new(move || user_id.get(), |id: u32| async move {
///     format!("user #{id}")
/// });
///
/// assert_eq!(user.read(), None);
/// user_id.set(2);
/// # }
/// ```
pub struct Resource<S, T> {
    scope: Owner,
    value: Signal<Option<T>>,
    loading: Signal<bool>,
    input: Effect,
    fetch: StoredValue<Rc<dyn Fn()>>,
    ty: PhantomData<fn() -> S>,
}

impl<S, T> Resource<S, T>
where
    S: Clone + PartialEq + 'static,
    T: 'static,
{
    /// Create a resource owned by the current owner.
    ///
    /// `source` is tracked; whenever its value changes, `fetcher` is called
    /// untracked with the new input and the returned future is spawned.
    pub fn new<Fut>(
        source: impl Fn() -> S + 'static,
        fetcher: impl Fn(S) -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = T> + 'static,
    {
        let scope = Owner::new();
        scope.with(|| {
            let value = Signal::new(None);
            let loading = Signal::new(false);
            let source = Memo::new(source);
            let generation = Rc::new(Cell::new(0_u64));
            let id = scope.id();

            let start: Rc<dyn Fn()> = Rc::new(move || {
                let task = generation.get() + 1;
                generation.set(task);
                let input = source.get_untracked();
                let future = untrack(|| fetcher(input));
                loading.set(true);

                let generation = Rc::clone(&generation);
                Runtime::spawner().spawn(
                    async move {
                        let result = future.await;
                        publish(id, task, generation.get(), value, loading, result);
                    }
                    .boxed_local(),
                );
            });

            let fetch = StoredValue::new(Rc::clone(&start));
            let input = Effect::new(move || {
                source.with(|_| ());
                untrack(|| start());
            });

            Self {
                scope,
                value,
                loading,
                input,
                fetch,
                ty: PhantomData,
            }
        })
    }
}

fn publish<T: 'static>(
    id: NodeId,
    task: u64,
    latest: u64,
    value: Signal<Option<T>>,
    loading: Signal<bool>,
    result: T,
) {
    if task != latest {
        let err = ReactiveError::AsyncTaskStale { id, task, latest };
        debug!(%err, "discarding stale resource result");
        return;
    }
    if value.is_disposed() {
        debug!(?id, "resource disposed before its fetch resolved");
        return;
    }
    batch(|| {
        value.set(Some(result));
        loading.set(false);
    });
}

impl<S: 'static, T: 'static> Resource<S, T> {
    /// The latest resolved value, or `None` before the first fetch
    /// resolves. Registers a dependency.
    #[track_caller]
    pub fn read(&self) -> Option<T>
    where
        T: Clone,
    {
        self.try_read().unwrap_or_else(|err| throw(err))
    }

    pub fn try_read(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.value.try_get()
    }

    /// Borrow the latest resolved value.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.value.with(|value| f(value.as_ref()))
    }

    /// Whether a fetch is in flight. Registers a dependency.
    #[track_caller]
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    /// Run the fetcher again with the current input.
    pub fn refetch(&self) {
        match self.fetch.try_with_value(Rc::clone) {
            Ok(start) => start(),
            Err(_) => warn!(id = ?self.scope.id(), "refetch on a disposed resource ignored"),
        }
    }
}

impl<S, T> Reactive for Resource<S, T> {
    fn node_id(&self) -> NodeId {
        self.scope.id()
    }

    fn mark_dirty(&self) {
        self.input.mark_dirty();
    }
}

impl<S, T> Clone for Resource<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Resource<S, T> {}

impl<S, T> fmt::Debug for Resource<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("scope", &self.scope.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::future::ready;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;
    use tracing_test::traced_test;

    /// Spawner that queues tasks for the test to drive by hand.
    #[derive(Clone, Default)]
    struct Queue(Rc<RefCell<Vec<LocalBoxFuture<'static, ()>>>>);

    impl Spawner for Queue {
        fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
            self.0.borrow_mut().push(task);
        }
    }

    impl Queue {
        fn install() -> Self {
            let queue = Self::default();
            Runtime::set_spawner(queue.clone());
            queue
        }

        fn take(&self) -> Vec<LocalBoxFuture<'static, ()>> {
            std::mem::take(&mut *self.0.borrow_mut())
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn resolves_into_the_value_signal() {
        let queue = Queue::install();
        let input = Signal::new(2);
        let resource = Resource::new(move || input.get(), |n: i32| ready(n * 10));

        assert_eq!(resource.read(), None);
        assert!(resource.loading());

        for task in queue.take() {
            assert!(task.now_or_never().is_some());
        }
        assert_eq!(resource.read(), Some(20));
        assert!(!resource.loading());
    }

    #[test]
    #[traced_test]
    fn older_task_finishing_last_is_discarded() {
        let queue = Queue::install();
        let input = Signal::new(1);
        let resource = Resource::new(move || input.get(), |n: i32| ready(n * 10));
        input.set(2);

        let mut tasks = queue.take();
        assert_eq!(tasks.len(), 2);
        while let Some(task) = tasks.pop() {
            task.now_or_never();
        }

        assert_eq!(resource.read(), Some(20));
        assert!(!resource.loading());
        assert!(logs_contain("discarding stale resource result"));
    }

    #[test]
    fn equal_input_does_not_refetch() {
        let queue = Queue::install();
        let input = Signal::new(1);
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        Resource::new(
            move || input.get() % 2,
            move |n: i32| {
                counter.set(counter.get() + 1);
                ready(n)
            },
        );
        input.set(3);
        assert_eq!(calls.get(), 1);

        input.set(4);
        assert_eq!(calls.get(), 2);
        assert_eq!(queue.take().len(), 2);
    }

    #[test]
    fn refetch_uses_current_input() {
        let queue = Queue::install();
        let input = Signal::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        let resource = Resource::new(
            move || input.get(),
            move |n: i32| {
                log.borrow_mut().push(n);
                ready(n)
            },
        );
        resource.refetch();
        assert_eq!(*seen.borrow(), vec![1, 1]);

        // The first fetch is superseded by the refetch.
        let tasks = queue.take();
        for task in tasks {
            task.now_or_never();
        }
        assert_eq!(resource.read(), Some(1));
    }

    #[test]
    fn effects_rerun_when_the_resource_resolves() {
        let queue = Queue::install();
        let resource = Resource::new(|| (), |()| ready("done"));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        Effect::new(move || log.borrow_mut().push((resource.read(), resource.loading())));

        for task in queue.take() {
            task.now_or_never();
        }
        assert_eq!(*seen.borrow(), vec![(None, true), (Some("done"), false)]);
    }

    #[test]
    fn disposed_resource_drops_late_results() {
        let queue = Queue::install();
        let resource = Resource::new(|| 7, |n: i32| ready(n));
        resource.dispose();
        assert!(resource.is_disposed());

        for task in queue.take() {
            task.now_or_never();
        }
        assert_eq!(
            resource.try_read(),
            Err(ReactiveError::UseAfterDispose {
                id: resource.value.id()
            })
        );
        resource.refetch();
    }

    #[tokio::test]
    async fn tokio_spawner_discards_stale_results_in_either_order() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let input = Signal::new(1);
                let senders: Rc<RefCell<Vec<oneshot::Sender<&'static str>>>> = Rc::default();

                let pending = Rc::clone(&senders);
                let resource = Resource::new(
                    move || input.get(),
                    move |n: i32| {
                        let (tx, rx) = oneshot::channel();
                        pending.borrow_mut().push(tx);
                        async move { format!("{n}:{}", rx.await.unwrap_or("dropped")) }
                    },
                );
                input.set(2);

                let mut txs = senders.take();
                let second = txs.pop().unwrap();
                let first = txs.pop().unwrap();

                second.send("b").unwrap();
                settle().await;
                assert_eq!(resource.read().as_deref(), Some("2:b"));

                first.send("a").unwrap();
                settle().await;
                assert_eq!(resource.read().as_deref(), Some("2:b"));

                // And the other way round: the older task resolves first.
                input.set(3);
                input.set(4);
                let mut txs = senders.take();
                let fourth = txs.pop().unwrap();
                let third = txs.pop().unwrap();

                third.send("c").unwrap();
                settle().await;
                assert_eq!(resource.read().as_deref(), Some("2:b"));
                assert!(resource.loading());

                fourth.send("d").unwrap();
                settle().await;
                assert_eq!(resource.read().as_deref(), Some("4:d"));
                assert!(!resource.loading());
            })
            .await;
    }
}
