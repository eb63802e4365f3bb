//! Memo Implementation
//!
//! A Memo is a cached derived value. Readers see it like a signal, but its
//! value is produced by re-running a function under dependency tracking.
//!
//! # How Memos Work
//!
//! 1. On creation, the memo runs its function once and caches the result.
//!
//! 2. Reading it returns the cache and subscribes the reader. Reading a clean
//!    memo never triggers extra computation; a stale one is brought up to
//!    date first.
//!
//! 3. When a dependency changes, the memo is recomputed eagerly as part of
//!    the same propagation pass, in dependency order.
//!
//! 4. If the new value equals the cached one (by the memo's comparator), the
//!    memo stays quiet: its subscribers, which were only `Checking`, go back
//!    to clean without re-running.
//!
//! # Why This Matters
//!
//! Equality short-circuiting is what keeps effects from re-running when an
//! upstream change does not alter anything they actually observe.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{create_node, hold, read_value, run_node, with_graph, PanicPolicy, Reactive};
use super::signal::impl_handle_traits;
use crate::error::{throw, Access, ReactiveError, Result};
use crate::graph::{Computation, Node, NodeId};

/// Body of a memo: the user function plus the cached value it feeds.
struct MemoComputation<T, F, E> {
    compute: F,
    eq: E,
    value: Rc<RefCell<Option<T>>>,
}

impl<T, F, E> Computation for MemoComputation<T, F, E>
where
    F: Fn() -> T,
    E: Fn(&T, &T) -> bool,
{
    fn run(&self) -> bool {
        let next = (self.compute)();
        let Ok(mut slot) = self.value.try_borrow_mut() else {
            panic!("memo value is still borrowed while it recomputes");
        };
        match slot.as_ref() {
            Some(previous) if (self.eq)(previous, &next) => false,
            _ => {
                *slot = Some(next);
                true
            }
        }
    }

    fn output_borrowed(&self) -> bool {
        self.value.try_borrow_mut().is_err()
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Memo::new(move || count.get() * 2);
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T> {
    id: NodeId,
    ty: PhantomData<(fn() -> T, Rc<()>)>,
}

impl<T: 'static> Memo<T> {
    /// Create a memo that compares results with `PartialEq`.
    ///
    /// The function runs immediately.
    #[track_caller]
    pub fn new(compute: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_compare(compute, |old, new| old == new)
    }

    /// Create a memo with a custom equality. `eq(old, new)` returning `true`
    /// keeps the old value and does not notify subscribers.
    #[track_caller]
    pub fn new_with_compare(
        compute: impl Fn() -> T + 'static,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let computation = Rc::new(MemoComputation {
            compute,
            eq,
            value: Rc::clone(&value),
        });
        let id = create_node(
            Node::derived()
                .with_value(value)
                .with_computation(computation),
        );
        hold(|| run_node(id, PanicPolicy::Propagate));

        Self {
            id,
            ty: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the cached value, registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the memo was disposed or is read from its own function.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| throw(err))
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        with_memo(self.id, true, f)
    }

    #[track_caller]
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_memo(self.id, false, f).unwrap_or_else(|err| throw(err))
    }

    #[track_caller]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    #[track_caller]
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(T::clone)
    }

    /// Number of times the cached value changed.
    pub fn version(&self) -> u64 {
        with_graph(|graph| graph.get_node(self.id).map_or(0, |node| node.version()))
    }

    /// Number of times the function ran.
    pub fn run_count(&self) -> u64 {
        with_graph(|graph| graph.get_node(self.id).map_or(0, |node| node.run_count()))
    }

    pub fn subscriber_count(&self) -> usize {
        with_graph(|graph| {
            graph
                .get_node(self.id)
                .map_or(0, |node| node.subscribers().len())
        })
    }
}

impl<T> Reactive for Memo<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

fn with_memo<T: 'static, R>(id: NodeId, track: bool, f: impl FnOnce(&T) -> R) -> Result<R> {
    let cell = read_value::<RefCell<Option<T>>>(id, track)?;
    let value = cell.try_borrow().map_err(|_| ReactiveError::BorrowConflict {
        id,
        access: Access::Read,
    })?;
    match value.as_ref() {
        Some(value) => Ok(f(value)),
        None => Err(ReactiveError::CircularRead { id }),
    }
}

impl_handle_traits!(Memo);

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
