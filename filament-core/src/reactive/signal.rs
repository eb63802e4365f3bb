//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    read is recorded as a dependency of that computation.
//!
//! 2. When a signal is written, its version is bumped and every subscriber
//!    is marked dirty.
//!
//! 3. The scheduler re-runs the dirty computations, either right away or at
//!    the next flush point.
//!
//! # Memory Layout
//!
//! A `Signal<T>` handle is just a generation-tagged arena key, so it is
//! `Copy` and can be moved into any number of closures. The value itself
//! lives in the graph node, behind a `RefCell` that enforces the borrow
//! discipline: a read borrow (`with`) and a write borrow (`update`) of the
//! same signal can never overlap.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::warn;

use super::runtime::{create_node, dispose_node, notify_changed, read_value, value_of, with_graph};
use crate::error::{throw, Access, ReactiveError, Result};
use crate::graph::{Node, NodeId};

/// Create a signal and return its read and write halves.
pub fn signal<T: 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}

/// A reactive signal holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    id: NodeId,
    ty: PhantomData<(fn() -> T, Rc<()>)>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal owned by the current owner.
    pub fn new(value: T) -> Self {
        let cell: Rc<RefCell<T>> = Rc::new(RefCell::new(value));
        Self {
            id: create_node(Node::source().with_value(cell)),
            ty: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the value, registering the current computation as a
    /// subscriber.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed or is being written.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| throw(err))
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        with_cell(self.id, true, f)
    }

    /// Borrow the value without subscribing to it.
    #[track_caller]
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_cell(self.id, false, f).unwrap_or_else(|err| throw(err))
    }

    /// Get a clone of the value, registering a dependency.
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

    /// Get a clone of the value without registering a dependency.
    #[track_caller]
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(T::clone)
    }

    /// Replace the value and notify subscribers.
    ///
    /// Writing a disposed signal logs a warning and does nothing.
    #[track_caller]
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    pub fn try_set(&self, value: T) -> Result<()> {
        self.try_update(|current| *current = value)
    }

    /// Mutate the value in place and notify subscribers.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently borrowed by `with` on the stack.
    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_update(f) {
            write_failed(err);
        }
    }

    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        update_cell(self.id, f)
    }

    /// Number of value changes since creation.
    pub fn version(&self) -> u64 {
        version_of(self.id)
    }

    pub fn subscriber_count(&self) -> usize {
        subscriber_count(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.id))
    }

    /// Dispose the signal ahead of its owner.
    pub fn dispose(self) {
        dispose_node(self.id);
    }

    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (self.read_only(), self.write_only())
    }

    pub fn read_only(self) -> ReadSignal<T> {
        ReadSignal {
            id: self.id,
            ty: PhantomData,
        }
    }

    pub fn write_only(self) -> WriteSignal<T> {
        WriteSignal {
            id: self.id,
            ty: PhantomData,
        }
    }
}

/// The read half of a signal.
pub struct ReadSignal<T> {
    id: NodeId,
    ty: PhantomData<(fn() -> T, Rc<()>)>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| throw(err))
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        with_cell(self.id, true, f)
    }

    #[track_caller]
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_cell(self.id, false, f).unwrap_or_else(|err| throw(err))
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

    pub fn version(&self) -> u64 {
        version_of(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.id))
    }
}

/// The write half of a signal.
pub struct WriteSignal<T> {
    id: NodeId,
    ty: PhantomData<(fn() -> T, Rc<()>)>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[track_caller]
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    pub fn try_set(&self, value: T) -> Result<()> {
        self.try_update(|current| *current = value)
    }

    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_update(f) {
            write_failed(err);
        }
    }

    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        update_cell(self.id, f)
    }

    pub fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.id))
    }
}

fn with_cell<T: 'static, R>(id: NodeId, track: bool, f: impl FnOnce(&T) -> R) -> Result<R> {
    let cell = read_value::<RefCell<T>>(id, track)?;
    let value = cell.try_borrow().map_err(|_| ReactiveError::BorrowConflict {
        id,
        access: Access::Read,
    })?;
    Ok(f(&*value))
}

fn update_cell<T: 'static, R>(id: NodeId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
    let cell = value_of::<RefCell<T>>(id)?;
    let result = {
        let mut value = cell.try_borrow_mut().map_err(|_| ReactiveError::BorrowConflict {
            id,
            access: Access::Write,
        })?;
        f(&mut *value)
    };
    notify_changed(id);
    Ok(result)
}

/// Writes to disposed signals are skipped; anything else is a bug.
#[track_caller]
fn write_failed(err: ReactiveError) {
    match err {
        ReactiveError::UseAfterDispose { id } => {
            warn!(?id, "write to a disposed signal ignored");
        }
        other => throw(other),
    }
}

fn version_of(id: NodeId) -> u64 {
    with_graph(|graph| graph.get_node(id).map_or(0, |node| node.version()))
}

fn subscriber_count(id: NodeId) -> usize {
    with_graph(|graph| graph.get_node(id).map_or(0, |node| node.subscribers().len()))
}

macro_rules! impl_handle_traits {
    ($($handle:ident),*) => {$(
        impl<T> Clone for $handle<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $handle<T> {}

        impl<T> PartialEq for $handle<T> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<T> Eq for $handle<T> {}

        impl<T> ::std::hash::Hash for $handle<T> {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                ::std::hash::Hash::hash(&self.id, state);
            }
        }

        impl<T> ::std::fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("id", &self.id)
                    .finish()
            }
        }
    )*};
}

impl_handle_traits!(Signal, ReadSignal, WriteSignal);

pub(crate) use impl_handle_traits;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
