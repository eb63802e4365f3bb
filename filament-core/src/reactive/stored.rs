//! Non-reactive storage that lives in the ownership tree.
//!
//! A [`StoredValue`] is disposed together with its owner like any other
//! node, but reading it never subscribes and writing it never notifies.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{create_node, dispose_node, value_of, with_graph};
use super::signal::impl_handle_traits;
use crate::error::{throw, Access, ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind};

/// An owned, `Copy` handle to a value that does not participate in
/// dependency tracking.
pub struct StoredValue<T> {
    id: NodeId,
    ty: PhantomData<(fn() -> T, Rc<()>)>,
}

impl<T: 'static> StoredValue<T> {
    pub fn new(value: T) -> Self {
        let cell: Rc<RefCell<T>> = Rc::new(RefCell::new(value));
        Self {
            id: create_node(Node::new(NodeKind::Stored).with_value(cell)),
            ty: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    #[track_caller]
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with_value(f).unwrap_or_else(|err| throw(err))
    }

    pub fn try_with_value<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let cell = value_of::<RefCell<T>>(self.id)?;
        let value = cell.try_borrow().map_err(|_| ReactiveError::BorrowConflict {
            id: self.id,
            access: Access::Read,
        })?;
        Ok(f(&*value))
    }

    #[track_caller]
    pub fn get_value(&self) -> T
    where
        T: Clone,
    {
        self.with_value(T::clone)
    }

    #[track_caller]
    pub fn set_value(&self, value: T) {
        self.update_value(|current| *current = value);
    }

    #[track_caller]
    pub fn update_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.try_update_value(f).unwrap_or_else(|err| throw(err))
    }

    pub fn try_update_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let cell = value_of::<RefCell<T>>(self.id)?;
        let mut value = cell.try_borrow_mut().map_err(|_| ReactiveError::BorrowConflict {
            id: self.id,
            access: Access::Write,
        })?;
        Ok(f(&mut *value))
    }

    pub fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.id))
    }

    pub fn dispose(self) {
        dispose_node(self.id);
    }
}

impl_handle_traits!(StoredValue);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{mount, Effect};
    use std::cell::Cell;

    #[test]
    fn stored_value_reads_and_writes() {
        let stored = StoredValue::new(String::from("a"));
        stored.update_value(|s| s.push('b'));
        assert_eq!(stored.get_value(), "ab");

        stored.set_value(String::from("c"));
        assert_eq!(stored.with_value(String::len), 1);
    }

    #[test]
    fn stored_value_is_not_tracked() {
        let stored = StoredValue::new(0);
        let runs = Rc::new(Cell::new(0));

        let counter = Rc::clone(&runs);
        Effect::new(move || {
            stored.get_value();
            counter.set(counter.get() + 1);
        });

        stored.set_value(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stored_value_is_disposed_with_its_owner() {
        let (stored, root) = mount(|| StoredValue::new(1));
        root.dispose();

        assert!(stored.is_disposed());
        assert_eq!(
            stored.try_with_value(|v| *v),
            Err(ReactiveError::UseAfterDispose { id: stored.id() })
        );
    }

    #[test]
    fn nested_write_is_a_borrow_conflict() {
        let stored = StoredValue::new(0);
        let result = stored.with_value(|_| stored.try_update_value(|v| *v += 1));
        assert!(matches!(
            result,
            Err(ReactiveError::BorrowConflict {
                access: Access::Write,
                ..
            })
        ));
    }
}
