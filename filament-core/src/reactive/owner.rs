//! Ownership Tree
//!
//! Every node is owned by whichever computation (or explicit owner scope)
//! was current when it was created. Ownership follows the runtime call tree,
//! not the lexical structure of the code: an effect created inside a branch
//! of another effect belongs to that effect's current run and is disposed
//! when the outer effect re-runs.
//!
//! Disposal is depth-first: children first, then the node's cleanups, then
//! the node itself.

use std::marker::PhantomData;
use std::rc::Rc;

use super::runtime::{create_node, current_owner, dispose_node, with_graph, with_owner_id};
use crate::error::{throw, ReactiveError, Result};
use crate::graph::{Node, NodeId};

/// Handle to a node of the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: NodeId,
    local: PhantomData<Rc<()>>,
}

impl Owner {
    /// Create a scope owned by the current owner.
    pub fn new() -> Self {
        Self::from_id(create_node(Node::scope()))
    }

    /// Create a root scope with no parent. It lives until disposed.
    pub fn new_root() -> Self {
        Self::from_id(with_owner_id(None, || create_node(Node::scope())))
    }

    fn from_id(id: NodeId) -> Self {
        Self {
            id,
            local: PhantomData,
        }
    }

    /// The current owner, if any.
    pub fn current() -> Option<Self> {
        current_owner().map(Self::from_id)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run `body` with this scope as the ambient owner.
    ///
    /// # Panics
    ///
    /// Panics if the owner was disposed.
    #[track_caller]
    pub fn with<R>(&self, body: impl FnOnce() -> R) -> R {
        self.try_with(body).unwrap_or_else(|err| throw(err))
    }

    pub fn try_with<R>(&self, body: impl FnOnce() -> R) -> Result<R> {
        if self.is_disposed() {
            return Err(ReactiveError::UseAfterDispose { id: self.id });
        }
        Ok(with_owner_id(Some(self.id), body))
    }

    /// Dispose the scope and everything created under it.
    pub fn dispose(self) {
        dispose_node(self.id);
    }

    pub fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.id))
    }

    /// Number of nodes directly owned by this scope.
    pub fn child_count(&self) -> usize {
        with_graph(|graph| graph.get_node(self.id).map_or(0, |node| node.children().len()))
    }

    /// The owner of this scope, if it has one.
    pub fn parent(&self) -> Option<Self> {
        with_graph(|graph| graph.get_node(self.id).and_then(|node| node.owner()))
            .map(Self::from_id)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

/// Mount a reactive root: run `body` under a fresh root scope and return
/// its result together with the scope, whose `dispose` tears everything
/// down again.
pub fn mount<R>(body: impl FnOnce() -> R) -> (R, Owner) {
    let root = Owner::new_root();
    let result = with_owner_id(Some(root.id), body);
    (result, root)
}
