//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every reactive primitive (cell, memo, effect, owner scope, stored value)
//! is one node; the handles handed out to users are just `NodeId`s.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

new_key_type! {
    /// Generation-tagged identifier for a node in the dependency graph.
    ///
    /// Disposing a node frees its slot and bumps the slot's generation, so a
    /// stale `NodeId` is detected instead of aliasing a newer node.
    pub struct NodeId;
}

/// Dependency list of a computation, in the order the sources were first read.
pub type Sources = SmallVec<[NodeId; 4]>;

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node (cell/signal). Has subscribers, never dependencies.
    Source,

    /// A derived node (memo). Has dependencies and may have subscribers.
    /// It caches its computed value.
    Derived,

    /// An effect node. A pure sink: dependencies but no subscribers.
    Effect,

    /// An ownership scope with no body of its own (roots, resource scopes).
    Owner,

    /// A non-reactive value owned by the tree.
    Stored,
}

impl NodeKind {
    /// Whether nodes of this kind have a body that the scheduler re-runs.
    pub fn is_computation(self) -> bool {
        matches!(self, NodeKind::Derived | NodeKind::Effect)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Source => "signal",
            NodeKind::Derived => "memo",
            NodeKind::Effect => "effect",
            NodeKind::Owner => "owner",
            NodeKind::Stored => "stored value",
        };
        f.write_str(name)
    }
}

/// Scheduling state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node is up-to-date.
    Clean,

    /// A memo upstream changed; the node re-runs only if that memo's value
    /// turns out to be different.
    Checking,

    /// A direct dependency changed. The node must re-run.
    Dirty,

    /// The node was disposed. Never stored on a live node; reported for
    /// stale ids.
    Disposed,
}

/// A body the scheduler can re-run.
///
/// Effects and memos differ only in what they do with the result, so this
/// is the whole capability surface. `run` returns whether the node's
/// observable output changed (always `false` for effects).
pub(crate) trait Computation {
    fn run(&self) -> bool;

    /// Whether a reader still borrows the output, so `run` cannot store a
    /// new one.
    fn output_borrowed(&self) -> bool {
        false
    }
}

/// A node in the dependency graph.
pub struct Node {
    kind: NodeKind,
    state: NodeState,

    /// Bumped every time the node's value is replaced by a different one.
    version: u64,

    /// Number of completed runs of the node's body.
    runs: u64,

    /// Nodes this node read during its last successful run.
    sources: Sources,

    /// Nodes that read this node during their last successful run.
    subscribers: IndexSet<NodeId>,

    /// The owner that created this node, if any.
    owner: Option<NodeId>,

    /// Nodes created while this node was the current owner.
    children: Vec<NodeId>,

    /// Callbacks to run before the next re-run or on disposal.
    cleanups: Vec<Box<dyn FnOnce()>>,

    /// Type-erased value cell for sources, memos and stored values.
    value: Option<Rc<dyn Any>>,

    computation: Option<Rc<dyn Computation>>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            // Computations start dirty; their first run cleans them.
            state: if kind.is_computation() {
                NodeState::Dirty
            } else {
                NodeState::Clean
            },
            version: 0,
            runs: 0,
            sources: Sources::new(),
            subscribers: IndexSet::new(),
            owner: None,
            children: Vec::new(),
            cleanups: Vec::new(),
            value: None,
            computation: None,
        }
    }

    /// Create a new source (signal) node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived (memo) node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new effect node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    /// Create a new ownership scope node.
    pub fn scope() -> Self {
        Self::new(NodeKind::Owner)
    }

    pub(crate) fn with_value(mut self, value: Rc<dyn Any>) -> Self {
        self.value = Some(value);
        self
    }

    pub(crate) fn with_computation(mut self, computation: Rc<dyn Computation>) -> Self {
        self.computation = Some(computation);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_clean(&self) -> bool {
        self.state == NodeState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
    }

    /// Mark the node as checking. Never downgrades a dirty node.
    pub fn mark_checking(&mut self) {
        if self.state == NodeState::Clean {
            self.state = NodeState::Checking;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.state = NodeState::Dirty;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn run_count(&self) -> u64 {
        self.runs
    }

    pub(crate) fn record_run(&mut self) {
        self.runs += 1;
    }

    /// Add a source. Duplicates are ignored; first-read order is kept.
    pub fn add_source(&mut self, node_id: NodeId) {
        if !self.sources.contains(&node_id) {
            self.sources.push(node_id);
        }
    }

    pub fn remove_source(&mut self, node_id: NodeId) {
        self.sources.retain(|id| *id != node_id);
    }

    pub(crate) fn set_sources(&mut self, sources: Sources) {
        self.sources = sources;
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub fn add_subscriber(&mut self, node_id: NodeId) {
        self.subscribers.insert(node_id);
    }

    pub fn remove_subscriber(&mut self, node_id: NodeId) {
        self.subscribers.shift_remove(&node_id);
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<NodeId>) {
        self.owner = owner;
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.retain(|id| *id != child);
    }

    pub(crate) fn take_children(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn push_cleanup(&mut self, cleanup: Box<dyn FnOnce()>) {
        self.cleanups.push(cleanup);
    }

    pub(crate) fn take_cleanups(&mut self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut self.cleanups)
    }

    pub(crate) fn value(&self) -> Option<&Rc<dyn Any>> {
        self.value.as_ref()
    }

    pub(crate) fn computation(&self) -> Option<&Rc<dyn Computation>> {
        self.computation.as_ref()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("sources", &self.sources)
            .field("subscribers", &self.subscribers)
            .field("owner", &self.owner)
            .field("children", &self.children.len())
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut map: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source();
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
    }

    #[test]
    fn computations_start_dirty() {
        assert_eq!(Node::derived().state(), NodeState::Dirty);
        assert_eq!(Node::effect().state(), NodeState::Dirty);
        assert!(Node::scope().is_clean());
    }

    #[test]
    fn sources_keep_first_read_order_without_duplicates() {
        let mut node = Node::derived();
        let deps = ids(3);

        node.add_source(deps[2]);
        node.add_source(deps[0]);
        node.add_source(deps[2]);
        node.add_source(deps[1]);
        assert_eq!(node.sources(), &[deps[2], deps[0], deps[1]]);

        node.remove_source(deps[0]);
        assert_eq!(node.sources(), &[deps[2], deps[1]]);
    }

    #[test]
    fn checking_never_downgrades_dirty() {
        let mut node = Node::effect();
        assert_eq!(node.state(), NodeState::Dirty);

        node.mark_checking();
        assert_eq!(node.state(), NodeState::Dirty);

        node.mark_clean();
        node.mark_checking();
        assert_eq!(node.state(), NodeState::Checking);

        node.mark_dirty();
        assert_eq!(node.state(), NodeState::Dirty);
    }

    #[test]
    fn scope_node_records_its_owner() {
        let parent = ids(1)[0];
        let mut node = Node::scope();
        assert_eq!(node.kind(), NodeKind::Owner);
        assert_eq!(node.owner(), None);

        node.set_owner(Some(parent));
        assert_eq!(node.owner(), Some(parent));
    }

    #[test]
    fn cleanups_are_taken_once() {
        let mut node = Node::scope();
        node.push_cleanup(Box::new(|| {}));
        node.push_cleanup(Box::new(|| {}));

        assert_eq!(node.take_cleanups().len(), 2);
        assert!(node.take_cleanups().is_empty());
    }
}
