//! Update Scheduler
//!
//! The scheduler owns every node of a reactive graph and decides the order
//! in which dirty nodes are updated. Dependencies are always updated before
//! their dependents.
//!
//! # Algorithm
//!
//! 1. When a source node changes, its direct subscribers become `Dirty`.
//! 2. Everything downstream of a dirtied memo becomes `Checking`: the memo
//!    may recompute to the same value, in which case they must not re-run.
//! 3. The touched nodes are sorted topologically (Kahn's algorithm over the
//!    sub-graph they induce) and handed to the runtime, which visits each
//!    one exactly once per pass.
//!
//! The scheduler never runs user code; it only moves state and edges
//! around, so it is safe to hold it borrowed while doing so.

use std::collections::{HashMap, HashSet, VecDeque};

use slotmap::SlotMap;

use super::node::{Node, NodeId, NodeKind, NodeState, Sources};

/// Arena of nodes plus the edge bookkeeping between them.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    nodes: SlotMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
        }
    }

    /// Add a node to the graph, attaching it to `owner` when the owner is
    /// still alive.
    pub fn add_node(&mut self, mut node: Node, owner: Option<NodeId>) -> NodeId {
        let owner = owner.filter(|id| self.nodes.contains_key(*id));
        node.set_owner(owner);
        let id = self.nodes.insert(node);
        if let Some(owner) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
            owner.add_child(id);
        }
        id
    }

    /// Remove a node from the graph and return it.
    ///
    /// Edges in both directions and the parent's child entry are removed.
    /// The node's own children are left alone; disposal handles them first.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;

        for source in node.sources() {
            if let Some(source) = self.nodes.get_mut(*source) {
                source.remove_subscriber(node_id);
            }
        }
        for subscriber in node.subscribers() {
            if let Some(subscriber) = self.nodes.get_mut(*subscriber) {
                subscriber.remove_source(node_id);
            }
        }
        if let Some(owner) = node.owner().and_then(|owner| self.nodes.get_mut(owner)) {
            owner.remove_child(node_id);
        }

        Some(node)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// State of a node, `Disposed` for ids that are no longer live.
    pub fn state(&self, node_id: NodeId) -> NodeState {
        self.nodes
            .get(node_id)
            .map_or(NodeState::Disposed, Node::state)
    }

    /// Add an edge: `subscriber` reads `source`.
    pub fn add_edge(&mut self, source: NodeId, subscriber: NodeId) {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(subscriber) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(source) {
            node.add_subscriber(subscriber);
        }
        if let Some(node) = self.nodes.get_mut(subscriber) {
            node.add_source(source);
        }
    }

    pub fn remove_edge(&mut self, source: NodeId, subscriber: NodeId) {
        if let Some(node) = self.nodes.get_mut(source) {
            node.remove_subscriber(subscriber);
        }
        if let Some(node) = self.nodes.get_mut(subscriber) {
            node.remove_source(source);
        }
    }

    /// Replace the dependency set of `subscriber` with exactly `sources`.
    ///
    /// Edges to sources that were not read again are dropped; sources that
    /// were disposed in the meantime are skipped.
    pub fn replace_sources(&mut self, subscriber: NodeId, sources: &Sources) {
        let previous: Sources = match self.nodes.get(subscriber) {
            Some(node) => node.sources().iter().copied().collect(),
            None => return,
        };

        for old in previous.iter().filter(|old| !sources.contains(old)) {
            self.remove_edge(*old, subscriber);
        }
        for new in sources {
            self.add_edge(*new, subscriber);
        }

        // Keep the order of this run, not the order edges were first added.
        let live: Sources = sources
            .iter()
            .copied()
            .filter(|id| self.nodes.contains_key(*id))
            .collect();
        if let Some(node) = self.nodes.get_mut(subscriber) {
            node.set_sources(live);
        }
    }

    /// Mark `source` as changed and propagate dirty flags.
    ///
    /// Direct subscribers become `Dirty`; nodes reachable only through a
    /// memo become `Checking`. Returns every node touched, in discovery
    /// order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut touched = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        let direct: Vec<NodeId> = match self.nodes.get(source_id) {
            Some(source) => source.subscribers().iter().copied().collect(),
            None => return touched,
        };

        for id in direct {
            if let Some(node) = self.nodes.get_mut(id) {
                node.mark_dirty();
                visited.insert(id);
                touched.push(id);
                if node.kind() == NodeKind::Derived {
                    stack.push(id);
                }
            }
        }

        while let Some(memo_id) = stack.pop() {
            let subscribers: Vec<NodeId> = match self.nodes.get(memo_id) {
                Some(memo) => memo.subscribers().iter().copied().collect(),
                None => continue,
            };
            for id in subscribers {
                if !visited.insert(id) {
                    continue;
                }
                if let Some(node) = self.nodes.get_mut(id) {
                    node.mark_checking();
                    touched.push(id);
                    if node.kind() == NodeKind::Derived {
                        stack.push(id);
                    }
                }
            }
        }

        touched
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that sources come before subscribers.
    /// Nodes caught in a cycle are appended in their original order so the
    /// caller can still detect the cycle by its failure to settle.
    pub fn topological_sort(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        let node_set: HashSet<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| self.nodes.contains_key(*id))
            .collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(node_set.len());
        let mut queue = VecDeque::new();

        // In-degrees only count edges within the node set.
        for &node_id in nodes {
            if in_degree.contains_key(&node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(node_id) {
                let degree = node
                    .sources()
                    .iter()
                    .filter(|source| node_set.contains(source))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(node_id) {
                for subscriber in node.subscribers() {
                    if let Some(degree) = in_degree.get_mut(subscriber) {
                        if *degree == 0 {
                            continue;
                        }
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*subscriber);
                        }
                    }
                }
            }
        }

        if result.len() < in_degree.len() {
            let placed: HashSet<NodeId> = result.iter().copied().collect();
            let mut seen = HashSet::new();
            for &node_id in nodes {
                if in_degree.contains_key(&node_id)
                    && !placed.contains(&node_id)
                    && seen.insert(node_id)
                {
                    result.push(node_id);
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(scheduler: &mut UpdateScheduler, ids: &[NodeId]) {
        for id in ids {
            scheduler.get_node_mut(*id).unwrap().mark_clean();
        }
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(Node::source(), None);
        let id2 = scheduler.add_node(Node::derived(), None);
        assert_eq!(scheduler.node_count(), 2);

        assert!(scheduler.remove_node(id1).is_some());
        assert_eq!(scheduler.node_count(), 1);
        assert!(scheduler.get_node(id1).is_none());
        assert!(scheduler.get_node(id2).is_some());
        assert_eq!(scheduler.state(id1), NodeState::Disposed);
    }

    #[test]
    fn stale_ids_do_not_alias_new_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let old = scheduler.add_node(Node::source(), None);
        scheduler.remove_node(old);
        let new = scheduler.add_node(Node::source(), None);

        assert_ne!(old, new);
        assert!(!scheduler.contains(old));
        assert!(scheduler.contains(new));
    }

    #[test]
    fn children_attach_to_live_owner() {
        let mut scheduler = UpdateScheduler::new();

        let owner = scheduler.add_node(Node::scope(), None);
        let child = scheduler.add_node(Node::source(), Some(owner));
        assert_eq!(scheduler.get_node(owner).unwrap().children(), &[child]);
        assert_eq!(scheduler.get_node(child).unwrap().owner(), Some(owner));

        scheduler.remove_node(child);
        assert!(scheduler.get_node(owner).unwrap().children().is_empty());

        scheduler.remove_node(owner);
        let orphan = scheduler.add_node(Node::source(), Some(owner));
        assert_eq!(scheduler.get_node(orphan).unwrap().owner(), None);
    }

    #[test]
    fn add_and_remove_edges() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(Node::source(), None);
        let derived_id = scheduler.add_node(Node::derived(), None);

        scheduler.add_edge(source_id, derived_id);
        assert!(scheduler
            .get_node(source_id)
            .unwrap()
            .subscribers()
            .contains(&derived_id));
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .sources()
            .contains(&source_id));

        scheduler.remove_edge(source_id, derived_id);
        assert!(scheduler.get_node(source_id).unwrap().subscribers().is_empty());
        assert!(scheduler.get_node(derived_id).unwrap().sources().is_empty());
    }

    #[test]
    fn replace_sources_drops_stale_edges() {
        let mut scheduler = UpdateScheduler::new();

        let a = scheduler.add_node(Node::source(), None);
        let b = scheduler.add_node(Node::source(), None);
        let c = scheduler.add_node(Node::source(), None);
        let effect = scheduler.add_node(Node::effect(), None);

        scheduler.replace_sources(effect, &Sources::from_slice(&[a, b]));
        assert_eq!(scheduler.get_node(effect).unwrap().sources(), &[a, b]);

        scheduler.replace_sources(effect, &Sources::from_slice(&[c, a]));
        assert_eq!(scheduler.get_node(effect).unwrap().sources(), &[c, a]);
        assert!(scheduler.get_node(b).unwrap().subscribers().is_empty());
        assert!(scheduler.get_node(c).unwrap().subscribers().contains(&effect));
    }

    #[test]
    fn removing_a_source_detaches_its_subscribers() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(Node::source(), None);
        let effect = scheduler.add_node(Node::effect(), None);
        scheduler.add_edge(source, effect);

        scheduler.remove_node(source);
        assert!(scheduler.get_node(effect).unwrap().sources().is_empty());
    }

    #[test]
    fn mark_changed_dirties_direct_and_checks_downstream() {
        let mut scheduler = UpdateScheduler::new();

        // source -> memo -> effect, and source -> direct effect
        let source = scheduler.add_node(Node::source(), None);
        let memo = scheduler.add_node(Node::derived(), None);
        let downstream = scheduler.add_node(Node::effect(), None);
        let direct = scheduler.add_node(Node::effect(), None);

        scheduler.add_edge(source, memo);
        scheduler.add_edge(memo, downstream);
        scheduler.add_edge(source, direct);
        clean(&mut scheduler, &[memo, downstream, direct]);

        let touched = scheduler.mark_changed(source);

        assert_eq!(touched.len(), 3);
        assert_eq!(scheduler.state(memo), NodeState::Dirty);
        assert_eq!(scheduler.state(direct), NodeState::Dirty);
        assert_eq!(scheduler.state(downstream), NodeState::Checking);
    }

    #[test]
    fn topological_sort_orders_chain() {
        let mut scheduler = UpdateScheduler::new();

        // source -> derived1 -> derived2
        let source_id = scheduler.add_node(Node::source(), None);
        let derived1_id = scheduler.add_node(Node::derived(), None);
        let derived2_id = scheduler.add_node(Node::derived(), None);

        scheduler.add_edge(source_id, derived1_id);
        scheduler.add_edge(derived1_id, derived2_id);
        clean(&mut scheduler, &[derived1_id, derived2_id]);

        let touched = scheduler.mark_changed(source_id);
        let order = scheduler.topological_sort(&[touched[1], touched[0]]);

        assert_eq!(order, vec![derived1_id, derived2_id]);
    }

    #[test]
    fn topological_sort_keeps_diamond_sink_last() {
        let mut scheduler = UpdateScheduler::new();

        let a = scheduler.add_node(Node::source(), None);
        let b = scheduler.add_node(Node::derived(), None);
        let c = scheduler.add_node(Node::derived(), None);
        let e = scheduler.add_node(Node::effect(), None);
        scheduler.add_edge(a, b);
        scheduler.add_edge(a, c);
        scheduler.add_edge(b, e);
        scheduler.add_edge(c, e);

        let order = scheduler.topological_sort(&[e, c, b]);
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&e));
    }

    #[test]
    fn topological_sort_appends_cycles() {
        let mut scheduler = UpdateScheduler::new();

        let m1 = scheduler.add_node(Node::derived(), None);
        let m2 = scheduler.add_node(Node::derived(), None);
        scheduler.add_edge(m1, m2);
        scheduler.add_edge(m2, m1);

        let order = scheduler.topological_sort(&[m1, m2]);
        assert_eq!(order, vec![m1, m2]);
    }
}
