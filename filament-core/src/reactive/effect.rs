//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is scheduled to re-run.
//!
//! 3. Before re-running, the effect disposes everything it created during
//!    its previous run and runs the cleanups registered with
//!    [`on_cleanup`](super::on_cleanup). Its dependency set is then rebuilt
//!    from the reads of the new run.
//!
//! # Use Cases
//!
//! Effects are used to synchronize reactive state with the outside world:
//!
//! - Updating the DOM when state changes
//! - Logging state changes
//! - Writing to storage
//!
//! # Differences from Memo
//!
//! - Memos produce a value; effects do not.
//! - Nothing can subscribe to an effect. It is always a leaf of the graph.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::context::untrack;
use super::runtime::{create_node, hold, run_node, with_graph, PanicPolicy, Reactive};
use crate::graph::{Computation, Node, NodeId};

struct EffectComputation<F> {
    body: RefCell<F>,
}

impl<F: FnMut()> Computation for EffectComputation<F> {
    fn run(&self) -> bool {
        let Ok(mut body) = self.body.try_borrow_mut() else {
            panic!("effect re-entered while it was running");
        };
        body();
        false
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Signal::new(Vec::new());
///
/// Effect::new(move || {
///     let value = count.get();
///     seen.update(|log| log.push(value));
/// });
///
/// count.set(5);
/// assert_eq!(seen.get_untracked(), vec![0, 5]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
    local: PhantomData<Rc<()>>,
}

impl Effect {
    /// Create a new effect owned by the current owner.
    ///
    /// The function runs immediately to establish dependencies. A panic in
    /// this first run propagates to the caller; panics in later runs are
    /// reported to the error hook.
    #[track_caller]
    pub fn new(body: impl FnMut() + 'static) -> Self {
        let computation = Rc::new(EffectComputation {
            body: RefCell::new(body),
        });
        let id = create_node(Node::effect().with_computation(computation));
        hold(|| run_node(id, PanicPolicy::Propagate));
        Self {
            id,
            local: PhantomData,
        }
    }

    /// Run `handler` whenever the value produced by `deps` is recomputed.
    ///
    /// Only `deps` is tracked; `handler` runs untracked. With `immediate`
    /// unset the handler skips the initial run.
    pub fn watch<T: 'static>(
        deps: impl Fn() -> T + 'static,
        mut handler: impl FnMut(&T) + 'static,
        immediate: bool,
    ) -> Self {
        let mut first = true;
        Self::new(move || {
            let value = deps();
            if first && !immediate {
                first = false;
                return;
            }
            first = false;
            untrack(|| handler(&value));
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> u64 {
        with_graph(|graph| graph.get_node(self.id).map_or(0, |node| node.run_count()))
    }

    /// Nodes read during the last successful run, in first-read order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        with_graph(|graph| {
            graph
                .get_node(self.id)
                .map(|node| node.sources().to_vec())
                .unwrap_or_default()
        })
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies().len()
    }
}

impl Reactive for Effect {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
