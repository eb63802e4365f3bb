//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos and
//! effects. It owns the dependency graph, the ambient owner, the queue of
//! pending nodes, and schedules updates when signals change.
//!
//! # How It Works
//!
//! 1. Creating a signal, memo or effect inserts a node into the graph,
//!    owned by whichever computation (or owner scope) is current.
//!
//! 2. When a computation runs, every signal or memo it reads is collected by
//!    the [`ReactiveContext`]; after a successful run those reads replace the
//!    computation's previous dependency edges.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct subscribers `Dirty` and everything behind a memo
//!       `Checking`
//!    b. Queues them as pending
//!    c. Flushes, either right away (`FlushMode::Immediate`) or at the next
//!       flush point (`batch` end, [`Runtime::flush`])
//!
//! 4. A flush visits the pending nodes in topological order, once each.
//!    `Checking` nodes first bring their upstream memos up to date and only
//!    re-run if one of them actually changed.
//!
//! # Threading
//!
//! Each thread has its own runtime. Handles are `Copy` ids into the
//! thread's arena and must stay on the thread that created them.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use super::context::{untrack, ReactiveContext};
use super::resource::{Spawner, TokioSpawner};
use crate::config::{FlushMode, RuntimeConfig};
use crate::error::{throw, Access, ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind, NodeState, UpdateScheduler};

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState::new();
}

type ErrorHook = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static ERROR_HOOK: RwLock<Option<ErrorHook>> = RwLock::new(None);

/// Per-thread runtime state.
struct RuntimeState {
    graph: RefCell<UpdateScheduler>,
    owner: Cell<Option<NodeId>>,
    pending: RefCell<IndexSet<NodeId>>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
    config: RefCell<RuntimeConfig>,
    spawner: RefCell<Rc<dyn Spawner>>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: RefCell::new(UpdateScheduler::new()),
            owner: Cell::new(None),
            pending: RefCell::new(IndexSet::new()),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            config: RefCell::new(RuntimeConfig::default()),
            spawner: RefCell::new(Rc::new(TokioSpawner)),
        }
    }
}

fn with_runtime<R>(f: impl FnOnce(&RuntimeState) -> R) -> R {
    RUNTIME.with(f)
}

pub(crate) fn with_graph<R>(f: impl FnOnce(&UpdateScheduler) -> R) -> R {
    with_runtime(|rt| f(&rt.graph.borrow()))
}

pub(crate) fn with_graph_mut<R>(f: impl FnOnce(&mut UpdateScheduler) -> R) -> R {
    with_runtime(|rt| f(&mut rt.graph.borrow_mut()))
}

/// Capabilities shared by every computation handle.
pub trait Reactive {
    /// The graph node backing this handle.
    fn node_id(&self) -> NodeId;

    /// Force the computation to re-run on the next flush.
    fn mark_dirty(&self) {
        mark_dirty(self.node_id());
    }

    /// Dispose the computation and everything it owns.
    fn dispose(&self) {
        dispose_node(self.node_id());
    }

    fn is_disposed(&self) -> bool {
        !with_graph(|graph| graph.contains(self.node_id()))
    }

    fn state(&self) -> NodeState {
        Runtime::state_of(self.node_id())
    }
}

/// Entry point for runtime-wide settings and introspection.
pub struct Runtime;

impl Runtime {
    /// Replace the configuration of this thread's runtime.
    pub fn configure(config: RuntimeConfig) {
        debug!(?config, "runtime configured");
        with_runtime(|rt| *rt.config.borrow_mut() = config);
    }

    pub fn config() -> RuntimeConfig {
        with_runtime(|rt| rt.config.borrow().clone())
    }

    /// Propagate every pending change now.
    ///
    /// This is the designated flush point in `FlushMode::Batched`. Calling
    /// it while a flush is already running is a no-op; the running flush
    /// picks up whatever was queued.
    pub fn flush() {
        flush();
    }

    /// Replace the executor used to drive resource fetchers.
    pub fn set_spawner(spawner: impl Spawner + 'static) {
        with_runtime(|rt| *rt.spawner.borrow_mut() = Rc::new(spawner));
    }

    pub(crate) fn spawner() -> Rc<dyn Spawner> {
        with_runtime(|rt| Rc::clone(&rt.spawner.borrow()))
    }

    /// Number of live nodes in this thread's graph.
    pub fn node_count() -> usize {
        with_graph(UpdateScheduler::node_count)
    }

    /// Number of nodes waiting for the next flush.
    pub fn pending_count() -> usize {
        with_runtime(|rt| rt.pending.borrow().len())
    }

    pub fn state_of(id: NodeId) -> NodeState {
        with_graph(|graph| graph.state(id))
    }

    pub fn is_batching() -> bool {
        with_runtime(|rt| rt.batch_depth.get() > 0)
    }
}

/// Install a process-wide hook that receives errors contained by the
/// runtime (panicking computations, unstable flushes).
pub fn set_error_hook(hook: impl Fn(&ReactiveError) + Send + Sync + 'static) {
    *ERROR_HOOK.write() = Some(Arc::new(hook));
}

/// Remove the error hook; errors are logged again.
pub fn clear_error_hook() {
    *ERROR_HOOK.write() = None;
}

pub(crate) fn report(err: ReactiveError) {
    let hook = ERROR_HOOK.read().clone();
    match hook {
        Some(hook) => hook(&err),
        None => error!(%err, "reactive error"),
    }
}

/// Run `body` and propagate the writes it made once, when it returns.
///
/// Batches nest; only the outermost one flushes.
pub fn batch<R>(body: impl FnOnce() -> R) -> R {
    let result = {
        let _batch = BatchGuard::enter();
        body()
    };
    if !Runtime::is_batching() {
        flush();
    }
    result
}

/// Like [`batch`], but only flushes in `FlushMode::Immediate`. Used around
/// runs that happen outside a flush so their writes are coalesced.
pub(crate) fn hold<R>(body: impl FnOnce() -> R) -> R {
    let result = {
        let _batch = BatchGuard::enter();
        body()
    };
    maybe_flush();
    result
}

struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        with_runtime(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        with_runtime(|rt| rt.batch_depth.set(rt.batch_depth.get().saturating_sub(1)));
    }
}

struct OwnerGuard {
    previous: Option<NodeId>,
}

impl OwnerGuard {
    fn set(owner: Option<NodeId>) -> Self {
        let previous = with_runtime(|rt| rt.owner.replace(owner));
        Self { previous }
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        with_runtime(|rt| rt.owner.set(previous));
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_runtime(|rt| rt.flushing.set(false));
    }
}

pub(crate) fn current_owner() -> Option<NodeId> {
    with_runtime(|rt| rt.owner.get())
}

pub(crate) fn with_owner_id<R>(owner: Option<NodeId>, body: impl FnOnce() -> R) -> R {
    let _owner = OwnerGuard::set(owner);
    body()
}

/// Insert a node owned by the current owner.
pub(crate) fn create_node(node: Node) -> NodeId {
    let owner = current_owner();
    with_graph_mut(|graph| graph.add_node(node, owner))
}

/// Register `cleanup` on the current owner.
///
/// It runs before the owning computation re-runs, or when the owner is
/// disposed, whichever comes first.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) {
    let Some(owner) = current_owner() else {
        warn!("on_cleanup called outside of any owner; the callback will never run");
        return;
    };
    let cleanup: Box<dyn FnOnce()> = Box::new(cleanup);
    let rejected = with_graph_mut(move |graph| match graph.get_node_mut(owner) {
        Some(node) => {
            node.push_cleanup(cleanup);
            None
        }
        None => Some(cleanup),
    });
    if rejected.is_some() {
        warn!(?owner, "on_cleanup called on a disposed owner");
    }
}

/// Look up the value cell of `id` without tracking or updating.
pub(crate) fn value_of<V: 'static>(id: NodeId) -> Result<Rc<V>> {
    let value = with_graph(|graph| graph.get_node(id).and_then(|node| node.value().cloned()))
        .ok_or(ReactiveError::UseAfterDispose { id })?;
    value
        .downcast::<V>()
        .map_err(|_| ReactiveError::UseAfterDispose { id })
}

/// Look up the value cell of `id` for a read: stale memos are brought up to
/// date first, and the read is recorded when `track` is set.
pub(crate) fn read_value<V: 'static>(id: NodeId, track: bool) -> Result<Rc<V>> {
    let (kind, state) = with_graph(|graph| {
        graph
            .get_node(id)
            .map(|node| (node.kind(), node.state()))
    })
    .ok_or(ReactiveError::UseAfterDispose { id })?;

    if kind == NodeKind::Derived && state != NodeState::Clean {
        update_if_necessary(id);
    }
    if track {
        ReactiveContext::track_dependency(id);
    }
    value_of(id)
}

/// Record that the value of source `id` changed and propagate.
pub(crate) fn notify_changed(id: NodeId) {
    let touched = with_graph_mut(|graph| {
        if let Some(node) = graph.get_node_mut(id) {
            node.bump_version();
        }
        graph.mark_changed(id)
    });
    enqueue(touched);
    maybe_flush();
}

pub(crate) fn mark_dirty(id: NodeId) {
    let marked = with_graph_mut(|graph| match graph.get_node_mut(id) {
        Some(node) if node.kind().is_computation() => {
            node.mark_dirty();
            true
        }
        _ => false,
    });
    if marked {
        enqueue(vec![id]);
        maybe_flush();
    }
}

fn enqueue(nodes: Vec<NodeId>) {
    if nodes.is_empty() {
        return;
    }
    with_runtime(|rt| rt.pending.borrow_mut().extend(nodes));
}

fn maybe_flush() {
    let immediate = with_runtime(|rt| {
        rt.batch_depth.get() == 0 && rt.config.borrow().flush_mode == FlushMode::Immediate
    });
    if immediate {
        flush();
    }
}

fn flush() {
    if with_runtime(|rt| rt.flushing.replace(true)) {
        return;
    }
    let _flushing = FlushGuard;
    let max_rounds = with_runtime(|rt| rt.config.borrow().max_flush_rounds);

    let mut rounds = 0;
    loop {
        let pending: Vec<NodeId> = with_runtime(|rt| rt.pending.borrow_mut().drain(..).collect());
        if pending.is_empty() {
            break;
        }

        rounds += 1;
        if rounds > max_rounds {
            let err = ReactiveError::Unstable { rounds: max_rounds };
            report(err.clone());
            throw(err);
        }

        let order = with_graph(|graph| graph.topological_sort(&pending));
        trace!(round = rounds, nodes = order.len(), "flushing");
        for (index, id) in order.iter().enumerate() {
            let step = panic::catch_unwind(AssertUnwindSafe(|| update_if_necessary(*id)));
            if let Err(payload) = step {
                // Whatever this round did not finish stays scheduled.
                enqueue(order[index..].to_vec());
                panic::resume_unwind(payload);
            }
        }
    }
}

/// Bring one computation up to date.
///
/// A `Checking` node first updates the memos it read; one of them changing
/// marks it `Dirty` again. Only `Dirty` nodes run their body.
pub(crate) fn update_if_necessary(id: NodeId) {
    let checking = with_graph_mut(|graph| match graph.get_node_mut(id) {
        Some(node) if node.state() == NodeState::Checking => {
            // Clean until proven dirty; also stops recursion through cycles.
            // A memo updated below can mark this node `Checking` again. It is
            // then left `Checking`: the marking also queued it, and the next
            // flush round revalidates it.
            node.mark_clean();
            Some(node.sources().to_vec())
        }
        _ => None,
    });

    if let Some(sources) = checking {
        for source in sources {
            let stale_memo = with_graph(|graph| {
                graph.get_node(source).is_some_and(|node| {
                    node.kind() == NodeKind::Derived && node.state() != NodeState::Clean
                })
            });
            if stale_memo {
                update_if_necessary(source);
            }
            if Runtime::state_of(id) == NodeState::Dirty {
                break;
            }
        }
    }

    if Runtime::state_of(id) == NodeState::Dirty {
        run_node(id, PanicPolicy::Report);
    }
}

/// What to do when a computation body panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PanicPolicy {
    /// Report to the error hook and leave the node clean.
    Report,
    /// Dispose the node and resume unwinding into the caller.
    Propagate,
}

/// Run a computation's body once.
///
/// Its previous children are disposed and its cleanups run first; the body
/// then runs with the node as both the owner and the tracking subscriber.
///
/// A memo whose value is still borrowed by a reader cannot store a new one.
/// That is a `BorrowConflict` raised before anything runs, so the node stays
/// `Dirty` and recomputes on its next read or flush.
pub(crate) fn run_node(id: NodeId, policy: PanicPolicy) {
    let borrowed = with_graph(|graph| {
        graph
            .get_node(id)
            .and_then(|node| node.computation())
            .is_some_and(|computation| computation.output_borrowed())
    });
    if borrowed {
        throw(ReactiveError::BorrowConflict {
            id,
            access: Access::Write,
        });
    }

    let prepared = with_graph_mut(|graph| {
        let node = graph.get_node_mut(id)?;
        let computation = Rc::clone(node.computation()?);
        node.mark_clean();
        Some((computation, node.take_children(), node.take_cleanups()))
    });
    let Some((computation, children, cleanups)) = prepared else {
        return;
    };

    for child in children.into_iter().rev() {
        dispose_node(child);
    }
    run_cleanups(id, cleanups);

    trace!(?id, "running computation");
    let owner = OwnerGuard::set(Some(id));
    let ctx = ReactiveContext::enter(id);
    let result = panic::catch_unwind(AssertUnwindSafe(|| computation.run()));
    let sources = ctx.exit();
    drop(owner);

    match result {
        Ok(changed) => {
            let touched = with_graph_mut(|graph| {
                if !graph.contains(id) {
                    return Vec::new();
                }
                graph.replace_sources(id, &sources);
                let Some(node) = graph.get_node_mut(id) else {
                    return Vec::new();
                };
                node.record_run();
                if changed {
                    node.bump_version();
                    graph.mark_changed(id)
                } else {
                    Vec::new()
                }
            });
            enqueue(touched);
        }
        Err(payload) => {
            with_graph_mut(|graph| {
                if let Some(node) = graph.get_node_mut(id) {
                    node.mark_clean();
                }
            });
            match policy {
                PanicPolicy::Report => report(ReactiveError::ComputationPanic {
                    id,
                    message: panic_message(payload.as_ref()),
                }),
                PanicPolicy::Propagate => {
                    dispose_node(id);
                    panic::resume_unwind(payload);
                }
            }
        }
    }
}

fn run_cleanups(owner: NodeId, cleanups: Vec<Box<dyn FnOnce()>>) {
    if cleanups.is_empty() {
        return;
    }
    with_owner_id(None, || {
        untrack(|| {
            for cleanup in cleanups {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                    report(ReactiveError::ComputationPanic {
                        id: owner,
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        })
    });
}

/// Dispose `id` depth-first: children, then cleanups, then the node.
pub(crate) fn dispose_node(id: NodeId) {
    let Some((children, cleanups)) = with_graph_mut(|graph| {
        graph
            .get_node_mut(id)
            .map(|node| (node.take_children(), node.take_cleanups()))
    }) else {
        return;
    };

    for child in children.into_iter().rev() {
        dispose_node(child);
    }
    run_cleanups(id, cleanups);

    let removed = with_graph_mut(|graph| graph.remove_node(id));
    with_runtime(|rt| rt.pending.borrow_mut().shift_remove(&id));

    // Dropped outside the graph borrow: the node may own user closures.
    if let Some(node) = removed {
        debug!(?id, kind = %node.kind(), "disposed");
        drop(node);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
