//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! the current computation is recorded as one of its dependents.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a computation runs, its node id is pushed onto the stack; when it
//! completes (or panics), the guard pops it again. Nested computations
//! therefore compose through ordinary call/return.
//!
//! `untrack` pushes an entry with no subscriber, so reads inside it are not
//! recorded anywhere, and the enclosing computation resumes tracking as soon
//! as the closure returns.

use std::cell::RefCell;

use crate::graph::{NodeId, Sources};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The running computation, `None` inside `untrack`.
    subscriber: Option<NodeId>,
    /// Sources read during this run, in first-read order.
    dependencies: Sources,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct ReactiveContext {
    subscriber: Option<NodeId>,
    depth: usize,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given computation.
    ///
    /// While this context is active, any signal that is read is recorded as
    /// a dependency of `subscriber`.
    pub fn enter(subscriber: NodeId) -> Self {
        Self::push(Some(subscriber))
    }

    fn push(subscriber: Option<NodeId>) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ContextEntry {
                subscriber,
                dependencies: Sources::new(),
            });
            stack.len()
        });

        Self { subscriber, depth }
    }

    /// Whether a computation is currently tracking reads.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// The computation currently tracking reads, if any.
    pub fn current_subscriber() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber))
    }

    /// Record a dependency on the given node.
    ///
    /// Called by signals and memos when they are read. Does nothing outside
    /// a tracking context.
    pub fn track_dependency(source: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.subscriber.is_some() && !entry.dependencies.contains(&source) {
                    entry.dependencies.push(source);
                }
            }
        });
    }

    /// Dependencies collected so far in the innermost context.
    pub fn dependencies() -> Sources {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Exit the context and return everything it collected.
    pub fn exit(self) -> Sources {
        let dependencies = CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        });
        drop(self);
        dependencies
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext dropped out of order"
            );
            let popped = stack.pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber, self.subscriber,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber, entry.subscriber
                );
            }
        });
    }
}

/// Run `body` with `subscriber` as the tracking computation and return its
/// result together with the sources it read.
pub fn with_tracking<R>(subscriber: NodeId, body: impl FnOnce() -> R) -> (R, Sources) {
    let ctx = ReactiveContext::enter(subscriber);
    let result = body();
    (result, ctx.exit())
}

/// Run `body` without recording any dependency.
///
/// Reads inside `body` see current values but the enclosing computation
/// will not re-run when they change.
pub fn untrack<R>(body: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::push(None);
    body()
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
    fn context_tracks_subscriber() {
        let id = ids(1)[0];

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_tracks_dependencies_once() {
        let ids = ids(4);
        let ctx = ReactiveContext::enter(ids[0]);

        ReactiveContext::track_dependency(ids[1]);
        ReactiveContext::track_dependency(ids[2]);
        ReactiveContext::track_dependency(ids[1]);
        ReactiveContext::track_dependency(ids[3]);

        assert_eq!(ctx.exit().as_slice(), &[ids[1], ids[2], ids[3]]);
    }

    #[test]
    fn nested_contexts() {
        let ids = ids(4);

        let outer = ReactiveContext::enter(ids[0]);
        ReactiveContext::track_dependency(ids[2]);

        let (_, inner_deps) = with_tracking(ids[1], || {
            assert_eq!(ReactiveContext::current_subscriber(), Some(ids[1]));
            ReactiveContext::track_dependency(ids[3]);
        });
        assert_eq!(inner_deps.as_slice(), &[ids[3]]);

        // The inner run does not leak into the outer one.
        assert_eq!(ReactiveContext::current_subscriber(), Some(ids[0]));
        assert_eq!(outer.exit().as_slice(), &[ids[2]]);
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn untrack_hides_reads() {
        let ids = ids(3);
        let ctx = ReactiveContext::enter(ids[0]);

        untrack(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track_dependency(ids[1]);
        });
        ReactiveContext::track_dependency(ids[2]);

        assert_eq!(ctx.exit().as_slice(), &[ids[2]]);
    }

    #[test]
    fn guard_restores_on_panic() {
        let ids = ids(2);
        let outer = ReactiveContext::enter(ids[0]);

        let result = std::panic::catch_unwind(|| {
            let _inner = ReactiveContext::enter(ids[1]);
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(ReactiveContext::current_subscriber(), Some(ids[0]));
        drop(outer);
    }
}
