//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between cells and the computations that read them.
//!
//! # Overview
//!
//! The graph is a bipartite, normally acyclic graph where:
//!
//! - Nodes are cells (signals), memos, effects, owner scopes and stored values
//! - Edges are dependencies: if a memo reads a signal, there is an edge from
//!   the signal to the memo
//!
//! Besides dependency edges, every node records the owner it was created
//! under and the children it owns. Those ownership edges form a tree that
//! decides disposal, independently of who reads whom.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena (`slotmap`). Handles are plain
//!    `Copy` keys; a disposed node's key stops resolving instead of dangling.
//!
//! 2. Both forward (sources) and reverse (subscribers) edges are stored so
//!    that marking and teardown can walk either direction cheaply.
//!
//! 3. A computation's sources are replaced wholesale after every successful
//!    run, so stale edges from branches no longer taken disappear.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind, NodeState, Sources};
pub(crate) use node::Computation;
pub use scheduler::UpdateScheduler;
