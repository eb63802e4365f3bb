//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, effects,
//! resources, and the ownership tree that bounds their lifetimes.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates when one
//! of its dependencies changes, and only notifies its own dependents when the
//! result actually differs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating the DOM or logging.
//!
//! ## Resources
//!
//! A Resource runs an async fetcher whenever its input changes and publishes
//! the result into the graph once the task resolves.
//!
//! ## Owners
//!
//! Everything created while a computation runs belongs to that computation.
//! Re-running or disposing it disposes what it owned, depth-first.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! Handles are `Copy` keys into a per-thread arena, so they can be moved
//! into any number of closures without reference counting.

mod context;
mod effect;
mod memo;
mod owner;
mod resource;
mod runtime;
mod signal;
mod stored;

pub use context::{untrack, with_tracking, ReactiveContext};
pub use effect::Effect;
pub use memo::Memo;
pub use owner::{mount, Owner};
pub use resource::{Resource, Spawner, TokioSpawner};
pub use runtime::{batch, clear_error_hook, on_cleanup, set_error_hook, Reactive, Runtime};
pub use signal::{signal, ReadSignal, Signal, WriteSignal};
pub use stored::StoredValue;
