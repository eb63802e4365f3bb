//! Filament Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, memos, effects, async resources)
//! - Automatic, dynamic dependency tracking
//! - Glitch-free propagation with batching
//! - An ownership tree that disposes computations depth-first
//!
//! It has no I/O of its own. A rendering layer, or any other host
//! application, builds on the primitives in [`reactive`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Node arena, dependency edges and topological ordering
//! - `config`: Runtime configuration (flush mode, round limit)
//! - `error`: The error taxonomy shared by every module
//!
//! # Example
//!
//! ```rust
//! use filament_core::reactive::{mount, Effect, Memo, Signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let (count, root) = mount(|| {
//!     // Create a signal
//!     let count = Signal::new(0);
//!
//!     // Create a derived value
//!     let doubled = Memo::new(move || count.get() * 2);
//!
//!     // Create an effect
//!     let log = Rc::clone(&log);
//!     Effect::new(move || log.borrow_mut().push(doubled.get()));
//!     count
//! });
//!
//! // Update the signal; the effect runs again
//! count.set(5);
//! assert_eq!(*log.borrow(), vec![0, 10]);
//!
//! root.dispose();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig};
pub use error::{ReactiveError, Result};
