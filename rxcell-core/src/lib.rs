//! rxcell Core
//!
//! This crate provides the reactive-state core for the rxcell UI state
//! library. It implements:
//!
//! - Observable value cells with automatic dependency tracking
//! - Lazily recomputed, memoized derived values with cycle detection
//! - Eager effects for bindings that re-run on change
//! - Transactions that batch and deduplicate notifications
//!
//! Everything is single-threaded and synchronous. Each thread owns an
//! independent reactive graph.
//!
//! # Architecture
//!
//! - `reactive`: the primitives and the tracking/notification machinery
//! - `config`: per-thread runtime settings
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use rxcell_core::{Computed, Effect, Observable, Transaction};
//!
//! // Create an observable
//! let count = Observable::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let _effect = Effect::new({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! });
//!
//! // Batch updates: nothing runs until both writes are done
//! Transaction::run(|| {
//!     count.set(4);
//!     count.set(5);
//! });
//! // Prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::{PanicPolicy, ReactiveConfig};
pub use error::{ConfigError, ReactiveError, Result};
pub use reactive::{
    untracked, Computed, ComputedState, DependencyTracker, Effect, NodeId, Notifier, Observable,
    Runtime, SubscriberId, Trackable, TrackedDependencies, Transaction,
};
