//! Reactive Primitives
//!
//! This module implements the reactive core: observables, computed values,
//! effects and transactions, built on a notifier and a dependency tracker.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] is a container for mutable state. When its value is
//! read inside a tracking frame (a computed value, an effect, or a binding's
//! render pass), it records itself as a dependency of that frame. When its
//! value changes, its subscribers are notified.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a derived value that caches its result. Changes to its
//! dependencies mark it stale right away; it re-evaluates on the next read.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! ## Transactions
//!
//! [`Transaction::run`] defers notifications until the outermost
//! transaction exits and delivers each of them once.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: a thread-local stack of frames records
//! every read made through [`Trackable`] nodes. Only the top frame records,
//! so nested evaluations keep separate dependency sets.

mod computed;
mod effect;
mod node;
mod notifier;
mod observable;
mod runtime;
mod tracker;
mod transaction;

pub use computed::{Computed, ComputedState};
pub use effect::Effect;
pub use node::{NodeId, NodeKind};
pub use notifier::{Callback, Notifier, SubscriberId};
pub use observable::Observable;
pub use runtime::Runtime;
pub use tracker::{untracked, DependencyTracker, Trackable, TrackedDependencies, TrackingScope};
pub use transaction::{Transaction, TransactionGuard};
