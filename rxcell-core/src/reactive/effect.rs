//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! the nodes it read on its last run changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately inside a
//!    tracking frame to establish its dependencies.
//!
//! 2. It subscribes to every node it read. When any of them notifies, the
//!    effect runs again right away, or at the end of the enclosing
//!    transaction.
//!
//! 3. Every run re-tracks, so dependencies follow the branches the function
//!    actually takes.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are lazy (compute on read); effects are eager (run when
//!   a dependency changes).
//!
//! This is the shape a widget binding takes: track the render pass, then
//! rebuild when anything it read changes.
//!
//! # Self-triggering
//!
//! An effect that writes to something it reads is asked to run again while
//! it is still running. The request is remembered and served once the
//! current run finishes, up to
//! [`max_effect_reruns`](crate::ReactiveConfig::max_effect_reruns) runs in a
//! row.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::node::{describe, NodeId, NodeKind};
use super::notifier::{Callback, Delivery};
use super::runtime::Runtime;
use super::tracker::{DependencySubscriptions, DependencyTracker, FrameOwner};

struct EffectInner {
    id: NodeId,
    label: Rc<str>,
    run: Box<dyn Fn()>,
    dependencies: DependencySubscriptions,
    running: Cell<bool>,
    rerun_requested: Cell<bool>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

/// A side-effecting computation that runs when dependencies change.
///
/// Cloning an effect yields another handle to the same effect. Dropping the
/// last handle stops it.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it.
    ///
    /// It has no dependencies until [`execute`](Self::execute) is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        let id = NodeId::new();
        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner>| {
            let weak = weak.clone();
            let on_change: Callback = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.execute();
                }
            });

            EffectInner {
                id,
                label: describe(NodeKind::Effect, id, None).into(),
                run: Box::new(run),
                dependencies: DependencySubscriptions::new(on_change, Delivery::Deferred),
                running: Cell::new(false),
                rerun_requested: Cell::new(false),
                disposed: Cell::new(false),
                run_count: Cell::new(0),
            }
        });

        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the effect now and re-track its dependencies.
    ///
    /// Called from inside its own run, this only requests another run.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect and unsubscribe from its dependencies.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.dependencies.clear();
        tracing::debug!(node = %self.inner.id, "effect disposed");
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }

    pub fn dependency_ids(&self) -> Vec<NodeId> {
        self.inner.dependencies.ids()
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.get() {
            return;
        }
        if self.running.get() {
            self.rerun_requested.set(true);
            return;
        }

        self.running.set(true);
        let _running = RunningGuard {
            running: &self.running,
        };

        let max_runs = Runtime::config().max_effect_reruns.max(1);
        let mut runs = 0;
        loop {
            self.rerun_requested.set(false);
            self.run_once();
            runs += 1;

            if !self.rerun_requested.get() || self.disposed.get() {
                break;
            }
            if runs >= max_runs {
                tracing::warn!(
                    node = %self.id,
                    runs,
                    "effect keeps re-triggering itself; dropping the pending re-run"
                );
                self.rerun_requested.set(false);
                break;
            }
        }
    }

    fn run_once(&self) {
        let scope = DependencyTracker::owned_scope(FrameOwner {
            id: self.id,
            label: Rc::clone(&self.label),
        });
        (self.run)();
        self.run_count.set(self.run_count.get() + 1);

        let dependencies = match scope.finish() {
            Ok(dependencies) => dependencies,
            Err(err) => {
                tracing::error!(node = %self.id, error = %err, "effect lost its tracking frame");
                return;
            }
        };

        // Disposed from inside its own run: keep no subscriptions.
        if self.disposed.get() {
            return;
        }

        let (added, removed) = self.dependencies.replace(dependencies);
        tracing::trace!(node = %self.id, added, removed, "effect ran");
    }
}

/// Clears the running flag, including when the effect function panics.
struct RunningGuard<'a> {
    running: &'a Cell<bool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.set(false);
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
