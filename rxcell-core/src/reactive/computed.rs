//! Computed Implementation
//!
//! A [`Computed`] is a cached derived value. It re-evaluates only when one
//! of the nodes it read during its last evaluation has changed.
//!
//! # How Computed Values Work
//!
//! 1. A computed value starts [`Stale`](ComputedState::Stale). Nothing runs
//!    until the first read.
//!
//! 2. A read of a stale value evaluates it: the function runs inside its own
//!    tracking frame, and the set of nodes read in that frame becomes the
//!    new dependency set. Subscriptions are diffed against the previous set,
//!    so a dependency that a branch no longer reads stops invalidating it.
//!
//! 3. When a dependency notifies, a fresh computed value turns stale and
//!    notifies its own subscribers. It does not recompute.
//!
//! 4. The next read recomputes.
//!
//! Staleness is pushed eagerly, values are pulled lazily: a change reaching
//! ten computed values only costs recomputation for the ones read again.
//!
//! # Errors
//!
//! Reading a computed value while it is evaluating is a circular dependency
//! and fails with [`ReactiveError::CircularDependency`]. Reading a disposed
//! one fails with [`ReactiveError::DisposedAccess`]. A panic in the
//! evaluation function propagates to the reader and leaves the value stale,
//! so a failed evaluation is never cached.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::node::{describe, NodeId, NodeKind};
use super::notifier::{Callback, Delivery, Notifier, SubscriberId};
use super::runtime::with_state;
use super::tracker::{DependencySubscriptions, DependencyTracker, FrameOwner, Trackable};
use crate::error::{ReactiveError, Result};

/// Lifecycle state of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value (if any) may be out of date.
    Stale,

    /// The evaluation function is running.
    Evaluating,

    /// The cached value reflects the current dependencies.
    Fresh,

    /// Terminal. Reads fail.
    Disposed,
}

struct ComputedInner<T> {
    id: NodeId,
    label: Rc<str>,
    compute: Box<dyn Fn() -> T>,
    memoize: bool,

    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,

    /// Set when a dependency notifies while the function is running.
    invalidated_while_evaluating: Cell<bool>,

    notifier: Notifier,

    /// Subscriptions on the nodes read during the last evaluation.
    dependencies: DependencySubscriptions,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning a computed value yields another handle to the same node. When
/// the last handle is dropped, the node unsubscribes from its dependencies.
///
/// # Example
///
/// ```rust,ignore
/// let a = Observable::new(5);
/// let b = Observable::new(10);
/// let sum = Computed::new({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + b.get()
/// });
///
/// assert_eq!(sum.get(), 15);
/// a.set(20);
/// assert_eq!(sum.get(), 30);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: 'static> Computed<T> {
    /// Create a memoized computed value.
    ///
    /// The function is not run until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(None, true, compute)
    }

    /// Create a memoized computed value with a name used in cycle reports
    /// and logs.
    pub fn named<F>(name: &str, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Some(name), true, compute)
    }

    /// Create a computed value that re-evaluates on every read.
    ///
    /// Dependencies are tracked exactly as for a memoized value, so
    /// subscribers are still told when it goes stale.
    pub fn unmemoized<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(None, false, compute)
    }

    fn build<F>(name: Option<&str>, memoize: bool, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let id = NodeId::new();
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let on_change: Callback = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.invalidate();
                }
            });

            ComputedInner {
                id,
                label: describe(NodeKind::Computed, id, name).into(),
                compute: Box::new(compute),
                memoize,
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Stale),
                invalidated_while_evaluating: Cell::new(false),
                notifier: Notifier::with_id(id),
                dependencies: DependencySubscriptions::new(on_change, Delivery::Staleness),
            }
        });

        Self { inner }
    }

    /// Get the computed value's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The name given at construction, or `computed#<id>`.
    pub fn name(&self) -> &str {
        &self.inner.label
    }

    /// Get the current value, evaluating if stale.
    ///
    /// # Panics
    ///
    /// On a circular dependency or a read after dispose. Inside another
    /// computed value's evaluation the [`ReactiveError`] unwinds silently
    /// (the panic hook does not run) and the enclosing
    /// [`try_get`](Self::try_get) turns it back into an `Err`, so a cycle
    /// reached through nested reads surfaces at the outermost `try_get`.
    /// Anywhere else it is an ordinary panic carrying the error message.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// Get the current value, evaluating if stale.
    ///
    /// Errors from nested [`get`](Self::get) calls in the evaluation
    /// function are returned here without printing anything.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Borrow the current value, evaluating if stale.
    ///
    /// `f` must not change this value's dependencies.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let inner = &self.inner;
        match inner.state.get() {
            ComputedState::Disposed => {
                return Err(ReactiveError::DisposedAccess { node: inner.id });
            }
            ComputedState::Evaluating => {
                let path = DependencyTracker::cycle_path(inner.id, &inner.label);
                tracing::debug!(node = %inner.id, path = ?path, "circular dependency");
                return Err(ReactiveError::CircularDependency {
                    node: inner.id,
                    path,
                });
            }
            ComputedState::Stale | ComputedState::Fresh => {}
        }

        // Registers with the reader's frame, before our own frame is pushed.
        DependencyTracker::record_read(self);

        if inner.state.get() != ComputedState::Fresh || !inner.memoize {
            inner.evaluate()?;
        }

        let value = inner.value.borrow();
        let value = value
            .as_ref()
            .expect("evaluated computed should have a value");
        Ok(f(value))
    }

    /// Mark the value stale and notify subscribers, as if a dependency had
    /// changed.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Get the current state.
    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    pub fn is_memoized(&self) -> bool {
        self.inner.memoize
    }

    /// Check if the computed value has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Ids of the nodes read during the last successful evaluation.
    pub fn dependency_ids(&self) -> Vec<NodeId> {
        self.inner.dependencies.ids()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn() + 'static,
    {
        self.inner.notifier.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.notifier.subscriber_count()
    }

    /// Unsubscribe from all dependencies, dispose the notifier and drop the
    /// cached value. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.get() == ComputedState::Disposed
    }
}

impl<T> ComputedInner<T> {
    fn invalidate(&self) {
        match self.state.get() {
            ComputedState::Fresh => {
                self.state.set(ComputedState::Stale);
                tracing::trace!(node = %self.id, "computed invalidated");
                self.notifier.notify();
            }
            ComputedState::Evaluating => self.invalidated_while_evaluating.set(true),
            ComputedState::Stale | ComputedState::Disposed => {}
        }
    }

    /// Run the function in a fresh frame and cache the result.
    fn evaluate(&self) -> Result<()> {
        self.state.set(ComputedState::Evaluating);
        self.invalidated_while_evaluating.set(false);
        let guard = EvaluationGuard { state: &self.state };

        tracing::trace!(node = %self.id, "evaluating computed");

        let scope = DependencyTracker::owned_scope(FrameOwner {
            id: self.id,
            label: Rc::clone(&self.label),
        });
        with_state(|state| state.evaluations.set(state.evaluations.get() + 1));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.compute)()));
        with_state(|state| state.evaluations.set(state.evaluations.get().saturating_sub(1)));
        let dependencies = scope.finish();

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => match payload.downcast::<ReactiveError>() {
                // A nested `get` failed; report it as an error of this read.
                Ok(err) => return Err(*err),
                Err(payload) => panic::resume_unwind(payload),
            },
        };
        let dependencies = dependencies?;

        // The function disposed this node while running.
        if self.state.get() == ComputedState::Disposed {
            return Err(ReactiveError::DisposedAccess { node: self.id });
        }

        let (added, removed) = self.dependencies.replace(dependencies);
        if added > 0 || removed > 0 {
            tracing::debug!(
                node = %self.id,
                dependencies = self.dependencies.len(),
                added,
                removed,
                "computed dependencies changed"
            );
        }
        let previous = self.value.replace(Some(value));
        drop(previous);

        let next = if self.invalidated_while_evaluating.replace(false) {
            ComputedState::Stale
        } else {
            ComputedState::Fresh
        };
        guard.complete(next);
        Ok(())
    }

    fn dispose(&self) {
        if self.state.get() == ComputedState::Disposed {
            return;
        }
        self.state.set(ComputedState::Disposed);
        self.dependencies.clear();
        self.notifier.dispose();
        let cached = self.value.take();
        drop(cached);
        tracing::debug!(node = %self.id, "computed disposed");
    }
}

/// Raise a read error out of [`Computed::get`].
fn raise(err: ReactiveError) -> ! {
    if with_state(|state| state.evaluations.get() > 0) {
        // Caught by the enclosing evaluation; not a crash.
        panic::resume_unwind(Box::new(err))
    } else {
        panic!("{err}")
    }
}

/// Puts an interrupted evaluation back to `Stale`.
struct EvaluationGuard<'a> {
    state: &'a Cell<ComputedState>,
}

impl EvaluationGuard<'_> {
    fn complete(self, next: ComputedState) {
        self.state.set(next);
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if self.state.get() == ComputedState::Evaluating {
            self.state.set(ComputedState::Stale);
        }
    }
}

impl<T: 'static> Trackable for Computed<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn notifier(&self) -> Notifier {
        self.inner.notifier.clone()
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("name", &self.inner.label)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Observable, Runtime, Transaction};

    fn counted<T: 'static>(
        compute: impl Fn() -> T + 'static,
    ) -> (Computed<T>, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let computed = Computed::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            compute()
        });
        (computed, calls)
    }

    #[test]
    fn computes_on_first_access() {
        let (computed, calls) = counted(|| 42);

        assert!(!computed.has_value());
        assert_eq!(computed.state(), ComputedState::Stale);
        assert_eq!(calls.get(), 0);

        assert_eq!(computed.get(), 42);
        assert_eq!(calls.get(), 1);
        assert_eq!(computed.state(), ComputedState::Fresh);
    }

    #[test]
    fn caches_value_when_fresh() {
        let (computed, calls) = counted(|| 42);

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn invalidation_is_lazy() {
        let source = Observable::new(1);
        let (computed, calls) = counted({
            let source = source.clone();
            move || source.get() * 10
        });

        assert_eq!(computed.get(), 10);
        source.set(2);
        source.set(3);

        assert_eq!(computed.state(), ComputedState::Stale);
        assert_eq!(calls.get(), 1);

        assert_eq!(computed.get(), 30);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn stale_propagates_to_subscribers_once() {
        let source = Observable::new(1);
        let computed = Computed::new({
            let source = source.clone();
            move || source.get()
        });
        computed.get();

        let notified = Rc::new(Cell::new(0));
        let notified_clone = notified.clone();
        computed.subscribe(move || notified_clone.set(notified_clone.get() + 1));

        source.set(2);
        source.set(3);
        // Already stale on the second write.
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn chains_of_computed_values() {
        let base = Observable::new(5);
        let doubled = Computed::new({
            let base = base.clone();
            move || base.get() * 2
        });
        let plus_ten = Computed::new({
            let doubled = doubled.clone();
            move || doubled.get() + 10
        });

        assert_eq!(plus_ten.get(), 20);
        base.set(10);
        assert_eq!(plus_ten.state(), ComputedState::Stale);
        assert_eq!(plus_ten.get(), 30);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn outer_records_inner_not_its_dependencies() {
        let source = Observable::new(1);
        let inner = Computed::new({
            let source = source.clone();
            move || source.get() + 1
        });
        let outer = Computed::new({
            let inner = inner.clone();
            move || inner.get() * 2
        });

        assert_eq!(outer.get(), 4);
        assert_eq!(inner.dependency_ids(), vec![source.id()]);
        assert_eq!(outer.dependency_ids(), vec![inner.id()]);
    }

    #[test]
    fn direct_cycle_is_an_error() {
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let bad = Computed::named("bad", {
            let slot = slot.clone();
            move || slot.borrow().as_ref().map_or(0, |me| me.get() + 1)
        });
        *slot.borrow_mut() = Some(bad.clone());

        let err = bad.try_get().unwrap_err();
        assert_eq!(
            err,
            ReactiveError::CircularDependency {
                node: bad.id(),
                path: vec!["bad".into(), "bad".into()],
            }
        );
        assert_eq!(bad.state(), ComputedState::Stale);
        assert!(!Runtime::is_tracking());

        slot.borrow_mut().take();
    }

    #[test]
    fn indirect_cycle_names_the_path() {
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let a = Computed::named("a", {
            let slot = slot.clone();
            move || slot.borrow().as_ref().map_or(0, |b| b.get())
        });
        let b = Computed::named("b", {
            let a = a.clone();
            move || a.get()
        });
        *slot.borrow_mut() = Some(b.clone());

        match a.try_get() {
            Err(ReactiveError::CircularDependency { node, path }) => {
                assert_eq!(node, a.id());
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
        assert_eq!(a.state(), ComputedState::Stale);
        assert_eq!(b.state(), ComputedState::Stale);

        slot.borrow_mut().take();
    }

    #[test]
    fn panicking_function_is_not_cached() {
        let fail = Rc::new(Cell::new(true));
        let (computed, calls) = counted({
            let fail = fail.clone();
            move || {
                if fail.get() {
                    panic!("evaluation failed");
                }
                7
            }
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| computed.get()));
        assert!(result.is_err());
        assert_eq!(computed.state(), ComputedState::Stale);
        assert!(!Runtime::is_tracking());

        fail.set(false);
        assert_eq!(computed.get(), 7);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn disposed_read_fails() {
        let source = Observable::new(1);
        let computed = Computed::new({
            let source = source.clone();
            move || source.get()
        });
        computed.get();
        assert_eq!(source.subscriber_count(), 1);

        computed.dispose();
        computed.dispose();

        assert_eq!(
            computed.try_get().unwrap_err(),
            ReactiveError::DisposedAccess { node: computed.id() }
        );
        assert_eq!(source.subscriber_count(), 0);
        assert!(!computed.has_value());
    }

    #[test]
    fn unmemoized_reevaluates_every_read() {
        let source = Observable::new(2);
        let calls = Rc::new(Cell::new(0));
        let computed = Computed::unmemoized({
            let source = source.clone();
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                source.get()
            }
        });

        computed.get();
        computed.get();
        assert_eq!(calls.get(), 2);
        assert_eq!(computed.dependency_ids(), vec![source.id()]);
    }

    #[test]
    fn transaction_coalesces_invalidation() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let sum = Computed::new({
            let (a, b) = (a.clone(), b.clone());
            move || a.get() + b.get()
        });
        sum.get();

        let notified = Rc::new(Cell::new(0));
        let notified_clone = notified.clone();
        sum.subscribe(move || notified_clone.set(notified_clone.get() + 1));

        Transaction::run(|| {
            a.set(10);
            b.set(20);
        });

        assert_eq!(notified.get(), 1);
        assert_eq!(sum.get(), 30);
    }

    #[test]
    fn dropping_last_handle_releases_subscriptions() {
        let source = Observable::new(1);
        let computed = Computed::new({
            let source = source.clone();
            move || source.get()
        });
        computed.get();
        assert_eq!(source.subscriber_count(), 1);

        drop(computed);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn invalidated_while_evaluating_stays_stale() {
        let source = Observable::new(0);
        let computed = Computed::new({
            let source = source.clone();
            move || {
                let value = source.get();
                if value == 1 {
                    // Write back into a dependency mid-evaluation.
                    source.set(2);
                }
                value
            }
        });

        assert_eq!(computed.get(), 0);
        source.set(1);
        assert_eq!(computed.get(), 1);
        assert_eq!(computed.state(), ComputedState::Stale);
        assert_eq!(computed.get(), 2);
        assert_eq!(computed.state(), ComputedState::Fresh);
    }

    #[test]
    fn read_inside_transaction_sees_its_writes() {
        let a = Observable::new(5);
        let (sum, calls) = counted({
            let a = a.clone();
            move || a.get() + 1
        });
        assert_eq!(sum.get(), 6);

        let inside = Transaction::run(|| {
            a.set(20);
            assert_eq!(sum.state(), ComputedState::Stale);
            sum.get()
        });

        assert_eq!(inside, 21);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn evaluation_inside_transaction_survives_the_flush() {
        let a = Observable::new(1);
        let (doubled, calls) = counted({
            let a = a.clone();
            move || a.get() * 2
        });
        assert_eq!(doubled.get(), 2);

        let notified = Rc::new(Cell::new(0));
        let notified_clone = notified.clone();
        doubled.subscribe(move || notified_clone.set(notified_clone.get() + 1));

        Transaction::run(|| {
            a.set(2);
            assert_eq!(doubled.get(), 4);
            assert_eq!(notified.get(), 0);
        });

        assert_eq!(notified.get(), 1);
        assert_eq!(doubled.state(), ComputedState::Fresh);
        assert_eq!(doubled.get(), 4);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn staleness_crosses_chains_inside_transaction() {
        let base = Observable::new(1);
        let doubled = Computed::new({
            let base = base.clone();
            move || base.get() * 2
        });
        let plus_one = Computed::new({
            let doubled = doubled.clone();
            move || doubled.get() + 1
        });
        assert_eq!(plus_one.get(), 3);

        Transaction::run(|| {
            base.set(5);
            assert_eq!(plus_one.state(), ComputedState::Stale);
            assert_eq!(plus_one.get(), 11);
            base.set(6);
            assert_eq!(plus_one.get(), 13);
        });

        assert_eq!(plus_one.state(), ComputedState::Fresh);
    }
}
