//! Observable Implementation
//!
//! An [`Observable`] is the fundamental reactive primitive: a single mutable
//! value cell that remembers who depends on it.
//!
//! # How Observables Work
//!
//! 1. When an observable is read with [`get`](Observable::get) or
//!    [`with`](Observable::with) inside a tracking frame (a computed value,
//!    an effect, or a binding's render pass), it records itself in that
//!    frame.
//!
//! 2. The computation that owns the frame subscribes to the observable's
//!    notifier.
//!
//! 3. When the value is set to something unequal to the current value, the
//!    notifier fires, either immediately or at the end of the enclosing
//!    transaction.
//!
//! # Equality
//!
//! [`Observable::new`] requires `T: PartialEq` and suppresses writes of an
//! equal value. Types without a meaningful `PartialEq` use
//! [`Observable::with_equality`], e.g. with `Rc::ptr_eq` for identity.
//!
//! Only writes through [`set`](Observable::set) notify. Mutating the value
//! in place (say, a `Rc<RefCell<Vec<_>>>` pushed to through a clone) is
//! invisible to the observable, whatever equality it uses; assign a new
//! value to publish a change.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

use super::node::NodeId;
use super::notifier::{Notifier, SubscriberId};
use super::tracker::{DependencyTracker, Trackable};

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

struct ObservableInner<T> {
    value: RefCell<T>,
    notifier: Notifier,
    equals: Equality<T>,
}

/// A reactive value cell.
///
/// Cloning an observable yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// // Read the value (tracked inside computations)
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Observable<T: 'static> {
    inner: Rc<ObservableInner<T>>,
}

impl<T: PartialEq + 'static> Observable<T> {
    /// Create an observable that suppresses writes of an equal value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, |current, next| current == next)
    }
}

impl<T: 'static> Observable<T> {
    /// Create an observable with a custom equality check.
    ///
    /// `equals(current, next)` returning `true` turns a write into a no-op.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            inner: Rc::new(ObservableInner {
                value: RefCell::new(value),
                notifier: Notifier::new(),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the observable's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.notifier.id()
    }

    /// Get the current value, recording the read in the active frame.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recording the read in the active frame.
    ///
    /// Setting this observable from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        DependencyTracker::record_read(self);
        self.with_untracked(f)
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this for logging, diagnostics, or any read that must not turn
    /// the caller into a dependent.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(T::clone)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers if it differs from the
    /// current one.
    ///
    /// The equality check runs before anything is modified, so a panicking
    /// comparison leaves the old value in place. Writes to a disposed
    /// observable still update the value but notify nobody.
    pub fn set(&self, value: T) {
        let unchanged = {
            let current = self.inner.value.borrow();
            (self.inner.equals)(&current, &value)
        };
        if unchanged {
            return;
        }

        let previous = self.inner.value.replace(value);
        // The old value may own other reactive handles; release it before
        // anyone is notified and outside the borrow.
        drop(previous);

        tracing::trace!(node = %self.id(), "observable changed");
        self.inner.notifier.notify();
    }

    /// Alias for [`set`](Self::set).
    pub fn update(&self, value: T) {
        self.set(value);
    }

    /// Set the value to `f(current)`. The read of the current value is not
    /// tracked.
    pub fn update_with(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with_untracked(f);
        self.set(next);
    }

    /// Register a callback invoked whenever the value changes.
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

    /// Drop all subscribers and stop notifying.
    pub fn dispose(&self) {
        self.inner.notifier.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.notifier.is_disposed()
    }
}

impl<T: 'static> Trackable for Observable<T> {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn notifier(&self) -> Notifier {
        self.inner.notifier.clone()
    }
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Default + PartialEq + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_untracked(|value| {
            f.debug_struct("Observable")
                .field("id", &self.id())
                .field("value", value)
                .field("subscriber_count", &self.subscriber_count())
                .finish()
        })
    }
}

impl<T: fmt::Display + 'static> fmt::Display for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_untracked(|value| fmt::Display::fmt(value, f))
    }
}

/// Serializes the current value. The read is untracked.
impl<T: Serialize + 'static> Serialize for Observable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with_untracked(|value| value.serialize(serializer))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
