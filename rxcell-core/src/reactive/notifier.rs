//! Notifier: the subscribe/notify primitive.
//!
//! Every observable, computed value and effect owns exactly one
//! [`Notifier`]. A notifier holds an ordered, duplicate-free set of
//! zero-argument callbacks keyed by [`SubscriberId`].
//!
//! # Delivery
//!
//! [`Notifier::notify`] either delivers immediately or, while a
//! [`Transaction`](super::Transaction) is open, queues the notifier in the
//! transaction's pending set. Delivery always works on a snapshot of the
//! subscribers, so callbacks may subscribe or unsubscribe (themselves or
//! others) while being notified. Callbacks run in insertion order.
//!
//! A panicking callback is handled according to
//! [`PanicPolicy`](crate::PanicPolicy); the same policy applies to
//! immediate and transaction-deferred delivery.
//!
//! # Staleness inside transactions
//!
//! Computed values subscribe for staleness. Those callbacks
//! only mark a node stale, and they run at the moment of the write even
//! while a transaction is open, so a read inside the transaction never sees
//! an out-of-date cached value. Everything else is an ordinary subscriber
//! and waits for the flush.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::NodeId;
use super::runtime::with_state;
use super::transaction;
use crate::config::PanicPolicy;
use crate::error::ReactiveError;

/// A subscriber callback.
pub type Callback = Rc<dyn Fn()>;

/// Unique identifier for a subscription.
///
/// Subscribing twice under the same id is a no-op, which is what makes
/// subscription idempotent for callers that keep their id around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// When a subscriber hears about a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Marks a dependent stale. Runs at once, even inside a transaction.
    Staleness,

    /// Runs at once, or at the end of the enclosing transaction.
    Deferred,
}

struct Subscriber {
    callback: Callback,
    delivery: Delivery,
}

pub(crate) type Snapshot = SmallVec<[(SubscriberId, Callback); 4]>;

#[derive(Default)]
struct NotifierState {
    subscribers: IndexMap<SubscriberId, Subscriber>,
    disposed: bool,
}

pub(crate) struct NotifierCore {
    id: NodeId,
    state: RefCell<NotifierState>,
}

impl NotifierCore {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    /// The current subscribers accepted by `include`, or `None` once
    /// disposed.
    pub(crate) fn snapshot(&self, include: impl Fn(Delivery) -> bool) -> Option<Snapshot> {
        let state = self.state.borrow();
        if state.disposed {
            return None;
        }
        Some(
            state
                .subscribers
                .iter()
                .filter(|(_, subscriber)| include(subscriber.delivery))
                .map(|(id, subscriber)| (*id, Rc::clone(&subscriber.callback)))
                .collect(),
        )
    }

    /// Invoke a snapshot of the current subscribers accepted by `include`.
    fn deliver(&self, include: impl Fn(Delivery) -> bool) {
        let Some(snapshot) = self.snapshot(include) else {
            return;
        };
        if snapshot.is_empty() {
            return;
        }

        tracing::trace!(node = %self.id, subscribers = snapshot.len(), "delivering notification");

        let policy = current_policy();
        for (subscriber, callback) in snapshot {
            invoke(self.id, subscriber, &callback, policy);
        }
    }
}

pub(crate) fn current_policy() -> PanicPolicy {
    with_state(|state| state.config.borrow().listener_panics)
}

/// Run one subscriber callback under the given panic policy.
pub(crate) fn invoke(
    node: NodeId,
    subscriber: SubscriberId,
    callback: &Callback,
    policy: PanicPolicy,
) {
    if policy == PanicPolicy::FailFast && !std::thread::panicking() {
        callback();
        return;
    }

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        tracing::error!(
            node = %node,
            subscriber = %subscriber,
            message = %panic_message(payload.as_ref()),
            "subscriber panicked during notification"
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<ReactiveError>() {
        err.to_string()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Publish/subscribe handle.
///
/// Cloning a notifier yields another handle to the same subscriber set.
#[derive(Clone)]
pub struct Notifier {
    core: Rc<NotifierCore>,
}

impl Notifier {
    /// Create a notifier with a fresh node id.
    pub fn new() -> Self {
        Self::with_id(NodeId::new())
    }

    /// Create a notifier identified by the node that owns it.
    pub fn with_id(id: NodeId) -> Self {
        Self {
            core: Rc::new(NotifierCore {
                id,
                state: RefCell::new(NotifierState::default()),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Subscribe a callback under a fresh id.
    ///
    /// On a disposed notifier the callback is dropped; the returned id is
    /// still valid to pass to [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn() + 'static,
    {
        let id = SubscriberId::new();
        self.subscribe_with(id, Rc::new(callback));
        id
    }

    /// Subscribe `callback` under `id`.
    ///
    /// Returns `false` without changing anything if `id` is already
    /// subscribed or the notifier is disposed.
    pub fn subscribe_with(&self, id: SubscriberId, callback: Callback) -> bool {
        self.subscribe_for(id, callback, Delivery::Deferred)
    }

    pub(crate) fn subscribe_for(
        &self,
        id: SubscriberId,
        callback: Callback,
        delivery: Delivery,
    ) -> bool {
        let mut state = self.core.state.borrow_mut();
        if state.disposed || state.subscribers.contains_key(&id) {
            return false;
        }
        state.subscribers.insert(id, Subscriber { callback, delivery });
        true
    }

    /// Remove a subscriber. Returns whether it was present.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        // Keep the relative order of the remaining subscribers.
        self.core.state.borrow_mut().subscribers.shift_remove(&id).is_some()
    }

    /// Notify subscribers, or queue the notification if a transaction is
    /// open. No-op once disposed.
    ///
    /// Inside a transaction, dependents are still marked stale right away;
    /// only the other subscribers wait for the flush.
    pub fn notify(&self) {
        if self.core.is_disposed() {
            return;
        }

        if transaction::is_active() {
            transaction::enqueue(&self.core);
            self.core.deliver(|delivery| delivery == Delivery::Staleness);
            return;
        }

        self.core.deliver(|_| true);
    }

    /// Clear all subscribers and stop delivering. Idempotent.
    pub fn dispose(&self) {
        let dropped = {
            let mut state = self.core.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.subscribers)
        };
        tracing::debug!(node = %self.core.id, subscribers = dropped.len(), "notifier disposed");
        // Callbacks are dropped here, outside the borrow, since dropping one
        // may release another node that touches this notifier.
        drop(dropped);
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.core.state.borrow().subscribers.contains_key(&id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.core.state.borrow().subscribers.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("Notifier")
            .field("id", &self.core.id)
            .field("subscriber_count", &state.subscribers.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
