//! Transactions
//!
//! A transaction batches notifications. While one is open, every
//! [`Notifier::notify`](super::Notifier::notify) call queues its notifier in
//! a pending set instead of delivering. When the outermost transaction
//! exits, each queued notifier is delivered exactly once, in the order it
//! was first queued, and each subscriber runs at most once per flush.
//!
//! Staleness is not batched: computed values depending on a written
//! observable go stale at the write, so reads inside the transaction see
//! the new inputs.
//!
//! Transactions nest freely: inner ones only move the depth counter, so
//! library code can wrap its own multi-step mutations without knowing
//! whether a caller already opened a transaction.
//!
//! ```rust,ignore
//! let counter = Observable::new(0);
//! Transaction::run(|| {
//!     counter.set(1);
//!     counter.set(2);
//!     counter.set(3);
//! }); // subscribers run once here and see 3
//! ```

use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::notifier::{current_policy, invoke, Delivery, NotifierCore, SubscriberId};
use super::runtime::with_state;

pub(crate) fn is_active() -> bool {
    with_state(|state| state.depth.get() > 0)
}

/// Queue `notifier` for delivery at the end of the outermost transaction.
/// A notifier already queued keeps its original position.
pub(crate) fn enqueue(notifier: &Rc<NotifierCore>) {
    with_state(|state| {
        state
            .pending
            .borrow_mut()
            .entry(notifier.id())
            .or_insert_with(|| Rc::downgrade(notifier));
    });
}

/// Batching scope for notifications.
pub struct Transaction;

impl Transaction {
    /// Run `work` inside a transaction and return its result.
    ///
    /// The depth counter is restored and, for the outermost transaction,
    /// pending notifications are delivered on every exit path, including a
    /// panic in `work`. Delivery finishes before `run` returns.
    pub fn run<R>(work: impl FnOnce() -> R) -> R {
        let _guard = Self::begin();
        work()
    }

    /// Open a transaction that ends when the returned guard is dropped.
    pub fn begin() -> TransactionGuard {
        let depth = with_state(|state| {
            let depth = state.depth.get() + 1;
            state.depth.set(depth);
            depth
        });
        tracing::trace!(depth, "transaction opened");
        TransactionGuard {
            _not_send: PhantomData,
        }
    }

    /// Check if a transaction is open on this thread.
    pub fn is_active() -> bool {
        is_active()
    }

    /// Number of nested transactions currently open.
    pub fn depth() -> usize {
        with_state(|state| state.depth.get())
    }
}

/// Guard for an open transaction.
#[must_use = "dropping the guard ends the transaction immediately"]
pub struct TransactionGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let remaining = with_state(|state| {
            let depth = state.depth.get();
            // Zero only after Runtime::reset closed this transaction already.
            if depth == 0 {
                return None;
            }
            state.depth.set(depth - 1);
            Some(depth - 1)
        });

        if remaining == Some(0) {
            flush();
        }
    }
}

/// Deliver everything queued by the transaction that just closed.
///
/// Dependents were already marked stale when the writes happened, so only
/// deferred subscribers run here. Each notifier is snapshotted when its turn
/// comes: one disposed by an earlier callback of the same flush delivers
/// nothing. A subscriber listening on several queued notifiers (an effect
/// reading two changed observables, say) runs once, at the position of its
/// first notifier.
fn flush() {
    let pending: Vec<Weak<NotifierCore>> =
        with_state(|state| std::mem::take(&mut *state.pending.borrow_mut()))
            .into_values()
            .collect();

    if pending.is_empty() {
        return;
    }

    let policy = current_policy();
    let mut delivered: IndexSet<SubscriberId> = IndexSet::new();
    for notifier in &pending {
        // A notifier whose owner was dropped before the flush has nobody
        // left to tell.
        let Some(notifier) = notifier.upgrade() else {
            continue;
        };
        let deferred = notifier.snapshot(|delivery| delivery == Delivery::Deferred);
        let Some(subscribers) = deferred else {
            continue;
        };
        for (subscriber, callback) in subscribers {
            if delivered.insert(subscriber) {
                invoke(notifier.id(), subscriber, &callback, policy);
            }
        }
    }

    tracing::debug!(
        targets = pending.len(),
        subscribers = delivered.len(),
        "transaction flushed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Callback, Notifier, Runtime};
    use std::cell::{Cell, RefCell};

    #[test]
    fn notifications_are_deferred_until_exit() {
        let notifier = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        notifier.subscribe(move || count_clone.set(count_clone.get() + 1));

        Transaction::run(|| {
            notifier.notify();
            notifier.notify();
            assert_eq!(count.get(), 0);
            assert_eq!(Runtime::pending_count(), 1);
        });

        assert_eq!(count.get(), 1);
        assert_eq!(Runtime::pending_count(), 0);
    }

    #[test]
    fn nested_transactions_flush_once_at_outermost_exit() {
        let notifier = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        notifier.subscribe(move || count_clone.set(count_clone.get() + 1));

        Transaction::run(|| {
            Transaction::run(|| {
                notifier.notify();
                Transaction::run(|| notifier.notify());
                assert_eq!(Transaction::depth(), 2);
            });
            assert_eq!(count.get(), 0);
            notifier.notify();
        });

        assert_eq!(count.get(), 1);
        assert_eq!(Transaction::depth(), 0);
    }

    #[test]
    fn flush_order_is_first_registration() {
        let a = Notifier::new();
        let b = Notifier::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (notifier, tag) in [(&a, "a"), (&b, "b")] {
            let log = log.clone();
            notifier.subscribe(move || log.borrow_mut().push(tag));
        }

        Transaction::run(|| {
            a.notify();
            b.notify();
            a.notify();
        });

        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn run_returns_work_result() {
        assert_eq!(Transaction::run(|| 40 + 2), 42);
    }

    #[test]
    fn panic_in_work_still_flushes() {
        let notifier = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        notifier.subscribe(move || count_clone.set(count_clone.get() + 1));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Transaction::run(|| {
                notifier.notify();
                panic!("work failed");
            })
        }));

        assert!(result.is_err());
        assert!(!Transaction::is_active());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn disposed_before_flush_is_not_delivered() {
        let notifier = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        notifier.subscribe(move || count_clone.set(count_clone.get() + 1));

        Transaction::run(|| {
            notifier.notify();
            notifier.dispose();
        });

        assert_eq!(count.get(), 0);
    }

    #[test]
    fn subscriber_on_several_notifiers_runs_once() {
        let a = Notifier::new();
        let b = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let callback: Callback = Rc::new(move || count_clone.set(count_clone.get() + 1));
        let id = SubscriberId::new();
        a.subscribe_with(id, callback.clone());
        b.subscribe_with(id, callback);

        Transaction::run(|| {
            a.notify();
            b.notify();
        });

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn notifier_disposed_during_flush_delivers_nothing() {
        let a = Notifier::new();
        let b = Notifier::new();
        {
            let b = b.clone();
            a.subscribe(move || b.dispose());
        }
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        b.subscribe(move || count_clone.set(count_clone.get() + 1));

        Transaction::run(|| {
            a.notify();
            b.notify();
        });

        assert!(b.is_disposed());
        assert_eq!(count.get(), 0);
    }
}
