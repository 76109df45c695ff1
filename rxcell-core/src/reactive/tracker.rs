//! Dependency Tracker
//!
//! The tracker records which reactive nodes are read while a computation is
//! running. This is what makes dependency tracking automatic: a computed
//! value never declares its inputs, it simply reads them, and every read
//! path reports itself here through [`Trackable`].
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a computation pushes a
//! frame; every tracked read lands in the top frame only; leaving the
//! computation pops the frame and hands back the set of nodes it read.
//! Because only the top frame receives reads, a computed value evaluated
//! while another one is evaluating keeps its own dependency set, and the
//! outer computation records just the inner node.
//!
//! Push and pop are paired through [`TrackingScope`], which pops on drop so
//! the stack stays balanced even if the computation panics.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::node::NodeId;
use super::notifier::{Callback, Delivery, Notifier, SubscriberId};
use super::runtime::with_state;
use crate::error::{ReactiveError, Result};

/// A node whose reads can be recorded as dependencies.
pub trait Trackable {
    /// The id the node is recorded under. Reading the same node twice in
    /// one frame records it once.
    fn node_id(&self) -> NodeId;

    /// The notifier a dependent subscribes to.
    fn notifier(&self) -> Notifier;
}

/// The computation a frame belongs to, for cycle reports.
#[derive(Clone)]
pub(crate) struct FrameOwner {
    pub(crate) id: NodeId,
    pub(crate) label: Rc<str>,
}

pub(crate) struct Frame {
    owner: Option<FrameOwner>,
    reads: IndexMap<NodeId, Notifier>,
}

/// The set of nodes read inside one tracking frame, in first-read order.
#[derive(Default, Clone)]
pub struct TrackedDependencies {
    reads: IndexMap<NodeId, Notifier>,
}

impl TrackedDependencies {
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.reads.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.reads.keys().copied()
    }

    pub fn notifiers(&self) -> impl Iterator<Item = &Notifier> + '_ {
        self.reads.values()
    }

    /// Subscribe `callback` under `id` to every recorded node.
    ///
    /// This is how a binding that tracked its own render pass listens for
    /// changes to exactly what it read.
    pub fn subscribe_all(&self, id: SubscriberId, callback: &Callback) {
        for notifier in self.reads.values() {
            notifier.subscribe_with(id, Rc::clone(callback));
        }
    }

    /// Undo [`subscribe_all`](Self::subscribe_all).
    pub fn unsubscribe_all(&self, id: SubscriberId) {
        for notifier in self.reads.values() {
            notifier.unsubscribe(id);
        }
    }
}

impl fmt::Debug for TrackedDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.reads.keys()).finish()
    }
}

/// The subscriptions a computation holds on its current dependencies.
///
/// One callback is subscribed under one id to every dependency, so
/// replacing the set only touches the notifiers that were added or dropped.
pub(crate) struct DependencySubscriptions {
    subscriber_id: SubscriberId,
    callback: Callback,
    delivery: Delivery,
    current: RefCell<IndexMap<NodeId, Notifier>>,
}

impl DependencySubscriptions {
    pub(crate) fn new(callback: Callback, delivery: Delivery) -> Self {
        Self {
            subscriber_id: SubscriberId::new(),
            callback,
            delivery,
            current: RefCell::new(IndexMap::new()),
        }
    }

    /// Switch to `next`, returning how many dependencies were added and
    /// removed.
    pub(crate) fn replace(&self, next: TrackedDependencies) -> (usize, usize) {
        let next = next.reads;
        let mut removed = 0;
        {
            let current = self.current.borrow();
            for (id, notifier) in current.iter() {
                if !next.contains_key(id) {
                    notifier.unsubscribe(self.subscriber_id);
                    removed += 1;
                }
            }
        }

        let mut added = 0;
        for notifier in next.values() {
            let callback = Rc::clone(&self.callback);
            if notifier.subscribe_for(self.subscriber_id, callback, self.delivery) {
                added += 1;
            }
        }

        let previous = self.current.replace(next);
        drop(previous);
        (added, removed)
    }

    pub(crate) fn clear(&self) {
        let current = std::mem::take(&mut *self.current.borrow_mut());
        for notifier in current.values() {
            notifier.unsubscribe(self.subscriber_id);
        }
    }

    pub(crate) fn ids(&self) -> Vec<NodeId> {
        self.current.borrow().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.current.borrow().len()
    }
}

impl Drop for DependencySubscriptions {
    fn drop(&mut self) {
        for notifier in self.current.get_mut().values() {
            notifier.unsubscribe(self.subscriber_id);
        }
    }
}

/// Process-wide (per thread) registration stack for tracked reads.
pub struct DependencyTracker;

impl DependencyTracker {
    /// Push an empty, anonymous frame.
    ///
    /// Prefer [`scope`](Self::scope) or [`track`](Self::track), which pop
    /// automatically.
    pub fn push_frame() {
        Self::push(None);
    }

    pub(crate) fn push_owned_frame(owner: FrameOwner) {
        Self::push(Some(owner));
    }

    fn push(owner: Option<FrameOwner>) {
        with_state(|state| {
            state.frames.borrow_mut().push(Frame {
                owner,
                reads: IndexMap::new(),
            })
        });
    }

    /// Pop the top frame and return what was read inside it.
    pub fn pop_frame() -> Result<TrackedDependencies> {
        let frame = with_state(|state| state.frames.borrow_mut().pop());
        match frame {
            Some(frame) => Ok(TrackedDependencies { reads: frame.reads }),
            None => {
                tracing::error!("tracking frame popped without a matching push");
                Err(ReactiveError::ImbalancedFrame)
            }
        }
    }

    /// Record a read of `node` into the top frame. Without a frame this does
    /// nothing.
    pub fn record_read(node: &dyn Trackable) {
        if !Self::is_tracking() {
            return;
        }

        let id = node.node_id();
        let notifier = node.notifier();
        with_state(|state| {
            if let Some(frame) = state.frames.borrow_mut().last_mut() {
                if !frame.reads.contains_key(&id) {
                    tracing::trace!(node = %id, "dependency recorded");
                    frame.reads.insert(id, notifier);
                }
            }
        });
    }

    /// Check if there is an active frame.
    pub fn is_tracking() -> bool {
        with_state(|state| !state.frames.borrow().is_empty())
    }

    /// Push an anonymous frame that is popped when the guard is dropped.
    pub fn scope() -> TrackingScope {
        Self::push_frame();
        TrackingScope::entered()
    }

    pub(crate) fn owned_scope(owner: FrameOwner) -> TrackingScope {
        Self::push_owned_frame(owner);
        TrackingScope::entered()
    }

    /// Run `f` inside a fresh frame and return its result together with the
    /// nodes it read.
    pub fn track<R>(f: impl FnOnce() -> R) -> Result<(R, TrackedDependencies)> {
        let scope = Self::scope();
        let result = f();
        let dependencies = scope.finish()?;
        Ok((result, dependencies))
    }

    /// The chain of computations from the first frame owned by `id` to the
    /// top of the stack, closed with `id` again.
    pub(crate) fn cycle_path(id: NodeId, label: &str) -> Vec<String> {
        let mut path: Vec<String> = with_state(|state| {
            let frames = state.frames.borrow();
            let owners: Vec<&FrameOwner> = frames.iter().filter_map(|f| f.owner.as_ref()).collect();
            let start = owners.iter().position(|owner| owner.id == id);
            let labels: Vec<String> = match start {
                Some(start) => owners[start..].iter().map(|o| o.label.to_string()).collect(),
                None => Vec::new(),
            };
            labels
        });
        if path.is_empty() {
            path.push(label.to_string());
        }
        path.push(label.to_string());
        path
    }
}

/// Run `f` without recording any of its reads into the active frame.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = DependencyTracker::scope();
    f()
}

/// Guard for one tracking frame.
///
/// Dropping the guard pops the frame and discards what was read; use
/// [`finish`](Self::finish) to keep it.
#[must_use = "dropping the scope pops the frame immediately"]
pub struct TrackingScope {
    depth: usize,
    finished: bool,
}

impl TrackingScope {
    fn entered() -> Self {
        Self {
            depth: with_state(|state| state.frames.borrow().len()),
            finished: false,
        }
    }

    /// Pop the frame and return the nodes read inside it.
    pub fn finish(mut self) -> Result<TrackedDependencies> {
        self.finished = true;
        self.check_balanced();
        DependencyTracker::pop_frame()
    }

    fn check_balanced(&self) {
        // Inner scopes are dropped first, so the frame must be on top here.
        debug_assert_eq!(
            with_state(|state| state.frames.borrow().len()),
            self.depth,
            "tracking frame mismatch: a nested frame was not popped"
        );
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !std::thread::panicking() {
            self.check_balanced();
        }
        let _ = DependencyTracker::pop_frame();
    }
}
