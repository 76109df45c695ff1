//! Reactive Runtime
//!
//! The runtime owns the state that has to be shared by every node in a
//! reactive graph:
//!
//! - the dependency tracker's frame stack,
//! - the transaction depth counter and pending-notification set,
//! - the active [`ReactiveConfig`].
//!
//! # Thread Model
//!
//! The core is single-threaded and synchronous. All shared state lives in a
//! thread-local, so each thread owns an independent reactive graph. This
//! keeps the common path free of locks and lets tests running on separate
//! threads stay isolated from each other. Node handles are `Rc`-based and
//! therefore cannot leave the thread that created them.

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use indexmap::IndexMap;

use super::node::NodeId;
use super::notifier::NotifierCore;
use super::tracker::Frame;
use crate::config::ReactiveConfig;

thread_local! {
    static STATE: RuntimeState = RuntimeState::default();
}

/// Thread-local state shared by the tracker and transactions.
#[derive(Default)]
pub(crate) struct RuntimeState {
    /// Tracking frames, innermost last.
    pub(crate) frames: RefCell<Vec<Frame>>,

    /// Number of open transactions.
    pub(crate) depth: Cell<usize>,

    /// Number of computed evaluations in progress.
    pub(crate) evaluations: Cell<usize>,

    /// Notifiers queued by the open transaction, in first-registration order.
    pub(crate) pending: RefCell<IndexMap<NodeId, Weak<NotifierCore>>>,

    pub(crate) config: RefCell<ReactiveConfig>,
}

/// Run `f` against this thread's runtime state.
///
/// Callers must not invoke user code while holding a borrow of any of the
/// state's cells.
pub(crate) fn with_state<R>(f: impl FnOnce(&RuntimeState) -> R) -> R {
    STATE.with(f)
}

/// Entry point for runtime-wide settings and introspection.
pub struct Runtime;

impl Runtime {
    /// Install `config` for the current thread.
    pub fn configure(config: ReactiveConfig) {
        tracing::debug!(?config, "reactive runtime configured");
        with_state(|state| *state.config.borrow_mut() = config);
    }

    /// The configuration active on the current thread.
    pub fn config() -> ReactiveConfig {
        with_state(|state| state.config.borrow().clone())
    }

    /// Check if a tracking frame is active.
    pub fn is_tracking() -> bool {
        Self::frame_depth() > 0
    }

    /// Number of tracking frames on the stack.
    pub fn frame_depth() -> usize {
        with_state(|state| state.frames.borrow().len())
    }

    /// Number of notifiers waiting for the outermost transaction to exit.
    pub fn pending_count() -> usize {
        with_state(|state| state.pending.borrow().len())
    }

    /// Drop all tracking frames and pending notifications and close every
    /// transaction without flushing.
    ///
    /// Meant for recovering a thread after a scope guard was leaked with
    /// `mem::forget`. Configuration is kept.
    pub fn reset() {
        with_state(|state| {
            let frames = std::mem::take(&mut *state.frames.borrow_mut());
            let pending = std::mem::take(&mut *state.pending.borrow_mut());
            let depth = state.depth.replace(0);
            state.evaluations.set(0);
            if !frames.is_empty() || !pending.is_empty() || depth > 0 {
                tracing::warn!(
                    frames = frames.len(),
                    pending = pending.len(),
                    depth,
                    "reactive runtime reset with live state"
                );
            }
        });
    }
}
