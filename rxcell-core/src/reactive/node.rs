//! Node identity.
//!
//! Every observable, computed value, effect and notifier in the graph gets a
//! [`NodeId`]. Ids identify tracking-frame entries and pending transaction
//! targets, and name nodes in cycle reports.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The kind of node in the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable source value. Has dependents, never dependencies.
    Observable,

    /// A derived, cached value. Has dependencies and may have dependents.
    Computed,

    /// An eager side effect. Has dependencies but no dependents.
    Effect,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Observable => "observable",
            Self::Computed => "computed",
            Self::Effect => "effect",
        })
    }
}

/// Display name of a node: its explicit name when it has one, otherwise
/// `<kind>#<id>`.
pub(crate) fn describe(kind: NodeKind, id: NodeId, name: Option<&str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => format!("{}#{}", kind, id.raw()),
    }
}
