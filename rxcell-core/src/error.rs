//! Error types for the reactive core.
//!
//! Errors here describe misuse of the reactive graph (cycles, reads of
//! disposed nodes) or violations of the core's own invariants. They are not
//! transient conditions and are never retried internally.

use thiserror::Error;

use crate::reactive::NodeId;

/// Errors raised by the reactive core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed value read itself, directly or through other computed
    /// values, while it was still evaluating.
    ///
    /// `path` lists the nodes on the evaluation stack from the first entry
    /// into the offending node up to the re-entrant read, ending with the
    /// offending node again.
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { node: NodeId, path: Vec<String> },

    /// A disposed computed value was read.
    #[error("read of disposed {node}")]
    DisposedAccess { node: NodeId },

    /// A tracking frame was popped without a matching push.
    #[error("dependency tracker frame stack is empty: pop without matching push")]
    ImbalancedFrame,
}

impl ReactiveError {
    /// Returns the node at the root of the error, if there is one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::CircularDependency { node, .. } | Self::DisposedAccess { node } => Some(*node),
            Self::ImbalancedFrame => None,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

/// Errors raised while loading a [`ReactiveConfig`](crate::ReactiveConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid reactive config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_effect_reruns must be at least 1")]
    ZeroEffectReruns,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
