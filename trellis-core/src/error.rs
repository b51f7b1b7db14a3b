//! Error types for reads, polls and flushes.

use std::fmt;

use crate::graph::NodeId;

/// Boxed error produced by a user closure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the engine.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Failures raised while evaluating the reactive graph.
#[derive(Debug, thiserror::Error)]
pub enum ReactiveError {
    /// A recomputation re-entered a node that is still being evaluated.
    ///
    /// `path` lists the nodes on the evaluation stack, starting and ending
    /// with the node that was re-entered.
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency {
        /// Display names of the nodes forming the cycle.
        path: Vec<String>,
    },

    /// A derived node's function returned an error.
    ///
    /// The node keeps its previous cached value and stays stale.
    #[error("recomputation of {node} failed: {source}")]
    Recomputation {
        /// The derived node whose function failed.
        node: NodeId,
        /// Error returned by the function.
        #[source]
        source: BoxError,
    },

    /// An effect's function returned an error while being polled.
    #[error("effect {effect} failed: {source}")]
    EffectExecution {
        /// The effect that failed.
        effect: NodeId,
        /// Error returned by the effect function.
        #[source]
        source: BoxError,
    },

    /// The node was removed from the engine.
    #[error("node {node} has been disposed")]
    Disposed {
        /// The removed node.
        node: NodeId,
    },
}

impl ReactiveError {
    /// The node this error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ReactiveError::CyclicDependency { .. } => None,
            ReactiveError::Recomputation { node, .. } => Some(*node),
            ReactiveError::EffectExecution { effect, .. } => Some(*effect),
            ReactiveError::Disposed { node } => Some(*node),
        }
    }

    /// Whether this is a [`ReactiveError::CyclicDependency`].
    pub fn is_cycle(&self) -> bool {
        matches!(self, ReactiveError::CyclicDependency { .. })
    }
}

/// Every effect failure collected during one flush.
#[derive(Debug)]
pub struct FlushError {
    failures: Vec<ReactiveError>,
}

impl FlushError {
    pub(crate) fn new(failures: Vec<ReactiveError>) -> Self {
        Self { failures }
    }

    /// The failures, in flush order.
    pub fn failures(&self) -> &[ReactiveError] {
        &self.failures
    }

    /// Consume the error and return the failures.
    pub fn into_failures(self) -> Vec<ReactiveError> {
        self.failures
    }

    /// Ids of the effects that failed, in flush order.
    pub fn failed_effects(&self) -> Vec<NodeId> {
        self.failures.iter().filter_map(ReactiveError::node).collect()
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} effect(s) failed during flush", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for FlushError {}
