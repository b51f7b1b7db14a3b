//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

/// Unique identifier for a node in the dependency graph.
///
/// Ids are handed out by the owning engine and never reused, so an id
/// stays valid (or dangling, never aliased) for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-node change counter. Bumped every time the node's value changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(u64);

impl Revision {
    pub const INITIAL: Revision = Revision(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable leaf. Has dependents, never dependencies.
    Cell,

    /// A lazily recomputed value. Has both dependencies and dependents.
    Derived,

    /// A side-effecting sink. Has dependencies but no dependents.
    Effect,
}

/// Type-erased recomputation rule.
///
/// Runs the node's function, stores its result in the handle's value slot
/// and reports whether the stored value changed.
pub(crate) type Runner = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

/// A node in the dependency graph.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    label: Option<String>,

    /// Set by invalidation, cleared by a successful check or recomputation.
    stale: bool,

    /// Whether the recorded dependencies come from a successful evaluation.
    evaluated: bool,

    revision: Revision,

    /// Nodes this node read during its last evaluation, in read order,
    /// with the revision each had when it was read.
    dependencies: IndexMap<NodeId, Revision>,

    /// Nodes that read this node during their last evaluation.
    dependents: IndexSet<NodeId>,

    runner: Option<Runner>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind, runner: Option<Runner>) -> Self {
        let computed = kind != NodeKind::Cell;
        Self {
            id,
            kind,
            label: None,
            // Start stale to ensure first computation
            stale: computed,
            evaluated: !computed,
            revision: Revision::INITIAL,
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
            runner,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.label = Some(label);
    }

    /// Label if one was set, the id otherwise.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.id.to_string(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        if self.kind != NodeKind::Cell {
            self.stale = true;
        }
    }

    pub(crate) fn mark_fresh(&mut self) {
        self.stale = false;
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub(crate) fn mark_evaluated(&mut self) {
        self.evaluated = true;
    }

    /// Force the next refresh to run the function instead of revalidating.
    pub(crate) fn mark_unevaluated(&mut self) {
        self.evaluated = false;
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub(crate) fn bump_revision(&mut self) -> Revision {
        self.revision = self.revision.next();
        self.revision
    }

    pub fn dependencies(&self) -> &IndexMap<NodeId, Revision> {
        &self.dependencies
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut IndexMap<NodeId, Revision> {
        &mut self.dependencies
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub(crate) fn runner(&self) -> Option<Runner> {
        self.runner.clone()
    }

    pub(crate) fn take_runner(&mut self) -> Option<Runner> {
        self.runner.take()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("stale", &self.stale)
            .field("revision", &self.revision)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_node_starts_fresh() {
        let node = Node::new(NodeId::from(0), NodeKind::Cell, None);
        assert_eq!(node.kind(), NodeKind::Cell);
        assert!(!node.is_stale());
        assert!(node.is_evaluated());
    }

    #[test]
    fn derived_node_starts_stale() {
        let node = Node::new(NodeId::from(1), NodeKind::Derived, None);
        assert!(node.is_stale());
        assert!(!node.is_evaluated());
        assert_eq!(node.revision(), Revision::INITIAL);
    }

    #[test]
    fn cells_are_never_stale() {
        let mut node = Node::new(NodeId::from(0), NodeKind::Cell, None);
        node.mark_stale();
        assert!(!node.is_stale());
    }

    #[test]
    fn revision_bumps_monotonically() {
        let mut node = Node::new(NodeId::from(0), NodeKind::Cell, None);
        let first = node.bump_revision();
        let second = node.bump_revision();
        assert!(first < second);
        assert_eq!(second.raw(), 2);
    }

    #[test]
    fn display_name_prefers_label() {
        let mut node = Node::new(NodeId::from(3), NodeKind::Derived, None);
        assert_eq!(node.display_name(), "#3");
        node.set_label("sum".to_string());
        assert_eq!(node.display_name(), "sum");
    }
}
