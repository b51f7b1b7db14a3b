//! Node Arena
//!
//! Owns every node of one engine, keeps the dependency and dependent edge
//! sets mutually consistent, and performs the invalidation traversal.
//!
//! # Algorithm
//!
//! Invalidation is push-only and never evaluates anything:
//!
//! 1. A written cell bumps its revision.
//! 2. Every node reachable through dependent edges is marked stale (BFS).
//! 3. Effects reached by the traversal are returned so the caller can queue
//!    them.
//!
//! Recomputation is pull-based and happens later, on read, which is what
//! keeps diamonds glitch-free.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind, Revision, Runner};

/// All nodes of one engine, indexed by ID.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and insert a node under it.
    pub(crate) fn insert(&mut self, kind: NodeKind, runner: Option<Runner>) -> NodeId {
        let id = NodeId::from(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, kind, runner));
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. The removed node is
    /// returned so the caller can drop it (and the closures it owns)
    /// outside of any borrow of the graph.
    pub(crate) fn remove(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for dep_id in node.dependencies().keys() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.dependencies_mut().shift_remove(&node_id);
                // Its last evaluation read something that no longer exists.
                dependent.mark_stale();
            }
        }

        Some(node)
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub(crate) fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn revision(&self, node_id: NodeId) -> Option<Revision> {
        self.nodes.get(&node_id).map(Node::revision)
    }

    /// Replace `dependent`'s dependency set with exactly `reads`.
    ///
    /// Edges to nodes that were not read are pruned from both sides and
    /// edges to newly read nodes are added to both sides. Reads of nodes
    /// that no longer exist are discarded.
    pub(crate) fn replace_dependencies(
        &mut self,
        dependent: NodeId,
        mut reads: IndexMap<NodeId, Revision>,
    ) {
        reads.retain(|dep, _| *dep != dependent && self.nodes.contains_key(dep));

        let Some(node) = self.nodes.get_mut(&dependent) else {
            return;
        };
        let previous = std::mem::take(node.dependencies_mut());

        for dep_id in previous.keys().filter(|dep| !reads.contains_key(*dep)) {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(dependent);
            }
        }
        for dep_id in reads.keys() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.add_dependent(dependent);
            }
        }

        if let Some(node) = self.nodes.get_mut(&dependent) {
            *node.dependencies_mut() = reads;
        }
    }

    /// Add `reads` to `dependent`'s dependency set without pruning.
    ///
    /// Used after a failed evaluation: the node stays subscribed to
    /// everything it has ever read until a successful run replaces the set.
    pub(crate) fn extend_dependencies(
        &mut self,
        dependent: NodeId,
        reads: IndexMap<NodeId, Revision>,
    ) {
        for (dep_id, revision) in reads {
            if dep_id == dependent {
                continue;
            }
            let Some(dep) = self.nodes.get_mut(&dep_id) else {
                continue;
            };
            dep.add_dependent(dependent);
            if let Some(node) = self.nodes.get_mut(&dependent) {
                node.dependencies_mut().entry(dep_id).or_insert(revision);
            }
        }
    }

    /// Drop every dependency edge of `dependent`.
    pub(crate) fn clear_dependencies(&mut self, dependent: NodeId) {
        self.replace_dependencies(dependent, IndexMap::new());
    }

    /// Whether any node in `reads` has moved past the revision it was read at.
    pub(crate) fn any_changed(&self, reads: &IndexMap<NodeId, Revision>) -> bool {
        reads
            .iter()
            .any(|(dep, seen)| self.revision(*dep) != Some(*seen))
    }

    /// Bump a node's revision and mark everything downstream stale.
    ///
    /// Returns the effects reached by the traversal, in BFS order.
    pub(crate) fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        if let Some(source) = self.nodes.get_mut(&source_id) {
            source.bump_revision();
        }
        self.invalidate(source_id)
    }

    /// Mark every node transitively depending on `source_id` as stale.
    ///
    /// Returns the effects reached, in BFS order.
    pub(crate) fn invalidate(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut effects = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = match self.nodes.get(&source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return effects,
        };

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_stale();
                if node.kind() == NodeKind::Effect {
                    effects.push(node_id);
                }

                let dependents: SmallVec<[NodeId; 8]> =
                    node.dependents().iter().copied().collect();
                queue.extend(dependents);
            }
        }

        effects
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
