//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between cells, derived values and effects.
//!
//! # Overview
//!
//! - Nodes represent cells, derived computations or effects.
//! - Edges represent dependencies: if A read B during its last evaluation,
//!   B is in A's dependency set and A is in B's dependent set. The two sets
//!   are always kept mutually consistent.
//!
//! When a cell changes, the graph is traversed through dependent edges and
//! every reachable node is marked stale. Nothing is recomputed at that
//! point; stale nodes resolve themselves on their next read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a single arena owned by the engine and are addressed by
//!    integer ids, so edges are id sets rather than references.
//!
//! 2. Dependencies remember the revision they were read at. A stale node
//!    whose dependencies all still carry those revisions is revalidated
//!    without running its function.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept
//!    so invalidation and pruning are cheap in both directions.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{Node, NodeId, NodeKind, Revision};
pub(crate) use node::Runner;
