//! Trellis Core
//!
//! This crate provides a synchronous, in-process reactive engine.
//! It implements:
//!
//! - Mutable cells, lazily recomputed derived values and scheduled effects
//! - Dynamic dependency tracking with per-evaluation edge pruning
//! - Glitch-free invalidation: writes only mark, reads pull
//! - Explicit batching with a deduplicated, insertion-ordered effect flush
//!
//! # Architecture
//!
//! - `graph`: node arena, edge bookkeeping and the invalidation traversal
//! - `reactive`: the engine, evaluation context, batcher and typed handles
//! - `error`: engine and flush errors
//! - `config`: engine tunables
//!
//! # Example
//!
//! ```rust
//! use trellis_core::Engine;
//!
//! let engine = Engine::new();
//! let head = engine.cell(0);
//!
//! // Two branches over the same cell, joined again
//! let (l, r) = (head.clone(), head.clone());
//! let left = engine.derived(move || l.read() + 1);
//! let right = engine.derived(move || r.read() + 1);
//! let sum = engine.derived(move || left.read() + right.read());
//!
//! engine.with_batch(|| head.write(1)).unwrap();
//! assert_eq!(sum.read(), 4);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::EngineConfig;
pub use error::{FlushError, ReactiveError, Result};
pub use graph::{NodeId, NodeKind, Revision};
pub use reactive::{Cell, Derived, Effect, Engine};
