//! Reactive Primitives
//!
//! This module implements the reactive evaluation engine: cells, derived
//! values, effects and the batcher that decides when effects run.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. Reading it inside a running
//! computation records a dependency; writing it marks every dependent stale.
//!
//! ## Derived values
//!
//! A Derived caches the result of a function over other nodes and only
//! re-runs it when read after one of its inputs actually changed.
//!
//! ## Effects
//!
//! An Effect is a side-effecting sink. It is queued when its inputs change
//! and runs when the engine flushes, at most once per flush.
//!
//! ## Batches
//!
//! [`Engine::with_batch`] groups writes; queued effects are flushed once
//! when the outermost batch closes.
//!
//! # Implementation Notes
//!
//! Dependencies are detected automatically: each engine keeps a stack of
//! running computations and every read is recorded against the top entry.
//! Invalidation (push) and recomputation (pull) are separate passes, which
//! is what makes propagation glitch-free.

mod batch;
mod cell;
mod context;
mod derived;
mod effect;
mod runtime;

pub use cell::Cell;
pub use derived::Derived;
pub use effect::Effect;
pub use runtime::Engine;
