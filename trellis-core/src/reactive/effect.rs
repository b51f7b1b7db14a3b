//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs after its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect is queued on the engine. It does not run
//!    until the next flush (or an explicit [`Effect::poll`]).
//!
//! 2. When any dependency changes, the effect is marked stale and queued
//!    again. However many times that happens inside one batch, it is polled
//!    once when the batch closes.
//!
//! 3. Polling a stale effect first checks whether any dependency actually
//!    moved; if so the function runs and the dependency set is replaced with
//!    what it read this time.
//!
//! # Differences from Derived
//!
//! - Derived values return a value; effects do not.
//! - Nothing can read an effect, so an effect never has dependents.
//! - Derived values run when read; effects run when flushed or polled.
//!
//! Dropping the last handle of an effect removes it from the engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{NodeId, NodeKind, Runner};

use super::runtime::{Engine, NodeHandle};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use trellis_core::Engine;
///
/// let engine = Engine::new();
/// let count = engine.cell(0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let source = count.clone();
/// let log = seen.clone();
/// let _effect = engine.effect(move || log.lock().unwrap().push(source.read()));
///
/// engine.with_batch(|| count.write(5)).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![5]);
/// ```
pub struct Effect {
    handle: Arc<NodeHandle>,

    /// Whether the effect has been disposed.
    disposed: Arc<AtomicBool>,

    /// Number of times the effect function completed.
    run_count: Arc<AtomicUsize>,
}

impl Effect {
    /// Create a new effect and queue it for the next flush.
    pub fn new<F>(engine: &Engine, run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::try_new(engine, move || {
            run();
            Ok(())
        })
    }

    /// Create an effect whose function may fail.
    ///
    /// A failure is reported as [`ReactiveError::EffectExecution`] and
    /// leaves the effect stale, so a later poll retries it.
    ///
    /// [`ReactiveError::EffectExecution`]: crate::ReactiveError::EffectExecution
    pub fn try_new<F>(engine: &Engine, run: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let run_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&run_count);

        let runner: Runner = Arc::new(move || {
            run()?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        });

        let id = engine.register(NodeKind::Effect, Some(runner));
        Self {
            handle: NodeHandle::new(engine, id),
            disposed: Arc::new(AtomicBool::new(false)),
            run_count,
        }
    }

    /// Attach a debug label, shown in logs and error messages.
    pub fn named(self, label: impl Into<String>) -> Self {
        self.engine().set_label(self.id(), label.into());
        self
    }

    pub fn id(&self) -> NodeId {
        self.handle.id()
    }

    pub fn engine(&self) -> &Engine {
        self.handle.engine()
    }

    /// Run the effect now if it is stale.
    ///
    /// Re-registers its dependencies as a side effect. A fresh or disposed
    /// effect does nothing.
    pub fn poll(&self) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        self.engine().poll_effect(self.id())
    }

    /// Dispose of the effect.
    ///
    /// After disposal the effect is unqueued, loses its dependencies and
    /// will not run again.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.engine().detach(self.id());
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether a dependency changed since the last run.
    pub fn is_stale(&self) -> bool {
        self.engine().is_stale(self.id())
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.engine().dependencies_of(self.id()).len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            disposed: Arc::clone(&self.disposed),
            run_count: Arc::clone(&self.run_count),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_does_not_run_on_creation() {
        let engine = Engine::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(&engine, move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);
        assert!(effect.is_stale());
    }

    #[test]
    fn poll_runs_only_when_stale() {
        let engine = Engine::new();
        let cell = engine.cell(0);
        let source = cell.clone();
        let effect = engine.effect(move || {
            source.read();
        });

        effect.poll().unwrap();
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 1);

        effect.poll().unwrap();
        assert_eq!(effect.run_count(), 1);

        cell.write(1);
        assert!(effect.is_stale());
        effect.poll().unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let engine = Engine::new();
        let cell = engine.cell(0);
        let source = cell.clone();
        let effect = engine.effect(move || {
            source.read();
        });
        effect.poll().unwrap();

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(cell.dependent_count(), 0);

        cell.write(1);
        engine.flush().unwrap();
        effect.poll().unwrap();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn failing_effect_reports_itself() {
        let engine = Engine::new();
        let effect = engine.try_effect(|| anyhow::bail!("sink unavailable"));

        let err = effect.poll().unwrap_err();
        assert!(matches!(err, ReactiveError::EffectExecution { effect: id, .. } if id == effect.id()));
        assert!(effect.is_stale());
        assert_eq!(effect.run_count(), 0);
    }

    #[test]
    fn dropping_effect_unqueues_it() {
        let engine = Engine::new();
        let effect = engine.effect(|| {});
        assert_eq!(engine.pending_effects(), vec![effect.id()]);

        drop(effect);
        assert!(engine.pending_effects().is_empty());
        assert_eq!(engine.node_count(), 0);
    }

    #[test]
    fn effect_clone_shares_state() {
        let engine = Engine::new();
        let effect1 = engine.effect(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());

        effect1.poll().unwrap();
        assert_eq!(effect2.run_count(), 1);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
