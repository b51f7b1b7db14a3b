//! Reactive Runtime
//!
//! The engine is the central coordinator that connects cells, derived
//! values and effects. It owns the node arena, the evaluation stack and the
//! effect batcher.
//!
//! # How It Works
//!
//! 1. Every node registers with the engine on creation and is removed when
//!    its last handle is dropped.
//!
//! 2. When a derived value or effect reads another node, the engine records
//!    the read against the computation on top of the evaluation stack.
//!
//! 3. When a cell is written, the engine:
//!    a. Bumps the cell's revision
//!    b. Marks every transitive dependent stale
//!    c. Queues affected effects on the batcher
//!    d. Recomputes nothing; derived values are lazy
//!
//! 4. Reading a stale node first checks whether any dependency actually
//!    moved past the revision it was read at, refreshing derived
//!    dependencies on the way. Only then is the node's function run.
//!
//! 5. Queued effects run when the outermost batch closes or when
//!    [`Engine::flush`] is called, never on their own.
//!
//! # Thread Safety
//!
//! All engine state sits behind one re-entrant lock. Every public operation
//! takes it for its whole duration, so graph mutation is serialized across
//! threads while nested reads made by a running computation re-enter it on
//! the same thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use smallvec::SmallVec;
use tracing::{debug, debug_span, trace, warn};

use crate::config::EngineConfig;
use crate::error::{FlushError, ReactiveError, Result};
use crate::graph::{Graph, Node, NodeId, NodeKind, Revision, Runner};

use super::batch::Batcher;
use super::context::{EvalScope, EvalStack};
use super::{Cell, Derived, Effect};

/// Mutable engine state, only reachable through [`Engine::with_state`].
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) graph: Graph,
    pub(crate) stack: EvalStack,
    pub(crate) batcher: Batcher,
}

struct EngineInner {
    config: EngineConfig,
    state: ReentrantMutex<RefCell<State>>,
}

/// A reactive engine.
///
/// Cloning an engine is cheap and yields another handle to the same graph.
/// Independent engines share nothing.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use trellis_core::Engine;
///
/// let engine = Engine::new();
/// let count = engine.cell(1);
///
/// let source = count.clone();
/// let doubled = engine.derived(move || source.read() * 2);
///
/// let runs = Arc::new(AtomicUsize::new(0));
/// let observed = doubled.clone();
/// let counter = runs.clone();
/// let _effect = engine.effect(move || {
///     observed.read();
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// engine.with_batch(|| count.write(5)).unwrap();
/// assert_eq!(doubled.read(), 10);
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                state: ReentrantMutex::new(RefCell::new(State::default())),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Create a cell owned by this engine.
    pub fn cell<T>(&self, value: T) -> Cell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Cell::new(self, value)
    }

    /// Create a derived value owned by this engine.
    pub fn derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Derived::new(self, compute)
    }

    /// Create a derived value whose function may fail.
    pub fn try_derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Derived::try_new(self, compute)
    }

    /// Create an effect and queue it for the next flush.
    pub fn effect<F>(&self, run: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::new(self, run)
    }

    /// Create an effect whose function may fail.
    pub fn try_effect<F>(&self, run: F) -> Effect
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Effect::try_new(self, run)
    }

    /// Run `f` as a batch, then flush queued effects.
    ///
    /// Batches nest; only the outermost one flushes. Writes inside the
    /// batch invalidate immediately, effects run once each at the end, in
    /// the order they were first queued. Effect failures do not stop the
    /// flush (unless configured otherwise) and are returned together.
    pub fn with_batch<R>(&self, f: impl FnOnce() -> R) -> std::result::Result<R, FlushError> {
        let _guard = self.inner.state.lock();

        let scope = BatchScope::enter(self);
        let value = f();
        if scope.close() {
            self.flush()?;
        }
        Ok(value)
    }

    /// Poll every queued effect once.
    ///
    /// Calling this from inside a running flush is a no-op; anything queued
    /// during a flush waits for the next one. Effects left unpolled because
    /// the flush stopped early (or an effect panicked) stay queued.
    pub fn flush(&self) -> std::result::Result<(), FlushError> {
        let _guard = self.inner.state.lock();

        let Some(pending) = self.with_state(|state| state.batcher.begin_flush()) else {
            trace!("flush requested during flush, deferred");
            return Ok(());
        };
        let span = debug_span!("flush", effects = pending.len());
        let _entered = span.enter();

        let mut flushing = FlushScope {
            engine: self,
            remaining: pending.into_iter(),
        };
        let mut failures = Vec::new();
        for effect in flushing.remaining.by_ref() {
            if !self.with_state(|state| state.graph.contains(effect)) {
                continue;
            }
            if let Err(err) = self.poll_effect(effect) {
                warn!(effect = %effect, error = %err, "effect failed during flush");
                failures.push(err);
                if !self.config().isolates_effect_failures() {
                    break;
                }
            }
        }
        drop(flushing);

        debug!(failed = failures.len(), "flush complete");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlushError::new(failures))
        }
    }

    /// Run `f` without recording any reads against the current computation.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.state.lock();

        let scope = EvalScope::enter(self, None);
        let value = f();
        scope.finish();
        value
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.with_state(|state| state.batcher.is_batching())
    }

    /// Whether a derived value or effect is currently being evaluated.
    pub fn is_tracking(&self) -> bool {
        self.with_state(|state| state.stack.current().is_some())
    }

    /// Effects waiting for the next flush, in flush order.
    pub fn pending_effects(&self) -> Vec<NodeId> {
        self.with_state(|state| state.batcher.pending())
    }

    pub fn node_count(&self) -> usize {
        self.with_state(|state| state.graph.node_count())
    }

    pub fn revision_of(&self, node: NodeId) -> Option<Revision> {
        self.with_state(|state| state.graph.revision(node))
    }

    pub fn is_stale(&self, node: NodeId) -> bool {
        self.with_state(|state| state.graph.get(node).map(Node::is_stale).unwrap_or(false))
    }

    /// Nodes `node` read during its last evaluation, in read order.
    pub fn dependencies_of(&self, node: NodeId) -> Vec<NodeId> {
        self.with_state(|state| {
            state
                .graph
                .get(node)
                .map(|n| n.dependencies().keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Nodes that read `node` during their last evaluation.
    pub fn dependents_of(&self, node: NodeId) -> Vec<NodeId> {
        self.with_state(|state| {
            state
                .graph
                .get(node)
                .map(|n| n.dependents().iter().copied().collect())
                .unwrap_or_default()
        })
    }

    // ------------------------------------------------------------------------
    // Crate-internal protocol used by the handles
    // ------------------------------------------------------------------------

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Run `f` while holding the engine's exclusive lock.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.state.lock();
        f()
    }

    pub(crate) fn register(&self, kind: NodeKind, runner: Option<Runner>) -> NodeId {
        let id = self.with_state(|state| {
            let id = state.graph.insert(kind, runner);
            if kind == NodeKind::Effect {
                state.batcher.enqueue(id);
            }
            id
        });
        trace!(node = %id, ?kind, "node registered");
        id
    }

    pub(crate) fn set_label(&self, node: NodeId, label: String) {
        self.with_state(|state| {
            if let Some(entry) = state.graph.get_mut(node) {
                entry.set_label(label);
            }
        });
    }

    pub(crate) fn display_name(&self, node: NodeId) -> String {
        self.with_state(|state| display_name(&state.graph, node))
    }

    /// Remove a node whose last handle was dropped.
    pub(crate) fn release(&self, node: NodeId) {
        let removed = self.with_state(|state| {
            state.batcher.forget(node);
            state.graph.remove(node)
        });
        if removed.is_some() {
            trace!(node = %node, "node released");
        }
        // Dropping the node may drop handles captured by its function.
        drop(removed);
    }

    /// Stop an effect for good: unqueue it, drop its edges and its function.
    pub(crate) fn detach(&self, node: NodeId) {
        let runner = self.with_state(|state| {
            state.batcher.forget(node);
            state.graph.clear_dependencies(node);
            state.graph.get_mut(node).and_then(|entry| {
                entry.mark_fresh();
                entry.take_runner()
            })
        });
        trace!(node = %node, "effect disposed");
        drop(runner);
    }

    /// Record a read of `node` against the running computation, if any.
    pub(crate) fn track(&self, node: NodeId) {
        self.with_state(|state| {
            if let Some(revision) = state.graph.revision(node) {
                state.stack.record(node, revision);
            }
        });
    }

    /// Bump a written cell's revision, invalidate downstream, queue effects.
    pub(crate) fn commit_write(&self, cell: NodeId) {
        self.with_state(|state| {
            let effects = state.graph.mark_changed(cell);
            let reached = effects.len();
            let queued = effects
                .into_iter()
                .filter(|effect| state.batcher.enqueue(*effect))
                .count();
            trace!(
                node = %cell,
                revision = ?state.graph.revision(cell),
                reached,
                queued,
                "cell written"
            );
        });
    }

    /// Poll an effect, attributing any failure to it.
    pub(crate) fn poll_effect(&self, effect: NodeId) -> Result<()> {
        self.refresh(effect).map_err(|err| match err {
            ReactiveError::EffectExecution { effect: failed, .. } if failed == effect => err,
            other => ReactiveError::EffectExecution {
                effect,
                source: Box::new(other),
            },
        })
    }

    /// Bring `node` up to date.
    ///
    /// A fresh node is left alone. A stale node that has been evaluated
    /// before is first revalidated against its dependencies' revisions and
    /// only recomputed when one of them actually changed.
    pub(crate) fn refresh(&self, node: NodeId) -> Result<()> {
        let _guard = self.inner.state.lock();

        let evaluated = self.with_state(|state| -> Result<Option<bool>> {
            if state.stack.is_evaluating(node) {
                let path = state
                    .stack
                    .cycle_path(node)
                    .into_iter()
                    .map(|id| display_name(&state.graph, id))
                    .collect();
                return Err(ReactiveError::CyclicDependency { path });
            }
            let entry = state
                .graph
                .get(node)
                .ok_or(ReactiveError::Disposed { node })?;
            Ok(entry.is_stale().then(|| entry.is_evaluated()))
        })?;

        let Some(evaluated) = evaluated else {
            return Ok(());
        };

        if evaluated && !self.dependencies_changed(node)? {
            self.with_state(|state| {
                if let Some(entry) = state.graph.get_mut(node) {
                    entry.mark_fresh();
                }
            });
            trace!(node = %node, "revalidated without recomputation");
            return Ok(());
        }

        self.recompute(node)
    }

    /// Walk `node`'s dependencies in read order, refreshing derived ones,
    /// and stop at the first whose revision moved.
    fn dependencies_changed(&self, node: NodeId) -> Result<bool> {
        let dependencies: SmallVec<[(NodeId, Revision); 8]> = self.with_state(|state| {
            state
                .graph
                .get(node)
                .map(|entry| {
                    entry
                        .dependencies()
                        .iter()
                        .map(|(dep, seen)| (*dep, *seen))
                        .collect()
                })
                .unwrap_or_default()
        });

        for (dependency, seen) in dependencies {
            match self.with_state(|state| state.graph.get(dependency).map(Node::kind)) {
                None => return Ok(true),
                Some(NodeKind::Cell) => {}
                Some(_) => self.refresh(dependency)?,
            }
            if self.revision_of(dependency) != Some(seen) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn recompute(&self, node: NodeId) -> Result<()> {
        let (kind, runner) = self
            .with_state(|state| {
                state.graph.get_mut(node).map(|entry| {
                    // Cleared up front so invalidation during the run sticks.
                    entry.mark_fresh();
                    (entry.kind(), entry.runner())
                })
            })
            .ok_or(ReactiveError::Disposed { node })?;

        let Some(runner) = runner else {
            return Ok(());
        };

        let guard = RecomputeGuard::arm(self, node);
        let scope = EvalScope::enter(self, Some(node));
        let outcome = runner();
        let reads = scope.finish();
        guard.disarm();

        match outcome {
            Ok(changed) => {
                self.with_state(|state| {
                    let stale_again = state.graph.any_changed(&reads);
                    state.graph.replace_dependencies(node, reads);
                    if let Some(entry) = state.graph.get_mut(node) {
                        entry.mark_evaluated();
                        if changed {
                            entry.bump_revision();
                        }
                        if stale_again {
                            entry.mark_stale();
                        }
                    }
                    if stale_again && kind == NodeKind::Effect {
                        state.batcher.enqueue(node);
                    }
                });
                trace!(node = %node, changed, "recomputed");
                Ok(())
            }
            Err(err) => {
                self.with_state(|state| {
                    state.graph.extend_dependencies(node, reads);
                    if let Some(entry) = state.graph.get_mut(node) {
                        entry.mark_stale();
                        entry.mark_unevaluated();
                    }
                });
                Err(self.attribute(node, kind, err))
            }
        }
    }

    /// Turn a user closure's error into a [`ReactiveError`] naming `node`.
    ///
    /// Engine errors raised further down and carried up through `?` keep
    /// their identity for derived nodes, so a cycle stays a cycle.
    fn attribute(&self, node: NodeId, kind: NodeKind, err: anyhow::Error) -> ReactiveError {
        let err = match err.downcast::<ReactiveError>() {
            Ok(inner) if kind == NodeKind::Effect => ReactiveError::EffectExecution {
                effect: node,
                source: Box::new(inner),
            },
            Ok(inner) => {
                trace!(node = %node, error = %inner, "passing through engine error");
                return inner;
            }
            Err(err) if kind == NodeKind::Effect => ReactiveError::EffectExecution {
                effect: node,
                source: err.into(),
            },
            Err(err) => ReactiveError::Recomputation {
                node,
                source: err.into(),
            },
        };
        warn!(node = %node, name = %self.display_name(node), error = %err, "evaluation failed");
        err
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_state(|state| {
            f.debug_struct("Engine")
                .field("config", &self.inner.config)
                .field("node_count", &state.graph.node_count())
                .field("pending_effects", &state.batcher.pending())
                .field("batching", &state.batcher.is_batching())
                .field("flushing", &state.batcher.is_flushing())
                .field("evaluation_depth", &state.stack.depth())
                .finish()
        })
    }
}

fn display_name(graph: &Graph, node: NodeId) -> String {
    graph
        .get(node)
        .map(Node::display_name)
        .unwrap_or_else(|| node.to_string())
}

/// Shared ownership of one registered node.
///
/// Dropping the last handle removes the node from the engine.
pub(crate) struct NodeHandle {
    engine: Engine,
    id: NodeId,
}

impl NodeHandle {
    pub(crate) fn new(engine: &Engine, id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            engine: engine.clone(),
            id,
        })
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.engine.release(self.id);
    }
}

/// Open batch level; closes itself if `f` unwinds.
struct BatchScope<'a> {
    engine: &'a Engine,
    open: bool,
}

impl<'a> BatchScope<'a> {
    fn enter(engine: &'a Engine) -> Self {
        engine.with_state(|state| state.batcher.enter());
        Self { engine, open: true }
    }

    /// Returns `true` if this closed the outermost batch.
    fn close(mut self) -> bool {
        self.open = false;
        let outermost = self.engine.with_state(|state| state.batcher.exit());
        if outermost {
            debug!("batch closed");
        }
        outermost
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.engine.with_state(|state| state.batcher.exit());
        }
    }
}

/// A running flush. Whatever was not polled goes back to the front of the
/// queue when the scope ends.
struct FlushScope<'a> {
    engine: &'a Engine,
    remaining: indexmap::set::IntoIter<NodeId>,
}

impl Drop for FlushScope<'_> {
    fn drop(&mut self) {
        let rest: Vec<NodeId> = self.remaining.by_ref().collect();
        if !rest.is_empty() {
            debug!(requeued = rest.len(), "flush stopped early");
        }
        self.engine.with_state(|state| {
            state.batcher.requeue_front(rest);
            state.batcher.end_flush();
        });
    }
}

/// Puts a node back to stale and unevaluated if its function unwinds.
struct RecomputeGuard<'a> {
    engine: &'a Engine,
    node: NodeId,
    armed: bool,
}

impl<'a> RecomputeGuard<'a> {
    fn arm(engine: &'a Engine, node: NodeId) -> Self {
        Self {
            engine,
            node,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(node = %self.node, "evaluation panicked");
        self.engine.with_state(|state| {
            if let Some(entry) = state.graph.get_mut(self.node) {
                entry.mark_stale();
                entry.mark_unevaluated();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_effect(engine: &Engine, cell: &Cell<i32>) -> (Effect, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let source = cell.clone();
        let effect = engine.effect(move || {
            source.read();
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (effect, runs)
    }

    #[test]
    fn engines_are_isolated() {
        let first = Engine::new();
        let second = Engine::new();

        let _a = first.cell(1);
        let _b = first.cell(2);
        let _c = second.cell(3);

        assert_eq!(first.node_count(), 2);
        assert_eq!(second.node_count(), 1);
    }

    #[test]
    fn dropping_last_handle_releases_node() {
        let engine = Engine::new();
        let cell = engine.cell(0);
        let copy = cell.clone();
        assert_eq!(engine.node_count(), 1);

        drop(cell);
        assert_eq!(engine.node_count(), 1);
        drop(copy);
        assert_eq!(engine.node_count(), 0);
    }

    #[test]
    fn new_effects_wait_for_a_flush() {
        let engine = Engine::new();
        let cell = engine.cell(0);
        let (effect, runs) = counting_effect(&engine, &cell);

        assert_eq!(engine.pending_effects(), vec![effect.id()]);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        engine.flush().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.pending_effects().is_empty());
    }

    #[test]
    fn unbatched_writes_queue_without_flushing() {
        let engine = Engine::new();
        let cell = engine.cell(0);
        let (_effect, runs) = counting_effect(&engine, &cell);
        engine.flush().unwrap();

        cell.write(1);
        cell.write(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pending_effects().len(), 1);

        engine.with_batch(|| {}).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_flag_follows_scope() {
        let engine = Engine::new();
        assert!(!engine.is_batching());
        engine
            .with_batch(|| {
                assert!(engine.is_batching());
                engine.with_batch(|| assert!(engine.is_batching())).unwrap();
                assert!(engine.is_batching());
            })
            .unwrap();
        assert!(!engine.is_batching());
    }

    #[test]
    fn batch_returns_value() {
        let engine = Engine::new();
        assert_eq!(engine.with_batch(|| 42).unwrap(), 42);
    }

    #[test]
    fn untrack_hides_reads() {
        let engine = Engine::new();
        let tracked = engine.cell(1);
        let hidden = engine.cell(10);

        let (a, b, e) = (tracked.clone(), hidden.clone(), engine.clone());
        let derived = engine.derived(move || a.read() + e.untrack(|| b.read()));
        assert_eq!(derived.read(), 11);

        assert_eq!(engine.dependencies_of(derived.id()), vec![tracked.id()]);
        hidden.write(20);
        assert!(!derived.is_stale());
    }

    #[test]
    fn tracking_flag_is_set_inside_evaluation() {
        let engine = Engine::new();
        let observer = engine.clone();
        let derived = engine.derived(move || observer.is_tracking());

        assert!(!engine.is_tracking());
        assert!(derived.read());
    }
}
