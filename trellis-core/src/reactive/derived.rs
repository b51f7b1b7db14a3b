//! Derived Implementation
//!
//! A Derived is a cached value computed from other nodes. It re-evaluates
//! only when it is read after one of its inputs changed.
//!
//! # How Derived Values Work
//!
//! 1. On first read, the function runs and its result is cached. Every node
//!    it read becomes a dependency.
//!
//! 2. When a dependency changes, the derived value is marked stale. Nothing
//!    runs yet.
//!
//! 3. On the next read, dependencies are checked in the order they were
//!    read. Derived dependencies are brought up to date first. If none of
//!    them moved past the revision recorded at the last run, the cache is
//!    reused as is.
//!
//! 4. Otherwise the function runs again and the dependency set is replaced
//!    with exactly what this run read. The derived value's own revision only
//!    moves if the new result differs from the cached one.
//!
//! # Why This Matters
//!
//! Invalidation and recomputation are separate passes, so in a diamond
//! (one cell feeding two derived values that feed a third) the outer value
//! only ever sees both inputs at their final values, and runs once.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind, Revision, Runner};

use super::runtime::{Engine, NodeHandle};

/// A cached derived value that recomputes lazily.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some functions return the same value even if inputs changed),
/// which lets downstream nodes skip their own recomputation.
pub struct Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    handle: Arc<NodeHandle>,

    /// The cached value (None if never computed). Readers take a snapshot
    /// and release the lock before running any user code.
    value: Arc<Mutex<Option<Arc<T>>>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new derived value with the given function.
    ///
    /// The function is not run immediately. It runs on first read.
    pub fn new<F>(engine: &Engine, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_new(engine, move || Ok(compute()))
    }

    /// Create a derived value whose function may fail.
    ///
    /// A failed run leaves the previous cached value in place and the node
    /// stale, so the next read tries again. Engine errors returned by nested
    /// [`Derived::try_read`] calls can be propagated with `?` and come out
    /// unchanged.
    ///
    /// ```rust
    /// use trellis_core::{Engine, ReactiveError};
    ///
    /// let engine = Engine::new();
    /// let input = engine.cell(4);
    ///
    /// let source = input.clone();
    /// let checked = engine.try_derived(move || {
    ///     let value = source.read();
    ///     anyhow::ensure!(value >= 0, "negative input: {value}");
    ///     Ok(value * 2)
    /// });
    ///
    /// assert_eq!(checked.try_read().unwrap(), 8);
    /// input.write(-1);
    /// assert!(matches!(checked.try_read(), Err(ReactiveError::Recomputation { .. })));
    /// ```
    pub fn try_new<F>(engine: &Engine, compute: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let value = Arc::new(Mutex::new(None));
        let cache = Arc::clone(&value);

        let runner: Runner = Arc::new(move || {
            let next = compute()?;
            let mut cached = cache.lock();
            if cached.as_deref() == Some(&next) {
                return Ok(false);
            }
            *cached = Some(Arc::new(next));
            Ok(true)
        });

        let id = engine.register(NodeKind::Derived, Some(runner));
        Self {
            handle: NodeHandle::new(engine, id),
            value,
        }
    }

    /// Attach a debug label, shown in logs and cycle paths.
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

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics with the error message if the value cannot be produced. Use
    /// [`Derived::try_read`] to handle failures.
    pub fn read(&self) -> T {
        self.try_read().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// If called while another node is being evaluated, this node becomes
    /// one of its dependencies, even when the read fails.
    pub fn try_read(&self) -> Result<T> {
        self.try_with(T::clone)
    }

    /// Borrow the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics like [`Derived::read`] if the value cannot be produced.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`Derived::with`].
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let engine = self.engine();
        engine.exclusive(|| {
            let refreshed = engine.refresh(self.id());
            engine.track(self.id());
            refreshed?;

            let cached = self
                .snapshot()
                .ok_or(ReactiveError::Disposed { node: self.id() })?;
            Ok(f(&*cached))
        })
    }

    /// Get the last computed value without refreshing or tracking.
    pub fn cached(&self) -> Option<T> {
        self.snapshot().as_deref().cloned()
    }

    fn snapshot(&self) -> Option<Arc<T>> {
        let engine = self.engine();
        engine.exclusive(|| self.value.lock().clone())
    }

    /// Whether a dependency changed since the last evaluation.
    pub fn is_stale(&self) -> bool {
        self.engine().is_stale(self.id())
    }

    /// Check if the value has been computed at least once.
    pub fn has_value(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of times the computed value has changed.
    pub fn revision(&self) -> Revision {
        self.engine().revision_of(self.id()).unwrap_or_default()
    }

    /// Nodes read during the last evaluation, in read order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        self.engine().dependencies_of(self.id())
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.engine().dependents_of(self.id()).len()
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id())
            .field("stale", &self.is_stale())
            .field("cached", &self.cached())
            .field("revision", &self.revision())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
