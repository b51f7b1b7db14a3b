//! Cell Implementation
//!
//! A Cell is the mutable leaf of the graph. It holds a value and is the only
//! place where external writes enter the engine.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a running computation (derived value or
//!    effect), the read is recorded as a dependency of that computation.
//!
//! 2. When a cell is written, its revision is bumped and every transitive
//!    dependent is marked stale. Effects among them are queued.
//!
//! 3. Nothing is recomputed by a write. Stale derived values resolve on their
//!    next read, queued effects on the next flush.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::graph::{NodeId, NodeKind, Revision};

use super::runtime::{Engine, NodeHandle};

/// A mutable reactive value of type T.
///
/// # Example
///
/// ```rust
/// use trellis_core::Engine;
///
/// let engine = Engine::new();
/// let count = engine.cell(0);
///
/// count.write(5);
/// assert_eq!(count.read(), 5);
///
/// count.update(|v| v + 1);
/// assert_eq!(count.read(), 6);
/// ```
pub struct Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    handle: Arc<NodeHandle>,

    /// The current value. Readers take a snapshot and release the lock
    /// before running any user code.
    value: Arc<Mutex<Arc<T>>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(engine: &Engine, value: T) -> Self {
        let id = engine.register(NodeKind::Cell, None);
        Self {
            handle: NodeHandle::new(engine, id),
            value: Arc::new(Mutex::new(Arc::new(value))),
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

    /// Get the current value.
    ///
    /// If called while a derived value or effect is being evaluated, this
    /// cell becomes one of its dependencies.
    pub fn read(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without recording a dependency.
    pub fn read_untracked(&self) -> T {
        T::clone(&self.snapshot())
    }

    /// Borrow the current value, recording a dependency like [`Cell::read`].
    ///
    /// `f` sees the value as of the call, even if it writes to this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let engine = self.engine();
        engine.exclusive(|| {
            engine.track(self.id());
            let value = self.snapshot();
            f(&*value)
        })
    }

    fn snapshot(&self) -> Arc<T> {
        let engine = self.engine();
        engine.exclusive(|| Arc::clone(&*self.value.lock()))
    }

    /// Set a new value and invalidate everything downstream.
    ///
    /// Effects affected by the write are queued, not run.
    pub fn write(&self, value: T) {
        let engine = self.engine();
        engine.exclusive(|| {
            {
                let mut current = self.value.lock();
                if engine.config().skips_equal_writes() && **current == value {
                    trace!(node = %self.id(), "equal write skipped");
                    return;
                }
                *current = Arc::new(value);
            }
            engine.commit_write(self.id());
        });
    }

    /// Update the value using a function of the current one.
    ///
    /// The read is not tracked. `f` may read this cell or anything derived
    /// from it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let engine = self.engine();
        engine.exclusive(|| {
            let current = self.snapshot();
            let next = f(&*current);
            self.write(next);
        });
    }

    /// Number of times this cell's value has changed.
    pub fn revision(&self) -> Revision {
        self.engine().revision_of(self.id()).unwrap_or_default()
    }

    /// Number of nodes that read this cell during their last evaluation.
    pub fn dependent_count(&self) -> usize {
        self.engine().dependents_of(self.id()).len()
    }
}

impl<T> Clone for Cell<T>
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

impl<T> Debug for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("value", &self.read_untracked())
            .field("revision", &self.revision())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
