//! Batching
//!
//! Group multiple writes into a single effect flush.
//!
//! The batcher is a two-state machine, Idle and Batching, plus the queue of
//! effects waiting to be polled. The queue deduplicates and keeps first
//! insertion order, so an effect invalidated many times in one batch is
//! polled once, at the position where it was first queued.

use indexmap::IndexSet;

use crate::graph::NodeId;

#[derive(Debug, Default)]
pub(crate) struct Batcher {
    depth: usize,
    flushing: bool,
    pending: IndexSet<NodeId>,
}

impl Batcher {
    /// Queue an effect. Returns `false` if it was already queued.
    pub(crate) fn enqueue(&mut self, effect: NodeId) -> bool {
        self.pending.insert(effect)
    }

    /// Drop an effect from the queue.
    pub(crate) fn forget(&mut self, effect: NodeId) {
        self.pending.shift_remove(&effect);
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leave one batch level. Returns `true` when the outermost batch closed.
    pub(crate) fn exit(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Start a flush, taking the current queue.
    ///
    /// Returns `None` if a flush is already running; effects queued while
    /// flushing wait for the next flush.
    pub(crate) fn begin_flush(&mut self) -> Option<IndexSet<NodeId>> {
        if self.flushing {
            return None;
        }
        self.flushing = true;
        Some(std::mem::take(&mut self.pending))
    }

    pub(crate) fn end_flush(&mut self) {
        self.flushing = false;
    }

    /// Put effects that were not polled back at the front of the queue.
    pub(crate) fn requeue_front(&mut self, effects: impl IntoIterator<Item = NodeId>) {
        let mut queue: IndexSet<NodeId> = effects.into_iter().collect();
        queue.extend(self.pending.drain(..));
        self.pending = queue;
    }

    pub(crate) fn pending(&self) -> Vec<NodeId> {
        self.pending.iter().copied().collect()
    }
}
