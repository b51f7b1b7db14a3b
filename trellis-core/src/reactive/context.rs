//! Evaluation Context
//!
//! The evaluation context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a node is read, the
//! read is recorded against the computation on top of the stack.
//!
//! # Implementation
//!
//! Each engine owns its own stack, so independent engines never observe
//! each other's evaluations. Entering a computation pushes a frame, and the
//! [`EvalScope`] guard pops it again, even if the computation panics.
//!
//! A frame without an owner is an untracked region: reads made while it is
//! on top are not recorded anywhere.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::{NodeId, Revision};

use super::runtime::Engine;

/// Reads collected for one running computation.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    owner: Option<NodeId>,
    reads: IndexMap<NodeId, Revision>,
}

impl Frame {
    pub(crate) fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub(crate) fn into_reads(self) -> IndexMap<NodeId, Revision> {
        self.reads
    }
}

/// Stack of running computations, innermost last.
#[derive(Debug, Default)]
pub(crate) struct EvalStack {
    frames: SmallVec<[Frame; 4]>,
}

impl EvalStack {
    pub(crate) fn push(&mut self, owner: Option<NodeId>) {
        self.frames.push(Frame {
            owner,
            reads: IndexMap::new(),
        });
    }

    pub(crate) fn pop(&mut self, owner: Option<NodeId>) -> Option<Frame> {
        let frame = self.frames.pop();
        if let Some(frame) = &frame {
            debug_assert_eq!(
                frame.owner, owner,
                "evaluation frame mismatch: expected {:?}, got {:?}",
                owner, frame.owner
            );
        }
        frame
    }

    /// The computation reads are currently attributed to, if any.
    pub(crate) fn current(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.owner)
    }

    pub(crate) fn is_evaluating(&self, node: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.owner == Some(node))
    }

    /// Record a read against the innermost frame.
    ///
    /// The first revision seen wins, so a node that changes between two
    /// reads in the same run is detected as changed afterwards.
    pub(crate) fn record(&mut self, node: NodeId, revision: Revision) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.owner.is_some() {
                frame.reads.entry(node).or_insert(revision);
            }
        }
    }

    /// Owners from the frame evaluating `node` up to the top of the stack,
    /// followed by `node` again.
    pub(crate) fn cycle_path(&self, node: NodeId) -> Vec<NodeId> {
        let start = self
            .frames
            .iter()
            .position(|frame| frame.owner == Some(node))
            .unwrap_or(0);

        let mut path: Vec<NodeId> = self.frames[start..]
            .iter()
            .filter_map(Frame::owner)
            .collect();
        path.push(node);
        path
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard that pops its frame when dropped.
///
/// Call [`EvalScope::finish`] to pop the frame and take its reads.
pub(crate) struct EvalScope<'a> {
    engine: &'a Engine,
    owner: Option<NodeId>,
    open: bool,
}

impl<'a> EvalScope<'a> {
    pub(crate) fn enter(engine: &'a Engine, owner: Option<NodeId>) -> Self {
        engine.with_state(|state| state.stack.push(owner));
        Self {
            engine,
            owner,
            open: true,
        }
    }

    pub(crate) fn finish(mut self) -> IndexMap<NodeId, Revision> {
        self.open = false;
        self.engine
            .with_state(|state| state.stack.pop(self.owner))
            .map(Frame::into_reads)
            .unwrap_or_default()
    }
}

impl Drop for EvalScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.engine.with_state(|state| state.stack.pop(self.owner));
        }
    }
}
