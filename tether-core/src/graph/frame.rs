//! Evaluation Frames
//!
//! The frame stack tracks which node is currently evaluating. When a node is
//! read, the read is recorded on the top frame so that the evaluating node
//! can register the read node as an upstream dependency.
//!
//! # Implementation
//!
//! Each [`Graph`](super::Graph) owns its own stack, so independent graphs
//! never see each other's reads. Entering an evaluation pushes a frame and
//! the returned [`FrameGuard`] pops it, either through [`FrameGuard::finish`]
//! or on drop if the evaluation unwinds.
//!
//! Untracked sections push a frame with no node. Reads made under such a
//! frame are not recorded anywhere.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::node::NodeId;

/// Reads recorded during one evaluation, with the version each had.
pub(crate) type Reads = SmallVec<[(NodeId, u64); 8]>;

/// An entry in the evaluation stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The node being evaluated, or `None` for an untracked section.
    node: Option<NodeId>,
    /// Dependencies collected during this evaluation.
    reads: Reads,
}

impl Frame {
    pub(crate) fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub(crate) fn is_tracked(&self) -> bool {
        self.node.is_some()
    }

    /// Record a read. The first version seen for a node wins so that a
    /// write made mid-evaluation leaves the capture behind.
    pub(crate) fn record(&mut self, id: NodeId, version: u64) {
        if self.node.is_none() || self.reads.iter().any(|(seen, _)| *seen == id) {
            return;
        }
        self.reads.push((id, version));
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct FrameGuard<'a> {
    frames: &'a RefCell<Vec<Frame>>,
    node: Option<NodeId>,
    finished: bool,
}

impl<'a> FrameGuard<'a> {
    /// Push a new frame for `node` (or an untracked frame for `None`).
    pub(crate) fn enter(frames: &'a RefCell<Vec<Frame>>, node: Option<NodeId>) -> Self {
        frames.borrow_mut().push(Frame {
            node,
            reads: SmallVec::new(),
        });
        Self {
            frames,
            node,
            finished: false,
        }
    }

    /// Pop the frame and hand back the reads it collected.
    pub(crate) fn finish(mut self) -> Reads {
        self.finished = true;
        self.pop().map(|frame| frame.reads).unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        let popped = self.frames.borrow_mut().pop();
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.node, self.node,
                "evaluation frame mismatch: expected {:?}, got {:?}",
                self.node, frame.node
            );
        }
        popped
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
