//! Resumable depth-first traversal.
//!
//! The cursor keeps an explicit frame stack instead of driving a
//! callback, so a consumer can walk a few rows, await a load, and pick
//! up exactly where it left off.

use super::engine::Tree;
use crate::error::TreeError;
use crate::source::TreeSource;
use crate::types::NodeId;

struct Frame {
    children: Vec<NodeId>,
    next: usize,
}

/// Pre-order cursor over a subtree. Starts positioned at `start`;
/// [`descend`](Self::descend) enters the current container (loading it
/// on demand), [`next`](Self::next) advances to the following sibling,
/// and [`ascend`](Self::ascend) resumes after the enclosing container.
pub struct TopDownCursor<'a, S: TreeSource> {
    tree: &'a Tree<S>,
    stack: Vec<Frame>,
    current: Option<NodeId>,
    stopped: bool,
}

impl<'a, S: TreeSource> TopDownCursor<'a, S> {
    pub(crate) fn new(tree: &'a Tree<S>, start: NodeId) -> Self {
        Self {
            tree,
            stack: Vec::new(),
            current: Some(start),
            stopped: false,
        }
    }

    /// Node the cursor is positioned on, if any.
    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    /// Enter the current container's children, loading them if needed.
    /// Positions on the first child, or yields `None` for an empty
    /// listing (the frame is still entered; `ascend` leaves it).
    pub async fn descend(&mut self) -> Result<Option<NodeId>, TreeError> {
        if self.stopped {
            return Ok(None);
        }
        let Some(cur) = self.current else {
            return Ok(None);
        };
        self.tree.ensure_loaded(cur).await?;
        let children = self
            .tree
            .children(cur)
            .ok_or(TreeError::NotAContainer(cur))?;
        self.stack.push(Frame { children, next: 0 });
        Ok(self.advance())
    }

    /// Advance to the next sibling in the current frame. `None` once the
    /// frame is exhausted; use `ascend` to continue above it.
    pub fn next(&mut self) -> Option<NodeId> {
        if self.stopped {
            return None;
        }
        self.advance()
    }

    /// Leave the current frame and advance past the container it
    /// belongs to. Erring at the start frame keeps the walk bounded to
    /// the subtree the cursor was created on.
    pub fn ascend(&mut self) -> Result<Option<NodeId>, TreeError> {
        if self.stopped {
            return Ok(None);
        }
        if self.stack.len() <= 1 {
            return Err(TreeError::CursorAtStart);
        }
        self.stack.pop();
        Ok(self.advance())
    }

    /// Terminate the walk; every later call yields `None`.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.current = None;
    }

    fn advance(&mut self) -> Option<NodeId> {
        let frame = self.stack.last_mut()?;
        if frame.next < frame.children.len() {
            let id = frame.children[frame.next];
            frame.next += 1;
            self.current = Some(id);
            Some(id)
        } else {
            self.current = None;
            None
        }
    }
}
