//! Flattened-branch bookkeeping.
//!
//! Exactly one node on any root-to-node path owns the buffer that
//! represents a subtree: ownership moves up on expand (merge) and back
//! down on collapse (split). Inserts and unlinks splice the owner's
//! buffer at the boundary instead of rebuilding it, and branch sizes are
//! adjusted along the pass-through chain between the mutated node and
//! the owner.

use super::state::TreeState;
use crate::events::TreeEvent;
use crate::splice::splice;
use crate::types::NodeId;
use tracing::warn;

impl TreeState {
    /// Install `buffer` as `id`'s flattened branch. Only root buffer
    /// changes are broadcast; consumers render from the root buffer
    /// alone.
    pub(crate) fn set_flattened(&mut self, id: NodeId, buffer: Option<Box<[NodeId]>>) {
        if let Some(c) = self.composite_mut(id) {
            c.flattened = buffer;
        }
        if id == self.root {
            self.events.emit(TreeEvent::BranchDidUpdate);
        }
    }

    /// Ids `id` contributes to its owner's buffer: itself plus, when it
    /// is an expanded container, its whole visible branch.
    pub(crate) fn contribution(&self, id: NodeId) -> usize {
        match self.composite(id) {
            Some(c) if c.expanded => 1 + c.branch_size,
            _ => 1,
        }
    }

    /// Apply `delta` to `start`'s branch size and every ancestor up to
    /// and including the nearest buffer owner, which is returned.
    fn owner_chain_adjust(&mut self, start: NodeId, delta: isize) -> Option<NodeId> {
        let mut cur = start;
        loop {
            if let Some(c) = self.composite_mut(cur) {
                c.branch_size = c.branch_size.saturating_add_signed(delta);
                if c.flattened.is_some() {
                    return Some(cur);
                }
            }
            cur = self.parent_of(cur)?;
        }
    }

    /// Merge `branch`'s self-owned buffer into the nearest flattened
    /// owner, immediately after `branch`'s own position, growing branch
    /// sizes along the pass-through chain.
    pub(crate) fn expand_branch(&mut self, branch: NodeId) {
        let size = self.composite(branch).map(|c| c.branch_size).unwrap_or(0);
        let mut cur = branch;
        loop {
            if cur != branch {
                if let Some(c) = self.composite_mut(cur) {
                    c.branch_size += size;
                }
                let owns = self
                    .composite(cur)
                    .map(|c| c.flattened.is_some())
                    .unwrap_or(false);
                if owns {
                    let taken = self.composite_mut(branch).and_then(|c| c.flattened.take());
                    let Some(owner_buf) = self.composite_mut(cur).and_then(|c| c.flattened.take())
                    else {
                        return;
                    };
                    match owner_buf.iter().position(|&n| n == branch) {
                        Some(at) => {
                            let merged = splice(&owner_buf, at + 1, 0, taken.as_deref());
                            self.set_flattened(cur, Some(merged));
                        }
                        None => {
                            warn!(branch = ?branch, owner = ?cur, "expand target missing from owner buffer");
                            if let Some(c) = self.composite_mut(branch) {
                                c.flattened = taken;
                            }
                            self.set_flattened(cur, Some(owner_buf));
                        }
                    }
                    return;
                }
            }
            match self.parent_of(cur) {
                Some(parent) => cur = parent,
                None => return,
            }
        }
    }

    /// Split `branch`'s span back out of its owner's buffer and hand it
    /// back to `branch`, shrinking branch sizes along the pass-through
    /// chain.
    pub(crate) fn shrink_branch(&mut self, branch: NodeId) {
        let size = self.composite(branch).map(|c| c.branch_size).unwrap_or(0);
        let mut cur = branch;
        loop {
            if cur != branch {
                if let Some(c) = self.composite_mut(cur) {
                    c.branch_size = c.branch_size.saturating_sub(size);
                }
                let owns = self
                    .composite(cur)
                    .map(|c| c.flattened.is_some())
                    .unwrap_or(false);
                if owns {
                    let Some(owner_buf) = self.composite_mut(cur).and_then(|c| c.flattened.take())
                    else {
                        return;
                    };
                    match owner_buf.iter().position(|&n| n == branch) {
                        Some(at) => {
                            let start = at + 1;
                            let end = (start + size).min(owner_buf.len());
                            let span: Box<[NodeId]> = owner_buf[start..end].into();
                            let shrunk = splice(&owner_buf, start, span.len(), None);
                            if let Some(c) = self.composite_mut(branch) {
                                c.flattened = Some(span);
                            }
                            self.set_flattened(cur, Some(shrunk));
                        }
                        None => {
                            warn!(branch = ?branch, owner = ?cur, "collapse target missing from owner buffer");
                            self.set_flattened(cur, Some(owner_buf));
                        }
                    }
                    return;
                }
            }
            match self.parent_of(cur) {
                Some(parent) => cur = parent,
                None => return,
            }
        }
    }

    /// Insert `item` (already parented to `parent`) into the child
    /// sequence and splice its contribution into the owning buffer right
    /// after its leading sibling's span. A same-named child is replaced
    /// in place; a foreign parent redirects through `move_node`.
    pub(crate) fn insert_item(&mut self, parent: NodeId, item: NodeId) {
        if self.parent_of(item) != Some(parent) {
            self.move_node(item, Some(parent), None);
            return;
        }
        let name = self.name_of(item);
        if let Some(existing) = self.find_child_by_name(parent, &name) {
            if existing != item {
                self.replace_child(parent, existing, item);
                return;
            }
        }
        let Some(c) = self.composite(parent) else {
            return;
        };
        if c.children.is_none() {
            return;
        }

        let increase = self.contribution(item);
        if let Some(c) = self.composite_mut(parent) {
            if let Some(kids) = c.children.as_mut() {
                kids.push(item);
            }
        }
        self.sort_children(parent);
        let Some(owner) = self.owner_chain_adjust(parent, increase as isize) else {
            return;
        };

        // Position: after the end of the leading sibling's contributed
        // span, or directly after the parent's own slot (index 0 when the
        // parent is the owner and therefore absent from its own buffer).
        let kids = self
            .composite(parent)
            .and_then(|c| c.children.clone())
            .unwrap_or_default();
        let pos = kids.iter().position(|&k| k == item).unwrap_or(0);
        let Some(owner_buf) = self.composite_mut(owner).and_then(|c| c.flattened.take()) else {
            return;
        };
        let insert_at = if pos > 0 {
            let sibling = kids[pos - 1];
            let span = match self.composite(sibling) {
                Some(sc) if sc.expanded => sc.branch_size,
                _ => 0,
            };
            match owner_buf.iter().position(|&n| n == sibling) {
                Some(at) => at + span + 1,
                None => {
                    warn!(node = ?item, owner = ?owner, "leading sibling missing from owner buffer");
                    self.set_flattened(owner, Some(owner_buf));
                    return;
                }
            }
        } else {
            owner_buf
                .iter()
                .position(|&n| n == parent)
                .map(|at| at + 1)
                .unwrap_or(0)
        };

        let mut segment = vec![item];
        let own = match self.composite_mut(item) {
            Some(ic) if ic.expanded => ic.flattened.take(),
            _ => None,
        };
        if let Some(own) = own {
            segment.extend_from_slice(&own);
        }
        let merged = splice(&owner_buf, insert_at, 0, Some(&segment));
        self.set_flattened(owner, Some(merged));
    }

    /// Remove `item` from `parent`'s child sequence and splice its span
    /// out of the owning buffer. An expanded container gets the span
    /// (minus its own id) back as a self-owned buffer so a later
    /// re-parent needs no reload. Unless `reparenting`, the node is then
    /// detached and disposed.
    pub(crate) fn unlink_item(&mut self, parent: NodeId, item: NodeId, reparenting: bool) {
        let idx = match self.composite(parent).and_then(|c| c.children.as_ref()) {
            Some(kids) => match kids.iter().position(|&k| k == item) {
                Some(idx) => idx,
                None => return,
            },
            None => return,
        };
        let decrease = self.contribution(item);
        if let Some(c) = self.composite_mut(parent) {
            if let Some(kids) = c.children.as_mut() {
                kids.remove(idx);
            }
        }
        if let Some(owner) = self.owner_chain_adjust(parent, -(decrease as isize)) {
            if let Some(owner_buf) = self.composite_mut(owner).and_then(|c| c.flattened.take()) {
                match owner_buf.iter().position(|&n| n == item) {
                    Some(at) => {
                        let expanded = self
                            .composite(item)
                            .map(|c| c.expanded)
                            .unwrap_or(false);
                        if expanded {
                            let end = (at + decrease).min(owner_buf.len());
                            let span: Box<[NodeId]> = owner_buf[at + 1..end].into();
                            if let Some(c) = self.composite_mut(item) {
                                c.flattened = Some(span);
                            }
                        }
                        let shrunk = splice(&owner_buf, at, decrease, None);
                        self.set_flattened(owner, Some(shrunk));
                    }
                    None => {
                        self.set_flattened(owner, Some(owner_buf));
                    }
                }
            }
        }
        if !reparenting && self.parent_of(item) == Some(parent) {
            self.move_node(item, None, None);
        }
    }

    /// Same-name in-place replacement: the slot keeps its position, the
    /// displaced node's span is patched out of the owning buffer, and
    /// the displaced node is disposed.
    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let old_contribution = self.contribution(old);
        if let Some(c) = self.composite_mut(parent) {
            if let Some(kids) = c.children.as_mut() {
                if let Some(slot) = kids.iter_mut().find(|k| **k == old) {
                    *slot = new;
                }
            }
        }

        let mut segment = vec![new];
        let own = match self.composite_mut(new) {
            Some(nc) if nc.expanded => nc.flattened.take(),
            _ => None,
        };
        if let Some(own) = own {
            segment.extend_from_slice(&own);
        }
        let delta = segment.len() as isize - old_contribution as isize;
        if let Some(owner) = self.owner_chain_adjust(parent, delta) {
            if let Some(owner_buf) = self.composite_mut(owner).and_then(|c| c.flattened.take()) {
                match owner_buf.iter().position(|&n| n == old) {
                    Some(at) => {
                        let patched = splice(&owner_buf, at, old_contribution, Some(&segment));
                        self.set_flattened(owner, Some(patched));
                    }
                    None => {
                        self.set_flattened(owner, Some(owner_buf));
                    }
                }
            }
        }
        if let Some(entry) = self.entry_mut(old) {
            entry.parent = None;
        }
        self.dispose(old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::events::EventBus;
    use crate::source::NodeDescriptor;

    fn state() -> TreeState {
        TreeState::new(&TreeConfig::default(), EventBus::new(32))
    }

    fn flattened(state: &TreeState, id: NodeId) -> Vec<NodeId> {
        state
            .composite(id)
            .and_then(|c| c.flattened.as_ref())
            .map(|b| b.to_vec())
            .unwrap_or_default()
    }

    fn expand(state: &mut TreeState, id: NodeId, listing: Vec<NodeDescriptor>) {
        state.install_children(id, listing);
        if let Some(c) = state.composite_mut(id) {
            c.expanded = true;
        }
        state.expand_branch(id);
    }

    #[test]
    fn test_insert_splices_after_leading_sibling_span() {
        let mut st = state();
        let root = st.root;
        st.install_children(
            root,
            vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
        );
        let a = st.find_child_by_name(root, "a").unwrap();
        let c = st.find_child_by_name(root, "c").unwrap();
        expand(&mut st, a, vec![NodeDescriptor::leaf("x")]);
        let x = st.find_child_by_name(a, "x").unwrap();
        assert_eq!(flattened(&st, root), vec![a, x, c]);

        let b = st.insert_descriptor(root, NodeDescriptor::leaf("b")).unwrap();
        assert_eq!(
            st.composite(root).unwrap().children.as_ref().unwrap(),
            &vec![a, b, c]
        );
        // b lands after a's whole contributed span, not right after a.
        assert_eq!(flattened(&st, root), vec![a, x, b, c]);
        assert_eq!(st.composite(root).unwrap().branch_size, 4);
    }

    #[test]
    fn test_unlink_hands_span_back_to_expanded_container() {
        let mut st = state();
        let root = st.root;
        st.install_children(
            root,
            vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
        );
        let a = st.find_child_by_name(root, "a").unwrap();
        let c = st.find_child_by_name(root, "c").unwrap();
        expand(&mut st, a, vec![NodeDescriptor::leaf("x")]);
        let x = st.find_child_by_name(a, "x").unwrap();

        st.unlink_item(root, a, true);
        assert_eq!(flattened(&st, root), vec![c]);
        assert_eq!(st.composite(root).unwrap().branch_size, 1);
        // a keeps [x] so a re-parent does not need a reload.
        assert_eq!(
            st.composite(a).unwrap().flattened.as_deref(),
            Some(vec![x].as_slice())
        );
        assert_eq!(st.composite(a).unwrap().branch_size, 1);
    }

    #[test]
    fn test_expand_then_collapse_restores_buffer() {
        let mut st = state();
        let root = st.root;
        st.install_children(
            root,
            vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
        );
        let a = st.find_child_by_name(root, "a").unwrap();
        let before = flattened(&st, root);
        expand(&mut st, a, vec![NodeDescriptor::leaf("x"), NodeDescriptor::leaf("y")]);
        assert_eq!(st.composite(root).unwrap().branch_size, 4);
        st.collapse(a);
        assert_eq!(flattened(&st, root), before);
        assert_eq!(st.composite(root).unwrap().branch_size, 2);
        // The collapsed node owns its own branch again.
        assert_eq!(st.composite(a).unwrap().flattened.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_same_name_insert_replaces_in_place() {
        let mut st = state();
        let root = st.root;
        st.install_children(
            root,
            vec![NodeDescriptor::leaf("a"), NodeDescriptor::leaf("b")],
        );
        let old_a = st.find_child_by_name(root, "a").unwrap();
        let b = st.find_child_by_name(root, "b").unwrap();
        let new_a = st.insert_descriptor(root, NodeDescriptor::leaf("a")).unwrap();
        assert_ne!(old_a, new_a);
        assert_eq!(flattened(&st, root), vec![new_a, b]);
        assert_eq!(st.composite(root).unwrap().branch_size, 2);
        assert!(st.entry(old_a).is_none());
    }
}
