//! Arena-backed tree state and synchronous structural operations.
//!
//! The arena is the single owner of every node; parent and child links
//! are plain ids. All structural mutation happens here, synchronously,
//! under the engine's write lock, so no operation ever observes a
//! half-applied edit.

use super::node::{NodeData, NodeEntry};
use crate::config::{default_comparator, SortComparator, SortEntry, TreeConfig};
use crate::events::{EventBus, MetadataChange, MetadataChangeKind, TreeEvent};
use crate::path;
use crate::source::NodeDescriptor;
use crate::types::{NodeId, NodeKind, NAME_KEY};
use tracing::{debug, warn};

pub(crate) struct TreeState {
    arena: Vec<Option<NodeEntry>>,
    free: Vec<u32>,
    pub root: NodeId,
    pub events: EventBus,
    comparator: Option<SortComparator>,
}

impl TreeState {
    pub fn new(config: &TreeConfig, events: EventBus) -> Self {
        let mut state = Self {
            arena: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            events,
            comparator: config.comparator.clone(),
        };
        let root = state.alloc(NodeEntry::new(
            None,
            0,
            &config.root_name,
            NodeKind::Container,
            Default::default(),
        ));
        state.root = root;
        state
    }

    // ---- arena access ----

    pub fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        self.arena.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn entry_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.arena.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub fn composite(&self, id: NodeId) -> Option<&super::CompositeData> {
        self.entry(id).and_then(NodeEntry::composite)
    }

    pub fn composite_mut(&mut self, id: NodeId) -> Option<&mut super::CompositeData> {
        self.entry_mut(id).and_then(NodeEntry::composite_mut)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.entry(id).and_then(|e| e.parent)
    }

    pub fn name_of(&self, id: NodeId) -> String {
        self.entry(id).map(|e| e.name().to_string()).unwrap_or_default()
    }

    pub fn alloc(&mut self, entry: NodeEntry) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.arena[slot as usize] = Some(entry);
                NodeId(slot)
            }
            None => {
                self.arena.push(Some(entry));
                NodeId((self.arena.len() - 1) as u32)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.arena.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }

    // ---- paths ----

    /// Absolute path of `id`, using memoized ancestor paths where present.
    pub fn resolve_path(&self, id: NodeId) -> String {
        let Some(entry) = self.entry(id) else {
            return String::new();
        };
        if let Some(cached) = &entry.path_cache {
            return cached.clone();
        }
        match entry.parent {
            None => {
                let name = entry.name();
                if name.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{name}")
                }
            }
            Some(parent) => path::join(&self.resolve_path(parent), entry.name()),
        }
    }

    /// Resolve and memoize the path of `id`.
    pub fn memoize_path(&mut self, id: NodeId) -> String {
        let resolved = self.resolve_path(id);
        if let Some(entry) = self.entry_mut(id) {
            entry.path_cache = Some(resolved.clone());
        }
        resolved
    }

    fn invalidate_paths(&mut self, id: NodeId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.path_cache = None;
        }
        if let Some(kids) = self.composite(id).and_then(|c| c.children.clone()) {
            for kid in kids {
                self.invalidate_paths(kid);
            }
        }
    }

    /// Path segments of `target` relative to `from`. Absolute targets must
    /// live under `from`'s own path; anything else resolves to `None`.
    fn relative_segments<'p>(&self, from: NodeId, target: &'p str) -> Option<Vec<&'p str>> {
        if path::is_relative(target) {
            return Some(path::segments(target).collect());
        }
        let base = self.resolve_path(from);
        let rest = target.strip_prefix(base.as_str())?;
        if !(rest.is_empty() || rest.starts_with('/') || base.ends_with('/')) {
            return None;
        }
        Some(path::segments(rest).collect())
    }

    /// Owned variant of [`Self::relative_segments`] for callers that must
    /// release the state lock between segment lookups.
    pub fn relative_segments_owned(&self, from: NodeId, target: &str) -> Option<Vec<String>> {
        self.relative_segments(from, target)
            .map(|segs| segs.into_iter().map(str::to_string).collect())
    }

    // ---- lookup ----

    pub fn find_child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let kids = self.composite(parent)?.children.as_ref()?;
        kids.iter()
            .copied()
            .find(|&kid| self.entry(kid).map(|e| e.name() == name).unwrap_or(false))
    }

    /// Walk only already-loaded children; any unloaded or missing segment
    /// resolves to `None`.
    pub fn find_in_loaded_tree(&self, from: NodeId, target: &str) -> Option<NodeId> {
        let segs = self.relative_segments(from, target)?;
        let mut cur = from;
        for (i, seg) in segs.iter().enumerate() {
            let child = self.find_child_by_name(cur, seg)?;
            if i + 1 == segs.len() {
                return Some(child);
            }
            self.composite(child)?;
            cur = child;
        }
        Some(cur)
    }

    /// Whether `id` is reachable from the root through an unbroken chain
    /// of expanded ancestors, i.e. present in the root's flattened buffer.
    pub fn is_visible_at_surface(&self, id: NodeId) -> bool {
        if id == self.root {
            return true;
        }
        self.composite(self.root)
            .and_then(|c| c.flattened.as_ref())
            .map(|buf| buf.contains(&id))
            .unwrap_or(false)
    }

    /// Collapsed ancestors of `id`, outermost first.
    pub fn collapsed_ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cur = self.parent_of(id);
        while let Some(parent) = cur {
            if self.composite(parent).map(|c| !c.expanded).unwrap_or(false) {
                chain.push(parent);
            }
            cur = self.parent_of(parent);
        }
        chain.reverse();
        chain
    }

    // ---- sorting ----

    pub fn sort_ids(&self, ids: &mut [NodeId]) {
        let cmp = self.comparator.clone();
        ids.sort_by(|&a, &b| {
            match (self.entry(a), self.entry(b)) {
                (Some(ea), Some(eb)) => {
                    let sa = SortEntry { name: ea.name(), kind: ea.kind() };
                    let sb = SortEntry { name: eb.name(), kind: eb.kind() };
                    match &cmp {
                        Some(f) => f(&sa, &sb),
                        None => default_comparator(&sa, &sb),
                    }
                }
                _ => std::cmp::Ordering::Equal,
            }
        });
    }

    pub fn sort_children(&mut self, parent: NodeId) {
        let Some(mut kids) = self.composite(parent).and_then(|c| c.children.clone()) else {
            return;
        };
        self.sort_ids(&mut kids);
        if let Some(c) = self.composite_mut(parent) {
            c.children = Some(kids);
        }
    }

    // ---- metadata ----

    pub fn add_metadata(&mut self, id: NodeId, key: &str, value: &str) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        let prev = entry.metadata.insert(key.to_string(), value.to_string());
        let kind = if prev.is_some() {
            MetadataChangeKind::Updated
        } else {
            MetadataChangeKind::Added
        };
        if key == NAME_KEY && prev.as_deref() != Some(value) {
            self.invalidate_paths(id);
        }
        self.events.emit(TreeEvent::DidChangeMetadata {
            node: id,
            change: MetadataChange {
                kind,
                key: key.to_string(),
                prev_value: prev,
                value: Some(value.to_string()),
            },
        });
    }

    pub fn remove_metadata(&mut self, id: NodeId, key: &str) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        // Removing an absent key is a defined no-op: no notification.
        let Some(prev) = entry.metadata.remove(key) else {
            return;
        };
        self.events.emit(TreeEvent::DidChangeMetadata {
            node: id,
            change: MetadataChange {
                kind: MetadataChangeKind::Removed,
                key: key.to_string(),
                prev_value: Some(prev),
                value: None,
            },
        });
    }

    // ---- structural operations ----

    /// Reparent and/or rename `id`. A missing or non-container target
    /// detaches and disposes the node. Emits parent-change events only
    /// when the parent actually changes and a path event only when the
    /// resolved path differs.
    pub fn move_node(&mut self, id: NodeId, to: Option<NodeId>, new_name: Option<&str>) {
        if id == self.root || self.entry(id).is_none() {
            return;
        }
        let prev_parent = self.parent_of(id);
        let target = to.filter(|t| self.composite(*t).is_some());
        let Some(target) = target else {
            // Detach: unlink from the previous parent when still listed
            // there (which disposes the node), else dispose directly.
            let still_listed = prev_parent
                .and_then(|p| self.composite(p))
                .and_then(|c| c.children.as_ref())
                .map(|kids| kids.contains(&id))
                .unwrap_or(false);
            if let (Some(prev), true) = (prev_parent, still_listed) {
                self.unlink_item(prev, id, false);
                return;
            }
            if let Some(entry) = self.entry_mut(id) {
                entry.parent = None;
            }
            self.dispose(id);
            return;
        };
        let prev_path = self.resolve_path(id);
        let prev_name = self.name_of(id);
        let name = new_name.unwrap_or(prev_name.as_str()).to_string();
        let did_change_parent = prev_parent != Some(target);
        if !did_change_parent && name == prev_name {
            return;
        }
        let target_depth = self.entry(target).map(|e| e.depth).unwrap_or(0);
        if let Some(entry) = self.entry_mut(id) {
            entry.path_cache = None;
            entry.depth = target_depth + 1;
        }

        if did_change_parent || name != prev_name {
            self.add_metadata(id, NAME_KEY, &name);
            if did_change_parent {
                self.events.emit(TreeEvent::WillChangeParent {
                    node: id,
                    prev_parent,
                    new_parent: target,
                });
            }
            if let Some(prev) = prev_parent {
                self.unlink_item(prev, id, true);
            }
            if let Some(entry) = self.entry_mut(id) {
                entry.parent = Some(target);
            }
            self.insert_item(target, id);
            if did_change_parent {
                self.events.emit(TreeEvent::DidChangeParent {
                    node: id,
                    prev_parent,
                    new_parent: target,
                });
            }
        }

        let new_path = self.memoize_path(id);
        self.reregister_watch(id);
        self.refresh_subtree(id);
        if new_path != prev_path {
            self.events.emit(TreeEvent::DidChangePath { node: id });
        }
    }

    /// Re-point an existing watch registration at the node's current path.
    /// Containers that never loaded have no registration to move.
    fn reregister_watch(&mut self, id: NodeId) {
        let new_path = self.memoize_path(id);
        let Some((old, has_children)) = self
            .composite_mut(id)
            .map(|c| (c.watch.take(), c.children.is_some()))
        else {
            return;
        };
        let Some(old) = old else {
            return;
        };
        old.terminate();
        if has_children {
            let term = self.events.register_watch(&new_path, id);
            if let Some(c) = self.composite_mut(id) {
                c.watch = Some(term);
            }
        }
    }

    /// After a move: fix up depths and memoized paths below `id`, move
    /// watch registrations, and report the path change for every
    /// affected descendant.
    fn refresh_subtree(&mut self, id: NodeId) {
        let Some(kids) = self.composite(id).and_then(|c| c.children.clone()) else {
            return;
        };
        let depth = self.entry(id).map(|e| e.depth).unwrap_or(0);
        for kid in kids {
            match self.entry_mut(kid) {
                Some(entry) => {
                    entry.path_cache = None;
                    entry.depth = depth + 1;
                }
                None => continue,
            }
            self.events.emit(TreeEvent::DidChangePath { node: kid });
            if self.composite(kid).is_some() {
                self.reregister_watch(kid);
                self.refresh_subtree(kid);
            }
        }
    }

    /// Idempotent disposal: loaded children first, then the node itself.
    /// The arena slot is reclaimed after the did-dispose notification.
    pub fn dispose(&mut self, id: NodeId) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        if entry.disposed {
            return;
        }
        if matches!(entry.data, NodeData::Composite(_)) {
            let parts = self
                .composite_mut(id)
                .map(|c| (c.watch.take(), c.children.take()));
            if let Some((watch, kids)) = parts {
                if let Some(watch) = watch {
                    watch.terminate();
                }
                if let Some(kids) = kids {
                    for kid in kids {
                        self.dispose(kid);
                    }
                }
            }
        }
        self.events.emit(TreeEvent::WillDispose { node: id });
        if let Some(entry) = self.entry_mut(id) {
            entry.disposed = true;
        }
        self.events.emit(TreeEvent::DidDispose { node: id });
        self.release(id);
    }

    /// Collapse `id`: split its span back out of the owning ancestor's
    /// buffer and take ownership of it. Root never collapses.
    pub fn collapse(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        let Some(c) = self.composite(id) else {
            return;
        };
        if !c.expanded {
            return;
        }
        if c.children.is_some() && self.parent_of(id).is_some() {
            let visible = self.is_visible_at_surface(id);
            self.events.emit(TreeEvent::WillChangeExpansionState {
                node: id,
                expanded: false,
                visible_at_surface: visible,
            });
            self.shrink_branch(id);
        }
        if let Some(c) = self.composite_mut(id) {
            c.expanded = false;
        }
        let visible = self.is_visible_at_surface(id);
        self.events.emit(TreeEvent::DidChangeExpansionState {
            node: id,
            expanded: false,
            visible_at_surface: visible,
        });
    }

    /// Replace `id`'s children with freshly resolved descriptors. The
    /// prior contribution is unlinked through the collapse path first and
    /// the stale nodes are disposed; the new listing becomes `id`'s
    /// self-owned flattened buffer.
    pub fn install_children(&mut self, id: NodeId, descs: Vec<NodeDescriptor>) {
        if self.entry(id).is_none() {
            return;
        }
        if self.composite(id).map(|c| c.children.is_some()).unwrap_or(false) {
            if self.composite(id).map(|c| c.expanded).unwrap_or(false) {
                self.shrink_branch(id);
            }
            let old = self.composite_mut(id).and_then(|c| c.children.take());
            if let Some(old) = old {
                for kid in old {
                    if let Some(entry) = self.entry_mut(kid) {
                        entry.parent = None;
                    }
                    self.dispose(kid);
                }
            }
        }
        let depth = self.entry(id).map(|e| e.depth).unwrap_or(0) + 1;
        let mut kids: Vec<NodeId> = descs
            .into_iter()
            .map(|d| {
                self.alloc(NodeEntry::new(Some(id), depth, &d.name, d.kind, d.metadata))
            })
            .collect();
        self.sort_ids(&mut kids);
        debug!(node = ?id, count = kids.len(), "installed children");
        if let Some(c) = self.composite_mut(id) {
            c.branch_size = kids.len();
            c.children = Some(kids.clone());
        }
        self.set_flattened(id, Some(kids.into_boxed_slice()));

        let watch_path = self.memoize_path(id);
        let old_watch = self.composite_mut(id).and_then(|c| c.watch.take());
        if let Some(old_watch) = old_watch {
            old_watch.terminate();
        }
        let term = self.events.register_watch(&watch_path, id);
        if let Some(c) = self.composite_mut(id) {
            c.watch = Some(term);
        }
    }

    /// Materialize a watch-`Added` descriptor as a child of `parent`.
    /// Unloaded containers skip the insert; the next load picks the
    /// entry up from the backing store.
    pub fn insert_descriptor(&mut self, parent: NodeId, desc: NodeDescriptor) -> Option<NodeId> {
        let loaded = self.composite(parent)?.children.is_some();
        if !loaded {
            debug!(node = ?parent, name = %desc.name, "insert into unloaded container skipped");
            return None;
        }
        let depth = self.entry(parent)?.depth + 1;
        let node = self.alloc(NodeEntry::new(
            Some(parent),
            depth,
            &desc.name,
            desc.kind,
            desc.metadata,
        ));
        self.insert_item(parent, node);
        Some(node)
    }

    /// Fold a `Moved` event whose old path points into this container.
    /// A destination that is missing, a leaf, or not yet loaded deletes
    /// the source instead of leaving it dangling; the destination's next
    /// load picks the entry up from the backing store.
    pub fn transfer_item(&mut self, id: NodeId, old_path: &str, new_path: &str) {
        let from = path::dir_name(old_path);
        if self.resolve_path(id) != from {
            return;
        }
        let name = path::base_name(old_path);
        let Some(item) = self.find_child_by_name(id, name) else {
            return;
        };
        let to = path::dir_name(new_path);
        let dest = if to == from {
            Some(id)
        } else {
            self.find_in_loaded_tree(self.root, to)
        };
        let dest = dest.filter(|d| {
            self.composite(*d)
                .map(|c| c.children.is_some())
                .unwrap_or(false)
        });
        match dest {
            Some(dest) => self.move_node(item, Some(dest), Some(path::base_name(new_path))),
            None => {
                warn!(%old_path, %new_path, "move destination not loaded; unlinking source");
                self.unlink_item(id, item, false);
            }
        }
    }

    /// Fold a `Removed` event whose directory matches this container.
    pub fn remove_at(&mut self, id: NodeId, target: &str) {
        if path::dir_name(target) != self.resolve_path(id) {
            return;
        }
        if let Some(item) = self.find_child_by_name(id, path::base_name(target)) {
            self.unlink_item(id, item, false);
        }
    }

    /// Bulk-change fold for a container that is not visible at the
    /// surface: drop the stale subtree and fall back to a lazy reload on
    /// the next expand (`children == None` is the reload trigger).
    pub fn discard_stale_subtree(&mut self, id: NodeId) {
        let Some(c) = self.composite(id) else {
            return;
        };
        let expanded = c.expanded;
        if c.children.is_some() {
            if expanded {
                self.shrink_branch(id);
            }
            let kids = self.composite_mut(id).and_then(|c| c.children.take());
            if let Some(kids) = kids {
                for kid in kids {
                    if let Some(entry) = self.entry_mut(kid) {
                        entry.parent = None;
                    }
                    self.dispose(kid);
                }
            }
        }
        if let Some(c) = self.composite_mut(id) {
            c.expanded = false;
            c.branch_size = 0;
            c.flattened = None;
        }
    }
}
