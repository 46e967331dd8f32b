//! Asynchronous tree engine API.
//!
//! `Tree` wraps the arena state in a read-write lock and layers the
//! suspension points on top: child resolution against the backing store
//! and parent-chain expansion. Everything between two awaits is a single
//! synchronous critical section, so structural mutation is atomic with
//! respect to every other tree operation.

use super::cursor::TopDownCursor;
use super::node::LoadState;
use super::state::TreeState;
use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::events::{EventBus, TreeEvent, WatchEvent};
use crate::path;
use crate::source::{NodeDescriptor, ResolveRequest, TreeSource};
use crate::types::{NodeId, NodeKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

/// Read-only view of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: u32,
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    /// Always `false` for leaves; roots are always `true`.
    pub expanded: bool,
    /// Whether children have been resolved at least once.
    pub loaded: bool,
    pub branch_size: usize,
}

enum LoadTicket {
    Load(ResolveRequest),
    Wait(oneshot::Receiver<Result<(), TreeError>>),
}

/// The virtualized tree engine.
pub struct Tree<S: TreeSource> {
    source: Arc<S>,
    state: Arc<RwLock<TreeState>>,
    events: EventBus,
}

impl<S: TreeSource> Clone for Tree<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

impl<S: TreeSource> Tree<S> {
    pub fn new(source: S, config: TreeConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let state = TreeState::new(&config, events.clone());
        Self {
            source: Arc::new(source),
            state: Arc::new(RwLock::new(state)),
            events,
        }
    }

    pub fn root(&self) -> NodeId {
        self.state.read().root
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to the tree's notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    // ---- read surface ----

    pub fn node(&self, id: NodeId) -> Option<NodeSnapshot> {
        let state = self.state.read();
        let entry = state.entry(id)?;
        let (expanded, loaded, branch_size) = match entry.composite() {
            Some(c) => (c.expanded, c.children.is_some(), c.branch_size),
            None => (false, false, 0),
        };
        Some(NodeSnapshot {
            id,
            parent: entry.parent,
            depth: entry.depth,
            name: entry.name().to_string(),
            path: state.resolve_path(id),
            kind: entry.kind(),
            expanded,
            loaded,
            branch_size,
        })
    }

    /// Loaded children of a container, in sorted order.
    pub fn children(&self, id: NodeId) -> Option<Vec<NodeId>> {
        self.state.read().composite(id)?.children.clone()
    }

    pub fn metadata(&self, id: NodeId, key: &str) -> Option<String> {
        self.state.read().entry(id)?.metadata.get(key).cloned()
    }

    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let state = self.state.read();
        state.entry(id)?;
        Some(state.resolve_path(id))
    }

    pub fn branch_size(&self, id: NodeId) -> usize {
        self.state
            .read()
            .composite(id)
            .map(|c| c.branch_size)
            .unwrap_or(0)
    }

    /// Node at `index` of the root's flattened buffer.
    pub fn node_at_index(&self, index: usize) -> Option<NodeId> {
        let state = self.state.read();
        state
            .composite(state.root)
            .and_then(|c| c.flattened.as_ref())
            .and_then(|buf| buf.get(index).copied())
    }

    /// Index of `id` in the root's flattened buffer.
    pub fn index_of_node(&self, id: NodeId) -> Option<usize> {
        let state = self.state.read();
        state
            .composite(state.root)
            .and_then(|c| c.flattened.as_ref())
            .and_then(|buf| buf.iter().position(|&n| n == id))
    }

    /// Snapshot of the root's flattened buffer.
    pub fn flattened(&self) -> Vec<NodeId> {
        let state = self.state.read();
        state
            .composite(state.root)
            .and_then(|c| c.flattened.as_ref())
            .map(|buf| buf.to_vec())
            .unwrap_or_default()
    }

    /// Whether `id` is reachable from the root through expanded ancestors
    /// (visible once scrolled to, not necessarily on screen).
    pub fn is_visible_at_surface(&self, id: NodeId) -> bool {
        self.state.read().is_visible_at_surface(id)
    }

    /// Resolve a path against already-loaded children only.
    pub fn find_in_loaded_tree(&self, target: &str) -> Option<NodeId> {
        let state = self.state.read();
        let root = state.root;
        state.find_in_loaded_tree(root, target)
    }

    // ---- sync mutation ----

    pub fn set_collapsed(&self, id: NodeId) {
        self.state.write().collapse(id);
    }

    /// Reparent and/or rename. `to: None` detaches and disposes.
    pub fn move_node(&self, id: NodeId, to: Option<NodeId>, new_name: Option<&str>) {
        self.state.write().move_node(id, to, new_name);
    }

    pub fn add_metadata(&self, id: NodeId, key: &str, value: &str) {
        self.state.write().add_metadata(id, key, value);
    }

    pub fn remove_metadata(&self, id: NodeId, key: &str) {
        self.state.write().remove_metadata(id, key);
    }

    /// Create a node from a descriptor and insert it into a loaded
    /// container, replacing any same-named child in place.
    pub fn insert_child(&self, parent: NodeId, desc: NodeDescriptor) -> Result<NodeId, TreeError> {
        let mut state = self.state.write();
        state.entry(parent).ok_or(TreeError::UnknownNode(parent))?;
        state
            .composite(parent)
            .ok_or(TreeError::NotAContainer(parent))?;
        state
            .insert_descriptor(parent, desc)
            .ok_or(TreeError::NotLoaded(parent))
    }

    /// Dispose `id` and every loaded descendant.
    pub fn dispose(&self, id: NodeId) {
        self.state.write().dispose(id);
    }

    // ---- async surface ----

    /// Ensure `id`'s children are loaded, without touching its expansion
    /// state. Callers arriving while a load is in flight share its
    /// result instead of issuing a second backing-store call.
    pub async fn ensure_loaded(&self, id: NodeId) -> Result<(), TreeError> {
        {
            let state = self.state.read();
            let entry = state.entry(id).ok_or(TreeError::UnknownNode(id))?;
            let composite = entry.composite().ok_or(TreeError::NotAContainer(id))?;
            if composite.children.is_some() {
                return Ok(());
            }
        }
        self.reload_children(id).await
    }

    /// Expand `id`, loading children on demand. With `ensure_visible`,
    /// collapsed ancestors are expanded first so the node surfaces in
    /// the root buffer.
    pub async fn set_expanded(&self, id: NodeId, ensure_visible: bool) -> Result<(), TreeError> {
        if ensure_visible {
            let chain = self.state.read().collapsed_ancestors(id);
            for ancestor in chain {
                self.expand_one(ancestor).await?;
            }
        }
        self.expand_one(id).await
    }

    async fn expand_one(&self, id: NodeId) -> Result<(), TreeError> {
        let needs_load = {
            let mut state = self.state.write();
            if id == state.root {
                return Ok(());
            }
            state.entry(id).ok_or(TreeError::UnknownNode(id))?;
            let composite = state
                .composite_mut(id)
                .ok_or(TreeError::NotAContainer(id))?;
            if composite.expanded {
                return Ok(());
            }
            composite.expanded = true;
            composite.children.is_none()
        };

        if needs_load {
            self.events.emit(TreeEvent::WillResolveChildren {
                node: id,
                expanded: true,
            });
            let loaded = self.reload_children(id).await;
            self.events.emit(TreeEvent::DidResolveChildren {
                node: id,
                expanded: true,
            });
            if let Err(err) = loaded {
                // Back out so the container stays collapsed and unloaded;
                // the next expand retries the resolution.
                if let Some(c) = self.state.write().composite_mut(id) {
                    c.expanded = false;
                }
                return Err(err);
            }
        }

        let mut state = self.state.write();
        // A collapse may have raced the load; only merge if still expanded.
        match state.composite(id) {
            Some(c) if c.expanded => {}
            _ => return Ok(()),
        }
        let visible = state.is_visible_at_surface(id);
        state.events.emit(TreeEvent::WillChangeExpansionState {
            node: id,
            expanded: true,
            visible_at_surface: visible,
        });
        state.expand_branch(id);
        let visible = state.is_visible_at_surface(id);
        state.events.emit(TreeEvent::DidChangeExpansionState {
            node: id,
            expanded: true,
            visible_at_surface: visible,
        });
        Ok(())
    }

    /// Resolve children for `id`, deduplicating concurrent callers onto
    /// one backing-store request.
    async fn reload_children(&self, id: NodeId) -> Result<(), TreeError> {
        let ticket = {
            let mut state = self.state.write();
            let request = ResolveRequest {
                id,
                path: state.memoize_path(id),
                depth: state.entry(id).map(|e| e.depth).unwrap_or(0),
            };
            let composite = state
                .composite_mut(id)
                .ok_or(TreeError::NotAContainer(id))?;
            match &mut composite.load {
                LoadState::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    LoadTicket::Wait(rx)
                }
                LoadState::Idle => {
                    composite.load = LoadState::Pending(Vec::new());
                    LoadTicket::Load(request)
                }
            }
        };

        let request = match ticket {
            LoadTicket::Wait(rx) => {
                return match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(TreeError::LoadInterrupted),
                };
            }
            LoadTicket::Load(request) => request,
        };

        debug!(path = %request.path, "resolving children");
        let resolved = self.source.resolve_children(&request).await;

        let (result, waiters) = {
            let mut state = self.state.write();
            if state.entry(id).is_none() {
                return Err(TreeError::UnknownNode(id));
            }
            let result = match resolved {
                Ok(descriptors) => {
                    state.install_children(id, descriptors);
                    Ok(())
                }
                Err(err) => Err(TreeError::Source {
                    path: request.path.clone(),
                    source: Arc::new(err),
                }),
            };
            let waiters = match state.composite_mut(id) {
                Some(c) => match std::mem::replace(&mut c.load, LoadState::Idle) {
                    LoadState::Pending(waiters) => waiters,
                    LoadState::Idle => Vec::new(),
                },
                None => Vec::new(),
            };
            (result, waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Resolve a path, loading each unloaded container segment on the
    /// way down. Intermediate containers are loaded but not expanded.
    pub async fn force_load_at_path(&self, target: &str) -> Result<Option<NodeId>, TreeError> {
        let root = self.root();
        self.ensure_loaded(root).await?;
        let segs: Vec<String> = {
            let state = self.state.read();
            match state.relative_segments_owned(root, target) {
                Some(segs) => segs,
                None => return Ok(None),
            }
        };
        if segs.is_empty() {
            return Ok(Some(root));
        }
        let mut cur = root;
        for (i, seg) in segs.iter().enumerate() {
            self.ensure_loaded(cur).await?;
            let child = self.state.read().find_child_by_name(cur, seg);
            let Some(child) = child else {
                return Ok(None);
            };
            if i + 1 == segs.len() {
                return Ok(Some(child));
            }
            if self.state.read().composite(child).is_none() {
                return Ok(None);
            }
            cur = child;
        }
        Ok(Some(cur))
    }

    /// Start a resumable depth-first pre-order traversal at `start`.
    pub fn cursor(&self, start: NodeId) -> TopDownCursor<'_, S> {
        TopDownCursor::new(self, start)
    }

    // ---- watch events ----

    /// Route a transport event to the container registered for its
    /// directory path. Unknown or stale paths are no-ops; malformed
    /// Moved paths are a transport contract violation and fail fast.
    pub async fn dispatch_watch_event(&self, event: WatchEvent) -> Result<(), TreeError> {
        let target_path = match &event {
            WatchEvent::Moved { old_path, new_path } => {
                validate_absolute(old_path, "old path")?;
                validate_absolute(new_path, "new path")?;
                path::dir_name(old_path).to_string()
            }
            WatchEvent::Added { path, .. } | WatchEvent::Changed { path } => path.clone(),
            WatchEvent::Removed { path } => path::dir_name(path).to_string(),
        };
        match self.events.watcher_at(&target_path) {
            Some(node) => self.handle_watch_event(node, event).await,
            None => {
                debug!(path = %target_path, "watch event for unwatched path ignored");
                Ok(())
            }
        }
    }

    /// Fold one watch event into container `id`.
    pub async fn handle_watch_event(&self, id: NodeId, event: WatchEvent) -> Result<(), TreeError> {
        self.events.emit(TreeEvent::WillProcessWatchEvent {
            node: id,
            event: event.clone(),
        });
        match &event {
            WatchEvent::Moved { old_path, new_path } => {
                validate_absolute(old_path, "old path")?;
                validate_absolute(new_path, "new path")?;
                self.state.write().transfer_item(id, old_path, new_path);
            }
            WatchEvent::Added { node, .. } => {
                self.state.write().insert_descriptor(id, node.clone());
            }
            WatchEvent::Removed { path } => {
                self.state.write().remove_at(id, path);
            }
            WatchEvent::Changed { .. } => {
                self.fold_bulk_change(id).await?;
            }
        }
        self.events.emit(TreeEvent::DidProcessWatchEvent {
            node: id,
            event,
        });
        Ok(())
    }

    /// Bulk "subtree is stale" handling: out-of-view containers drop
    /// their loaded children and reload lazily on the next expand;
    /// in-view containers reload now and re-merge.
    async fn fold_bulk_change(&self, id: NodeId) -> Result<(), TreeError> {
        let reload_now = {
            let mut state = self.state.write();
            if state.composite(id).is_none() {
                return Ok(());
            }
            if state.is_visible_at_surface(id) {
                true
            } else {
                state.discard_stale_subtree(id);
                false
            }
        };
        if reload_now {
            self.reload_children(id).await?;
            let mut state = self.state.write();
            let expanded = state.composite(id).map(|c| c.expanded).unwrap_or(false);
            if id != state.root && expanded {
                state.expand_branch(id);
            }
        }
        Ok(())
    }
}

fn validate_absolute(p: &str, what: &str) -> Result<(), TreeError> {
    if p.is_empty() || path::is_relative(p) {
        return Err(TreeError::MalformedEvent(format!(
            "{what} must be absolute, got {p:?}"
        )));
    }
    Ok(())
}
