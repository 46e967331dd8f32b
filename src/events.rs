//! Per-tree notification bus and path-keyed watch registration.
//!
//! One bus serves a whole tree: the root owns it and every descendant
//! reports through it. Consumers subscribe to the broadcast side; the
//! external watch transport routes its events through the path-keyed
//! registration table.

use crate::source::NodeDescriptor;
use crate::types::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Structural change reported by the external watch transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatchEvent {
    /// A node appeared in the container at `path`.
    Added { path: String, node: NodeDescriptor },
    /// The node at `path` disappeared.
    Removed { path: String },
    /// The node at `old_path` is now at `new_path`.
    Moved { old_path: String, new_path: String },
    /// The subtree at `path` changed in bulk and must be treated as stale.
    Changed { path: String },
}

/// How a metadata entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataChangeKind {
    Added,
    Updated,
    Removed,
}

/// A single metadata mutation, with the values on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataChange {
    pub kind: MetadataChangeKind,
    pub key: String,
    pub prev_value: Option<String>,
    pub value: Option<String>,
}

/// Notifications emitted by the tree engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    WillChangeParent {
        node: NodeId,
        prev_parent: Option<NodeId>,
        new_parent: NodeId,
    },
    DidChangeParent {
        node: NodeId,
        prev_parent: Option<NodeId>,
        new_parent: NodeId,
    },
    WillDispose {
        node: NodeId,
    },
    DidDispose {
        node: NodeId,
    },
    DidChangePath {
        node: NodeId,
    },
    WillChangeExpansionState {
        node: NodeId,
        expanded: bool,
        visible_at_surface: bool,
    },
    DidChangeExpansionState {
        node: NodeId,
        expanded: bool,
        visible_at_surface: bool,
    },
    DidChangeMetadata {
        node: NodeId,
        change: MetadataChange,
    },
    /// The root's flattened buffer changed; consumers re-render from it.
    BranchDidUpdate,
    WillResolveChildren {
        node: NodeId,
        expanded: bool,
    },
    DidResolveChildren {
        node: NodeId,
        expanded: bool,
    },
    WillProcessWatchEvent {
        node: NodeId,
        event: WatchEvent,
    },
    DidProcessWatchEvent {
        node: NodeId,
        event: WatchEvent,
    },
}

struct WatchRegistration {
    seq: u64,
    node: NodeId,
}

struct BusInner {
    sender: broadcast::Sender<TreeEvent>,
    registrations: Mutex<HashMap<String, WatchRegistration>>,
    next_seq: AtomicU64,
}

/// Notification bus for one tree.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                sender,
                registrations: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to every notification; receivers filter by variant.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.inner.sender.subscribe()
    }

    /// Emit a notification. A tree with no subscribers is fine.
    pub fn emit(&self, event: TreeEvent) {
        let _ = self.inner.sender.send(event);
    }

    /// Register the container listening at `path`, replacing any previous
    /// registration for the same path.
    pub fn register_watch(&self, path: &str, node: NodeId) -> WatchTerminator {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registrations
            .lock()
            .insert(path.to_string(), WatchRegistration { seq, node });
        WatchTerminator {
            bus: Arc::downgrade(&self.inner),
            path: path.to_string(),
            seq,
        }
    }

    /// Container registered for `path`, if any.
    pub fn watcher_at(&self, path: &str) -> Option<NodeId> {
        self.inner.registrations.lock().get(path).map(|r| r.node)
    }
}

/// Deregisters exactly the registration it was returned for: a newer
/// registration on the same path is left alone.
pub struct WatchTerminator {
    bus: Weak<BusInner>,
    path: String,
    seq: u64,
}

impl WatchTerminator {
    pub fn terminate(&self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut regs = bus.registrations.lock();
            if matches!(regs.get(&self.path), Some(r) if r.seq == self.seq) {
                regs.remove(&self.path);
            }
        }
    }
}
