//! Arena node records.
//!
//! A node is a tagged record: every entry carries identity-adjacent state
//! (parent link, depth, metadata, memoized path), and containers add the
//! child list, expansion flag, and flattened-branch bookkeeping.

use crate::error::TreeError;
use crate::events::WatchTerminator;
use crate::types::{NodeKind, NAME_KEY};
use crate::NodeId;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// Coordination for deduplicated child loads.
///
/// `children == None` on the composite is the sole source of truth for
/// "needs loading"; this state only coalesces callers onto an in-flight
/// resolution. A caller arriving while a load is pending parks a waiter
/// instead of issuing a second backing-store call.
pub(crate) enum LoadState {
    Idle,
    Pending(Vec<oneshot::Sender<Result<(), TreeError>>>),
}

/// Container-only state.
pub(crate) struct CompositeData {
    /// `None` until the first load; `Some(empty)` after loading an empty
    /// listing. The distinction drives every "needs reload" check.
    pub children: Option<Vec<NodeId>>,
    /// Roots are created expanded and never collapse.
    pub expanded: bool,
    /// Ids this subtree currently contributes to whichever buffer
    /// represents it.
    pub branch_size: usize,
    /// Pre-order id buffer; present only while this node is the
    /// visibility owner for its subtree.
    pub flattened: Option<Box<[NodeId]>>,
    pub load: LoadState,
    /// Active watch registration for this container's path.
    pub watch: Option<WatchTerminator>,
}

impl CompositeData {
    pub fn new(expanded: bool) -> Self {
        Self {
            children: None,
            expanded,
            branch_size: 0,
            flattened: None,
            load: LoadState::Idle,
            watch: None,
        }
    }
}

pub(crate) enum NodeData {
    Leaf,
    Composite(CompositeData),
}

/// One arena slot.
pub(crate) struct NodeEntry {
    /// Non-owning back-reference; `None` only for the root or a node
    /// detached on its way to disposal.
    pub parent: Option<NodeId>,
    pub depth: u32,
    pub metadata: BTreeMap<String, String>,
    /// Memoized absolute path; cleared whenever the name or an ancestor
    /// changes.
    pub path_cache: Option<String>,
    pub disposed: bool,
    pub data: NodeData,
}

impl NodeEntry {
    pub fn new(
        parent: Option<NodeId>,
        depth: u32,
        name: &str,
        kind: NodeKind,
        mut metadata: BTreeMap<String, String>,
    ) -> Self {
        metadata.insert(NAME_KEY.to_string(), name.to_string());
        let data = match kind {
            NodeKind::Leaf => NodeData::Leaf,
            NodeKind::Container => NodeData::Composite(CompositeData::new(parent.is_none())),
        };
        Self {
            parent,
            depth,
            metadata,
            path_cache: None,
            disposed: false,
            data,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.get(NAME_KEY).map(String::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Leaf => NodeKind::Leaf,
            NodeData::Composite(_) => NodeKind::Container,
        }
    }

    pub fn composite(&self) -> Option<&CompositeData> {
        match &self.data {
            NodeData::Composite(c) => Some(c),
            NodeData::Leaf => None,
        }
    }

    pub fn composite_mut(&mut self) -> Option<&mut CompositeData> {
        match &mut self.data {
            NodeData::Composite(c) => Some(c),
            NodeData::Leaf => None,
        }
    }
}
