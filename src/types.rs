//! Core identifiers for the tree engine.

use serde::{Deserialize, Serialize};

/// NodeId: index of a live node in the tree's arena.
///
/// Ids are handed out by the tree and stay valid until the node is
/// disposed, at which point the slot is reclaimed and lookups return
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Arena slot backing this id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Node kind: a plain leaf or a container that can hold children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Container,
}

/// Metadata key under which every node stores its display name.
pub const NAME_KEY: &str = "name";
