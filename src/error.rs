//! Error types for tree operations.

use crate::types::NodeId;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by tree operations.
///
/// Cloneable so a single load failure can be fanned out to every caller
/// coalesced onto the same in-flight resolution.
#[derive(Debug, Clone, Error)]
pub enum TreeError {
    /// The backing store failed while resolving children. The container is
    /// left unloaded so a later `ensure_loaded` retries.
    #[error("backing store failed to resolve children of {path}: {source}")]
    Source {
        path: String,
        source: Arc<anyhow::Error>,
    },

    /// A watch event violated the transport contract (relative or empty
    /// path on a Moved event).
    #[error("malformed watch event: {0}")]
    MalformedEvent(String),

    /// The id does not refer to a live node.
    #[error("unknown node id {0:?}")]
    UnknownNode(NodeId),

    /// The operation requires a container node.
    #[error("node {0:?} is not a container")]
    NotAContainer(NodeId),

    /// The operation requires the container's children to be loaded.
    #[error("children of {0:?} are not loaded")]
    NotLoaded(NodeId),

    /// An in-flight load was dropped without completing.
    #[error("child resolution was interrupted")]
    LoadInterrupted,

    /// The cursor cannot ascend above the node it started from.
    #[error("cursor cannot ascend past its starting point")]
    CursorAtStart,
}
