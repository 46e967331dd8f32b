//! Arbor: Incrementally Flattened Virtual Tree Engine
//!
//! A tree engine for hierarchical, lazily loaded, mutable collections
//! (a filesystem subtree, typically) that maintains a flattened pre-order
//! view of every expanded node's visible descendants. Structural edits
//! splice the flattened buffer incrementally instead of re-walking the
//! whole tree, which is what makes virtual-scrolling consumers cheap.

pub mod config;
pub mod error;
pub mod events;
pub mod path;
pub mod source;
pub mod splice;
pub mod tree;
pub mod types;

pub use config::{SortComparator, SortEntry, TreeConfig};
pub use error::TreeError;
pub use events::{
    EventBus, MetadataChange, MetadataChangeKind, TreeEvent, WatchEvent, WatchTerminator,
};
pub use source::{NodeDescriptor, ResolveRequest, TreeSource};
pub use tree::{NodeSnapshot, TopDownCursor, Tree};
pub use types::{NodeId, NodeKind};
