//! Backing-store contract.
//!
//! The tree never walks the underlying store itself; it asks a
//! [`TreeSource`] for raw child listings on demand, one container at a
//! time, and folds the result into its arena.

use crate::types::{NodeId, NodeKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw child produced by the backing store, or carried by an `Added`
/// watch event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NodeDescriptor {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf,
            metadata: BTreeMap::new(),
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Container,
            metadata: BTreeMap::new(),
        }
    }
}

/// The container a listing was requested for.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub id: NodeId,
    pub path: String,
    pub depth: u32,
}

/// Supplies raw child listings on demand.
///
/// Called only from `ensure_loaded` and reload paths. A failure leaves
/// the container unloaded, so the next `ensure_loaded` retries.
#[async_trait]
pub trait TreeSource: Send + Sync + 'static {
    async fn resolve_children(&self, request: &ResolveRequest)
        -> anyhow::Result<Vec<NodeDescriptor>>;
}
