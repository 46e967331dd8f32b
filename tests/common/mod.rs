//! Shared test fixtures.

use arbor::{NodeDescriptor, ResolveRequest, TreeSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Route `tracing` output through the test harness when RUST_LOG is set.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backing store scripted path-by-path. Paths without a listing resolve
/// to an error, which lets tests exercise the failure paths.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    listings: Arc<Mutex<HashMap<String, Vec<NodeDescriptor>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_listing(&self, path: &str, listing: Vec<NodeDescriptor>) {
        self.listings
            .lock()
            .unwrap()
            .insert(path.to_string(), listing);
    }

    pub fn remove_listing(&self, path: &str) {
        self.listings.lock().unwrap().remove(path);
    }

    /// Total number of resolve calls issued against this source.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TreeSource for ScriptedSource {
    async fn resolve_children(&self, request: &ResolveRequest) -> anyhow::Result<Vec<NodeDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listings
            .lock()
            .unwrap()
            .get(&request.path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no listing for {}", request.path))
    }
}
