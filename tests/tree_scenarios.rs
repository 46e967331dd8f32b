//! End-to-end engine scenarios: lazy loading, expansion, structural
//! mutation, and traversal against a scripted backing store.

mod common;

use arbor::{
    MetadataChangeKind, NodeDescriptor, NodeKind, ResolveRequest, Tree, TreeConfig, TreeError,
    TreeEvent, TreeSource,
};
use async_trait::async_trait;
use common::ScriptedSource;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

fn scripted() -> (ScriptedSource, Tree<ScriptedSource>) {
    common::init_tracing();
    let source = ScriptedSource::new();
    let tree = Tree::new(source.clone(), TreeConfig::default());
    (source, tree)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<TreeEvent>) -> Vec<TreeEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[tokio::test]
async fn test_expand_loads_children_and_merges_branch() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);

    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();
    assert_eq!(tree.flattened(), vec![a, c]);
    assert_eq!(tree.branch_size(tree.root()), 2);

    tree.set_expanded(a, false).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/x").unwrap();
    assert_eq!(tree.flattened(), vec![a, x, c]);
    assert_eq!(tree.branch_size(tree.root()), 3);
    assert_eq!(tree.branch_size(a), 1);
    assert!(tree.is_visible_at_surface(x));

    let snap = tree.node(a).unwrap();
    assert_eq!(snap.kind, NodeKind::Container);
    assert_eq!(snap.path, "/a");
    assert_eq!(snap.depth, 1);
    assert!(snap.expanded);
    assert!(snap.loaded);
}

#[tokio::test]
async fn test_insert_lands_after_expanded_sibling_span() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();
    tree.set_expanded(a, false).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/x").unwrap();

    let mut rx = tree.subscribe();
    let b = tree.insert_child(tree.root(), NodeDescriptor::leaf("b")).unwrap();
    assert_eq!(tree.children(tree.root()).unwrap(), vec![a, b, c]);
    assert_eq!(tree.flattened(), vec![a, x, b, c]);
    assert_eq!(tree.branch_size(tree.root()), 4);
    assert!(drain(&mut rx).contains(&TreeEvent::BranchDidUpdate));
}

#[tokio::test]
async fn test_insert_child_rejects_bad_targets() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();

    assert!(matches!(
        tree.insert_child(c, NodeDescriptor::leaf("n")),
        Err(TreeError::NotAContainer(_))
    ));
    // `a` exists but its children were never resolved.
    assert!(matches!(
        tree.insert_child(a, NodeDescriptor::leaf("n")),
        Err(TreeError::NotLoaded(_))
    ));
}

#[tokio::test]
async fn test_collapse_restores_buffer_and_reexpand_skips_reload() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();
    tree.set_expanded(a, false).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/x").unwrap();
    assert_eq!(source.calls(), 2);

    tree.set_collapsed(a);
    assert_eq!(tree.flattened(), vec![a, c]);
    assert_eq!(tree.branch_size(tree.root()), 2);
    assert!(!tree.node(a).unwrap().expanded);
    // Hidden, but still loaded and addressable.
    assert!(!tree.is_visible_at_surface(x));
    assert_eq!(tree.find_in_loaded_tree("/a/x"), Some(x));

    tree.set_expanded(a, false).await.unwrap();
    assert_eq!(tree.flattened(), vec![a, x, c]);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_ensure_visible_expands_collapsed_ancestors() {
    let (source, tree) = scripted();
    source.insert_listing("/", vec![NodeDescriptor::container("a")]);
    source.insert_listing("/a", vec![NodeDescriptor::container("b")]);
    source.insert_listing("/a/b", vec![NodeDescriptor::leaf("x")]);

    let b = tree.force_load_at_path("/a/b").await.unwrap().unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    // Loaded on the way down, but nothing was expanded.
    assert_eq!(tree.flattened(), vec![a]);
    assert!(!tree.is_visible_at_surface(b));

    tree.set_expanded(b, true).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/b/x").unwrap();
    assert_eq!(tree.flattened(), vec![a, b, x]);
    assert!(tree.is_visible_at_surface(b));
    assert!(tree.node(a).unwrap().expanded);
}

#[tokio::test]
async fn test_force_load_misses() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);

    assert_eq!(tree.force_load_at_path("/missing").await.unwrap(), None);
    // A leaf cannot be a mid-path segment.
    assert_eq!(tree.force_load_at_path("/c/x").await.unwrap(), None);
    assert!(tree.force_load_at_path("/a/x").await.unwrap().is_some());
    // Not yet loaded paths are invisible to the loaded-only lookup.
    assert_eq!(tree.find_in_loaded_tree("/a/missing"), None);
}

#[tokio::test]
async fn test_buffer_indexing() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    tree.set_expanded(a, false).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/x").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();

    assert_eq!(tree.node_at_index(0), Some(a));
    assert_eq!(tree.node_at_index(1), Some(x));
    assert_eq!(tree.node_at_index(3), None);
    assert_eq!(tree.index_of_node(c), Some(2));
    assert_eq!(tree.index_of_node(tree.root()), None);
}

#[tokio::test]
async fn test_metadata_change_notifications() {
    let (source, tree) = scripted();
    source.insert_listing("/", vec![NodeDescriptor::leaf("c")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();

    let mut rx = tree.subscribe();
    tree.add_metadata(c, "size", "10");
    tree.add_metadata(c, "size", "20");
    tree.remove_metadata(c, "size");
    tree.remove_metadata(c, "size");

    assert_eq!(tree.metadata(c, "size"), None);
    let kinds: Vec<MetadataChangeKind> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            TreeEvent::DidChangeMetadata { change, .. } => Some(change.kind),
            _ => None,
        })
        .collect();
    // The second remove hits an absent key and stays silent.
    assert_eq!(
        kinds,
        vec![
            MetadataChangeKind::Added,
            MetadataChangeKind::Updated,
            MetadataChangeKind::Removed,
        ]
    );
}

#[tokio::test]
async fn test_rename_updates_paths_and_order() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::leaf("a"), NodeDescriptor::leaf("b")],
    );
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let b = tree.find_in_loaded_tree("/b").unwrap();

    let mut rx = tree.subscribe();
    tree.move_node(a, Some(tree.root()), Some("z"));
    assert_eq!(tree.path_of(a), Some("/z".to_string()));
    assert_eq!(tree.node(a).unwrap().name, "z");
    // Re-sorted under the new name.
    assert_eq!(tree.children(tree.root()).unwrap(), vec![b, a]);
    assert_eq!(tree.flattened(), vec![b, a]);

    let events = drain(&mut rx);
    assert!(events.contains(&TreeEvent::DidChangePath { node: a }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, TreeEvent::DidChangeParent { .. })));
}

#[tokio::test]
async fn test_detach_disposes_subtree() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();
    tree.set_expanded(a, false).await.unwrap();

    let mut rx = tree.subscribe();
    tree.move_node(a, None, None);
    assert_eq!(tree.flattened(), vec![c]);
    assert_eq!(tree.branch_size(tree.root()), 1);
    assert!(tree.node(a).is_none());
    assert_eq!(tree.find_in_loaded_tree("/a"), None);

    let disposed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TreeEvent::DidDispose { .. }))
        .count();
    // The child goes first, then the container itself.
    assert_eq!(disposed, 2);
}

#[tokio::test]
async fn test_failed_load_reverts_expansion_and_retries() {
    let (source, tree) = scripted();
    source.insert_listing("/", vec![NodeDescriptor::container("a")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();

    let err = tree.set_expanded(a, false).await.unwrap_err();
    assert!(matches!(err, TreeError::Source { .. }));
    let snap = tree.node(a).unwrap();
    assert!(!snap.expanded);
    assert!(!snap.loaded);
    assert_eq!(tree.flattened(), vec![a]);

    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.set_expanded(a, false).await.unwrap();
    let x = tree.find_in_loaded_tree("/a/x").unwrap();
    assert_eq!(tree.flattened(), vec![a, x]);
}

struct GatedSource {
    inner: ScriptedSource,
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl TreeSource for GatedSource {
    async fn resolve_children(
        &self,
        request: &ResolveRequest,
    ) -> anyhow::Result<Vec<NodeDescriptor>> {
        if request.path == "/a" {
            let permit = self.gate.acquire().await?;
            permit.forget();
        }
        self.inner.resolve_children(request).await
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_resolution() {
    let inner = ScriptedSource::new();
    inner.insert_listing("/", vec![NodeDescriptor::container("a")]);
    inner.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let tree = Tree::new(
        GatedSource {
            inner: inner.clone(),
            gate: gate.clone(),
        },
        TreeConfig::default(),
    );
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();

    let t1 = tokio::spawn({
        let tree = tree.clone();
        async move { tree.set_expanded(a, false).await }
    });
    let t2 = tokio::spawn({
        let tree = tree.clone();
        async move { tree.ensure_loaded(a).await }
    });
    // Let both callers reach the in-flight load before releasing it.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    gate.add_permits(2);
    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();

    // One call for the root, one shared call for `/a`.
    assert_eq!(inner.calls(), 2);
    assert_eq!(tree.children(a).unwrap().len(), 1);
}

#[tokio::test]
async fn test_cursor_walks_and_resumes() {
    let (source, tree) = scripted();
    source.insert_listing(
        "/",
        vec![NodeDescriptor::container("a"), NodeDescriptor::leaf("c")],
    );
    source.insert_listing("/a", vec![NodeDescriptor::leaf("x")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let a = tree.find_in_loaded_tree("/a").unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();

    let mut cursor = tree.cursor(tree.root());
    assert_eq!(cursor.current(), Some(tree.root()));
    assert_eq!(cursor.descend().await.unwrap(), Some(a));
    // Descending into `a` loads it on demand.
    let x = cursor.descend().await.unwrap().unwrap();
    assert_eq!(tree.path_of(x), Some("/a/x".to_string()));
    assert_eq!(cursor.next(), None);
    assert_eq!(cursor.ascend().unwrap(), Some(c));
    assert_eq!(cursor.next(), None);
    assert!(matches!(cursor.ascend(), Err(TreeError::CursorAtStart)));
}

#[tokio::test]
async fn test_cursor_leaf_descend_and_stop() {
    let (source, tree) = scripted();
    source.insert_listing("/", vec![NodeDescriptor::leaf("c")]);
    tree.ensure_loaded(tree.root()).await.unwrap();
    let c = tree.find_in_loaded_tree("/c").unwrap();

    let mut leaf_cursor = tree.cursor(c);
    assert!(matches!(
        leaf_cursor.descend().await,
        Err(TreeError::NotAContainer(_))
    ));

    let mut cursor = tree.cursor(tree.root());
    assert_eq!(cursor.descend().await.unwrap(), Some(c));
    cursor.stop();
    assert_eq!(cursor.current(), None);
    assert_eq!(cursor.next(), None);
    assert_eq!(cursor.descend().await.unwrap(), None);
}
