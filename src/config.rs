//! Engine configuration.

use crate::types::NodeKind;
use std::cmp::Ordering;
use std::sync::Arc;

/// The view of a child a comparator sees.
#[derive(Debug, Clone, Copy)]
pub struct SortEntry<'a> {
    pub name: &'a str,
    pub kind: NodeKind,
}

/// Child ordering override. Applied wherever children are (re)sorted:
/// after a load and after every insert.
pub type SortComparator =
    Arc<dyn for<'a> Fn(&SortEntry<'a>, &SortEntry<'a>) -> Ordering + Send + Sync>;

/// Tree engine configuration.
#[derive(Clone)]
pub struct TreeConfig {
    /// Name of the root node; the root path is `/{root_name}`, or just `/`
    /// when empty.
    pub root_name: String,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Child comparator; `None` uses [`default_comparator`].
    pub comparator: Option<SortComparator>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_name: String::new(),
            event_capacity: 256,
            comparator: None,
        }
    }
}

/// Default ordering: containers before leaves, then lexicographic by name.
pub fn default_comparator(a: &SortEntry<'_>, b: &SortEntry<'_>) -> Ordering {
    if a.kind == b.kind {
        return a.name.cmp(b.name);
    }
    match a.kind {
        NodeKind::Container => Ordering::Less,
        NodeKind::Leaf => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: NodeKind) -> SortEntry<'_> {
        SortEntry { name, kind }
    }

    #[test]
    fn test_containers_sort_before_leaves() {
        let dir = entry("z", NodeKind::Container);
        let leaf = entry("a", NodeKind::Leaf);
        assert_eq!(default_comparator(&dir, &leaf), Ordering::Less);
        assert_eq!(default_comparator(&leaf, &dir), Ordering::Greater);
    }

    #[test]
    fn test_same_kind_sorts_by_name() {
        let a = entry("a", NodeKind::Leaf);
        let b = entry("b", NodeKind::Leaf);
        assert_eq!(default_comparator(&a, &b), Ordering::Less);
        assert_eq!(default_comparator(&b, &a), Ordering::Greater);
        assert_eq!(default_comparator(&a, &a), Ordering::Equal);
    }
}
