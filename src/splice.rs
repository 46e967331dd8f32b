//! Allocation-stable splice over fixed-size id buffers.
//!
//! Flattened branches are stored as boxed slices, which cannot grow in
//! place; every structural edit rebuilds the buffer in a single pass.

use crate::types::NodeId;

/// Splice for fixed-size buffers: returns a new buffer with `delete_count`
/// ids removed at `start` and `insert` (if any) put in their place.
///
/// Out-of-range `start` and `delete_count` are clamped to the buffer
/// bounds instead of panicking.
pub fn splice(
    buf: &[NodeId],
    start: usize,
    delete_count: usize,
    insert: Option<&[NodeId]>,
) -> Box<[NodeId]> {
    let start = start.min(buf.len());
    let delete_count = delete_count.min(buf.len() - start);
    let insert = insert.unwrap_or(&[]);
    let mut out = Vec::with_capacity(buf.len() - delete_count + insert.len());
    out.extend_from_slice(&buf[..start]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&buf[start + delete_count..]);
    out.into_boxed_slice()
}
