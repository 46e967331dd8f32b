//! Virtualized tree engine: arena, flattened-branch bookkeeping, and the
//! async API surface.

mod cursor;
mod engine;
mod flatten;
mod node;
mod state;

pub use cursor::TopDownCursor;
pub use engine::{NodeSnapshot, Tree};

pub(crate) use node::{CompositeData, LoadState, NodeData, NodeEntry};
pub(crate) use state::TreeState;
