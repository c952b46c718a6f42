//! Explicit change events for the mailbox tree. Every mutation is
//! bracketed: `AboutToInsert`/`Inserted`, `AboutToRemove`/`Removed`,
//! and structural rebuilds use the `ResetBegin`/`ResetEnd` pair. The
//! presentation layer replays these against its own view of the tree.

use super::NodeHandle;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TreeEvent {
    AboutToInsert {
        parent: NodeHandle,
        index: usize,
        count: usize,
    },
    Inserted {
        parent: NodeHandle,
        index: usize,
        count: usize,
    },
    AboutToRemove {
        parent: NodeHandle,
        index: usize,
        count: usize,
    },
    Removed {
        parent: NodeHandle,
        index: usize,
        count: usize,
    },
    /// Node data changed in place (flags, envelope, body, ...).
    Changed { node: NodeHandle },
    ResetBegin { node: NodeHandle },
    ResetEnd { node: NodeHandle },
}
