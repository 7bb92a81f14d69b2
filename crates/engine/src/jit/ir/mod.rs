//! Forward-only SSA intermediate representation.
//!
//! A trace's IR is a single append-only array of [`IrNode`]s: once recorded,
//! an instruction's index never changes, so earlier passes' references into
//! later instructions stay valid across intervening inserts (those always
//! append at the end). There is no notion of a basic block — a trace is by
//! construction one straight-line extended path with a single loop back to
//! its anchor, so "control flow" only shows up as guard instructions that
//! can side-exit.

mod buffer;
mod node;
mod snapshot;

pub use buffer::{IrBuffer, IR_NONE};
pub use node::{IrNode, IrOp, IrRef, IrType};
pub use snapshot::{SnapshotEntry, SnapshotId, SnapshotTable};
