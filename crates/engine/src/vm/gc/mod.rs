//! Garbage-collected object header and root tracking.
//!
//! The collector itself is out of scope here: the JIT only needs a stable
//! header layout to guard against and a root list it can append its own
//! trace roots into via [`JitState::mark_roots`](crate::jit::JitState::mark_roots).

mod header;
mod roots;

pub use header::{GcHeader, CLASS_PTR_OFFSET, FIELD_BASE_OFFSET};
pub use roots::RootSet;
