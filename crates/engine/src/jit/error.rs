//! Per-stage error types.
//!
//! None of these escape the public hook API (`start_recording`,
//! `record_step`, `compile_and_store`, ...): a failure at any stage just
//! means the trace is dropped and the interpreter keeps going in bytecode.
//! They exist so the failure reason shows up in logs instead of being
//! silently swallowed.

use thiserror::Error;

/// Why trace recording gave up before reaching a loop-back to its anchor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordAbort {
    #[error("recorded instruction count exceeded the configured limit")]
    TooLong,

    #[error("call depth exceeded the configured limit while recording")]
    CallDepthExceeded,

    #[error("recording followed a branch away from the anchor's loop body")]
    LeftLoop,

    #[error("instruction at pc={0} has no recorder support")]
    UnsupportedInstruction(usize),

    #[error("recording re-entered its own anchor from a different call site")]
    NestedTrace,
}

/// Why the code generator failed to emit native code for an otherwise
/// complete, optimized trace.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("register allocation could not find a free slot for {0:?}")]
    OutOfRegisters(crate::jit::ir::IrRef),

    #[error("executable memory allocation failed: {0}")]
    ExecMemoryUnavailable(String),

    #[error("assembler rejected instruction sequence: {0}")]
    AssemblerError(String),
}

/// Trace cache failures (growth, or corruption detected defensively).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("trace cache capacity exceeded maximum addressable size")]
    CapacityExceeded,

    #[error("cache entry for anchor pc={0} already present")]
    DuplicateAnchor(usize),
}
