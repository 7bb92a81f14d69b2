//! Minimal register-based, NaN-boxed bytecode VM.
//!
//! This module supplies just enough of a host runtime — value
//! representation, object model, a register file, a fiber/frame stack and a
//! dispatch loop — for the tracing JIT in [`crate::jit`] to have something
//! real to observe, trace and compile against. None of the dispatch loop's
//! own semantics (calling conventions, collection, concurrency) are the
//! subject of this crate.

pub mod bytecode;
pub mod fiber;
pub mod gc;
pub mod interpreter;
pub mod object;
pub mod register_file;
pub mod value;

pub use bytecode::{Function, Instr, Module, Pc, Reg};
pub use fiber::{Fiber, Frame};
pub use interpreter::Interpreter;
pub use object::{Class, Object};
pub use register_file::{RegisterFile, RegisterFileStats};
pub use value::Value;

/// VM execution errors.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Register file exhausted its configured maximum size.
    #[error("Stack overflow")]
    StackOverflow,

    /// A frame was freed below the bottom of the register file.
    #[error("Stack underflow")]
    StackUnderflow,

    /// Decoded an opcode the interpreter doesn't recognize.
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Dereferenced a null object value.
    #[error("Null pointer exception")]
    NullPointer,

    /// A value didn't have the type an operation required.
    #[error("Type error: {0}")]
    TypeError(String),

    /// Catch-all for errors raised by register file bounds checks and
    /// similar internal invariants.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result.
pub type VmResult<T> = Result<T, VmError>;
