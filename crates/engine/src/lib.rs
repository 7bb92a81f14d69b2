//! Tracing JIT compiler embedded in a register-based, NaN-boxed bytecode VM.
//!
//! - **VM**: value representation, object model, register file, fiber stack
//!   and dispatch loop (`vm` module) — the minimal host the JIT observes.
//! - **JIT**: hot-loop detection, trace recording, a fixed 13-pass
//!   optimizer, linear-scan register allocation, native code generation, a
//!   trace cache and guard-driven deoptimization (`jit` module).
//!
//! # Example
//!
//! ```rust,ignore
//! use tracejit_engine::vm::bytecode::{Function, Instr, Module};
//! use tracejit_engine::vm::Interpreter;
//!
//! let mut module = Module::new("main");
//! let mut f = Function::new("main", 4);
//! // ... push instructions ...
//! module.add_function(f);
//!
//! let mut interp = Interpreter::new(module, 0);
//! interp.run();
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::needless_return)]

pub mod jit;
pub mod vm;

pub use jit::{JitConfig, JitState};
pub use vm::{Fiber, Frame, Instr, Interpreter, Module as BytecodeModule, Value, VmError, VmResult};
