//! Tracing JIT compilation for the register-based bytecode interpreter.
//!
//! The pipeline is: a hot backward-branch counter ([`JitState::increment_hot`])
//! triggers [`recorder::Recorder`] to mirror real interpreter execution into
//! an append-only [`ir::IrBuffer`], which once closed back on its anchor runs
//! through a fixed 13-pass [`optimize`] pipeline, a linear-scan
//! [`regalloc`], and [`codegen`]'s `dynasmrt`-backed lowering, producing a
//! [`trace::CompiledTrace`] the interpreter can execute directly in place of
//! bytecode dispatch. Guard failures side-exit back to the interpreter via
//! [`executor::restore`].

pub mod cache;
pub mod codegen;
pub mod config;
pub mod error;
pub mod executor;
pub mod ir;
pub mod optimize;
pub mod recorder;
pub mod regalloc;
pub mod trace;

mod engine;

pub use config::JitConfig;
pub use engine::{JitState, TraceId};
pub use error::{CacheError, CodegenError, RecordAbort};
pub use recorder::RecordOutcome;
