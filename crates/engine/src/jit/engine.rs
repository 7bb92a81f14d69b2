//! Top-level JIT state: hot counters, the in-progress recorder, and the
//! trace cache, wired together behind the handful of hooks the interpreter
//! calls into.

use rustc_hash::FxHashMap;

use crate::jit::cache::TraceCache;
use crate::jit::codegen::{lower_trace, Assembler, X64Assembler};
use crate::jit::config::JitConfig;
use crate::jit::executor;
use crate::jit::optimize;
use crate::jit::recorder::{RecordOutcome, Recorder};
use crate::jit::regalloc;
use crate::jit::trace::CompiledTrace;
use crate::vm::bytecode::{Instr, Module, Pc};
use crate::vm::fiber::Fiber;
use crate::vm::gc::RootSet;
use crate::vm::interpreter::Operands;

/// Identifies a cached trace by the anchor it was recorded from.
pub type TraceId = (usize, Pc);

/// All mutable JIT state the interpreter carries alongside its bytecode
/// dispatch loop: per-(function, pc) hot counters, at most one in-progress
/// [`Recorder`], and the cache of already-compiled traces.
pub struct JitState {
    config: JitConfig,
    cache: TraceCache,
    recorder: Option<Recorder>,
    hot_counts: FxHashMap<TraceId, u16>,
    recording_func: usize,
    last_exit: Option<TraceId>,
}

impl JitState {
    pub fn new() -> Self {
        Self::with_config(JitConfig::default())
    }

    pub fn with_config(config: JitConfig) -> Self {
        JitState {
            cache: TraceCache::new(&config),
            config,
            recorder: None,
            hot_counts: FxHashMap::default(),
            recording_func: 0,
            last_exit: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// The anchor a recording in progress started from, if any.
    pub fn anchor_pc(&self) -> Option<Pc> {
        self.recorder.as_ref().map(|r| r.anchor_pc)
    }

    /// Bumps the hot counter for a backward branch, returning `true` the
    /// instant it crosses [`JitConfig::hot_threshold`]. A target that
    /// already has a cached trace is never counted — there is nothing left
    /// to record for it.
    pub fn increment_hot(&mut self, func_index: usize, pc: Pc) -> bool {
        if !self.config.enabled || self.cache.lookup(func_index, pc).is_some() {
            return false;
        }
        self.recording_func = func_index;
        let counter = self.hot_counts.entry((func_index, pc)).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter == self.config.hot_threshold
    }

    /// Starts recording a new trace anchored at `pc`, in the function the
    /// most recent [`Self::increment_hot`] call named.
    pub fn start_recording(&mut self, pc: Pc) {
        self.recorder = Some(Recorder::new(pc, self.recording_func, self.config.max_instructions));
    }

    /// Feeds one executed instruction to the in-progress recorder.
    pub fn record_step(
        &mut self,
        module: &Module,
        func_index: usize,
        pc: Pc,
        instr: Instr,
        operands: Operands,
        fiber: &Fiber,
    ) -> RecordOutcome {
        let recorder = self
            .recorder
            .as_mut()
            .expect("record_step called with no recording in progress");
        debug_assert_eq!(recorder.func_index, func_index);
        let outcome = recorder.step(module, pc, instr, operands, fiber);
        if let RecordOutcome::Aborted(_) = outcome {
            self.recorder = None;
        }
        outcome
    }

    /// Looks up a cached trace for `(func_index, pc)`. Returns an opaque
    /// [`TraceId`] rather than the trace itself so callers don't hold a
    /// borrow of the cache across a call to [`Self::execute`].
    pub fn lookup(&self, func_index: usize, pc: Pc) -> Option<TraceId> {
        self.cache.lookup(func_index, pc).map(|_| (func_index, pc))
    }

    /// Runs a cached trace, handing it raw pointers into the fiber's own
    /// register window and the module's global-variable storage so its
    /// guards and `LoadGlobal`/`StoreGlobal` nodes can read and write
    /// interpreter-visible storage directly.
    ///
    /// The `vm`/`fiber` arguments in the native calling convention exist for
    /// a future host-call opcode (`IrOp::Call`); no pass in this pipeline
    /// produces one yet, so nothing compiled today dereferences them and
    /// passing null pointers here is sound.
    pub fn execute(&mut self, trace_id: TraceId, module: &mut Module, fiber: &mut Fiber) -> u32 {
        let (func_index, pc) = trace_id;
        let stack_base = fiber.registers.reg_ptr(fiber.frame.reg_base);
        let globals_base = module.globals_ptr();
        let trace = self
            .cache
            .lookup(func_index, pc)
            .expect("execute called with a trace_id from a successful lookup");
        let exit_code = unsafe { trace.code.call(std::ptr::null_mut(), std::ptr::null_mut(), stack_base, globals_base) };
        self.last_exit = Some(trace_id);
        exit_code
    }

    /// Finishes a side exit: truncates the fiber to the depth the guard's
    /// snapshot recorded and repoints `pc` at the resume offset. The
    /// register values themselves were already written back by the guard
    /// before it returned `exit_code`.
    pub fn restore_exit(&mut self, fiber: &mut Fiber, exit_code: u32) {
        let Some((func_index, pc)) = self.last_exit else {
            return;
        };
        if let Some(trace) = self.cache.lookup(func_index, pc) {
            executor::restore(fiber, trace, exit_code);
        }
    }

    /// Runs the optimizer, register allocator and code generator over a
    /// just-completed recording and stores the result in the trace cache.
    pub fn compile_and_store(&mut self, module: &Module, func_index: usize) {
        let _ = module;
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let anchor_pc = recorder.anchor_pc;
        let mut buffer = recorder.buffer;
        let mut snapshots = recorder.snapshots;

        let ctx = optimize::run_pipeline(&mut buffer, &mut snapshots, self.config.dump_ir);
        let alloc = regalloc::allocate(&buffer);
        let asm: X64Assembler = lower_trace(&buffer, &snapshots, &alloc, &ctx);
        let code = asm.finalize();
        let compiled = CompiledTrace::new(anchor_pc, func_index, code, snapshots);

        if let Err(e) = self.cache.insert(func_index, anchor_pc, compiled) {
            log::warn!("failed to cache compiled trace for pc={anchor_pc}: {e}");
        }
    }

    /// Compiled traces only ever embed numeric constants (`IrOp::Constant`
    /// is always an `f64`, never a boxed object), so there is nothing for
    /// the JIT to contribute to the collector's root set.
    pub fn mark_roots(&self, _roots: &mut RootSet) {}
}

impl Default for JitState {
    fn default() -> Self {
        Self::new()
    }
}
