//! Minimal register-bytecode dispatch loop.
//!
//! This is the "host interpreter" the JIT is a guest of. Its dispatch loop,
//! value representation and object model are all out of scope for the JIT
//! this crate exists to exercise — this file exists only so the
//! end-to-end scenarios have somewhere to run and so the hot-counter /
//! trace cache / recorder / deopt hooks have a real caller.

use log::{debug, trace, warn};

use crate::jit::{JitState, RecordOutcome};
use crate::vm::bytecode::{Instr, Module, Pc};
use crate::vm::fiber::{Fiber, Frame};
use crate::vm::value::Value;

/// Operand values captured immediately before executing an instruction, so
/// the recorder can type-specialize against the values the interpreter
/// actually saw, independent of what the instruction just wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct Operands {
    pub a: Value,
    pub b: Value,
}

impl Operands {
    fn one(a: Value) -> Self {
        Operands { a, b: Value::null() }
    }
    fn two(a: Value, b: Value) -> Self {
        Operands { a, b }
    }
}

pub struct Interpreter {
    pub module: Module,
    pub fiber: Fiber,
    pub jit: JitState,
    printed: Vec<Value>,
}

impl Interpreter {
    pub fn new(module: Module, entry_function: usize) -> Self {
        let register_count = module.functions[entry_function].register_count;
        Interpreter {
            module,
            fiber: Fiber::new(entry_function, register_count),
            jit: JitState::new(),
            printed: Vec::new(),
        }
    }

    pub fn with_jit(module: Module, entry_function: usize, jit: JitState) -> Self {
        let register_count = module.functions[entry_function].register_count;
        Interpreter { module, fiber: Fiber::new(entry_function, register_count), jit, printed: Vec::new() }
    }

    pub fn printed(&self) -> &[Value] {
        &self.printed
    }

    #[inline]
    fn reg(&self, r: u8) -> Value {
        self.fiber.registers.get_reg(self.fiber.frame.reg_base, r).expect("register in bounds")
    }

    #[inline]
    fn set_reg(&mut self, r: u8, v: Value) {
        self.fiber
            .registers
            .set_reg(self.fiber.frame.reg_base, r, v)
            .expect("register in bounds");
    }

    fn current_function_index(&self) -> usize {
        self.fiber.frame.function_index
    }

    fn operands_for(&self, instr: Instr) -> Operands {
        match instr {
            Instr::Add { lhs, rhs, .. }
            | Instr::Sub { lhs, rhs, .. }
            | Instr::Mul { lhs, rhs, .. }
            | Instr::Div { lhs, rhs, .. }
            | Instr::Mod { lhs, rhs, .. }
            | Instr::Lt { lhs, rhs, .. }
            | Instr::Le { lhs, rhs, .. }
            | Instr::Gt { lhs, rhs, .. }
            | Instr::Ge { lhs, rhs, .. }
            | Instr::Eq { lhs, rhs, .. }
            | Instr::Ne { lhs, rhs, .. } => Operands::two(self.reg(lhs), self.reg(rhs)),
            Instr::Neg { src, .. } | Instr::Move { src, .. } | Instr::Print { src } => {
                Operands::one(self.reg(src))
            }
            Instr::JumpIfFalse { cond, .. } => Operands::one(self.reg(cond)),
            Instr::GetField { obj, .. } => Operands::one(self.reg(obj)),
            Instr::SetField { obj, src, .. } => Operands::two(self.reg(obj), self.reg(src)),
            _ => Operands::default(),
        }
    }

    fn function(&self) -> &crate::vm::bytecode::Function {
        &self.module.functions[self.current_function_index()]
    }

    /// Runs to completion (the entry function's `Return`), returning nothing
    /// useful itself — callers inspect [`Interpreter::printed`].
    pub fn run(&mut self) {
        loop {
            if self.step().is_break() {
                return;
            }
        }
    }

    fn step(&mut self) -> std::ops::ControlFlow<()> {
        let pc = self.fiber.frame.pc;

        // Trace cache lookup happens before hot counting: a hit never
        // touches the counter.
        if self.jit.enabled() && !self.jit.is_recording() {
            if let Some(exit) = self.try_execute_trace(pc) {
                self.handle_trace_exit(exit);
                return std::ops::ControlFlow::Continue(());
            }
        }

        let instr = self.function().code[pc];
        let operands = self.operands_for(instr);
        let next_pc = self.execute(pc, instr);

        if self.jit.is_recording() {
            match self.jit.record_step(&self.module, self.current_function_index(), pc, instr, operands, &self.fiber) {
                RecordOutcome::Continue => {}
                RecordOutcome::Completed => {
                    debug!("trace recording completed at anchor pc={}", self.jit.anchor_pc().unwrap_or(0));
                    let anchor = self.jit.anchor_pc();
                    if let Some(anchor) = anchor {
                        self.jit.compile_and_store(&self.module, self.current_function_index());
                        trace!("compiled trace stored for anchor {anchor}");
                    }
                }
                RecordOutcome::Aborted(reason) => {
                    warn!("trace recording aborted at pc={pc}: {reason}");
                }
            }
        } else if let Instr::JumpBack { target } = instr {
            // Only offer backward branches to the hot counter, and only
            // when nothing is already recording.
            let became_hot = self.jit.increment_hot(self.current_function_index(), target);
            if became_hot {
                debug!("pc={target} crossed hot threshold, starting recording");
                self.jit.start_recording(target);
            }
        }

        self.fiber.frame.pc = next_pc;
        if next_pc >= self.function().code.len() {
            std::ops::ControlFlow::Break(())
        } else {
            std::ops::ControlFlow::Continue(())
        }
    }

    fn try_execute_trace(&mut self, pc: Pc) -> Option<u32> {
        let func_idx = self.current_function_index();
        self.jit
            .lookup(func_idx, pc)
            .map(|trace_id| self.jit.execute(trace_id, &mut self.module, &mut self.fiber))
    }

    fn handle_trace_exit(&mut self, exit_code: u32) {
        if exit_code == 0 {
            // Trace ran to its own natural completion without a guard
            // failure; the loop-back inside the trace already brought the
            // fiber back to the anchor, so fall through and let dispatch
            // continue from wherever the trace left `pc`.
            return;
        }
        self.jit.restore_exit(&mut self.fiber, exit_code);
    }

    /// Executes one instruction against the real register file and returns
    /// the next `pc`. This is always ground truth, whether or not a trace
    /// is simultaneously being recorded.
    fn execute(&mut self, pc: Pc, instr: Instr) -> Pc {
        match instr {
            Instr::Nop => pc + 1,
            Instr::LoadConst { dst, idx } => {
                let v = self.function().constants[idx as usize];
                self.set_reg(dst, Value::number(v));
                pc + 1
            }
            Instr::LoadNull { dst } => {
                self.set_reg(dst, Value::null());
                pc + 1
            }
            Instr::LoadBool { dst, value } => {
                self.set_reg(dst, Value::bool(value));
                pc + 1
            }
            Instr::Move { dst, src } => {
                self.set_reg(dst, self.reg(src));
                pc + 1
            }
            Instr::Add { dst, lhs, rhs } => {
                self.set_reg(dst, Value::number(self.reg(lhs).as_number().unwrap() + self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Sub { dst, lhs, rhs } => {
                self.set_reg(dst, Value::number(self.reg(lhs).as_number().unwrap() - self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Mul { dst, lhs, rhs } => {
                self.set_reg(dst, Value::number(self.reg(lhs).as_number().unwrap() * self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Div { dst, lhs, rhs } => {
                self.set_reg(dst, Value::number(self.reg(lhs).as_number().unwrap() / self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Mod { dst, lhs, rhs } => {
                self.set_reg(dst, Value::number(self.reg(lhs).as_number().unwrap() % self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Neg { dst, src } => {
                self.set_reg(dst, Value::number(-self.reg(src).as_number().unwrap()));
                pc + 1
            }
            Instr::Lt { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs).as_number().unwrap() < self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Le { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs).as_number().unwrap() <= self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Gt { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs).as_number().unwrap() > self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Ge { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs).as_number().unwrap() >= self.reg(rhs).as_number().unwrap()));
                pc + 1
            }
            Instr::Eq { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs) == self.reg(rhs)));
                pc + 1
            }
            Instr::Ne { dst, lhs, rhs } => {
                self.set_reg(dst, Value::bool(self.reg(lhs) != self.reg(rhs)));
                pc + 1
            }
            Instr::LoadGlobal { dst, slot } => {
                self.set_reg(dst, self.module.globals[slot as usize]);
                pc + 1
            }
            Instr::StoreGlobal { slot, src } => {
                self.module.globals[slot as usize] = self.reg(src);
                pc + 1
            }
            Instr::GetField { dst, obj, field } => {
                let ptr = self.reg(obj).as_object().expect("GetField receiver must be an object");
                let object = unsafe { &*(ptr.as_ptr() as *const crate::vm::object::Object) };
                self.set_reg(dst, object.get_field(field as usize).unwrap_or(Value::null()));
                pc + 1
            }
            Instr::SetField { obj, field, src } => {
                let ptr = self.reg(obj).as_object().expect("SetField receiver must be an object");
                let object = unsafe { &mut *(ptr.as_ptr() as *mut crate::vm::object::Object) };
                object.set_field(field as usize, self.reg(src));
                pc + 1
            }
            Instr::Jump { target } => target,
            Instr::JumpBack { target } => target,
            Instr::JumpIfFalse { cond, target } => {
                if self.reg(cond).is_truthy() { pc + 1 } else { target }
            }
            Instr::Print { src } => {
                self.printed.push(self.reg(src));
                pc + 1
            }
            Instr::Return { .. } => self.function().code.len(),
        }
    }
}
