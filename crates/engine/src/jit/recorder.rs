//! Trace recording: turns a sequence of real interpreter steps into IR.
//!
//! The recorder watches the interpreter execute bytecode for real and mirrors
//! each instruction as one or more IR nodes, specializing against the actual
//! runtime values it's shown rather than any static type information (there
//! isn't any — the bytecode's arithmetic and comparison opcodes are generic).
//! Recording always starts at a backward-branch target (the "anchor") and
//! normally ends when a `JumpBack` lands back on that same target, at which
//! point the trace's loop-carried registers are closed into phis.

use rustc_hash::FxHashMap;

use super::ir::{IrBuffer, IrNode, IrOp, IrRef, IrType, SnapshotEntry, SnapshotTable, IR_NONE};
use crate::vm::bytecode::{Instr, Module, Pc};
use crate::vm::fiber::Fiber;
use crate::vm::interpreter::Operands;
use crate::vm::object::Object;

use super::error::RecordAbort;

/// Outcome of feeding one more bytecode instruction to an in-progress
/// recording.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Keep recording.
    Continue,
    /// The trace closed back on its anchor; it's ready for optimization and
    /// codegen.
    Completed,
    /// Recording gave up; the trace is discarded.
    Aborted(RecordAbort),
}

impl std::fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordOutcome::Continue => write!(f, "continue"),
            RecordOutcome::Completed => write!(f, "completed"),
            RecordOutcome::Aborted(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: IrRef,
    ty: IrType,
}

pub struct Recorder {
    pub anchor_pc: Pc,
    pub func_index: usize,
    pub buffer: IrBuffer,
    pub snapshots: SnapshotTable,
    slots: FxHashMap<u8, Slot>,
    entry_regs: FxHashMap<u8, IrRef>,
    max_instructions: usize,
}

impl Recorder {
    pub fn new(anchor_pc: Pc, func_index: usize, max_instructions: usize) -> Self {
        let mut buffer = IrBuffer::new();
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        Recorder {
            anchor_pc,
            func_index,
            buffer,
            snapshots: SnapshotTable::new(),
            slots: FxHashMap::default(),
            entry_regs: FxHashMap::default(),
            max_instructions,
        }
    }

    fn entry(&mut self, reg: u8) -> Slot {
        if let Some(slot) = self.slots.get(&reg) {
            return *slot;
        }
        let r = self.buffer.push(IrNode::new(IrOp::EntryReg { reg }, IrType::Boxed));
        self.entry_regs.insert(reg, r);
        let slot = Slot { value: r, ty: IrType::Boxed };
        self.slots.insert(reg, slot);
        slot
    }

    fn as_number(&mut self, reg: u8) -> IrRef {
        let slot = self.entry(reg);
        if slot.ty == IrType::Number {
            return slot.value;
        }
        let r = self.buffer.push(IrNode::new(IrOp::UnboxNumber(slot.value), IrType::Number));
        self.slots.insert(reg, Slot { value: r, ty: IrType::Number });
        r
    }

    fn as_bool(&mut self, reg: u8) -> IrRef {
        let slot = self.entry(reg);
        if slot.ty == IrType::Bool {
            return slot.value;
        }
        let r = self.buffer.push(IrNode::new(IrOp::UnboxBool(slot.value), IrType::Bool));
        self.slots.insert(reg, Slot { value: r, ty: IrType::Bool });
        r
    }

    fn as_object_ptr(&mut self, reg: u8, observed_class: *const crate::vm::object::Class, resume_pc: Pc) -> IrRef {
        let slot = self.entry(reg);
        let ptr_ref = if slot.ty == IrType::ObjectPtr {
            slot.value
        } else {
            let r = self.buffer.push(IrNode::new(IrOp::UnboxObject(slot.value), IrType::ObjectPtr));
            self.slots.insert(reg, Slot { value: r, ty: IrType::ObjectPtr });
            r
        };
        let snapshot = self.snapshot_here(resume_pc);
        self.buffer.push(IrNode::new(
            IrOp::GuardClass { object: ptr_ref, class: observed_class, snapshot },
            IrType::ObjectPtr,
        ));
        ptr_ref
    }

    fn ensure_boxed(&mut self, reg: u8) -> IrRef {
        let slot = self.entry(reg);
        match slot.ty {
            IrType::Boxed => slot.value,
            IrType::Number => {
                let r = self.buffer.push(IrNode::new(IrOp::BoxNumber(slot.value), IrType::Boxed));
                self.slots.insert(reg, Slot { value: r, ty: IrType::Boxed });
                r
            }
            IrType::Bool => {
                let r = self.buffer.push(IrNode::new(IrOp::BoxBool(slot.value), IrType::Boxed));
                self.slots.insert(reg, Slot { value: r, ty: IrType::Boxed });
                r
            }
            IrType::ObjectPtr => {
                let r = self.buffer.push(IrNode::new(IrOp::BoxObject(slot.value), IrType::Boxed));
                self.slots.insert(reg, Slot { value: r, ty: IrType::Boxed });
                r
            }
        }
    }

    fn set_number(&mut self, reg: u8, value: IrRef) {
        self.slots.insert(reg, Slot { value, ty: IrType::Number });
    }

    fn set_bool(&mut self, reg: u8, value: IrRef) {
        self.slots.insert(reg, Slot { value, ty: IrType::Bool });
    }

    fn set_boxed(&mut self, reg: u8, value: IrRef) {
        self.slots.insert(reg, Slot { value, ty: IrType::Boxed });
    }

    fn snapshot_here(&mut self, resume_pc: Pc) -> super::ir::SnapshotId {
        let regs: Vec<u8> = self.slots.keys().copied().collect();
        let mut entries = Vec::with_capacity(regs.len());
        for reg in regs {
            let boxed = self.ensure_boxed(reg);
            entries.push(SnapshotEntry { reg, value: boxed });
        }
        self.snapshots.push(resume_pc, &entries)
    }

    /// Feeds one more already-executed instruction to the recorder.
    pub fn step(&mut self, _module: &Module, pc: Pc, instr: Instr, operands: Operands, fiber: &Fiber) -> RecordOutcome {
        if self.buffer.len() >= self.max_instructions {
            return RecordOutcome::Aborted(RecordAbort::TooLong);
        }

        match instr {
            Instr::Nop | Instr::Jump { .. } => {}

            Instr::LoadConst { dst, .. } => {
                let boxed = fiber
                    .registers
                    .get_reg(fiber.frame.reg_base, dst)
                    .expect("interpreter already wrote this register");
                let v = boxed.as_number().expect("LoadConst always produces a number");
                let r = self.buffer.push(IrNode::new(IrOp::Constant(v), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::LoadNull { .. } | Instr::LoadBool { .. } => {
                return RecordOutcome::Aborted(RecordAbort::UnsupportedInstruction(pc));
            }
            Instr::Move { dst, src } => {
                let slot = self.entry(src);
                self.slots.insert(dst, slot);
            }

            Instr::Add { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Add(a, b), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::Sub { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Sub(a, b), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::Mul { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Mul(a, b), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::Div { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Div(a, b), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::Mod { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Mod(a, b), IrType::Number));
                self.set_number(dst, r);
            }
            Instr::Neg { dst, src } => {
                let a = self.as_number(src);
                let r = self.buffer.push(IrNode::new(IrOp::Neg(a), IrType::Number));
                self.set_number(dst, r);
            }

            Instr::Lt { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Lt(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }
            Instr::Le { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Le(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }
            Instr::Gt { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Gt(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }
            Instr::Ge { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Ge(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }
            Instr::Eq { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Eq(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }
            Instr::Ne { dst, lhs, rhs } => {
                let (a, b) = (self.as_number(lhs), self.as_number(rhs));
                let r = self.buffer.push(IrNode::new(IrOp::Ne(a, b), IrType::Bool));
                self.set_bool(dst, r);
            }

            Instr::LoadGlobal { dst, slot } => {
                let r = self.buffer.push(IrNode::new(IrOp::LoadGlobal { slot }, IrType::Boxed));
                self.set_boxed(dst, r);
            }
            Instr::StoreGlobal { slot, src } => {
                let value = self.ensure_boxed(src);
                self.buffer.push(IrNode::new(IrOp::StoreGlobal { slot, value }, IrType::Boxed));
            }

            Instr::GetField { dst, obj, field } => {
                let class = observed_class(operands.a);
                let ptr = self.as_object_ptr(obj, class, pc);
                let r = self.buffer.push(IrNode::new(IrOp::LoadField { object: ptr, field }, IrType::Boxed));
                self.set_boxed(dst, r);
            }
            Instr::SetField { obj, field, src } => {
                let class = observed_class(operands.a);
                let ptr = self.as_object_ptr(obj, class, pc);
                let value = self.ensure_boxed(src);
                self.buffer.push(IrNode::new(IrOp::StoreField { object: ptr, field, value }, IrType::Boxed));
            }

            Instr::JumpIfFalse { cond, .. } => {
                let expected = operands.a.is_truthy();
                let bool_ref = self.as_bool(cond);
                let snapshot = self.snapshot_here(pc);
                self.buffer.push(IrNode::new(IrOp::GuardCond { cond: bool_ref, expected, snapshot }, IrType::Bool));
            }

            Instr::JumpBack { target } => {
                if target != self.anchor_pc {
                    return RecordOutcome::Aborted(RecordAbort::LeftLoop);
                }
                self.close_loop();
                return RecordOutcome::Completed;
            }

            Instr::Print { .. } | Instr::Return { .. } => {
                return RecordOutcome::Aborted(RecordAbort::UnsupportedInstruction(pc));
            }
        }

        RecordOutcome::Continue
    }

    fn close_loop(&mut self) {
        let entries: Vec<(u8, IrRef)> = self.entry_regs.iter().map(|(&r, &e)| (r, e)).collect();
        for (reg, entry_ref) in entries {
            let current = self.slots.get(&reg).map(|s| s.value).unwrap_or(entry_ref);
            if current == entry_ref {
                continue;
            }
            let ty = self.slots.get(&reg).map(|s| s.ty).unwrap_or(IrType::Boxed);
            let phi = self.buffer.push(IrNode::new(IrOp::Phi { entry: entry_ref, back_edge: current }, ty));
            self.slots.insert(reg, Slot { value: phi, ty });
        }
    }
}

fn observed_class(receiver: crate::vm::value::Value) -> *const crate::vm::object::Class {
    match receiver.as_object() {
        Some(ptr) => unsafe { (*(ptr.as_ptr() as *const Object)).class() },
        None => std::ptr::null(),
    }
}

#[allow(dead_code)]
const _UNUSED_SENTINEL: IrRef = IR_NONE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::Value;

    fn fiber_with(values: &[Value]) -> Fiber {
        let mut fiber = Fiber::new(0, values.len().max(1));
        for (i, v) in values.iter().enumerate() {
            fiber.registers.set_reg(fiber.frame.reg_base, i as u8, *v).unwrap();
        }
        fiber
    }

    #[test]
    fn add_records_an_unbox_add_box_chain_over_both_operands() {
        let mut recorder = Recorder::new(0, 0, 64);
        let module = Module::new("test");
        let fiber = fiber_with(&[Value::number(1.0), Value::number(2.0)]);
        let outcome = recorder.step(
            &module,
            0,
            Instr::Add { dst: 2, lhs: 0, rhs: 1 },
            Operands::default(),
            &fiber,
        );
        assert_eq!(outcome, RecordOutcome::Continue);
        let has_add = recorder.buffer.iter().any(|(_, n)| matches!(n.op, IrOp::Add(..)));
        assert!(has_add, "expected an Add node in the recorded buffer");
    }

    #[test]
    fn load_const_records_a_plain_constant_node() {
        let mut recorder = Recorder::new(0, 0, 64);
        let mut module = Module::new("test");
        module.functions.push(crate::vm::bytecode::Function {
            name: "f".into(),
            code: Vec::new(),
            constants: vec![9.0],
            register_count: 1,
        });
        let fiber = fiber_with(&[Value::number(9.0)]);
        recorder.step(&module, 0, Instr::LoadConst { dst: 0, idx: 0 }, Operands::default(), &fiber);
        let has_const = recorder
            .buffer
            .iter()
            .any(|(_, n)| matches!(n.op, IrOp::Constant(v) if v == 9.0));
        assert!(has_const, "expected a Constant(9.0) node");
    }

    #[test]
    fn jump_back_to_a_foreign_target_aborts_as_left_loop() {
        let mut recorder = Recorder::new(10, 0, 64);
        let module = Module::new("test");
        let fiber = fiber_with(&[]);
        let outcome = recorder.step(&module, 0, Instr::JumpBack { target: 99 }, Operands::default(), &fiber);
        assert_eq!(outcome, RecordOutcome::Aborted(RecordAbort::LeftLoop));
    }

    #[test]
    fn jump_back_to_the_anchor_closes_the_loop_and_completes() {
        let mut recorder = Recorder::new(10, 0, 64);
        let module = Module::new("test");
        let fiber = fiber_with(&[Value::number(1.0)]);
        recorder.step(&module, 0, Instr::Add { dst: 0, lhs: 0, rhs: 0 }, Operands::default(), &fiber);
        let outcome = recorder.step(&module, 0, Instr::JumpBack { target: 10 }, Operands::default(), &fiber);
        assert_eq!(outcome, RecordOutcome::Completed);
        let has_phi = recorder.buffer.iter().any(|(_, n)| matches!(n.op, IrOp::Phi { .. }));
        assert!(has_phi, "register 0 changed across the back-edge and should have closed into a phi");
    }

    #[test]
    fn exceeding_max_instructions_aborts_as_too_long() {
        let mut recorder = Recorder::new(0, 0, 1);
        let module = Module::new("test");
        let fiber = fiber_with(&[]);
        // The recorder's fresh buffer already holds the loop-header node, so
        // a max of 1 instruction is already exceeded before anything steps.
        let outcome = recorder.step(&module, 0, Instr::Nop, Operands::default(), &fiber);
        assert_eq!(outcome, RecordOutcome::Aborted(RecordAbort::TooLong));
    }
}
