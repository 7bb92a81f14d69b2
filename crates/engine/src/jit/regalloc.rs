//! Linear-scan register allocation over the optimized trace IR.
//!
//! The trace is one straight-line instruction list (no basic blocks), so a
//! node's live range is simply `[definition index, last use index]` in
//! buffer order — no dominance or loop-nesting analysis is needed to build
//! it. Two register classes are modeled: general-purpose (holds a raw
//! 64-bit word — a boxed `Value`, a bare pointer, or a boolean) and
//! floating point (holds an unboxed `f64`). Allocation that can't find a
//! free register of the right class spills to a stack slot instead of
//! failing outright.

use rustc_hash::FxHashMap;

use super::ir::{IrBuffer, IrOp, IrRef, IrType};

/// Number of general-purpose registers made available to the allocator.
///
/// The other ten GP registers are spoken for: `rdi`/`rsi`/`rdx`/`rcx` are
/// bound to the trace entry's four-pointer calling convention, `rsp`/`rbp`
/// are the stack/frame pointers, and `r10`/`r11`/`r15` are the code
/// generator's own scratch registers (`GP_SCRATCH_A`/`_B`/`_RESULT` in
/// `jit/codegen/asm.rs`). None of those ever appear in this pool; the
/// allocator only ever hands out an abstract slot index in
/// `0..NUM_GP_REGS`, which `jit/codegen/lower.rs` maps to a real machine
/// register.
pub const NUM_GP_REGS: usize = 7;

/// Number of floating-point (xmm-class) registers made available. Two more
/// (`xmm14`/`xmm15`) are reserved as code generator scratch and never
/// appear in this pool.
pub const NUM_FP_REGS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Gp(u8),
    Fp(u8),
    /// A spill slot, indexed from the trace's private stack frame.
    Spill(u32),
}

#[derive(Debug, Clone, Copy)]
struct LiveRange {
    ir_ref: IrRef,
    start: u32,
    end: u32,
    class: RegClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegClass {
    Gp,
    Fp,
}

fn reg_class_for(ty: IrType) -> RegClass {
    match ty {
        IrType::Number => RegClass::Fp,
        IrType::Bool | IrType::Boxed | IrType::ObjectPtr | IrType::Integer => RegClass::Gp,
    }
}

fn operand_refs(op: &IrOp) -> Vec<IrRef> {
    use IrOp::*;
    match *op {
        Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) | Mod(a, b) | Lt(a, b) | Le(a, b) | Gt(a, b) | Ge(a, b)
        | Eq(a, b) | Ne(a, b) | And(a, b) | Or(a, b) | Xor(a, b) | Shl(a, b) | Sar(a, b) => vec![a, b],
        Neg(a) | UnboxNumber(a) | BoxNumber(a) | UnboxBool(a) | BoxBool(a) | UnboxObject(a) | BoxObject(a)
        | Not(a) | NumberToInt(a) | IntToNumber(a) => vec![a],
        Phi { entry, back_edge } => {
            if back_edge == super::ir::IR_NONE {
                vec![entry]
            } else {
                vec![entry, back_edge]
            }
        }
        GuardClass { object, .. } => vec![object],
        GuardCond { cond, .. } => vec![cond],
        LoadField { object, .. } => vec![object],
        StoreField { object, value, .. } => vec![object, value],
        StoreGlobal { value, .. } => vec![value],
        Call { arg, .. } => vec![arg],
        _ => vec![],
    }
}

/// The result of allocation: where each live IR value lives during codegen.
#[derive(Debug, Default)]
pub struct Allocation {
    pub locations: FxHashMap<IrRef, Location>,
    pub spill_count: u32,
}

impl Allocation {
    pub fn location(&self, r: IrRef) -> Location {
        self.locations.get(&r).copied().unwrap_or(Location::Spill(0))
    }
}

/// Runs linear-scan allocation over every live (non-dead, non-identity)
/// node in `buffer`.
pub fn allocate(buffer: &IrBuffer) -> Allocation {
    let mut ranges = Vec::new();
    for (r, node) in buffer.iter() {
        if matches!(node.op, IrOp::Dead | IrOp::Identity(_) | IrOp::Constant(_) | IrOp::LoopHeader) {
            continue;
        }
        ranges.push(LiveRange { ir_ref: r, start: r as u32, end: r as u32, class: reg_class_for(node.ty) });
    }
    // Extend each definition's end to its last use.
    for (r, node) in buffer.iter() {
        for operand in operand_refs(&node.op) {
            if let Some(range) = ranges.iter_mut().find(|lr| lr.ir_ref == operand) {
                range.end = range.end.max(r as u32);
            }
        }
    }
    ranges.sort_by_key(|lr| lr.start);

    let mut gp_free: Vec<u8> = (0..NUM_GP_REGS as u8).rev().collect();
    let mut fp_free: Vec<u8> = (0..NUM_FP_REGS as u8).rev().collect();
    let mut active: Vec<LiveRange> = Vec::new();
    let mut locations = FxHashMap::default();
    let mut next_spill = 0u32;

    for range in ranges {
        active.retain(|a| {
            if a.end < range.start {
                match locations[&a.ir_ref] {
                    Location::Gp(n) => gp_free.push(n),
                    Location::Fp(n) => fp_free.push(n),
                    Location::Spill(_) => {}
                }
                false
            } else {
                true
            }
        });

        let loc = match range.class {
            RegClass::Gp => gp_free.pop().map(Location::Gp),
            RegClass::Fp => fp_free.pop().map(Location::Fp),
        };
        let loc = loc.unwrap_or_else(|| {
            let slot = next_spill;
            next_spill += 1;
            Location::Spill(slot)
        });
        locations.insert(range.ir_ref, loc);
        active.push(range);
    }

    Allocation { locations, spill_count: next_spill }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::IrNode;

    #[test]
    fn simple_chain_reuses_registers_after_last_use() {
        let mut buffer = IrBuffer::new();
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        let c1 = buffer.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));
        let c2 = buffer.push(IrNode::new(IrOp::Constant(2.0), IrType::Number));
        let sum = buffer.push(IrNode::new(IrOp::Add(c1, c2), IrType::Number));
        let _ = sum;

        let alloc = allocate(&buffer);
        assert!(matches!(alloc.location(sum), Location::Fp(_)));
    }

    #[test]
    fn exhausting_gp_registers_spills() {
        let mut buffer = IrBuffer::new();
        let mut refs = Vec::new();
        let total = NUM_GP_REGS + 2;
        for i in 0..total {
            refs.push(buffer.push(IrNode::new(IrOp::EntryReg { reg: i as u8 }, IrType::Boxed)));
        }
        // All entries stay live until a flurry of stores at the very end,
        // so their ranges mutually overlap instead of expiring one by one.
        for (slot, r) in refs.iter().enumerate() {
            buffer.push(IrNode::new(IrOp::StoreGlobal { slot: slot as u16, value: *r }, IrType::Boxed));
        }
        let alloc = allocate(&buffer);
        assert!(alloc.spill_count >= 2, "expected spills, got {}", alloc.spill_count);
    }
}
