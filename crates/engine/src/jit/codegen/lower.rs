//! Walks the optimized, allocated trace once and emits native code for it.
//!
//! Hoisted nodes (per LICM/guard-hoisting) are emitted before
//! [`Assembler::mark_loop_header`]; everything else is emitted in buffer
//! order inside the loop body. A loop-carried [`IrOp::Phi`] needs code at
//! two distinct points rather than at its own buffer position: a seed copy
//! from its entry value, emitted once before the header, and an update copy
//! from its back-edge value, emitted once after the loop body, right before
//! the jump back to the header.
//!
//! Every value the allocator spilled lives in a real stack slot (`rsp +
//! slot*8`, reserved by [`Assembler::prologue`]), not in the register
//! window — reading or writing one goes through a dedicated scratch
//! register, never through the allocator's abstract slot index
//! reinterpreted as a machine register number.

use super::asm::{
    Assembler, CmpOp, RestoreSrc, FP_SCRATCH_A, FP_SCRATCH_B, GP_SCRATCH_A, GP_SCRATCH_B, GP_SCRATCH_RESULT,
};
use crate::jit::ir::{IrBuffer, IrOp, IrRef, IrType, SnapshotTable, IR_NONE};
use crate::jit::optimize::{resolve, OptContext};
use crate::jit::regalloc::{Allocation, Location};
use crate::vm::gc::{CLASS_PTR_OFFSET, FIELD_BASE_OFFSET};

/// Allocator GP slot index -> real x86-64 register encoding. Excludes the
/// four ABI-bound registers (`rdi`/`rsi`/`rdx`/`rcx`), `rsp`/`rbp`, and the
/// three codegen scratch registers (`r10`/`r11`/`r15`).
const GP_PHYS: [u8; 7] = [0, 3, 8, 9, 12, 13, 14];
/// Allocator FP slot index -> real xmm register encoding. Excludes the two
/// FP scratch registers (`xmm14`/`xmm15`).
const FP_PHYS: [u8; 6] = [0, 1, 2, 3, 4, 5];

/// Reads a GP-class value into a real register, materializing it from its
/// spill slot into `scratch` first if necessary.
fn gp_operand<A: Assembler>(asm: &mut A, alloc: &Allocation, buffer: &IrBuffer, r: IrRef, scratch: u8) -> u8 {
    match alloc.location(resolve(buffer, r)) {
        Location::Gp(n) => GP_PHYS[n as usize],
        Location::Spill(slot) => {
            asm.load_spill_gp(scratch, slot);
            scratch
        }
        Location::Fp(_) => unreachable!("gp value allocated to an fp-class register"),
    }
}

/// Reads an FP-class value into a real xmm register, materializing it from
/// its spill slot into `scratch` first if necessary.
fn fp_operand<A: Assembler>(asm: &mut A, alloc: &Allocation, buffer: &IrBuffer, r: IrRef, scratch: u8) -> u8 {
    match alloc.location(resolve(buffer, r)) {
        Location::Fp(n) => FP_PHYS[n as usize],
        Location::Spill(slot) => {
            asm.load_spill_fp(scratch, slot);
            scratch
        }
        Location::Gp(_) => unreachable!("fp value allocated to a gp-class register"),
    }
}

/// Runs `compute`, writing its result into `r`'s allocated GP location —
/// directly if it's a real register, or via [`GP_SCRATCH_RESULT`] spilled
/// back out if not.
fn gp_result<A: Assembler>(asm: &mut A, alloc: &Allocation, r: IrRef, compute: impl FnOnce(&mut A, u8)) {
    match alloc.location(r) {
        Location::Gp(n) => compute(asm, GP_PHYS[n as usize]),
        Location::Spill(slot) => {
            compute(asm, GP_SCRATCH_RESULT);
            asm.store_spill_gp(slot, GP_SCRATCH_RESULT);
        }
        Location::Fp(_) => unreachable!("gp result allocated to an fp-class register"),
    }
}

/// Runs `compute`, writing its result into `r`'s allocated FP location —
/// directly if it's a real register, or via [`FP_SCRATCH_A`] spilled back
/// out if not. Safe to reuse `FP_SCRATCH_A` here even when it was also used
/// to materialize one of `compute`'s own operands, since every FP emitter
/// in [`super::asm`] copies its first operand into `dst` before consuming
/// it — aliasing `dst` with an operand scratch register is a no-op, not a
/// clobber.
fn fp_result<A: Assembler>(asm: &mut A, alloc: &Allocation, r: IrRef, compute: impl FnOnce(&mut A, u8)) {
    match alloc.location(r) {
        Location::Fp(n) => compute(asm, FP_PHYS[n as usize]),
        Location::Spill(slot) => {
            compute(asm, FP_SCRATCH_A);
            asm.store_spill_fp(slot, FP_SCRATCH_A);
        }
        Location::Gp(_) => unreachable!("fp result allocated to a gp-class register"),
    }
}

/// Builds the restore list a guard must write back before bailing out, from
/// the snapshot it's paired with. Spilled entries are tagged so the
/// restore stub knows to reload them first rather than treating the spill
/// slot index as if it were a register number.
fn restore_list(buffer: &IrBuffer, snapshots: &SnapshotTable, alloc: &Allocation, snapshot: crate::jit::ir::SnapshotId) -> Vec<(i32, RestoreSrc)> {
    snapshots
        .entries(snapshot)
        .iter()
        .map(|entry| {
            let src = match alloc.location(resolve(buffer, entry.value)) {
                Location::Gp(n) => RestoreSrc::Reg(GP_PHYS[n as usize]),
                Location::Spill(slot) => RestoreSrc::Spill(slot),
                Location::Fp(_) => unreachable!("boxed register-window entry allocated to an fp-class register"),
            };
            (entry.reg as i32 * 8, src)
        })
        .collect()
}

/// A loop-carried phi's seed (entry) and update (back-edge) source, paired
/// with its own location and value class.
struct PhiCopy {
    phi: IrRef,
    entry: IrRef,
    back_edge: IrRef,
    is_fp: bool,
}

fn collect_phis(buffer: &IrBuffer) -> Vec<PhiCopy> {
    let mut phis = Vec::new();
    for (r, node) in buffer.iter() {
        if let IrOp::Phi { entry, back_edge } = node.op {
            if back_edge != IR_NONE {
                phis.push(PhiCopy { phi: r, entry, back_edge, is_fp: node.ty == IrType::Number });
            }
        }
    }
    phis
}

fn emit_phi_copy<A: Assembler>(asm: &mut A, alloc: &Allocation, buffer: &IrBuffer, phi: &PhiCopy, source: IrRef) {
    if phi.is_fp {
        let src = fp_operand(asm, alloc, buffer, source, FP_SCRATCH_A);
        fp_result(asm, alloc, phi.phi, |asm, dst| asm.move_fp(dst, src));
    } else {
        let src = gp_operand(asm, alloc, buffer, source, GP_SCRATCH_A);
        gp_result(asm, alloc, phi.phi, |asm, dst| asm.move_gp(dst, src));
    }
}

/// Emits native code for one optimized trace, returning the finalized
/// executable trace.
pub fn lower_trace<A: Assembler>(buffer: &IrBuffer, snapshots: &SnapshotTable, alloc: &Allocation, ctx: &OptContext) -> A {
    let mut asm = A::new();
    asm.prologue(alloc.spill_count);

    let mut emit_one = |asm: &mut A, r: IrRef| {
        let node = buffer.get(r);
        match node.op {
            IrOp::Constant(value) => fp_result(asm, alloc, r, |asm, dst| asm.load_const_f64(dst, value)),
            IrOp::ConstantInt(value) => gp_result(asm, alloc, r, |asm, dst| asm.load_const_gp(dst, value)),
            IrOp::EntryReg { reg } => gp_result(asm, alloc, r, |asm, dst| asm.load_entry_reg(dst, reg as i32 * 8)),
            IrOp::LoopHeader | IrOp::Dead | IrOp::Identity(_) | IrOp::Phi { .. } => {}
            IrOp::Add(a, b) if node.ty == IrType::Integer => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                let bv = gp_operand(asm, alloc, buffer, b, GP_SCRATCH_B);
                gp_result(asm, alloc, r, |asm, dst| asm.add_gp(dst, av, bv));
            }
            IrOp::Sub(a, b) if node.ty == IrType::Integer => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                let bv = gp_operand(asm, alloc, buffer, b, GP_SCRATCH_B);
                gp_result(asm, alloc, r, |asm, dst| asm.sub_gp(dst, av, bv));
            }
            IrOp::Add(a, b) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                let bv = fp_operand(asm, alloc, buffer, b, FP_SCRATCH_B);
                fp_result(asm, alloc, r, |asm, dst| asm.add_f64(dst, av, bv));
            }
            IrOp::Sub(a, b) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                let bv = fp_operand(asm, alloc, buffer, b, FP_SCRATCH_B);
                fp_result(asm, alloc, r, |asm, dst| asm.sub_f64(dst, av, bv));
            }
            IrOp::Mul(a, b) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                let bv = fp_operand(asm, alloc, buffer, b, FP_SCRATCH_B);
                fp_result(asm, alloc, r, |asm, dst| asm.mul_f64(dst, av, bv));
            }
            IrOp::Div(a, b) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                let bv = fp_operand(asm, alloc, buffer, b, FP_SCRATCH_B);
                fp_result(asm, alloc, r, |asm, dst| asm.div_f64(dst, av, bv));
            }
            IrOp::Mod(..) => {
                // No native `fmod`; trace lowering bails rather than inline
                // a libm call — the interpreter handles `%` instead. A
                // trace containing a live `Mod` should have been rejected
                // earlier (the recorder still records it for constant
                // folding's sake), so this path is unreachable for any
                // trace that reaches codegen with a non-constant `Mod`.
                unreachable!("Mod must be constant-folded or strength-reduced away before codegen")
            }
            IrOp::Neg(a) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                fp_result(asm, alloc, r, |asm, dst| asm.neg_f64(dst, av));
            }
            IrOp::Lt(a, b) | IrOp::Le(a, b) | IrOp::Gt(a, b) | IrOp::Ge(a, b) | IrOp::Eq(a, b) | IrOp::Ne(a, b) => {
                let op = match node.op {
                    IrOp::Lt(..) => CmpOp::Lt,
                    IrOp::Le(..) => CmpOp::Le,
                    IrOp::Gt(..) => CmpOp::Gt,
                    IrOp::Ge(..) => CmpOp::Ge,
                    IrOp::Eq(..) => CmpOp::Eq,
                    _ => CmpOp::Ne,
                };
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                let bv = fp_operand(asm, alloc, buffer, b, FP_SCRATCH_B);
                gp_result(asm, alloc, r, |asm, dst| asm.compare_f64(dst, op, av, bv));
            }
            IrOp::And(a, b) => {
                // Only ever produced by strength-reducing a power-of-two Mod,
                // whose mask operand is always a resolved ConstantInt.
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                let mask = match buffer.get(resolve(buffer, b)).op {
                    IrOp::ConstantInt(n) => n,
                    _ => unreachable!("And's mask operand must be a resolved ConstantInt by the time it reaches codegen"),
                };
                gp_result(asm, alloc, r, |asm, dst| asm.and_gp_imm(dst, av, mask));
            }
            IrOp::Or(..) | IrOp::Xor(..) | IrOp::Not(..) => {
                unreachable!("Or/Xor/Not are not produced by any pass that reaches codegen yet")
            }
            IrOp::Shl(a, b) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                let shift = match buffer.get(resolve(buffer, b)).op {
                    IrOp::ConstantInt(n) => n as u8,
                    _ => unreachable!("Shl's shift amount must be a resolved ConstantInt by the time it reaches codegen"),
                };
                gp_result(asm, alloc, r, |asm, dst| asm.shl_gp_imm(dst, av, shift));
            }
            IrOp::Sar(..) => unreachable!("Sar is not produced by any pass that reaches codegen yet"),
            IrOp::NumberToInt(a) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.int_from_number(dst, av));
            }
            IrOp::IntToNumber(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                fp_result(asm, alloc, r, |asm, dst| asm.number_from_int(dst, av));
            }
            IrOp::Call { .. } => unreachable!("Call is never produced by the recorder; no trace reaching codegen should contain one"),
            IrOp::BoxNumber(a) => {
                let av = fp_operand(asm, alloc, buffer, a, FP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.box_number(dst, av));
            }
            IrOp::UnboxNumber(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                fp_result(asm, alloc, r, |asm, dst| asm.unbox_number(dst, av));
            }
            IrOp::BoxBool(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.box_bool(dst, av));
            }
            IrOp::UnboxBool(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.unbox_bool(dst, av));
            }
            IrOp::BoxObject(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.box_object(dst, av));
            }
            IrOp::UnboxObject(a) => {
                let av = gp_operand(asm, alloc, buffer, a, GP_SCRATCH_A);
                gp_result(asm, alloc, r, |asm, dst| asm.unbox_object(dst, av));
            }
            IrOp::GuardClass { object, class, snapshot } => {
                let restore = restore_list(buffer, snapshots, alloc, snapshot);
                let ov = gp_operand(asm, alloc, buffer, object, GP_SCRATCH_A);
                asm.guard_class(ov, class as usize, snapshot as u32, &restore)
            }
            IrOp::GuardCond { cond, expected, snapshot } => {
                let restore = restore_list(buffer, snapshots, alloc, snapshot);
                let cv = gp_operand(asm, alloc, buffer, cond, GP_SCRATCH_A);
                asm.guard_bool(cv, expected, snapshot as u32, &restore)
            }
            IrOp::LoadField { object, field } => {
                let ov = gp_operand(asm, alloc, buffer, object, GP_SCRATCH_A);
                let offset = field as i32 * 8 + FIELD_BASE_OFFSET as i32;
                gp_result(asm, alloc, r, |asm, dst| asm.load_field(dst, ov, offset));
            }
            IrOp::StoreField { object, field, value } => {
                let ov = gp_operand(asm, alloc, buffer, object, GP_SCRATCH_A);
                let vv = gp_operand(asm, alloc, buffer, value, GP_SCRATCH_B);
                let offset = field as i32 * 8 + FIELD_BASE_OFFSET as i32;
                asm.store_field(ov, offset, vv);
            }
            IrOp::LoadGlobal { slot } => gp_result(asm, alloc, r, |asm, dst| asm.load_global(dst, slot as i32 * 8)),
            IrOp::StoreGlobal { slot, value } => {
                let vv = gp_operand(asm, alloc, buffer, value, GP_SCRATCH_A);
                asm.store_global(slot as i32 * 8, vv);
            }
        }
    };

    for (r, _) in buffer.iter() {
        if ctx.hoisted.contains(&r) {
            emit_one(&mut asm, r);
        }
    }

    let phis = collect_phis(buffer);
    for phi in &phis {
        emit_phi_copy(&mut asm, alloc, buffer, phi, phi.entry);
    }

    asm.mark_loop_header();
    for (r, _) in buffer.iter() {
        if !ctx.hoisted.contains(&r) {
            emit_one(&mut asm, r);
        }
    }
    for phi in &phis {
        emit_phi_copy(&mut asm, alloc, buffer, phi, phi.back_edge);
    }
    asm.jump_to_loop_header();

    let _ = (snapshots, CLASS_PTR_OFFSET);
    asm
}
