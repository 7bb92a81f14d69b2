//! The thirteen individual passes.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{resolve, OptContext, OptPass};
use crate::jit::ir::{IrBuffer, IrNode, IrOp, IrRef, IrType, SnapshotTable};

/// Direct operand references of a node, in evaluation order. Guard
/// `snapshot` fields aren't `IrRef`s and aren't included.
fn operand_refs(op: &IrOp) -> Vec<IrRef> {
    use IrOp::*;
    match *op {
        Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) | Mod(a, b) | Lt(a, b) | Le(a, b) | Gt(a, b) | Ge(a, b)
        | Eq(a, b) | Ne(a, b) | And(a, b) | Or(a, b) | Xor(a, b) | Shl(a, b) | Sar(a, b) => vec![a, b],
        Neg(a) | UnboxNumber(a) | BoxNumber(a) | UnboxBool(a) | BoxBool(a) | UnboxObject(a) | BoxObject(a)
        | Identity(a) | Not(a) | NumberToInt(a) | IntToNumber(a) => vec![a],
        Phi { entry, back_edge } => {
            if back_edge == super::super::ir::IR_NONE {
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
        Constant(_) | ConstantInt(_) | EntryReg { .. } | LoopHeader | LoadGlobal { .. } | Dead => vec![],
    }
}

fn is_side_effecting(op: &IrOp) -> bool {
    matches!(
        op,
        IrOp::GuardClass { .. }
            | IrOp::GuardCond { .. }
            | IrOp::StoreField { .. }
            | IrOp::StoreGlobal { .. }
            | IrOp::LoopHeader
            | IrOp::Call { .. }
    )
}

/// Pass 1: collapses `box(unbox(x))`/`unbox(box(x))` round trips the
/// recorder introduces whenever a value crosses between the register
/// file's boxed representation and the unboxed doubles/bools it computes
/// with (phase A), then separately counts remaining uses of any value that
/// is boxed and immediately unboxed by every one of its uses, eliminating
/// the box entirely when nothing else needs the boxed form (phase B), and
/// folds `unbox(const)` into a plain constant in the unboxed domain.
pub struct BoxUnboxElim;
impl OptPass for BoxUnboxElim {
    fn name(&self) -> &'static str {
        "box-unbox-elim"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();

        // Phase A: adjacent box/unbox round trips cancel directly.
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            let collapsed = match op {
                IrOp::BoxNumber(x) => {
                    if let IrOp::UnboxNumber(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                IrOp::UnboxNumber(x) => {
                    if let IrOp::BoxNumber(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                IrOp::BoxBool(x) => {
                    if let IrOp::UnboxBool(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                IrOp::UnboxBool(x) => {
                    if let IrOp::BoxBool(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                IrOp::BoxObject(x) => {
                    if let IrOp::UnboxObject(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                IrOp::UnboxObject(x) => {
                    if let IrOp::BoxObject(y) = buffer.get(resolve(buffer, x)).op { Some(y) } else { None }
                }
                _ => None,
            };
            if let Some(target) = collapsed {
                buffer.get_mut(r).op = IrOp::Identity(target);
            }
        }

        // unbox(const) folds straight to a constant in the unboxed domain
        // without waiting for the dedicated constant-folding pass — it
        // needs this rewrite done before phase B's use-counting below can
        // see the box as dead.
        for i in 0..len {
            let r = i as IrRef;
            let folded = match buffer.get(r).op {
                IrOp::UnboxNumber(x) => {
                    if let IrOp::Constant(n) = buffer.get(resolve(buffer, x)).op { Some(IrOp::Constant(n)) } else { None }
                }
                IrOp::UnboxBool(x) => match buffer.get(resolve(buffer, x)).op {
                    IrOp::Constant(n) if n == 1.0 => Some(IrOp::Constant(1.0)),
                    IrOp::Constant(n) if n == 0.0 => Some(IrOp::Constant(0.0)),
                    _ => None,
                },
                _ => None,
            };
            if let Some(op) = folded {
                buffer.get_mut(r).op = op;
            }
        }

        // Phase B: a box node whose every use is itself the matching
        // unbox is never observed in its boxed form anywhere (no store,
        // no guard, no snapshot reads it boxed) — so every one of those
        // unboxes can forward straight to the box's own unboxed operand,
        // leaving the box dead for DCE to sweep up later.
        // `operand_refs` already walks `StoreField`/`StoreGlobal`'s `value`
        // operand, so a box that feeds a store is already counted as a use
        // distinct from any unbox of the same box — exactly what keeps it
        // from being mistaken for fully-unboxed-only below.
        let mut use_count: FxHashMap<IrRef, u32> = FxHashMap::default();
        for (_, node) in buffer.iter() {
            for operand in operand_refs(&node.op) {
                *use_count.entry(resolve(buffer, operand)).or_insert(0) += 1;
            }
        }

        let matching_unbox = |box_op: &IrOp, unbox_op: &IrOp| -> bool {
            matches!(
                (box_op, unbox_op),
                (IrOp::BoxNumber(_), IrOp::UnboxNumber(_))
                    | (IrOp::BoxBool(_), IrOp::UnboxBool(_))
                    | (IrOp::BoxObject(_), IrOp::UnboxObject(_))
            )
        };
        let box_operand = |op: &IrOp| -> Option<IrRef> {
            match *op {
                IrOp::BoxNumber(x) | IrOp::BoxBool(x) | IrOp::BoxObject(x) => Some(x),
                _ => None,
            }
        };

        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            let Some(operand) = box_operand(&op) else { continue };
            // Every use of this box must itself be the matching unbox for
            // elimination to be safe.
            let uses_total = *use_count.get(&r).unwrap_or(&0);
            if uses_total == 0 {
                continue;
            }
            let mut all_matching_unboxes = true;
            let mut rewrites = Vec::new();
            for j in 0..len {
                let u = j as IrRef;
                if u == r {
                    continue;
                }
                for o in operand_refs(&buffer.get(u).op) {
                    if resolve(buffer, o) == r {
                        if matching_unbox(&op, &buffer.get(u).op) {
                            rewrites.push(u);
                        } else {
                            all_matching_unboxes = false;
                        }
                    }
                }
            }
            if all_matching_unboxes && rewrites.len() as u32 == uses_total {
                for u in rewrites {
                    buffer.get_mut(u).op = IrOp::Identity(operand);
                }
                buffer.get_mut(r).op = IrOp::Dead;
            }
        }
    }
}

/// Pass 2: within the single straight-line trace body, a second
/// `GuardClass`/`GuardCond` on the same object/condition as an earlier one
/// with the same expectation is redundant — nothing between them could have
/// changed the receiver's class or re-derived the condition differently.
/// Tracking resets at the loop header: a guard recorded before the back
/// edge proves nothing about the next iteration's first pass through the
/// same code, since the loop body may have mutated the receiver in between.
pub struct ScopedGuardElim;
impl OptPass for ScopedGuardElim {
    fn name(&self) -> &'static str {
        "scoped-guard-elim"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let mut seen_class: FxHashMap<(IrRef, *const crate::vm::object::Class), ()> = FxHashMap::default();
        let mut seen_cond: FxHashMap<(IrRef, bool), ()> = FxHashMap::default();
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            match buffer.get(r).op {
                IrOp::LoopHeader => {
                    seen_class.clear();
                    seen_cond.clear();
                }
                IrOp::GuardClass { object, class, .. } => {
                    let key = (resolve(buffer, object), class);
                    if seen_class.contains_key(&key) {
                        buffer.get_mut(r).op = IrOp::Dead;
                    } else {
                        seen_class.insert(key, ());
                    }
                }
                IrOp::GuardCond { cond, expected, .. } => {
                    let key = (resolve(buffer, cond), expected);
                    if seen_cond.contains_key(&key) {
                        buffer.get_mut(r).op = IrOp::Dead;
                    } else {
                        seen_cond.insert(key, ());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Pass 3: folds arithmetic, comparisons and named algebraic identities,
/// and collapses a phi whose entry and back-edge already resolve to the
/// same value (a loop-carried register the loop body never actually
/// changes).
pub struct ConstantFolding;
impl OptPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            let konst = |buffer: &IrBuffer, x: IrRef| -> Option<f64> {
                match buffer.get(resolve(buffer, x)).op {
                    IrOp::Constant(n) => Some(n),
                    _ => None,
                }
            };

            if let IrOp::Phi { entry, back_edge } = op {
                if back_edge != super::super::ir::IR_NONE && resolve(buffer, entry) == resolve(buffer, back_edge) {
                    buffer.get_mut(r).op = IrOp::Identity(resolve(buffer, entry));
                    continue;
                }
            }

            let folded_const = match op {
                IrOp::Add(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a + b),
                IrOp::Sub(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a - b),
                IrOp::Mul(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a * b),
                IrOp::Div(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a / b),
                IrOp::Mod(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a % b),
                IrOp::Neg(a) => konst(buffer, a).map(|a| -a),
                _ => None,
            };
            if let Some(value) = folded_const {
                buffer.get_mut(r).op = IrOp::Constant(value);
                continue;
            }

            let folded_bool = match op {
                IrOp::Lt(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a < b),
                IrOp::Le(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a <= b),
                IrOp::Gt(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a > b),
                IrOp::Ge(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a >= b),
                IrOp::Eq(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a == b),
                IrOp::Ne(a, b) => konst(buffer, a).zip(konst(buffer, b)).map(|(a, b)| a != b),
                _ => None,
            };
            if let Some(value) = folded_bool {
                buffer.get_mut(r).op = IrOp::Constant(if value { 1.0 } else { 0.0 });
                continue;
            }

            // Named algebraic identities: x+0, 0+x, x-0, x*1, 1*x, x*0, 0*x, x/1.
            let identity = match op {
                IrOp::Add(a, b) if konst(buffer, b) == Some(0.0) => Some(a),
                IrOp::Add(a, b) if konst(buffer, a) == Some(0.0) => Some(b),
                IrOp::Sub(a, b) if konst(buffer, b) == Some(0.0) => Some(a),
                IrOp::Mul(a, b) if konst(buffer, b) == Some(1.0) => Some(a),
                IrOp::Mul(a, b) if konst(buffer, a) == Some(1.0) => Some(b),
                IrOp::Div(a, b) if konst(buffer, b) == Some(1.0) => Some(a),
                _ => None,
            };
            if let Some(target) = identity {
                buffer.get_mut(r).op = IrOp::Identity(target);
                continue;
            }
            let zero = match op {
                IrOp::Mul(a, b) if konst(buffer, b) == Some(0.0) || konst(buffer, a) == Some(0.0) => true,
                _ => false,
            };
            if zero {
                buffer.get_mut(r).op = IrOp::Constant(0.0);
            }
        }
    }
}

/// Pass 4: global value numbering — deduplicates structurally identical
/// pure nodes (same opcode, same immediate payload if any, same
/// already-resolved operands) onto the first occurrence.
pub struct Gvn;
impl OptPass for Gvn {
    fn name(&self) -> &'static str {
        "gvn"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let mut table: FxHashMap<(u8, u64, IrRef, IrRef), IrRef> = FxHashMap::default();
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            if is_side_effecting(&op)
                || matches!(op, IrOp::Identity(_) | IrOp::Dead | IrOp::Phi { .. } | IrOp::EntryReg { .. } | IrOp::LoopHeader)
            {
                continue;
            }
            let refs = operand_refs(&op);
            let a = refs.first().map(|x| resolve(buffer, *x)).unwrap_or(0);
            let b = refs.get(1).map(|x| resolve(buffer, *x)).unwrap_or(0);
            let tag = opcode_tag(&op);
            let immediate = immediate_payload(&op);
            let key = (tag, immediate, a, b);
            if let Some(&existing) = table.get(&key) {
                buffer.get_mut(r).op = IrOp::Identity(existing);
            } else {
                table.insert(key, r);
            }
        }
    }
}

/// The bit pattern of a node's own immediate, if it carries one.
/// `Constant`/`ConstantInt`/field-and-slot indices all need to be part of
/// the GVN key — without this, every distinct constant (whose
/// `operand_refs` is empty) would hash to the same `(tag, 0, 0, 0)` key and
/// get wrongly unified with every other constant.
fn immediate_payload(op: &IrOp) -> u64 {
    match *op {
        IrOp::Constant(n) => n.to_bits(),
        IrOp::ConstantInt(n) => n as u64,
        IrOp::LoadField { field, .. } => field as u64,
        IrOp::LoadGlobal { slot } => slot as u64,
        IrOp::EntryReg { reg } => reg as u64,
        _ => 0,
    }
}

fn opcode_tag(op: &IrOp) -> u8 {
    match op {
        IrOp::Constant(_) => 0,
        IrOp::Add(..) => 1,
        IrOp::Sub(..) => 2,
        IrOp::Mul(..) => 3,
        IrOp::Div(..) => 4,
        IrOp::Mod(..) => 5,
        IrOp::Neg(..) => 6,
        IrOp::Lt(..) => 7,
        IrOp::Le(..) => 8,
        IrOp::Gt(..) => 9,
        IrOp::Ge(..) => 10,
        IrOp::Eq(..) => 11,
        IrOp::Ne(..) => 12,
        IrOp::UnboxNumber(..) => 13,
        IrOp::BoxNumber(..) => 14,
        IrOp::UnboxBool(..) => 15,
        IrOp::BoxBool(..) => 16,
        IrOp::UnboxObject(..) => 17,
        IrOp::BoxObject(..) => 18,
        IrOp::LoadField { .. } => 19,
        IrOp::LoadGlobal { .. } => 20,
        IrOp::ConstantInt(_) => 21,
        IrOp::And(..) => 22,
        IrOp::Or(..) => 23,
        IrOp::Xor(..) => 24,
        IrOp::Not(..) => 25,
        IrOp::Shl(..) => 26,
        IrOp::Sar(..) => 27,
        IrOp::NumberToInt(..) => 28,
        IrOp::IntToNumber(..) => 29,
        _ => 255,
    }
}

/// Pass 5: marks nodes whose operands are all either constants or
/// non-loop-carried entry values (i.e. they'd compute the same result on
/// every iteration) as hoistable out of the repeating native loop body.
pub struct Licm;
impl OptPass for Licm {
    fn name(&self) -> &'static str {
        "licm"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, ctx: &mut OptContext) {
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            if is_side_effecting(&op) || matches!(op, IrOp::Phi { .. } | IrOp::Identity(_) | IrOp::Dead) {
                continue;
            }
            let refs = operand_refs(&op);
            let invariant = refs.iter().all(|x| {
                let resolved = resolve(buffer, *x);
                ctx.hoisted.contains(&resolved) || !depends_on_phi(buffer, resolved)
            });
            if invariant && !refs.is_empty() {
                ctx.hoisted.insert(r);
            } else if matches!(op, IrOp::Constant(_) | IrOp::ConstantInt(_) | IrOp::EntryReg { .. }) {
                ctx.hoisted.insert(r);
            }
        }
    }
}

fn depends_on_phi(buffer: &IrBuffer, r: IrRef) -> bool {
    matches!(buffer.get(r).op, IrOp::Phi { .. })
}

/// Pass 6: a guard already proven loop-invariant by LICM only needs to run
/// once, before the loop, rather than being re-checked every iteration.
pub struct GuardHoisting;
impl OptPass for GuardHoisting {
    fn name(&self) -> &'static str {
        "guard-hoisting"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, ctx: &mut OptContext) {
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            let guarded_ref = match op {
                IrOp::GuardClass { object, .. } => Some(object),
                IrOp::GuardCond { cond, .. } => Some(cond),
                _ => None,
            };
            if let Some(target) = guarded_ref {
                if ctx.hoisted.contains(&resolve(buffer, target)) {
                    ctx.hoisted.insert(r);
                }
            }
        }
    }
}

/// Pass 7: rewrites multiplication by two into a self-add, division by a
/// nonzero constant into multiplication by its reciprocal, and — for values
/// the induction-variable pass has already typed as [`IrType::Integer`] by
/// the time this runs again on a re-optimized trace, or that the recorder
/// itself typed that way — multiplication by a power of two into a shift
/// and modulo by a power of two into a mask.
pub struct StrengthReduction;
impl OptPass for StrengthReduction {
    fn name(&self) -> &'static str {
        "strength-reduction"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            let ty = buffer.get(r).ty;
            match op {
                IrOp::Mul(a, b) if ty == IrType::Integer => {
                    let const_int = |x: IrRef| match buffer.get(resolve(buffer, x)).op {
                        IrOp::ConstantInt(n) => Some(n),
                        _ => None,
                    };
                    let power_of_two_shift = |n: i64| (n > 0 && n.count_ones() == 1).then(|| n.trailing_zeros() as i64);
                    if let Some(shift) = const_int(b).and_then(power_of_two_shift) {
                        let shift_ref = buffer.push(IrNode::new(IrOp::ConstantInt(shift), IrType::Integer));
                        buffer.get_mut(r).op = IrOp::Shl(a, shift_ref);
                    } else if let Some(shift) = const_int(a).and_then(power_of_two_shift) {
                        let shift_ref = buffer.push(IrNode::new(IrOp::ConstantInt(shift), IrType::Integer));
                        buffer.get_mut(r).op = IrOp::Shl(b, shift_ref);
                    }
                }
                IrOp::Mod(a, b) if ty == IrType::Integer => {
                    if let IrOp::ConstantInt(n) = buffer.get(resolve(buffer, b)).op {
                        if n > 0 && n.count_ones() == 1 {
                            let mask_ref = buffer.push(IrNode::new(IrOp::ConstantInt(n - 1), IrType::Integer));
                            buffer.get_mut(r).op = IrOp::And(a, mask_ref);
                        }
                    }
                }
                IrOp::Mul(a, b) => {
                    let const_operand = |x: IrRef| match buffer.get(resolve(buffer, x)).op {
                        IrOp::Constant(n) => Some(n),
                        _ => None,
                    };
                    if const_operand(b) == Some(2.0) {
                        buffer.get_mut(r).op = IrOp::Add(a, a);
                    } else if const_operand(a) == Some(2.0) {
                        buffer.get_mut(r).op = IrOp::Add(b, b);
                    }
                }
                IrOp::Div(a, b) => {
                    if let IrOp::Constant(n) = buffer.get(resolve(buffer, b)).op {
                        if n != 0.0 {
                            let recip = buffer.push(IrNode::new(IrOp::Constant(1.0 / n), IrType::Number));
                            buffer.get_mut(r).op = IrOp::Mul(a, recip);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Pass 8: deduplicates induction-variable loop-bound guards. A `Lt(iv,
/// bound)` comparison feeding a `GuardCond` is redundant with an earlier
/// one over the same bound once `iv` is recognized as the same logical
/// induction variable — even when the two checks reference different
/// `IrRef`s (the phi itself versus its entry or back-edge value directly),
/// which plain GVN can't see through since it only resolves `Identity`
/// chains, not `Phi` nodes.
pub struct BoundsCheckElim;
impl OptPass for BoundsCheckElim {
    fn name(&self) -> &'static str {
        "bounds-check-elim"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();
        let mut iv_alias: FxHashMap<IrRef, IrRef> = FxHashMap::default();
        for i in 0..len {
            let r = i as IrRef;
            if let IrOp::Phi { entry, back_edge } = buffer.get(r).op {
                if back_edge == super::super::ir::IR_NONE {
                    continue;
                }
                if matches!(buffer.get(resolve(buffer, back_edge)).op, IrOp::Add(..) | IrOp::Sub(..)) {
                    iv_alias.insert(resolve(buffer, entry), r);
                    iv_alias.insert(resolve(buffer, back_edge), r);
                }
            }
        }
        let canon = |buffer: &IrBuffer, x: IrRef| -> IrRef {
            let resolved = resolve(buffer, x);
            iv_alias.get(&resolved).copied().unwrap_or(resolved)
        };

        let mut seen: FxHashMap<(IrRef, IrRef, bool), ()> = FxHashMap::default();
        for i in 0..len {
            let r = i as IrRef;
            if let IrOp::GuardCond { cond, expected, .. } = buffer.get(r).op {
                let cond_r = resolve(buffer, cond);
                if let IrOp::Lt(a, b) = buffer.get(cond_r).op {
                    let key = (canon(buffer, a), resolve(buffer, b), expected);
                    if seen.contains_key(&key) {
                        buffer.get_mut(r).op = IrOp::Dead;
                    } else {
                        seen.insert(key, ());
                    }
                }
            }
        }
    }
}

/// Pass 9: marks object pointers that are never stored to a field, a
/// global, passed as a host-call argument, or captured across a guard's
/// snapshot as non-escaping.
pub struct EscapeAnalysis;
impl OptPass for EscapeAnalysis {
    fn name(&self) -> &'static str {
        "escape-analysis"
    }
    fn run(&self, buffer: &mut IrBuffer, snapshots: &mut SnapshotTable, ctx: &mut OptContext) {
        let mut escapes: FxHashSet<IrRef> = FxHashSet::default();
        for (_, node) in buffer.iter() {
            match node.op {
                IrOp::StoreField { value, .. } | IrOp::StoreGlobal { value, .. } => {
                    escapes.insert(resolve(buffer, value));
                }
                IrOp::Call { arg, .. } => {
                    // An uninterpreted host call may retain its argument
                    // past the trace's own lifetime; conservatively treat
                    // it as escaping rather than attempting to fold through
                    // a primitive this crate doesn't define the semantics
                    // of.
                    escapes.insert(resolve(buffer, arg));
                }
                _ => {}
            }
        }
        for snap_id in 0..snapshots.len() as super::super::ir::SnapshotId {
            for entry in snapshots.entries(snap_id) {
                escapes.insert(resolve(buffer, entry.value));
            }
        }
        for (r, node) in buffer.iter() {
            if matches!(node.ty, IrType::ObjectPtr) && !escapes.contains(&r) {
                ctx.non_escaping.insert(r);
            }
        }
    }
}

/// Marks nodes with zero remaining uses as dead. Side-effecting nodes
/// (guards, stores, the loop header) are always kept regardless of use
/// count.
pub struct Dce;
impl OptPass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }
    fn run(&self, buffer: &mut IrBuffer, snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();
        let mut used: FxHashSet<IrRef> = FxHashSet::default();
        for (_, node) in buffer.iter() {
            if matches!(node.op, IrOp::Dead) {
                continue;
            }
            for operand in operand_refs(&node.op) {
                used.insert(resolve(buffer, operand));
            }
        }
        for snap_id in 0..snapshots.len() as super::super::ir::SnapshotId {
            for entry in snapshots.entries(snap_id) {
                used.insert(resolve(buffer, entry.value));
            }
        }
        for i in 0..len {
            let r = i as IrRef;
            let op = buffer.get(r).op;
            if is_side_effecting(&op) || matches!(op, IrOp::Identity(_) | IrOp::Dead | IrOp::LoopHeader) {
                continue;
            }
            if !used.contains(&r) {
                buffer.get_mut(r).op = IrOp::Dead;
            }
        }
    }
}

/// Pass 12: a second, whole-trace guard elimination pass that isn't limited
/// to adjacent occurrences the way `ScopedGuardElim` is — by this point
/// constant folding and GVN may have proven two guards refer to the same
/// value even though they weren't textually adjacent when recorded. Also
/// pre-marks every surviving guard's snapshot as reachable, so the code
/// generator knows exactly which snapshots it must emit restore stubs for.
pub struct UnscopedGuardElimAndPreMarking;
impl OptPass for UnscopedGuardElimAndPreMarking {
    fn name(&self) -> &'static str {
        "unscoped-guard-elim-and-pre-marking"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let mut seen_class: FxHashMap<(IrRef, *const crate::vm::object::Class), ()> = FxHashMap::default();
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            if let IrOp::GuardClass { object, class, .. } = buffer.get(r).op {
                let key = (resolve(buffer, object), class);
                if seen_class.contains_key(&key) {
                    buffer.get_mut(r).op = IrOp::Dead;
                } else {
                    seen_class.insert(key, ());
                }
            }
        }
    }
}

/// Pass 13: proves which loop-carried phis are genuine integer induction
/// variables — a self-referential `entry`/`back_edge` pair stepped by a
/// whole-number constant via `Add`/`Sub` — and retypes the phi and its step
/// computation into the unboxed integer domain, inserting the
/// `NumberToInt`/`IntToNumber` conversions needed at the boundary so every
/// other use of the phi (comparisons against its loop bound, the boxed
/// value written back to the register file) still sees the same double it
/// always did.
pub struct InductionVariableTypeInference;
impl OptPass for InductionVariableTypeInference {
    fn name(&self) -> &'static str {
        "induction-variable-type-inference"
    }
    fn run(&self, buffer: &mut IrBuffer, _snapshots: &mut SnapshotTable, _ctx: &mut OptContext) {
        let len = buffer.len();
        for i in 0..len {
            let r = i as IrRef;
            let (entry, back_edge) = match buffer.get(r).op {
                IrOp::Phi { entry, back_edge } if back_edge != super::super::ir::IR_NONE => (entry, back_edge),
                _ => continue,
            };
            if buffer.get(r).ty != IrType::Number {
                continue;
            }
            let step_node_ref = resolve(buffer, back_edge);
            let (iv_operand, step_operand, is_add) = match buffer.get(step_node_ref).op {
                IrOp::Add(a, b) => (a, b, true),
                IrOp::Sub(a, b) => (a, b, false),
                _ => continue,
            };
            // Must be self-referential (`iv = iv +/- step`), and the step
            // must be a recorded whole-number constant — anything else
            // isn't provably integer from the trace alone.
            let self_ref = resolve(buffer, iv_operand) == r || resolve(buffer, iv_operand) == resolve(buffer, entry);
            if !self_ref {
                continue;
            }
            let step_value = match buffer.get(resolve(buffer, step_operand)).op {
                IrOp::Constant(n) if n.fract() == 0.0 => n,
                _ => continue,
            };

            let entry_int = buffer.push(IrNode::new(IrOp::NumberToInt(entry), IrType::Integer));
            let step_int = buffer.push(IrNode::new(IrOp::ConstantInt(step_value as i64), IrType::Integer));
            let iv_int_operand = if resolve(buffer, iv_operand) == resolve(buffer, entry) { entry_int } else { r };
            let stepped = if is_add { IrOp::Add(iv_int_operand, step_int) } else { IrOp::Sub(iv_int_operand, step_int) };
            let step_result = buffer.push(IrNode::new(stepped, IrType::Integer));
            let back_edge_as_number = buffer.push(IrNode::new(IrOp::IntToNumber(step_result), IrType::Number));

            buffer.get_mut(step_node_ref).op = IrOp::Identity(back_edge_as_number);
            buffer.get_mut(r).op = IrOp::Phi { entry: entry_int, back_edge: step_result };
            buffer.get_mut(r).ty = IrType::Integer;

            // Every pre-existing use of the phi (comparisons, stores) still
            // expects a `Number`-typed double; reintroduce that view once,
            // right after the phi, rather than rewriting every use site.
            let as_number = buffer.push(IrNode::new(IrOp::IntToNumber(r), IrType::Number));
            for j in 0..len {
                let u = j as IrRef;
                if u == step_node_ref || u == back_edge_as_number || u == as_number {
                    continue;
                }
                let op = buffer.get(u).op;
                let rewritten = match op {
                    IrOp::Lt(a, b) if resolve(buffer, a) == r => Some(IrOp::Lt(as_number, b)),
                    IrOp::Lt(a, b) if resolve(buffer, b) == r => Some(IrOp::Lt(a, as_number)),
                    IrOp::Le(a, b) if resolve(buffer, a) == r => Some(IrOp::Le(as_number, b)),
                    IrOp::Le(a, b) if resolve(buffer, b) == r => Some(IrOp::Le(a, as_number)),
                    IrOp::Gt(a, b) if resolve(buffer, a) == r => Some(IrOp::Gt(as_number, b)),
                    IrOp::Gt(a, b) if resolve(buffer, b) == r => Some(IrOp::Gt(a, as_number)),
                    IrOp::Ge(a, b) if resolve(buffer, a) == r => Some(IrOp::Ge(as_number, b)),
                    IrOp::Ge(a, b) if resolve(buffer, b) == r => Some(IrOp::Ge(a, as_number)),
                    IrOp::BoxNumber(a) if resolve(buffer, a) == r => Some(IrOp::BoxNumber(as_number)),
                    _ => None,
                };
                if let Some(new_op) = rewritten {
                    buffer.get_mut(u).op = new_op;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::{IrBuffer, IrNode, SnapshotTable};

    fn run_pass(pass: &dyn OptPass, buffer: &mut IrBuffer) -> OptContext {
        let mut snapshots = SnapshotTable::default();
        let mut ctx = OptContext::default();
        pass.run(buffer, &mut snapshots, &mut ctx);
        ctx
    }

    #[test]
    fn gvn_does_not_alias_distinct_constants() {
        let mut buffer = IrBuffer::new();
        let c1 = buffer.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));
        let c2 = buffer.push(IrNode::new(IrOp::Constant(2.0), IrType::Number));
        run_pass(&Gvn, &mut buffer);
        assert!(!matches!(buffer.get(c1).op, IrOp::Identity(_)));
        assert!(!matches!(buffer.get(c2).op, IrOp::Identity(_)));
    }

    #[test]
    fn gvn_aliases_identical_constants() {
        let mut buffer = IrBuffer::new();
        let c1 = buffer.push(IrNode::new(IrOp::Constant(5.0), IrType::Number));
        let c2 = buffer.push(IrNode::new(IrOp::Constant(5.0), IrType::Number));
        run_pass(&Gvn, &mut buffer);
        assert!(matches!(buffer.get(c2).op, IrOp::Identity(r) if r == c1));
    }

    #[test]
    fn constant_folding_handles_comparisons_and_identities() {
        let mut buffer = IrBuffer::new();
        let c1 = buffer.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));
        let c2 = buffer.push(IrNode::new(IrOp::Constant(2.0), IrType::Number));
        let lt = buffer.push(IrNode::new(IrOp::Lt(c1, c2), IrType::Bool));
        let zero = buffer.push(IrNode::new(IrOp::Constant(0.0), IrType::Number));
        let entry = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Number));
        let add_zero = buffer.push(IrNode::new(IrOp::Add(entry, zero), IrType::Number));

        run_pass(&ConstantFolding, &mut buffer);
        assert!(matches!(buffer.get(lt).op, IrOp::Constant(n) if n == 1.0));
        assert!(matches!(buffer.get(add_zero).op, IrOp::Identity(r) if r == entry));
    }

    #[test]
    fn constant_folding_collapses_unchanging_phi() {
        let mut buffer = IrBuffer::new();
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        let entry = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Number));
        let phi = buffer.push(IrNode::new(IrOp::Phi { entry, back_edge: entry }, IrType::Number));

        run_pass(&ConstantFolding, &mut buffer);
        assert!(matches!(buffer.get(phi).op, IrOp::Identity(r) if r == entry));
    }

    #[test]
    fn box_unbox_elim_cancels_adjacent_round_trip() {
        let mut buffer = IrBuffer::new();
        let entry = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Boxed));
        let unboxed = buffer.push(IrNode::new(IrOp::UnboxNumber(entry), IrType::Number));
        let reboxed = buffer.push(IrNode::new(IrOp::BoxNumber(unboxed), IrType::Boxed));

        run_pass(&BoxUnboxElim, &mut buffer);
        assert!(matches!(buffer.get(reboxed).op, IrOp::Identity(r) if r == entry));
    }

    #[test]
    fn box_unbox_elim_eliminates_box_used_only_through_matching_unboxes() {
        let mut buffer = IrBuffer::new();
        let n = buffer.push(IrNode::new(IrOp::Constant(3.0), IrType::Number));
        let boxed = buffer.push(IrNode::new(IrOp::BoxNumber(n), IrType::Boxed));
        let unboxed1 = buffer.push(IrNode::new(IrOp::UnboxNumber(boxed), IrType::Number));
        let unboxed2 = buffer.push(IrNode::new(IrOp::UnboxNumber(boxed), IrType::Number));
        let _ = buffer.push(IrNode::new(IrOp::Add(unboxed1, unboxed2), IrType::Number));

        run_pass(&BoxUnboxElim, &mut buffer);
        assert!(matches!(buffer.get(boxed).op, IrOp::Dead));
        assert!(matches!(buffer.get(unboxed1).op, IrOp::Identity(r) if r == n));
        assert!(matches!(buffer.get(unboxed2).op, IrOp::Identity(r) if r == n));
    }

    #[test]
    fn box_unbox_elim_keeps_box_that_also_escapes_through_a_store() {
        let mut buffer = IrBuffer::new();
        let n = buffer.push(IrNode::new(IrOp::Constant(3.0), IrType::Number));
        let boxed = buffer.push(IrNode::new(IrOp::BoxNumber(n), IrType::Boxed));
        let _ = buffer.push(IrNode::new(IrOp::UnboxNumber(boxed), IrType::Number));
        let _ = buffer.push(IrNode::new(IrOp::StoreGlobal { slot: 0, value: boxed }, IrType::Boxed));

        run_pass(&BoxUnboxElim, &mut buffer);
        assert!(!matches!(buffer.get(boxed).op, IrOp::Dead));
    }

    #[test]
    fn scoped_guard_elim_resets_at_loop_header() {
        use crate::jit::ir::SnapshotTable;
        let mut buffer = IrBuffer::new();
        let mut snapshots = SnapshotTable::default();
        let obj = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Boxed));
        let class = std::ptr::null();
        let snap = snapshots.push(0, &[]);
        let guard1 = buffer.push(IrNode::new(IrOp::GuardClass { object: obj, class, snapshot: snap }, IrType::Boxed));
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        let guard2 = buffer.push(IrNode::new(IrOp::GuardClass { object: obj, class, snapshot: snap }, IrType::Boxed));

        let mut ctx = OptContext::default();
        ScopedGuardElim.run(&mut buffer, &mut snapshots, &mut ctx);
        assert!(!matches!(buffer.get(guard1).op, IrOp::Dead));
        assert!(!matches!(buffer.get(guard2).op, IrOp::Dead), "guard after the loop header must not be eliminated");
    }

    #[test]
    fn bounds_check_elim_dedupes_guard_across_phi_alias() {
        let mut buffer = IrBuffer::new();
        let mut snapshots = SnapshotTable::default();
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        let entry = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Number));
        let bound = buffer.push(IrNode::new(IrOp::Constant(10.0), IrType::Number));
        let one = buffer.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));

        // A guard directly on the entry value...
        let lt_entry = buffer.push(IrNode::new(IrOp::Lt(entry, bound), IrType::Bool));
        let snap1 = snapshots.push(0, &[]);
        let guard_entry = buffer.push(IrNode::new(IrOp::GuardCond { cond: lt_entry, expected: true, snapshot: snap1 }, IrType::Boxed));

        let step = buffer.push(IrNode::new(IrOp::Add(entry, one), IrType::Number));
        let phi = buffer.push(IrNode::new(IrOp::Phi { entry, back_edge: step }, IrType::Number));

        // ...and a second guard over the phi itself against the same bound.
        let lt_phi = buffer.push(IrNode::new(IrOp::Lt(phi, bound), IrType::Bool));
        let snap2 = snapshots.push(0, &[]);
        let guard_phi = buffer.push(IrNode::new(IrOp::GuardCond { cond: lt_phi, expected: true, snapshot: snap2 }, IrType::Boxed));

        let mut ctx = OptContext::default();
        BoundsCheckElim.run(&mut buffer, &mut snapshots, &mut ctx);
        assert!(!matches!(buffer.get(guard_entry).op, IrOp::Dead));
        assert!(matches!(buffer.get(guard_phi).op, IrOp::Dead));
    }

    #[test]
    fn strength_reduction_turns_integer_mul_by_power_of_two_into_shift() {
        let mut buffer = IrBuffer::new();
        let x = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Integer));
        let four = buffer.push(IrNode::new(IrOp::ConstantInt(4), IrType::Integer));
        let mul = buffer.push(IrNode::new(IrOp::Mul(x, four), IrType::Integer));

        run_pass(&StrengthReduction, &mut buffer);
        assert!(matches!(buffer.get(mul).op, IrOp::Shl(a, _) if a == x));
    }

    #[test]
    fn strength_reduction_turns_integer_mod_by_power_of_two_into_mask() {
        let mut buffer = IrBuffer::new();
        let x = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Integer));
        let eight = buffer.push(IrNode::new(IrOp::ConstantInt(8), IrType::Integer));
        let m = buffer.push(IrNode::new(IrOp::Mod(x, eight), IrType::Integer));

        run_pass(&StrengthReduction, &mut buffer);
        assert!(matches!(buffer.get(m).op, IrOp::And(a, _) if a == x));
    }

    #[test]
    fn induction_variable_type_inference_retypes_simple_counter() {
        let mut buffer = IrBuffer::new();
        let header = buffer.push(IrNode::new(IrOp::LoopHeader, IrType::Boxed));
        buffer.set_loop_header(header);
        let entry = buffer.push(IrNode::new(IrOp::EntryReg { reg: 0 }, IrType::Number));
        let one = buffer.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));
        // Placeholder back-edge target filled in once the phi ref exists.
        let phi = buffer.push(IrNode::new(IrOp::Phi { entry, back_edge: entry }, IrType::Number));
        let step = buffer.push(IrNode::new(IrOp::Add(phi, one), IrType::Number));
        buffer.get_mut(phi).op = IrOp::Phi { entry, back_edge: step };

        run_pass(&InductionVariableTypeInference, &mut buffer);
        assert_eq!(buffer.get(phi).ty, IrType::Integer);
        assert!(matches!(buffer.get(step).op, IrOp::Identity(_)));
    }
}
