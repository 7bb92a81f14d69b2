//! IR node shape.

/// Index of an [`IrNode`] within an [`super::IrBuffer`].
///
/// `u16` keeps a node at 16 bytes; the trace length ceiling in
/// [`crate::jit::JitConfig::max_instructions`] is always far below `u16::MAX`.
pub type IrRef = u16;

/// Coarse value kind carried alongside every node. The code generator uses
/// this to pick a register class (general-purpose vs floating point) during
/// allocation; the optimizer uses it to decide whether a box/unbox pair is
/// even necessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
    /// Unboxed `f64`.
    Number,
    /// Unboxed `bool` (a single condition-code-sized value).
    Bool,
    /// A NaN-boxed 64-bit [`Value`](crate::vm::value::Value).
    Boxed,
    /// An untyped heap pointer (post `unbox-object`).
    ObjectPtr,
    /// An unboxed `i64`, carried only by values the
    /// induction-variable-type-inference pass has proven are always
    /// whole-numbered (loop counters and their step arithmetic). A GP-class
    /// value like [`IrType::Bool`]/[`ObjectPtr`], never a boxed runtime
    /// representation of its own.
    Integer,
}

/// IR operations.
///
/// `Loop` marks the single loop-header instruction: every trace has exactly
/// one, at the index where phi nodes for loop-carried registers live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrOp {
    /// A recorded constant number.
    Constant(f64),
    /// A whole-number constant in the unboxed integer domain, produced by
    /// the induction-variable-type-inference pass rather than the recorder.
    ConstantInt(i64),

    /// Reads the boxed value of register `reg` at trace entry.
    EntryReg { reg: u8 },

    /// Marks the loop header; every loop-carried register's phi takes its
    /// "incoming" value from entry and its "back-edge" value from the
    /// bottom of the trace.
    LoopHeader,

    /// A loop-carried value: `entry` on the first iteration, `back_edge`
    /// thereafter.
    Phi { entry: IrRef, back_edge: IrRef },

    Add(IrRef, IrRef),
    Sub(IrRef, IrRef),
    Mul(IrRef, IrRef),
    Div(IrRef, IrRef),
    Mod(IrRef, IrRef),
    Neg(IrRef),

    Lt(IrRef, IrRef),
    Le(IrRef, IrRef),
    Gt(IrRef, IrRef),
    Ge(IrRef, IrRef),
    Eq(IrRef, IrRef),
    Ne(IrRef, IrRef),

    /// Bitwise AND/OR/XOR/NOT/left-shift/arithmetic-right-shift over the
    /// unboxed integer domain. Only ever operate on [`IrType::Integer`]
    /// operands; there is no bitwise view of a boxed or double value.
    And(IrRef, IrRef),
    Or(IrRef, IrRef),
    Xor(IrRef, IrRef),
    Not(IrRef),
    Shl(IrRef, IrRef),
    Sar(IrRef, IrRef),

    /// Converts a proven-integer double to the unboxed integer domain
    /// (truncating; sound here only because the value is already known to
    /// be whole-numbered).
    NumberToInt(IrRef),
    /// Converts an unboxed integer back to its double representation.
    IntToNumber(IrRef),

    /// An uninterpreted call to host primitive `callee` with one boxed
    /// argument. The recorder never emits this node today — the VM has no
    /// call instruction to lift — so it exists purely so the optimizer's
    /// type and escape analyses have a `Call` shape to reason about rather
    /// than needing a special case for "some other unknown side-effecting
    /// op." A trace containing one is not currently produced by this
    /// pipeline.
    Call { callee: u32, arg: IrRef },

    /// Narrows a boxed value to an unboxed double, guarding it really is a
    /// number first.
    UnboxNumber(IrRef),
    /// Widens an unboxed double back to a boxed value. Bit-identity with
    /// the double's own bits, per the code generator's lowering rule.
    BoxNumber(IrRef),
    /// Narrows a boxed value to an unboxed bool, guarding its tag first.
    UnboxBool(IrRef),
    /// Widens an unboxed bool to the canonical `true`/`false` bit pattern.
    BoxBool(IrRef),
    /// Narrows a boxed object value to a bare pointer, guarding the
    /// sign+quiet-NaN tag first.
    UnboxObject(IrRef),
    /// Widens a bare pointer back to a boxed object value.
    BoxObject(IrRef),

    /// Guards that `IrRef` still carries the class pointer recorded at
    /// trace time; a failed guard side-exits via the paired snapshot.
    GuardClass { object: IrRef, class: *const crate::vm::object::Class, snapshot: super::SnapshotId },
    /// Guards a boolean condition holds; fails side-exit through the paired
    /// snapshot. `expected` records which branch was taken while recording.
    GuardCond { cond: IrRef, expected: bool, snapshot: super::SnapshotId },

    LoadField { object: IrRef, field: u16 },
    StoreField { object: IrRef, field: u16, value: IrRef },

    LoadGlobal { slot: u16 },
    StoreGlobal { slot: u16, value: IrRef },

    /// Forwards every reference to this node to `IrRef` instead. Used by
    /// constant folding, GVN and the boxing-elimination pass to retarget
    /// uses without renumbering the append-only buffer.
    Identity(IrRef),

    /// Marks a node as proven to have no remaining uses; later passes skip
    /// it instead of emitting code for it.
    Dead,
}

/// One instruction in the trace's SSA form.
#[derive(Debug, Clone, Copy)]
pub struct IrNode {
    pub op: IrOp,
    pub ty: IrType,
}

impl IrNode {
    pub fn new(op: IrOp, ty: IrType) -> Self {
        IrNode { op, ty }
    }
}

// Safety note for `GuardClass`: the raw `*const Class` is only ever
// dereferenced by the code generator while the trace that recorded it is
// being compiled, under the same liveness guarantee the interpreter itself
// relies on for its own class pointers. It is never stored past that point
// without the object graph that owns it also being reachable.
unsafe impl Send for IrOp {}
unsafe impl Sync for IrOp {}
