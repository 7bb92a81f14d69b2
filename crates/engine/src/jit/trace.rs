//! A single compiled, cached trace.

use crate::jit::codegen::ExecutableTrace;
use crate::jit::ir::SnapshotTable;
use crate::vm::bytecode::Pc;

/// One compiled trace: native code plus the snapshot table its guards refer
/// to by index (the `exit_code` a guard returns is a `SnapshotId`).
pub struct CompiledTrace {
    pub anchor_pc: Pc,
    pub func_index: usize,
    pub code: ExecutableTrace,
    pub snapshots: SnapshotTable,
}

impl CompiledTrace {
    pub fn new(anchor_pc: Pc, func_index: usize, code: ExecutableTrace, snapshots: SnapshotTable) -> Self {
        CompiledTrace { anchor_pc, func_index, code, snapshots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::codegen::{Assembler, X64Assembler};

    #[test]
    fn new_carries_its_anchor_and_function_index_through_unchanged() {
        let mut asm = X64Assembler::new();
        asm.prologue(0);
        let code = asm.finalize();
        let trace = CompiledTrace::new(42, 3, code, SnapshotTable::new());
        assert_eq!(trace.anchor_pc, 42);
        assert_eq!(trace.func_index, 3);
        assert_eq!(trace.snapshots.len(), 0);
    }
}
