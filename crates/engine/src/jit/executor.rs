//! Guard-driven deoptimization: restoring interpreter state after a trace
//! side-exits.

use crate::jit::trace::CompiledTrace;
use crate::vm::fiber::Fiber;

/// Repoints `pc` at the bytecode offset a guard captured and truncates the
/// fiber back to the frame depth the snapshot describes, so the interpreter
/// can safely resume exactly as if the trace had never run.
///
/// The actual register contents are not rewritten here: the compiled
/// guard that produced `exit_code` already spilled every live snapshot
/// register back into the fiber's register window (it was handed that
/// memory directly as its native argument) before returning, so by the
/// time this runs the values are already correct.
pub fn restore(fiber: &mut Fiber, trace: &CompiledTrace, exit_code: u32) {
    let snapshot_id = exit_code as crate::jit::ir::SnapshotId;
    let resume_pc = trace.snapshots.resume_pc(snapshot_id);
    let entries = trace.snapshots.entries(snapshot_id);

    let max_reg = entries.iter().map(|e| e.reg as usize).max().map(|m| m + 1).unwrap_or(0);
    fiber.truncate_to(max_reg);
    fiber.frame.pc = resume_pc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::codegen::{Assembler, X64Assembler};
    use crate::jit::ir::{SnapshotEntry, SnapshotTable};
    use crate::vm::bytecode::Pc;

    fn trace_with_one_snapshot(resume_pc: Pc, entries: &[SnapshotEntry]) -> CompiledTrace {
        let mut snapshots = SnapshotTable::new();
        snapshots.push(resume_pc, entries);
        let mut asm = X64Assembler::new();
        asm.prologue(0);
        let code = asm.finalize();
        CompiledTrace::new(0, 0, code, snapshots)
    }

    #[test]
    fn restore_repoints_pc_at_the_snapshots_resume_offset() {
        let mut fiber = Fiber::new(0, 4);
        let trace = trace_with_one_snapshot(17, &[SnapshotEntry { reg: 1, value: 0 }]);
        restore(&mut fiber, &trace, 0);
        assert_eq!(fiber.frame.pc, 17);
    }

    #[test]
    fn restore_truncates_to_one_past_the_highest_snapshot_register() {
        let mut fiber = Fiber::new(0, 8);
        let trace = trace_with_one_snapshot(0, &[SnapshotEntry { reg: 2, value: 0 }, SnapshotEntry { reg: 5, value: 0 }]);
        restore(&mut fiber, &trace, 0);
        assert_eq!(fiber.registers.stats().top, fiber.frame.reg_base + 6);
    }

    #[test]
    fn restore_with_an_empty_snapshot_truncates_to_zero_registers() {
        let mut fiber = Fiber::new(0, 4);
        let trace = trace_with_one_snapshot(3, &[]);
        restore(&mut fiber, &trace, 0);
        assert_eq!(fiber.registers.stats().top, fiber.frame.reg_base);
    }
}
