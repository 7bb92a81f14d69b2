//! Fixed 13-pass optimizer pipeline.
//!
//! Passes run in one fixed order, always all 13, never looped back over
//! themselves — later passes are ordered to benefit from what earlier ones
//! expose (constant folding before GVN so folded constants can be deduped;
//! DCE running twice so a node that only became dead because *its* last use
//! was just deleted still gets caught). Every pass mutates nodes in place
//! via `IrOp::Identity`/`IrOp::Dead` rather than physically removing them,
//! since the IR buffer is append-only and earlier `IrRef`s must stay valid.

mod passes;

use rustc_hash::FxHashSet;

use super::ir::{IrBuffer, IrRef, SnapshotTable};

/// Scratch state threaded through the pipeline that doesn't fit naturally
/// as a buffer mutation: which nodes are loop-invariant (and so belong
/// before the native loop's back-edge rather than inside it), and which
/// object pointers never escape the trace.
#[derive(Default)]
pub struct OptContext {
    pub hoisted: FxHashSet<IrRef>,
    pub non_escaping: FxHashSet<IrRef>,
}

pub trait OptPass {
    fn name(&self) -> &'static str;
    fn run(&self, buffer: &mut IrBuffer, snapshots: &mut SnapshotTable, ctx: &mut OptContext);
}

/// Runs the full fixed pipeline in order, logging each pass at `trace` level
/// when `dump_ir` is set.
pub fn run_pipeline(buffer: &mut IrBuffer, snapshots: &mut SnapshotTable, dump_ir: bool) -> OptContext {
    let pipeline: Vec<Box<dyn OptPass>> = vec![
        Box::new(passes::BoxUnboxElim),
        Box::new(passes::ScopedGuardElim),
        Box::new(passes::ConstantFolding),
        Box::new(passes::Gvn),
        Box::new(passes::Licm),
        Box::new(passes::GuardHoisting),
        Box::new(passes::StrengthReduction),
        Box::new(passes::BoundsCheckElim),
        Box::new(passes::EscapeAnalysis),
        Box::new(passes::Dce),
        Box::new(passes::Dce),
        Box::new(passes::UnscopedGuardElimAndPreMarking),
        Box::new(passes::InductionVariableTypeInference),
    ];

    let mut ctx = OptContext::default();
    for pass in &pipeline {
        if dump_ir {
            log::trace!("running optimizer pass {}", pass.name());
        }
        pass.run(buffer, snapshots, &mut ctx);
        if dump_ir {
            log::trace!("{} nodes after {}", buffer.len(), pass.name());
        }
    }
    ctx
}

/// Resolves an `IrRef` through any chain of `IrOp::Identity` forwards left
/// behind by earlier passes.
pub fn resolve(buffer: &IrBuffer, mut r: IrRef) -> IrRef {
    loop {
        match buffer.get(r).op {
            super::ir::IrOp::Identity(to) => r = to,
            _ => return r,
        }
    }
}
