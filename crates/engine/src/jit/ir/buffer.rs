//! Append-only storage for a trace's IR.

use super::node::{IrNode, IrRef};

/// Sentinel meaning "no reference" — e.g. a `Phi`'s `back_edge` before the
/// loop body has recorded one.
pub const IR_NONE: IrRef = IrRef::MAX;

/// An append-only array of [`IrNode`]s plus the loop-header reference, once
/// known.
#[derive(Debug, Clone, Default)]
pub struct IrBuffer {
    nodes: Vec<IrNode>,
    loop_header: IrRef,
}

impl IrBuffer {
    pub fn new() -> Self {
        IrBuffer { nodes: Vec::new(), loop_header: IR_NONE }
    }

    /// Appends a node and returns its (now permanent) reference.
    ///
    /// Panics if the trace has grown past `IrRef::MAX - 1` instructions;
    /// callers are expected to have already aborted recording well before
    /// that via `JitConfig::max_instructions`.
    pub fn push(&mut self, node: IrNode) -> IrRef {
        let idx = self.nodes.len();
        assert!(idx < IR_NONE as usize, "trace IR overflowed IrRef::MAX");
        self.nodes.push(node);
        idx as IrRef
    }

    pub fn get(&self, r: IrRef) -> &IrNode {
        &self.nodes[r as usize]
    }

    pub fn get_mut(&mut self, r: IrRef) -> &mut IrNode {
        &mut self.nodes[r as usize]
    }

    pub fn set_loop_header(&mut self, r: IrRef) {
        self.loop_header = r;
    }

    pub fn loop_header(&self) -> Option<IrRef> {
        (self.loop_header != IR_NONE).then_some(self.loop_header)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IrRef, &IrNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (i as IrRef, n))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (IrRef, &mut IrNode)> {
        self.nodes.iter_mut().enumerate().map(|(i, n)| (i as IrRef, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::{IrOp, IrType};

    #[test]
    fn push_returns_stable_refs() {
        let mut buf = IrBuffer::new();
        let a = buf.push(IrNode::new(IrOp::Constant(1.0), IrType::Number));
        let b = buf.push(IrNode::new(IrOp::Constant(2.0), IrType::Number));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(buf.len(), 2);
        match buf.get(a).op {
            IrOp::Constant(n) => assert_eq!(n, 1.0),
            _ => panic!("wrong op"),
        }
    }

    #[test]
    fn loop_header_defaults_to_none() {
        let buf = IrBuffer::new();
        assert!(buf.loop_header().is_none());
    }
}
