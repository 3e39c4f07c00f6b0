//! Cloning utilities: per-block cloning with a value map, operand remapping
//! through the map, and deep function cloning.
//!
//! Block cloning is split into two phases on purpose. Cloning first and
//! remapping second lets forward references between cloned blocks resolve:
//! by the time operands are remapped, every block in the cloned subgraph has
//! its mapping recorded.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{BasicBlock, BlockId, Inst, InstKind, IrFunction, Operand, Value};

/// Records original -> clone correspondences for values and block labels.
#[derive(Debug, Default)]
pub struct ValueMap {
    pub values: FxHashMap<Value, Value>,
    pub blocks: FxHashMap<BlockId, BlockId>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, v: Value) -> Option<Value> {
        self.values.get(&v).copied()
    }

    pub fn block(&self, b: BlockId) -> Option<BlockId> {
        self.blocks.get(&b).copied()
    }
}

/// Clone `src` into a fresh block appended to `func`. Instructions get fresh
/// ids; every defined value gets a fresh id recorded in `map`. Operands and
/// the terminator are copied verbatim; call [`remap_block`] afterwards to
/// re-bind intra-subgraph references.
pub fn clone_block(func: &mut IrFunction, src: BlockId, map: &mut ValueMap) -> BlockId {
    let src_idx = func.block_index(src).expect("unknown block label");
    let instructions = func.blocks[src_idx].instructions.clone();
    let terminator = func.blocks[src_idx].terminator.clone();

    let clone_label = func.add_block();
    map.blocks.insert(src, clone_label);

    let mut cloned: Vec<Inst> = Vec::with_capacity(instructions.len());
    for inst in instructions {
        let mut kind = inst.kind;
        if let Some(old_dest) = kind.dest() {
            let new_dest = func.fresh_value();
            map.values.insert(old_dest, new_dest);
            set_dest(&mut kind, new_dest);
        }
        cloned.push(func.make_inst(kind));
    }

    let block = func.block_mut(clone_label);
    block.instructions = cloned;
    block.terminator = terminator;
    clone_label
}

/// Rewrite every operand, phi incoming label, and terminator target of
/// `block` through `map`. References with no entry (values defined outside
/// the cloned subgraph, blocks outside it) are left untouched.
pub fn remap_block(block: &mut BasicBlock, map: &ValueMap) {
    let remap_op = |op: &mut Operand| {
        if let Operand::Value(v) = op {
            if let Some(clone) = map.value(*v) {
                *op = Operand::Value(clone);
            }
        }
    };
    for inst in &mut block.instructions {
        inst.kind.for_each_operand_mut(remap_op);
        if let InstKind::Phi { incoming, .. } = &mut inst.kind {
            for (_, label) in incoming {
                if let Some(clone) = map.block(*label) {
                    *label = clone;
                }
            }
        }
    }
    block.terminator.for_each_operand_mut(remap_op);
    for_each_target_mut(block, |target| {
        if let Some(clone) = map.block(*target) {
            *target = clone;
        }
    });
}

fn for_each_target_mut(block: &mut BasicBlock, mut f: impl FnMut(&mut BlockId)) {
    match &mut block.terminator {
        crate::ir::ir::Terminator::Branch(t) => f(t),
        crate::ir::ir::Terminator::CondBranch { true_label, false_label, .. } => {
            f(true_label);
            f(false_label);
        }
        _ => {}
    }
}

fn set_dest(kind: &mut InstKind, new_dest: Value) {
    match kind {
        InstKind::Load { dest, .. }
        | InstKind::Gep { dest, .. }
        | InstKind::Bitcast { dest, .. }
        | InstKind::BinOp { dest, .. }
        | InstKind::Copy { dest, .. }
        | InstKind::Phi { dest, .. } => *dest = new_dest,
        InstKind::Call { dest, .. } => *dest = Some(new_dest),
        InstKind::Store { .. } => {}
    }
}

/// Deep-clone a function under a new name. Value, block, and instruction id
/// spaces are per-function, so the body is copied as-is; attribute edits are
/// the caller's business.
pub fn clone_function(func: &IrFunction, new_name: impl Into<String>) -> IrFunction {
    let mut clone = func.clone();
    clone.name = new_name.into();
    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::IrType;
    use crate::ir::ir::{FnSig, IrConst, Terminator};

    #[test]
    fn clone_block_gets_fresh_values_and_ids() {
        let mut f = IrFunction::new("test", FnSig::new(IrType::Void, vec![IrType::Ptr]));
        let b0 = f.add_block();
        let p = f.params[0];
        let v = f.fresh_value();
        f.push(b0, InstKind::Load { dest: v, ty: IrType::I32, ptr: Operand::Value(p) });
        f.set_terminator(b0, Terminator::Return(None));

        let mut map = ValueMap::new();
        let b1 = clone_block(&mut f, b0, &mut map);

        let orig_inst = f.block(b0).instructions[0].clone();
        let clone_inst = f.block(b1).instructions[0].clone();
        assert_ne!(orig_inst.id, clone_inst.id);
        assert_eq!(map.value(v), clone_inst.kind.dest());
        assert_ne!(clone_inst.kind.dest(), Some(v));
        // The pointer operand is external to the clone and untouched.
        match &clone_inst.kind {
            InstKind::Load { ptr, .. } => assert_eq!(*ptr, Operand::Value(p)),
            other => panic!("expected load, got {other:?}"),
        }
    }

    #[test]
    fn remap_rebinds_internal_uses_only() {
        let mut f = IrFunction::new("test", FnSig::new(IrType::Void, vec![IrType::Ptr]));
        let b0 = f.add_block();
        let b1 = f.add_block();
        let p = f.params[0];
        let v = f.fresh_value();
        let w = f.fresh_value();
        f.push(b0, InstKind::Load { dest: v, ty: IrType::I32, ptr: Operand::Value(p) });
        f.push(
            b0,
            InstKind::BinOp {
                dest: w,
                op: crate::ir::ir::BinOpKind::Add,
                ty: IrType::I32,
                lhs: Operand::Value(v),
                rhs: Operand::Const(IrConst::I32(1)),
            },
        );
        f.set_terminator(b0, Terminator::Branch(b1));
        f.set_terminator(b1, Terminator::Return(None));

        let mut map = ValueMap::new();
        let c0 = clone_block(&mut f, b0, &mut map);
        let c1 = clone_block(&mut f, b1, &mut map);
        for label in [c0, c1] {
            let mut block = f.block(label).clone();
            remap_block(&mut block, &map);
            *f.block_mut(label) = block;
        }

        // Intra-subgraph value use is rebound to the clone.
        match &f.block(c0).instructions[1].kind {
            InstKind::BinOp { lhs, .. } => assert_eq!(*lhs, Operand::Value(map.value(v).unwrap())),
            other => panic!("expected binop, got {other:?}"),
        }
        // The branch target is rebound to the cloned block.
        assert_eq!(f.block(c0).terminator, Terminator::Branch(c1));
        // The external pointer is untouched.
        match &f.block(c0).instructions[0].kind {
            InstKind::Load { ptr, .. } => assert_eq!(*ptr, Operand::Value(p)),
            other => panic!("expected load, got {other:?}"),
        }
    }

    #[test]
    fn phi_labels_are_remapped() {
        let mut f = IrFunction::new("test", FnSig::new(IrType::I32, vec![]));
        let b0 = f.add_block();
        let b1 = f.add_block();
        let v = f.fresh_value();
        let phi = f.fresh_value();
        f.push(b0, InstKind::Copy { dest: v, src: Operand::Const(IrConst::I32(7)) });
        f.set_terminator(b0, Terminator::Branch(b1));
        f.push(
            b1,
            InstKind::Phi {
                dest: phi,
                ty: IrType::I32,
                incoming: vec![(Operand::Value(v), b0)],
            },
        );
        f.set_terminator(b1, Terminator::Return(Some(Operand::Value(phi))));

        let mut map = ValueMap::new();
        let c0 = clone_block(&mut f, b0, &mut map);
        let c1 = clone_block(&mut f, b1, &mut map);
        for label in [c0, c1] {
            let mut block = f.block(label).clone();
            remap_block(&mut block, &map);
            *f.block_mut(label) = block;
        }

        match &f.block(c1).instructions[0].kind {
            InstKind::Phi { incoming, .. } => {
                assert_eq!(incoming[0].1, c0);
                assert_eq!(incoming[0].0, Operand::Value(map.value(v).unwrap()));
            }
            other => panic!("expected phi, got {other:?}"),
        }
    }
}
