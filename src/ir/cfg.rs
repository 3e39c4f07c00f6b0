//! CFG utilities: successor enumeration, predecessor maps, and the
//! region-bounded breadth-first traversal the transform passes share.

use std::collections::VecDeque;

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::ir::{BlockId, IrFunction, Terminator};

/// The branch targets of a terminator, first successor first.
pub fn successors(term: &Terminator) -> Vec<BlockId> {
    match term {
        Terminator::Branch(target) => vec![*target],
        Terminator::CondBranch { true_label, false_label, .. } => vec![*true_label, *false_label],
        Terminator::Return(_) | Terminator::Unreachable => vec![],
    }
}

/// Redirect the first successor (the fall-through / taken edge) of a
/// terminator. `Return` and `Unreachable` have no successors and are left
/// untouched.
pub fn set_first_successor(term: &mut Terminator, target: BlockId) {
    match term {
        Terminator::Branch(t) => *t = target,
        Terminator::CondBranch { true_label, .. } => *true_label = target,
        Terminator::Return(_) | Terminator::Unreachable => {}
    }
}

/// Map each block to its predecessors, in layout order.
pub fn predecessors(func: &IrFunction) -> FxHashMap<BlockId, Vec<BlockId>> {
    let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for block in &func.blocks {
        for succ in successors(&block.terminator) {
            let entry = preds.entry(succ).or_default();
            if !entry.contains(&block.label) {
                entry.push(block.label);
            }
        }
    }
    preds
}

/// Breadth-first walk of the blocks reachable from `entry` without leaving
/// the region: successors of blocks in `terminators` are never enqueued, and
/// the terminator blocks themselves are not visited. Returns the visit
/// order, which is deterministic given the successor order of the IR.
pub fn region_blocks(
    func: &IrFunction,
    entry: BlockId,
    terminators: &FxHashSet<BlockId>,
) -> Vec<BlockId> {
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    let mut order = Vec::new();
    let mut queue: VecDeque<BlockId> = VecDeque::new();

    visited.insert(entry);
    queue.push_back(entry);
    while let Some(label) = queue.pop_front() {
        order.push(label);
        if terminators.contains(&label) {
            continue;
        }
        let Some(idx) = func.block_index(label) else { continue };
        for succ in successors(&func.blocks[idx].terminator) {
            if !terminators.contains(&succ) && visited.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    order
}
