//! Slow-path synthesis.
//!
//! For each atomic region this pass duplicates every block reachable from
//! the fast-path entry without crossing the region's terminators, then
//! threads the duplicate between the slow-path entry and a freshly split
//! slow-path exit:
//!
//! 1. Split the slow-entry block immediately before its
//!    `__end_tm_slow_path` call; the tail becomes the slow-path exit.
//! 2. Clone the fast-path subgraph breadth-first. The fast-entry clone
//!    loses its `__begin_tm_fast_path` sentinel and becomes the first
//!    successor of the slow entry; the fast-exit clone loses its
//!    `__end_tm_fast_path` sentinel and falls through to the slow exit.
//! 3. Re-walk the clones and remap every operand, phi label, and branch
//!    target through the value map, re-binding intra-subgraph references
//!    while leaving external uses (globals, arguments, values defined
//!    before the region) untouched.

use crate::analysis::regions::Region;
use crate::common::error::{DiagnosticEngine, TransactifyError};
use crate::ir::cfg;
use crate::ir::clone::{clone_block, remap_block, ValueMap};
use crate::ir::ir::{BlockId, IrFunction};
use crate::itm::{self, Sentinel};

pub fn run(func: &mut IrFunction, regions: &mut [Region], diags: &mut DiagnosticEngine) -> bool {
    let mut changed = false;
    for region in regions.iter_mut() {
        changed |= synthesize(func, region, diags);
    }
    changed
}

fn synthesize(func: &mut IrFunction, region: &mut Region, diags: &mut DiagnosticEngine) -> bool {
    tracing::debug!(function = %func.name, "synthesizing slow path");

    // The slow-entry block carries both slow-path sentinels; everything
    // from the end sentinel onward becomes the slow-path exit.
    let split_at = func
        .block(region.slow_entry)
        .instructions
        .iter()
        .position(|inst| inst.id == region.slow_end_call);
    let Some(split_at) = split_at else {
        diags.report(
            &func.name,
            &TransactifyError::MalformedRegion {
                reason: "slow-path end sentinel is not in the slow-entry block".into(),
            },
        );
        return false;
    };
    let slow_exit = func.split_block_before(region.slow_entry, split_at);
    region.slow_exit = Some(slow_exit);

    // Clone pass.
    let visit = cfg::region_blocks(func, region.fast_entry, &region.terminators);
    let mut map = ValueMap::new();
    let mut clones: Vec<BlockId> = Vec::with_capacity(visit.len());
    for &original in &visit {
        let clone = clone_block(func, original, &mut map);
        clones.push(clone);

        if original == region.fast_entry {
            erase_sentinel(func, clone, Sentinel::FastPathBegin);
            let entry_idx = func.block_index(region.slow_entry).expect("slow entry exists");
            cfg::set_first_successor(&mut func.blocks[entry_idx].terminator, clone);
            if region.fast_entry == region.fast_exit {
                erase_sentinel(func, clone, Sentinel::FastPathEnd);
                let clone_idx = func.block_index(clone).expect("clone exists");
                cfg::set_first_successor(&mut func.blocks[clone_idx].terminator, slow_exit);
            }
        } else if original == region.fast_exit {
            erase_sentinel(func, clone, Sentinel::FastPathEnd);
            let clone_idx = func.block_index(clone).expect("clone exists");
            cfg::set_first_successor(&mut func.blocks[clone_idx].terminator, slow_exit);
        }
    }

    // Rewrite pass: re-bind intra-subgraph uses to the clones.
    for &clone in &clones {
        let idx = func.block_index(clone).expect("clone exists");
        remap_block(&mut func.blocks[idx], &map);
    }

    true
}

/// Erase the first call to `sentinel` in `block`, if present.
fn erase_sentinel(func: &mut IrFunction, block: BlockId, sentinel: Sentinel) {
    let block = func.block_mut(block);
    if let Some(pos) = block
        .instructions
        .iter()
        .position(|inst| itm::call_sentinel(&inst.kind) == Some(sentinel))
    {
        block.instructions.remove(pos);
    }
}
