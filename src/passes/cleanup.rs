//! Sentinel cleanup.
//!
//! Once the pipeline has extracted everything it needs from the path
//! sentinels, this pass erases them from each region's boundary blocks:
//! `__begin_tm_fast_path`, `__end_tm_fast_path`, `__begin_tm_slow_path`,
//! `__end_tm_slow_path`. The `_ITM_beginTransaction` and
//! `_ITM_commitTransaction` calls are real runtime entry points and stay.

use crate::analysis::regions::Region;
use crate::common::fx_hash::FxHashSet;
use crate::ir::ir::{BlockId, IrFunction};
use crate::itm;

pub fn run(func: &mut IrFunction, regions: &[Region]) -> bool {
    let mut boundary: FxHashSet<BlockId> = FxHashSet::default();
    for region in regions {
        boundary.insert(region.slow_entry);
        boundary.insert(region.fast_entry);
        boundary.insert(region.fast_exit);
        if let Some(slow_exit) = region.slow_exit {
            boundary.insert(slow_exit);
        }
    }

    let mut changed = false;
    for block in &mut func.blocks {
        if !boundary.contains(&block.label) {
            continue;
        }
        let before = block.instructions.len();
        block.instructions.retain(|inst| {
            !itm::call_sentinel(&inst.kind).is_some_and(|s| s.is_path_boundary())
        });
        changed |= block.instructions.len() != before;
    }
    if changed {
        tracing::debug!(function = %func.name, "erased path sentinels");
    }
    changed
}
