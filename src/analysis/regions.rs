//! Region scanning: recovers the structural description of each atomic
//! region from the sentinel calls the front end left behind.
//!
//! A single linear pass over the function's call instructions, in layout
//! order. `_ITM_beginTransaction` opens a region; the path sentinels fill in
//! its boundary blocks; every `_ITM_commitTransaction` block joins the
//! region's terminator set. Sentinel occurrences that do not partition
//! cleanly into regions make the whole function report `MalformedRegion`,
//! and the caller skips it without touching the IR.

use crate::common::error::TransactifyError;
use crate::common::fx_hash::FxHashSet;
use crate::ir::ir::{BlockId, InstId, IrFunction};
use crate::itm::{self, Sentinel};

/// One atomic region. Boundary fields name blocks of the enclosing
/// function; `slow_exit` is absent until slow-path synthesis splits the
/// slow-entry block and fills it in.
#[derive(Debug, Clone)]
pub struct Region {
    /// Block containing the `_ITM_beginTransaction` call.
    pub tx_entry: BlockId,
    /// Block containing `__begin_tm_fast_path`.
    pub fast_entry: BlockId,
    /// Block containing `__end_tm_fast_path`.
    pub fast_exit: BlockId,
    /// Block containing `__begin_tm_slow_path` (and, until the split, the
    /// matching end sentinel).
    pub slow_entry: BlockId,
    /// Created by slow-path synthesis; holds the `__end_tm_slow_path` call.
    pub slow_exit: Option<BlockId>,
    /// Blocks containing `_ITM_commitTransaction` calls. These bound every
    /// region-limited traversal.
    pub terminators: FxHashSet<BlockId>,
    /// The `__begin_tm_slow_path` call.
    pub slow_begin_call: InstId,
    /// The `__end_tm_slow_path` call, the split point for slow-path
    /// synthesis.
    pub slow_end_call: InstId,
}

impl Region {
    pub fn is_terminator(&self, block: BlockId) -> bool {
        self.terminators.contains(&block)
    }
}

#[derive(Debug, Default)]
struct PendingRegion {
    tx_entry: Option<BlockId>,
    fast_entry: Option<BlockId>,
    fast_exit: Option<BlockId>,
    slow_entry: Option<BlockId>,
    terminators: FxHashSet<BlockId>,
    slow_begin_call: Option<InstId>,
    slow_end_call: Option<InstId>,
}

impl PendingRegion {
    fn set_once(
        slot: &mut Option<BlockId>,
        block: BlockId,
        what: &str,
    ) -> Result<(), TransactifyError> {
        if slot.is_some() {
            return Err(TransactifyError::MalformedRegion {
                reason: format!("duplicate {what} sentinel"),
            });
        }
        *slot = Some(block);
        Ok(())
    }

    /// `Ok(None)` when the transaction carries no path sentinels at all:
    /// the region was already lowered (cleanup removed them) and only the
    /// runtime begin/commit calls remain.
    fn finish(self) -> Result<Option<Region>, TransactifyError> {
        if self.fast_entry.is_none()
            && self.fast_exit.is_none()
            && self.slow_entry.is_none()
            && self.slow_begin_call.is_none()
            && self.slow_end_call.is_none()
        {
            return Ok(None);
        }
        let missing = |what: &str| TransactifyError::MalformedRegion {
            reason: format!("transaction is missing its {what} sentinel"),
        };
        let region = Region {
            tx_entry: self.tx_entry.ok_or_else(|| missing("begin"))?,
            fast_entry: self.fast_entry.ok_or_else(|| missing("fast-path begin"))?,
            fast_exit: self.fast_exit.ok_or_else(|| missing("fast-path end"))?,
            slow_entry: self.slow_entry.ok_or_else(|| missing("slow-path begin"))?,
            slow_exit: None,
            slow_begin_call: self.slow_begin_call.ok_or_else(|| missing("slow-path begin"))?,
            slow_end_call: self.slow_end_call.ok_or_else(|| missing("slow-path end"))?,
            terminators: self.terminators,
        };
        if region.terminators.is_empty() {
            return Err(missing("commit"));
        }
        Ok(Some(region))
    }
}

/// Scan a function for atomic regions, in program order of the sentinel
/// calls. Returns an empty list for functions without transactions.
pub fn scan_function(func: &IrFunction) -> Result<Vec<Region>, TransactifyError> {
    let mut regions: Vec<Region> = Vec::new();
    let mut pending: Option<PendingRegion> = None;

    for block in &func.blocks {
        for inst in &block.instructions {
            let Some(sentinel) = itm::call_sentinel(&inst.kind) else { continue };

            if sentinel == Sentinel::TxBegin {
                if let Some(open) = pending.take() {
                    if let Some(region) = open.finish()? {
                        regions.push(region);
                    }
                }
                pending = Some(PendingRegion {
                    tx_entry: Some(block.label),
                    ..PendingRegion::default()
                });
                continue;
            }

            let Some(open) = pending.as_mut() else {
                return Err(TransactifyError::MalformedRegion {
                    reason: format!(
                        "sentinel '{}' before any transaction begin",
                        sentinel_name(sentinel)
                    ),
                });
            };
            match sentinel {
                Sentinel::TxBegin => unreachable!("handled above"),
                Sentinel::TxCommit => {
                    open.terminators.insert(block.label);
                }
                Sentinel::FastPathBegin => {
                    PendingRegion::set_once(&mut open.fast_entry, block.label, "fast-path begin")?
                }
                Sentinel::FastPathEnd => {
                    PendingRegion::set_once(&mut open.fast_exit, block.label, "fast-path end")?
                }
                Sentinel::SlowPathBegin => {
                    PendingRegion::set_once(&mut open.slow_entry, block.label, "slow-path begin")?;
                    open.slow_begin_call = Some(inst.id);
                }
                Sentinel::SlowPathEnd => {
                    if open.slow_end_call.is_some() {
                        return Err(TransactifyError::MalformedRegion {
                            reason: "duplicate slow-path end sentinel".into(),
                        });
                    }
                    if open.slow_entry != Some(block.label) {
                        return Err(TransactifyError::MalformedRegion {
                            reason: "slow-path sentinels are not adjacent in one block".into(),
                        });
                    }
                    open.slow_end_call = Some(inst.id);
                }
            }
        }
    }

    if let Some(open) = pending.take() {
        if let Some(region) = open.finish()? {
            regions.push(region);
        }
    }
    tracing::debug!(function = %func.name, regions = regions.len(), "scanned atomic regions");
    Ok(regions)
}

fn sentinel_name(sentinel: Sentinel) -> &'static str {
    match sentinel {
        Sentinel::TxBegin => itm::TX_BEGIN,
        Sentinel::TxCommit => itm::TX_COMMIT,
        Sentinel::FastPathBegin => itm::FAST_PATH_BEGIN,
        Sentinel::FastPathEnd => itm::FAST_PATH_END,
        Sentinel::SlowPathBegin => itm::SLOW_PATH_BEGIN,
        Sentinel::SlowPathEnd => itm::SLOW_PATH_END,
    }
}
