//! Locality analysis: classifies allocator calls, and the loads and stores
//! reachable from their results, as thread-local or transaction-local.
//!
//! A heap object allocated before the region but only written inside it
//! needs undo logging, not read mediation: its writes get a log barrier and
//! keep the plain store. An object allocated inside the region needs no
//! instrumentation at all, because an abort discards the allocation itself.
//!
//! Classification keys (the post-revision semantics):
//! - thread-local: the call's block dominates some region's slow-path entry.
//! - transaction-local: the call's block post-dominates a region's slow-path
//!   entry and dominates one of that region's terminators.
//! - allocator calls inside `__transactional_clone.*` bodies are always
//!   transaction-local.

use crate::analysis::dominators::DomTree;
use crate::analysis::regions::Region;
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::ir::{BlockId, Callee, InstId, InstKind, IrFunction, Operand, Value};
use crate::itm;

/// Per-function classification result. The two sets are disjoint.
#[derive(Debug, Default)]
pub struct LocalityInfo {
    pub thread_local_ops: FxHashSet<InstId>,
    pub tx_local_ops: FxHashSet<InstId>,
}

impl LocalityInfo {
    pub fn is_thread_local(&self, id: InstId) -> bool {
        self.thread_local_ops.contains(&id)
    }

    pub fn is_tx_local(&self, id: InstId) -> bool {
        self.tx_local_ops.contains(&id)
    }
}

/// Classify every allocator call site in `func` against `regions`.
pub fn analyze(
    func: &IrFunction,
    regions: &[Region],
    dom: &DomTree,
    postdom: &DomTree,
) -> LocalityInfo {
    let mut info = LocalityInfo::default();
    let in_clone = itm::is_clone_name(&func.name);
    if regions.is_empty() && !in_clone {
        return info;
    }

    let users = func.value_users();
    let inst_index = index_instructions(func);

    for (block, result) in allocator_calls(func) {
        if in_clone {
            for op in reachable_memory_ops(func, result, &users, &inst_index) {
                info.tx_local_ops.insert(op);
            }
            continue;
        }

        let thread_local = regions.iter().any(|region| dom.dominates(block, region.slow_entry));
        let tx_local = !thread_local
            && regions.iter().any(|region| {
                postdom.dominates(block, region.slow_entry)
                    && region.terminators.iter().any(|t| dom.dominates(block, *t))
            });

        if thread_local {
            let ops = reachable_memory_ops(func, result, &users, &inst_index);
            tracing::trace!(function = %func.name, ops = ops.len(), "thread-local allocation");
            info.thread_local_ops.extend(ops);
        } else if tx_local {
            let ops = reachable_memory_ops(func, result, &users, &inst_index);
            tracing::trace!(function = %func.name, ops = ops.len(), "transaction-local allocation");
            for op in ops {
                // Keep the sets exclusive even if user graphs overlap.
                if !info.thread_local_ops.contains(&op) {
                    info.tx_local_ops.insert(op);
                }
            }
        }
    }
    info
}

/// Allocator call sites: `(parent block, result value)` for direct calls to
/// `malloc`/`calloc` or intrinsic variants carrying those names.
fn allocator_calls(func: &IrFunction) -> Vec<(BlockId, Value)> {
    let mut calls = Vec::new();
    for block in &func.blocks {
        for inst in &block.instructions {
            if let InstKind::Call { dest: Some(dest), callee: Callee::Direct(name), .. } =
                &inst.kind
            {
                if itm::is_allocator_name(name) {
                    calls.push((block.label, *dest));
                }
            }
        }
    }
    calls
}

fn index_instructions(func: &IrFunction) -> FxHashMap<InstId, (usize, usize)> {
    let mut index = FxHashMap::default();
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            index.insert(inst.id, (bi, ii));
        }
    }
    index
}

/// Work-list traversal of the SSA user graph rooted at an allocator result.
/// Pointer derivations (GEP base, bitcast source) are followed transitively;
/// loads and stores *through* a derived pointer are recorded. A store that
/// merely stores the pointer somewhere else is neither recorded nor
/// followed. Terminates because the user graph is finite and both values
/// and recorded instructions carry visited sets.
fn reachable_memory_ops(
    func: &IrFunction,
    root: Value,
    users: &FxHashMap<Value, Vec<InstId>>,
    inst_index: &FxHashMap<InstId, (usize, usize)>,
) -> Vec<InstId> {
    let mut ops = Vec::new();
    let mut recorded: FxHashSet<InstId> = FxHashSet::default();
    let mut visited: FxHashSet<Value> = FxHashSet::default();
    let mut worklist = vec![root];
    visited.insert(root);

    while let Some(value) = worklist.pop() {
        let Some(user_ids) = users.get(&value) else { continue };
        for &id in user_ids {
            let Some(&(bi, ii)) = inst_index.get(&id) else { continue };
            match &func.blocks[bi].instructions[ii].kind {
                InstKind::Store { ptr, .. } | InstKind::Load { ptr, .. }
                    if *ptr == Operand::Value(value) =>
                {
                    if recorded.insert(id) {
                        ops.push(id);
                    }
                }
                InstKind::Gep { dest, base, .. } if *base == Operand::Value(value) => {
                    if visited.insert(*dest) {
                        worklist.push(*dest);
                    }
                }
                InstKind::Bitcast { dest, src, .. } if *src == Operand::Value(value) => {
                    if visited.insert(*dest) {
                        worklist.push(*dest);
                    }
                }
                _ => {}
            }
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::regions::scan_function;
    use crate::common::types::IrType;
    use crate::ir::ir::{Attributes, FnSig, IrConst, Terminator};

    fn call_to(name: &str, dest: Option<Value>, args: Vec<Operand>) -> InstKind {
        InstKind::Call {
            dest,
            ret_ty: if dest.is_some() { IrType::Ptr } else { IrType::Void },
            callee: Callee::Direct(name.to_string()),
            args,
            attrs: Attributes::empty(),
        }
    }

    /// entry(malloc) -> tx -> (fast | slow) -> commit. The slow path stores
    /// through a GEP off the entry-block malloc.
    fn func_with_pre_region_malloc() -> (IrFunction, Value, Vec<InstId>) {
        let mut f = IrFunction::new("atomic", FnSig::new(IrType::Void, vec![]));
        let entry = f.add_block();
        let tx = f.add_block();
        let fast = f.add_block();
        let slow = f.add_block();
        let commit = f.add_block();

        let p = f.fresh_value();
        let q = f.fresh_value();
        f.push(entry, call_to("malloc", Some(p), vec![Operand::Const(IrConst::I64(64))]));
        f.push(
            entry,
            InstKind::Gep { dest: q, base: Operand::Value(p), offset: Operand::Const(IrConst::I64(8)) },
        );
        f.set_terminator(entry, Terminator::Branch(tx));

        f.push(tx, call_to(itm::TX_BEGIN, None, vec![]));
        f.set_terminator(
            tx,
            Terminator::CondBranch {
                cond: Operand::Const(IrConst::I32(0)),
                true_label: slow,
                false_label: fast,
            },
        );

        f.push(fast, call_to(itm::FAST_PATH_BEGIN, None, vec![]));
        let store = f.push(
            fast,
            InstKind::Store { ty: IrType::I32, value: Operand::Const(IrConst::I32(7)), ptr: Operand::Value(q) },
        );
        f.push(fast, call_to(itm::FAST_PATH_END, None, vec![]));
        f.set_terminator(fast, Terminator::Branch(commit));

        f.push(slow, call_to(itm::SLOW_PATH_BEGIN, None, vec![]));
        f.push(slow, call_to(itm::SLOW_PATH_END, None, vec![]));
        f.set_terminator(slow, Terminator::Branch(commit));

        f.push(commit, call_to(itm::TX_COMMIT, None, vec![]));
        f.set_terminator(commit, Terminator::Return(None));
        (f, p, vec![store])
    }

    #[test]
    fn pre_region_allocation_is_thread_local() {
        let (f, _, stores) = func_with_pre_region_malloc();
        let regions = scan_function(&f).unwrap();
        let dom = DomTree::dominators(&f);
        let postdom = DomTree::post_dominators(&f);
        let info = analyze(&f, &regions, &dom, &postdom);

        for store in stores {
            assert!(info.is_thread_local(store));
        }
        assert!(info.tx_local_ops.is_empty());
    }

    #[test]
    fn sets_are_exclusive() {
        let (f, _, _) = func_with_pre_region_malloc();
        let regions = scan_function(&f).unwrap();
        let dom = DomTree::dominators(&f);
        let postdom = DomTree::post_dominators(&f);
        let info = analyze(&f, &regions, &dom, &postdom);
        assert!(info.thread_local_ops.is_disjoint(&info.tx_local_ops));
    }

    #[test]
    fn in_region_allocation_is_transaction_local() {
        // Straight line: tx -> fast -> slow -> body(malloc+store) -> commit.
        // The body block post-dominates the slow-path entry and dominates
        // the commit block, but does not dominate the slow-path entry.
        let mut f = IrFunction::new("atomic", FnSig::new(IrType::Void, vec![]));
        let tx = f.add_block();
        let fast = f.add_block();
        let slow = f.add_block();
        let body = f.add_block();
        let commit = f.add_block();

        f.push(tx, call_to(itm::TX_BEGIN, None, vec![]));
        f.set_terminator(tx, Terminator::Branch(fast));
        f.push(fast, call_to(itm::FAST_PATH_BEGIN, None, vec![]));
        f.push(fast, call_to(itm::FAST_PATH_END, None, vec![]));
        f.set_terminator(fast, Terminator::Branch(slow));

        f.push(slow, call_to(itm::SLOW_PATH_BEGIN, None, vec![]));
        f.push(slow, call_to(itm::SLOW_PATH_END, None, vec![]));
        f.set_terminator(slow, Terminator::Branch(body));

        let p = f.fresh_value();
        let q = f.fresh_value();
        f.push(body, call_to("malloc", Some(p), vec![Operand::Const(IrConst::I64(32))]));
        f.push(
            body,
            InstKind::Bitcast { dest: q, ty: IrType::Ptr, src: Operand::Value(p) },
        );
        let store = f.push(
            body,
            InstKind::Store { ty: IrType::I32, value: Operand::Const(IrConst::I32(1)), ptr: Operand::Value(q) },
        );
        f.set_terminator(body, Terminator::Branch(commit));

        f.push(commit, call_to(itm::TX_COMMIT, None, vec![]));
        f.set_terminator(commit, Terminator::Return(None));

        let regions = scan_function(&f).unwrap();
        let dom = DomTree::dominators(&f);
        let postdom = DomTree::post_dominators(&f);
        let info = analyze(&f, &regions, &dom, &postdom);

        assert!(info.is_tx_local(store));
        assert!(info.thread_local_ops.is_empty());
    }

    #[test]
    fn clone_allocations_are_always_transaction_local() {
        let mut f = IrFunction::new(
            itm::clone_name("helper"),
            FnSig::new(IrType::Void, vec![]),
        );
        let b = f.add_block();
        let p = f.fresh_value();
        f.push(b, call_to("malloc", Some(p), vec![Operand::Const(IrConst::I64(16))]));
        let store = f.push(
            b,
            InstKind::Store { ty: IrType::I64, value: Operand::Const(IrConst::I64(0)), ptr: Operand::Value(p) },
        );
        f.set_terminator(b, Terminator::Return(None));

        let dom = DomTree::dominators(&f);
        let postdom = DomTree::post_dominators(&f);
        let info = analyze(&f, &[], &dom, &postdom);
        assert!(info.is_tx_local(store));
    }

    #[test]
    fn stored_pointer_values_are_not_followed() {
        // store ptr %p into a global slot: the store is through @slot, not
        // through %p, so it must not be recorded for %p's object.
        let (mut f, p, _) = func_with_pre_region_malloc();
        let entry = f.entry_block().unwrap();
        let escape_id = f.push(
            entry,
            InstKind::Store {
                ty: IrType::Ptr,
                value: Operand::Value(p),
                ptr: Operand::Global("slot".to_string()),
            },
        );

        let regions = scan_function(&f).unwrap();
        let dom = DomTree::dominators(&f);
        let postdom = DomTree::post_dominators(&f);
        let info = analyze(&f, &regions, &dom, &postdom);
        assert!(!info.is_thread_local(escape_id));
        assert!(!info.is_tx_local(escape_id));
    }
}
