//! Typed load/store barrier insertion.
//!
//! Walks the slow-path subgraph of every region (and the whole body of
//! `__transactional_clone.*` functions) and mediates each memory access
//! through the runtime:
//!
//! - a load of category `T` becomes `_ITM_R<T>(p)`, its result re-bound to
//!   the original value;
//! - a store of category `T` becomes `_ITM_W<T>(p, x)`, unless locality
//!   says the object was live before the transaction, in which case the
//!   store stays and `_ITM_L<T>(p)` is logged immediately before it;
//! - transaction-local accesses are skipped entirely.
//!
//! Loads and stores of types with no barrier are reported and left intact.
//! Barrier declarations are inserted lazily, `noinline`, on first use.

use crate::analysis::locality::LocalityInfo;
use crate::analysis::regions::Region;
use crate::common::error::{DiagnosticEngine, TransactifyError};
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::common::types::IrType;
use crate::ir::cfg;
use crate::ir::ir::{
    get_or_insert_declaration, Attributes, BlockId, Callee, FnDecl, FnSig, InstKind, IrModule,
};
use crate::itm::{self, TypeCategory};

enum Edit {
    /// Swap the instruction body for a barrier call (fresh instruction id).
    Replace(InstKind),
    /// Keep the instruction, inserting a log barrier in front of it.
    LogBefore(InstKind),
}

pub fn run(
    module: &mut IrModule,
    func_idx: usize,
    regions: &[Region],
    locality: &LocalityInfo,
    diags: &mut DiagnosticEngine,
) -> bool {
    let IrModule { ref mut functions, ref mut declarations, .. } = *module;
    let func = &mut functions[func_idx];

    let in_clone = itm::is_clone_name(&func.name);
    if regions.is_empty() && !in_clone {
        return false;
    }
    tracing::debug!(function = %func.name, "inserting load/store barriers");

    // Clone bodies are instrumented whole; regions contribute their
    // slow-path subgraphs, bounded by the commit blocks.
    let mut worklist: Vec<BlockId> = Vec::new();
    let mut enqueued: FxHashSet<BlockId> = FxHashSet::default();
    if in_clone {
        for block in &func.blocks {
            if enqueued.insert(block.label) {
                worklist.push(block.label);
            }
        }
    }
    for region in regions {
        for label in cfg::region_blocks(func, region.slow_entry, &region.terminators) {
            if enqueued.insert(label) {
                worklist.push(label);
            }
        }
    }

    let mut changed = false;
    for label in worklist {
        let mut edits: FxHashMap<usize, Edit> = FxHashMap::default();
        let block = func.block(label);
        for (idx, inst) in block.instructions.iter().enumerate() {
            match &inst.kind {
                InstKind::Load { dest, ty, ptr } => {
                    if locality.is_thread_local(inst.id) || locality.is_tx_local(inst.id) {
                        continue;
                    }
                    let cat = match TypeCategory::of(*ty) {
                        Ok(cat) => cat,
                        Err(ty) => {
                            diags.report(&func.name, &TransactifyError::UnsupportedType { ty });
                            continue;
                        }
                    };
                    declare_barrier(declarations, cat.read_barrier(), cat.read_sig());
                    edits.insert(
                        idx,
                        Edit::Replace(InstKind::Call {
                            dest: Some(*dest),
                            ret_ty: *ty,
                            callee: Callee::Direct(cat.read_barrier()),
                            args: vec![ptr.clone()],
                            attrs: Attributes::empty(),
                        }),
                    );
                }
                InstKind::Store { ty, value, ptr } => {
                    if locality.is_tx_local(inst.id) {
                        continue;
                    }
                    let cat = match TypeCategory::of(*ty) {
                        Ok(cat) => cat,
                        Err(ty) => {
                            diags.report(&func.name, &TransactifyError::UnsupportedType { ty });
                            continue;
                        }
                    };
                    if locality.is_thread_local(inst.id) {
                        declare_barrier(declarations, cat.log_barrier(), cat.log_sig());
                        edits.insert(
                            idx,
                            Edit::LogBefore(InstKind::Call {
                                dest: None,
                                ret_ty: IrType::Void,
                                callee: Callee::Direct(cat.log_barrier()),
                                args: vec![ptr.clone()],
                                attrs: Attributes::empty(),
                            }),
                        );
                    } else {
                        declare_barrier(declarations, cat.write_barrier(), cat.write_sig());
                        edits.insert(
                            idx,
                            Edit::Replace(InstKind::Call {
                                dest: None,
                                ret_ty: IrType::Void,
                                callee: Callee::Direct(cat.write_barrier()),
                                args: vec![ptr.clone(), value.clone()],
                                attrs: Attributes::empty(),
                            }),
                        );
                    }
                }
                _ => {}
            }
        }

        if edits.is_empty() {
            continue;
        }
        changed = true;

        let old = std::mem::take(&mut func.block_mut(label).instructions);
        let mut rebuilt = Vec::with_capacity(old.len() + edits.len());
        for (idx, inst) in old.into_iter().enumerate() {
            match edits.remove(&idx) {
                Some(Edit::Replace(kind)) => {
                    tracing::trace!(function = %func.name, "replaced access with barrier call");
                    rebuilt.push(func.make_inst(kind));
                }
                Some(Edit::LogBefore(kind)) => {
                    rebuilt.push(func.make_inst(kind));
                    rebuilt.push(inst);
                }
                None => rebuilt.push(inst),
            }
        }
        func.block_mut(label).instructions = rebuilt;
    }

    changed
}

fn declare_barrier(declarations: &mut Vec<FnDecl>, name: String, sig: FnSig) {
    get_or_insert_declaration(declarations, &name, sig, Attributes::NOINLINE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dominators::DomTree;
    use crate::analysis::locality::{self, LocalityInfo};
    use crate::analysis::regions::{scan_function, Region};
    use crate::common::types::VecElem;
    use crate::ir::ir::{IrConst, IrFunction, Operand, Terminator};
    use crate::passes::slow_path;

    fn sentinel_call(name: &str) -> InstKind {
        InstKind::Call {
            dest: None,
            ret_ty: IrType::Void,
            callee: Callee::Direct(name.to_string()),
            args: vec![],
            attrs: Attributes::empty(),
        }
    }

    /// Build a module with one region whose fast path runs `body`, then run
    /// region scan + slow-path synthesis + locality + this pass.
    fn lower(body: impl FnOnce(&mut IrFunction, BlockId)) -> (IrModule, Vec<Region>) {
        let mut f = IrFunction::new("atomic", FnSig::new(IrType::Void, vec![IrType::Ptr]));
        let tx = f.add_block();
        let slow = f.add_block();
        let fast = f.add_block();
        let commit = f.add_block();

        f.push(tx, sentinel_call(itm::TX_BEGIN));
        f.set_terminator(
            tx,
            Terminator::CondBranch {
                cond: Operand::Const(IrConst::I32(0)),
                true_label: slow,
                false_label: fast,
            },
        );
        f.push(slow, sentinel_call(itm::SLOW_PATH_BEGIN));
        f.push(slow, sentinel_call(itm::SLOW_PATH_END));
        f.set_terminator(slow, Terminator::Branch(commit));
        f.push(fast, sentinel_call(itm::FAST_PATH_BEGIN));
        body(&mut f, fast);
        f.push(fast, sentinel_call(itm::FAST_PATH_END));
        f.set_terminator(fast, Terminator::Branch(commit));
        f.push(commit, sentinel_call(itm::TX_COMMIT));
        f.set_terminator(commit, Terminator::Return(None));

        let mut module = IrModule::new();
        module.functions.push(f);

        let mut diags = DiagnosticEngine::new();
        let mut regions = scan_function(&module.functions[0]).unwrap();
        slow_path::run(&mut module.functions[0], &mut regions, &mut diags);
        let dom = DomTree::dominators(&module.functions[0]);
        let postdom = DomTree::post_dominators(&module.functions[0]);
        let info = locality::analyze(&module.functions[0], &regions, &dom, &postdom);
        run(&mut module, 0, &regions, &info, &mut diags);
        (module, regions)
    }

    fn slow_clone_block<'a>(module: &'a IrModule, region: &Region) -> &'a crate::ir::ir::BasicBlock {
        let f = &module.functions[0];
        match f.block(region.slow_entry).terminator {
            Terminator::Branch(t) => f.block(t),
            ref other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn load_becomes_read_barrier_with_uses_redirected() {
        let (module, regions) = lower(|f, fast| {
            let p = f.params[0];
            let v = f.fresh_value();
            f.push(fast, InstKind::Load { dest: v, ty: IrType::I32, ptr: Operand::Value(p) });
            f.push(
                fast,
                InstKind::Store { ty: IrType::I32, value: Operand::Value(v), ptr: Operand::Value(p) },
            );
        });
        let clone = slow_clone_block(&module, &regions[0]);

        // The cloned load is gone; a call computes the same value id the
        // cloned store consumes.
        let read_dest = match &clone.instructions[0].kind {
            InstKind::Call { dest, callee: Callee::Direct(name), args, .. } => {
                assert_eq!(name, "_ITM_RU4");
                assert_eq!(args.len(), 1);
                dest.unwrap()
            }
            other => panic!("expected read barrier, got {other:?}"),
        };
        match &clone.instructions[1].kind {
            InstKind::Call { callee: Callee::Direct(name), args, .. } => {
                assert_eq!(name, "_ITM_WU4");
                assert_eq!(args[1], Operand::Value(read_dest));
            }
            other => panic!("expected write barrier, got {other:?}"),
        }

        // Fast path untouched.
        let fast = module.functions[0].block(regions[0].fast_entry);
        assert!(matches!(fast.instructions[1].kind, InstKind::Load { .. }));
        assert!(matches!(fast.instructions[2].kind, InstKind::Store { .. }));

        // Barrier declarations carry noinline.
        let decl = module.declaration("_ITM_RU4").unwrap();
        assert!(decl.attrs.contains(Attributes::NOINLINE));
        assert!(module.declaration("_ITM_WU4").is_some());
    }

    #[test]
    fn pointer_loads_use_the_u8_barrier() {
        let (module, regions) = lower(|f, fast| {
            let p = f.params[0];
            let v = f.fresh_value();
            f.push(fast, InstKind::Load { dest: v, ty: IrType::Ptr, ptr: Operand::Value(p) });
        });
        let clone = slow_clone_block(&module, &regions[0]);
        match &clone.instructions[0].kind {
            InstKind::Call { callee: Callee::Direct(name), .. } => assert_eq!(name, "_ITM_RU8"),
            other => panic!("expected read barrier, got {other:?}"),
        }
    }

    #[test]
    fn vector_stores_dispatch_to_m256() {
        let (module, regions) = lower(|f, fast| {
            let p = f.params[0];
            let v = f.fresh_value();
            let ty = IrType::Vector { elem: VecElem::F64, lanes: 4 };
            f.push(fast, InstKind::Load { dest: v, ty, ptr: Operand::Value(p) });
            f.push(fast, InstKind::Store { ty, value: Operand::Value(v), ptr: Operand::Value(p) });
        });
        let clone = slow_clone_block(&module, &regions[0]);
        match &clone.instructions[1].kind {
            InstKind::Call { callee: Callee::Direct(name), .. } => assert_eq!(name, "_ITM_WM256d"),
            other => panic!("expected write barrier, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_type_is_left_intact_with_diagnostic() {
        let mut f = IrFunction::new("atomic", FnSig::new(IrType::Void, vec![IrType::Ptr]));
        let tx = f.add_block();
        let slow = f.add_block();
        let fast = f.add_block();
        let commit = f.add_block();
        f.push(tx, sentinel_call(itm::TX_BEGIN));
        f.set_terminator(
            tx,
            Terminator::CondBranch {
                cond: Operand::Const(IrConst::I32(0)),
                true_label: slow,
                false_label: fast,
            },
        );
        f.push(slow, sentinel_call(itm::SLOW_PATH_BEGIN));
        f.push(slow, sentinel_call(itm::SLOW_PATH_END));
        f.set_terminator(slow, Terminator::Branch(commit));
        let p = f.params[0];
        let v = f.fresh_value();
        f.push(fast, sentinel_call(itm::FAST_PATH_BEGIN));
        f.push(fast, InstKind::Load { dest: v, ty: IrType::I128, ptr: Operand::Value(p) });
        f.push(fast, sentinel_call(itm::FAST_PATH_END));
        f.set_terminator(fast, Terminator::Branch(commit));
        f.push(commit, sentinel_call(itm::TX_COMMIT));
        f.set_terminator(commit, Terminator::Return(None));

        let mut module = IrModule::new();
        module.functions.push(f);
        let mut diags = DiagnosticEngine::new();
        let mut regions = scan_function(&module.functions[0]).unwrap();
        slow_path::run(&mut module.functions[0], &mut regions, &mut diags);
        let info = LocalityInfo::default();
        run(&mut module, 0, &regions, &info, &mut diags);

        assert!(!diags.is_empty());
        let clone = slow_clone_block(&module, &regions[0]);
        assert!(matches!(clone.instructions[0].kind, InstKind::Load { .. }));
    }

    #[test]
    fn clone_function_bodies_are_instrumented_whole() {
        let mut f = IrFunction::new(
            itm::clone_name("helper"),
            FnSig::new(IrType::Void, vec![IrType::Ptr]),
        );
        let b = f.add_block();
        let p = f.params[0];
        let v = f.fresh_value();
        f.push(b, InstKind::Load { dest: v, ty: IrType::F64, ptr: Operand::Value(p) });
        f.set_terminator(b, Terminator::Return(None));

        let mut module = IrModule::new();
        module.functions.push(f);
        let mut diags = DiagnosticEngine::new();
        let info = LocalityInfo::default();
        assert!(run(&mut module, 0, &[], &info, &mut diags));

        match &module.functions[0].blocks[0].instructions[0].kind {
            InstKind::Call { callee: Callee::Direct(name), .. } => assert_eq!(name, "_ITM_RD"),
            other => panic!("expected read barrier, got {other:?}"),
        }
    }

    #[test]
    fn thread_local_store_is_logged_not_replaced() {
        // Allocate before the region; store through the pointer inside it.
        let mut f = IrFunction::new("atomic", FnSig::new(IrType::Void, vec![]));
        let entry = f.add_block();
        let tx = f.add_block();
        let slow = f.add_block();
        let fast = f.add_block();
        let commit = f.add_block();

        let p = f.fresh_value();
        f.push(
            entry,
            InstKind::Call {
                dest: Some(p),
                ret_ty: IrType::Ptr,
                callee: Callee::Direct("malloc".to_string()),
                args: vec![Operand::Const(IrConst::I64(64))],
                attrs: Attributes::empty(),
            },
        );
        f.set_terminator(entry, Terminator::Branch(tx));
        f.push(tx, sentinel_call(itm::TX_BEGIN));
        f.set_terminator(
            tx,
            Terminator::CondBranch {
                cond: Operand::Const(IrConst::I32(0)),
                true_label: slow,
                false_label: fast,
            },
        );
        f.push(slow, sentinel_call(itm::SLOW_PATH_BEGIN));
        f.push(slow, sentinel_call(itm::SLOW_PATH_END));
        f.set_terminator(slow, Terminator::Branch(commit));
        f.push(fast, sentinel_call(itm::FAST_PATH_BEGIN));
        f.push(
            fast,
            InstKind::Store { ty: IrType::I32, value: Operand::Const(IrConst::I32(7)), ptr: Operand::Value(p) },
        );
        f.push(fast, sentinel_call(itm::FAST_PATH_END));
        f.set_terminator(fast, Terminator::Branch(commit));
        f.push(commit, sentinel_call(itm::TX_COMMIT));
        f.set_terminator(commit, Terminator::Return(None));

        let mut module = IrModule::new();
        module.functions.push(f);
        let mut diags = DiagnosticEngine::new();
        let mut regions = scan_function(&module.functions[0]).unwrap();
        slow_path::run(&mut module.functions[0], &mut regions, &mut diags);
        let dom = DomTree::dominators(&module.functions[0]);
        let postdom = DomTree::post_dominators(&module.functions[0]);
        let info = locality::analyze(&module.functions[0], &regions, &dom, &postdom);
        run(&mut module, 0, &regions, &info, &mut diags);

        let clone = slow_clone_block(&module, &regions[0]);
        match &clone.instructions[0].kind {
            InstKind::Call { callee: Callee::Direct(name), args, .. } => {
                assert_eq!(name, "_ITM_LU4");
                assert_eq!(args[0], Operand::Value(p));
            }
            other => panic!("expected log barrier, got {other:?}"),
        }
        // The store itself survives.
        assert!(matches!(clone.instructions[1].kind, InstKind::Store { .. }));
    }
}
