//! Call replacement inside transactions.
//!
//! Over the same traversal as the barrier rewriter (slow-path subgraphs
//! plus whole clone bodies), every call is redirected into the runtime's
//! world:
//!
//! - direct calls to `transaction_safe` functions retarget their clone;
//! - `malloc`/`calloc`/`free` retarget `_ITM_malloc`/`_ITM_calloc`/
//!   `_ITM_free`, identical signatures;
//! - `memcpy`/`memmove`/`memset` (exact names or intrinsic variants) are
//!   rebuilt as three-argument `_ITM_mem*` calls and the originals deleted;
//! - indirect calls flagged `transaction_safe` resolve their target at run
//!   time through `_ITM_getTMCloneSafe`.
//!
//! A transaction-safe callee without a clone in the module is reported as
//! unresolvable and the call is left as-is.

use crate::analysis::regions::Region;
use crate::common::error::{DiagnosticEngine, TransactifyError};
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::common::types::IrType;
use crate::ir::cfg;
use crate::ir::ir::{
    get_or_insert_declaration, Attributes, BlockId, Callee, FnSig, InstKind, IrModule, Operand,
};
use crate::itm;

enum Edit {
    /// Retarget the call at `idx` to a named function.
    Redirect(String),
    /// Replace the call with a fresh three-argument runtime mem-op call.
    ReplaceMemOp { name: String, args: [Operand; 3] },
    /// Resolve the callee dynamically: insert a `_ITM_getTMCloneSafe` call
    /// and a bitcast, then call through the casted pointer.
    DynamicClone { target: Operand },
}

pub fn run(
    module: &mut IrModule,
    func_idx: usize,
    regions: &[Region],
    diags: &mut DiagnosticEngine,
) -> bool {
    // Symbol table snapshot: callee attributes and clone presence have to
    // be consulted while the function body is borrowed mutably.
    let symbols: FxHashMap<String, Attributes> = module
        .functions
        .iter()
        .map(|f| (f.name.clone(), f.attrs))
        .chain(module.declarations.iter().map(|d| (d.name.clone(), d.attrs)))
        .collect();
    let defined_clones: FxHashSet<String> = module
        .functions
        .iter()
        .filter(|f| itm::is_clone_name(&f.name))
        .map(|f| f.name.clone())
        .collect();

    let IrModule { ref mut functions, ref mut declarations, .. } = *module;
    let func = &mut functions[func_idx];

    let in_clone = itm::is_clone_name(&func.name);
    if regions.is_empty() && !in_clone {
        return false;
    }
    tracing::debug!(function = %func.name, "replacing calls inside transaction");

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
            let InstKind::Call { dest, callee, args, attrs, .. } = &inst.kind else { continue };
            match callee {
                Callee::Direct(name) => {
                    if itm::Sentinel::from_name(name).is_some() || name.starts_with("_ITM_") {
                        continue;
                    }
                    let callee_attrs = symbols.get(name.as_str()).copied();
                    if itm::is_clone_name(name) {
                        continue; // already redirected on an earlier run
                    }
                    if callee_attrs.is_some_and(|a| a.contains(Attributes::TRANSACTION_SAFE)) {
                        let clone = itm::clone_name(name);
                        if defined_clones.contains(&clone) {
                            edits.insert(idx, Edit::Redirect(clone));
                        } else {
                            diags.report(
                                &func.name,
                                &TransactifyError::UnresolvableCall { name: name.clone() },
                            );
                        }
                    } else if name == "malloc" || name == "calloc" || name == "free" {
                        let (replacement, sig) = match name.as_str() {
                            "malloc" => (itm::ITM_MALLOC, itm::malloc_sig()),
                            "calloc" => (itm::ITM_CALLOC, itm::calloc_sig()),
                            _ => (itm::ITM_FREE, itm::free_sig()),
                        };
                        declare_runtime(declarations, replacement, sig);
                        edits.insert(idx, Edit::Redirect(replacement.to_string()));
                    } else if let Some(mem_op) = mem_op_replacement(name) {
                        // The libc forms return a pointer; only the void
                        // intrinsic forms can be swapped out wholesale.
                        if dest.is_none() && args.len() >= 3 {
                            let (replacement, sig) = mem_op;
                            declare_runtime(declarations, replacement, sig);
                            edits.insert(
                                idx,
                                Edit::ReplaceMemOp {
                                    name: replacement.to_string(),
                                    args: [args[0].clone(), args[1].clone(), args[2].clone()],
                                },
                            );
                        }
                    }
                }
                Callee::Indirect(target) => {
                    if attrs.contains(Attributes::TRANSACTION_SAFE) {
                        declare_runtime(
                            declarations,
                            itm::GET_TM_CLONE_SAFE,
                            itm::get_tm_clone_safe_sig(),
                        );
                        edits.insert(idx, Edit::DynamicClone { target: target.clone() });
                    }
                }
            }
        }

        if edits.is_empty() {
            continue;
        }
        changed = true;

        let old = std::mem::take(&mut func.block_mut(label).instructions);
        let mut rebuilt = Vec::with_capacity(old.len() + edits.len());
        for (idx, mut inst) in old.into_iter().enumerate() {
            match edits.remove(&idx) {
                Some(Edit::Redirect(replacement)) => {
                    if let InstKind::Call { callee, .. } = &mut inst.kind {
                        tracing::trace!(function = %func.name, callee = %replacement, "redirected call");
                        *callee = Callee::Direct(replacement);
                    }
                    rebuilt.push(inst);
                }
                Some(Edit::ReplaceMemOp { name, args }) => {
                    rebuilt.push(func.make_inst(InstKind::Call {
                        dest: None,
                        ret_ty: IrType::Void,
                        callee: Callee::Direct(name),
                        args: args.to_vec(),
                        attrs: Attributes::empty(),
                    }));
                }
                Some(Edit::DynamicClone { target }) => {
                    let raw = func.fresh_value();
                    let casted = func.fresh_value();
                    rebuilt.push(func.make_inst(InstKind::Call {
                        dest: Some(raw),
                        ret_ty: IrType::Ptr,
                        callee: Callee::Direct(itm::GET_TM_CLONE_SAFE.to_string()),
                        args: vec![target],
                        attrs: Attributes::empty(),
                    }));
                    rebuilt.push(func.make_inst(InstKind::Bitcast {
                        dest: casted,
                        ty: IrType::Ptr,
                        src: Operand::Value(raw),
                    }));
                    if let InstKind::Call { callee, attrs, .. } = &mut inst.kind {
                        *callee = Callee::Indirect(Operand::Value(casted));
                        // Resolved now; a rerun must not instrument again.
                        attrs.remove(Attributes::TRANSACTION_SAFE);
                    }
                    rebuilt.push(inst);
                }
                None => rebuilt.push(inst),
            }
        }
        func.block_mut(label).instructions = rebuilt;
    }

    changed
}

fn mem_op_replacement(name: &str) -> Option<(&'static str, FnSig)> {
    if name == "memcpy" || name.contains("memcpy") {
        Some((itm::ITM_MEMCPY, itm::memcpy_sig()))
    } else if name == "memmove" || name.contains("memmove") {
        Some((itm::ITM_MEMMOVE, itm::memmove_sig()))
    } else if name == "memset" || name.contains("memset") {
        Some((itm::ITM_MEMSET, itm::memset_sig()))
    } else {
        None
    }
}

fn declare_runtime(declarations: &mut Vec<crate::ir::ir::FnDecl>, name: &str, sig: FnSig) {
    get_or_insert_declaration(declarations, name, sig, Attributes::NOINLINE);
}
