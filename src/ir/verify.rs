//! Structural verification of a module.
//!
//! The passes do heavy block surgery; the verifier catches the mistakes
//! that would otherwise surface as miscompiles much later: branches to
//! labels that do not exist, duplicate block labels or instruction ids,
//! values defined more than once, and direct calls to symbols the module
//! knows nothing about. Verification is diagnostic-only and is wired to a
//! driver flag; it never mutates the IR.

use crate::common::fx_hash::FxHashSet;
use crate::ir::cfg;
use crate::ir::ir::{Callee, InstKind, IrFunction, IrModule, Operand, Value};
use crate::itm;

/// A structural defect, formatted for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub function: String,
    pub message: String,
}

/// Verify every function in `module`. Returns all defects found.
pub fn verify_module(module: &IrModule) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    for func in &module.functions {
        verify_function(func, &mut errors);

        // Direct callees must resolve to a definition, a declaration, or a
        // runtime/sentinel name the pipeline itself introduces.
        for block in &func.blocks {
            for inst in &block.instructions {
                if let InstKind::Call { callee: Callee::Direct(name), .. } = &inst.kind {
                    let known = module.has_symbol(name)
                        || name.starts_with("_ITM_")
                        || itm::Sentinel::from_name(name).is_some();
                    if !known {
                        errors.push(VerifyError {
                            function: func.name.clone(),
                            message: format!("call to unknown symbol '@{name}'"),
                        });
                    }
                }
            }
        }
    }
    errors
}

fn verify_function(func: &IrFunction, errors: &mut Vec<VerifyError>) {
    let mut report = |message: String| {
        errors.push(VerifyError { function: func.name.clone(), message });
    };

    let mut labels = FxHashSet::default();
    for block in &func.blocks {
        if !labels.insert(block.label) {
            report(format!("duplicate block label bb{}", block.label.0));
        }
    }

    let mut defined: FxHashSet<Value> = func.params.iter().copied().collect();
    let mut inst_ids = FxHashSet::default();
    for block in &func.blocks {
        for inst in &block.instructions {
            if !inst_ids.insert(inst.id) {
                report(format!("duplicate instruction id {}", inst.id.0));
            }
            if let Some(dest) = inst.kind.dest() {
                if !defined.insert(dest) {
                    report(format!("value %v{} defined more than once", dest.0));
                }
            }
        }
        for succ in cfg::successors(&block.terminator) {
            if !labels.contains(&succ) {
                report(format!(
                    "bb{} branches to missing block bb{}",
                    block.label.0, succ.0
                ));
            }
        }
    }

    // Uses must name defined values. Dominance of definitions over uses is
    // deliberately not checked here; only whole-function availability.
    for block in &func.blocks {
        for inst in &block.instructions {
            inst.kind.for_each_operand(|op| {
                if let Operand::Value(v) = op {
                    if !defined.contains(v) {
                        report(format!("use of undefined value %v{}", v.0));
                    }
                }
            });
        }
        block.terminator.for_each_operand(|op| {
            if let Operand::Value(v) = op {
                if !defined.contains(v) {
                    report(format!("use of undefined value %v{}", v.0));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::IrType;
    use crate::ir::ir::{Attributes, BlockId, FnSig, Terminator};

    fn well_formed() -> IrModule {
        let mut f = IrFunction::new("ok", FnSig::new(IrType::Void, vec![IrType::Ptr]));
        let b0 = f.add_block();
        let b1 = f.add_block();
        let p = f.params[0];
        let v = f.fresh_value();
        f.push(b0, InstKind::Load { dest: v, ty: IrType::I32, ptr: Operand::Value(p) });
        f.set_terminator(b0, Terminator::Branch(b1));
        f.set_terminator(b1, Terminator::Return(None));
        let mut module = IrModule::new();
        module.functions.push(f);
        module
    }

    #[test]
    fn clean_module_verifies() {
        assert!(verify_module(&well_formed()).is_empty());
    }

    #[test]
    fn dangling_branch_is_reported() {
        let mut module = well_formed();
        let b0 = module.functions[0].entry_block().unwrap();
        module.functions[0].set_terminator(b0, Terminator::Branch(BlockId(99)));
        let errors = verify_module(&module);
        assert!(errors.iter().any(|e| e.message.contains("missing block")));
    }

    #[test]
    fn undefined_value_use_is_reported() {
        let mut module = well_formed();
        let f = &mut module.functions[0];
        let b0 = f.entry_block().unwrap();
        f.push(
            b0,
            InstKind::Store {
                ty: IrType::I32,
                value: Operand::Value(Value(42)),
                ptr: Operand::Value(Value(0)),
            },
        );
        let errors = verify_module(&module);
        assert!(errors.iter().any(|e| e.message.contains("undefined value")));
    }

    #[test]
    fn unknown_callee_is_reported_but_runtime_names_pass() {
        let mut module = well_formed();
        let f = &mut module.functions[0];
        let b0 = f.entry_block().unwrap();
        f.push(
            b0,
            InstKind::Call {
                dest: None,
                ret_ty: IrType::Void,
                callee: Callee::Direct("_ITM_WU4".to_string()),
                args: vec![],
                attrs: Attributes::empty(),
            },
        );
        f.push(
            b0,
            InstKind::Call {
                dest: None,
                ret_ty: IrType::Void,
                callee: Callee::Direct("nowhere".to_string()),
                args: vec![],
                attrs: Attributes::empty(),
            },
        );
        let errors = verify_module(&module);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("nowhere"));
    }
}
