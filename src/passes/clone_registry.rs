//! Transactional clone creation (module pass).
//!
//! Every non-empty `transaction_safe` function gets a deep clone named
//! `__transactional_clone.<name>` with the flag stripped; the (original,
//! clone) pairs are registered in the module clone table:
//!
//! - `__TMC_LIST__`: an array of `2N` function pointers alternating
//!   originals and clones, link-once linkage, section `.tm_clone_table`,
//!   pointer aligned.
//! - `__TMC_END__`: a zero-initialized length-2 sentinel with hidden
//!   visibility in the same section, delimiting the table for the runtime.
//!
//! Both globals join the module's `used` list so linker garbage collection
//! keeps them. Re-running the pass is a no-op: already-prefixed functions
//! are never cloned again, and an existing table is left alone.

use crate::common::error::{DiagnosticEngine, TransactifyError};
use crate::ir::clone::clone_function;
use crate::ir::ir::{
    Attributes, GlobalInit, GlobalVar, IrModule, Linkage, Visibility,
};
use crate::itm;

/// Pointer size on the 64-bit targets the runtime ABI covers.
const PTR_ALIGN: u32 = 8;

pub fn run(module: &mut IrModule, diags: &mut DiagnosticEngine) -> bool {
    let mut changed = false;
    let mut pairs: Vec<(String, String)> = Vec::new();

    let candidates: Vec<String> = module
        .functions
        .iter()
        .filter(|f| {
            !f.is_empty()
                && f.attrs.contains(Attributes::TRANSACTION_SAFE)
                && !itm::is_clone_name(&f.name)
        })
        .map(|f| f.name.clone())
        .collect();

    for name in candidates {
        let clone_name = itm::clone_name(&name);
        let original = module.function(&name).expect("candidate vanished");

        if let Some((existing_sig, _)) = module.signature_of(&clone_name) {
            if *existing_sig == original.sig {
                // Already cloned on an earlier run.
                pairs.push((name, clone_name));
            } else {
                diags.report(&name, &TransactifyError::CloneCollision { name: clone_name });
            }
            continue;
        }

        tracing::debug!(function = %name, clone = %clone_name, "creating transactional clone");
        let mut clone = clone_function(original, clone_name.clone());
        clone.attrs.remove(Attributes::TRANSACTION_SAFE);
        module.functions.push(clone);
        pairs.push((name, clone_name));
        changed = true;
    }

    if pairs.is_empty() {
        return changed;
    }

    // Emit the discovery table once per module.
    if module.global(itm::CLONE_TABLE).is_none() {
        let mut entries = Vec::with_capacity(pairs.len() * 2);
        for (original, clone) in &pairs {
            entries.push(original.clone());
            entries.push(clone.clone());
        }
        module.globals.push(GlobalVar {
            name: itm::CLONE_TABLE.to_string(),
            section: Some(itm::CLONE_TABLE_SECTION.to_string()),
            linkage: Linkage::LinkOnceAny,
            visibility: Visibility::Default,
            align: PTR_ALIGN,
            init: GlobalInit::FunctionPtrArray(entries),
        });
        module.globals.push(GlobalVar {
            name: itm::CLONE_TABLE_END.to_string(),
            section: Some(itm::CLONE_TABLE_SECTION.to_string()),
            linkage: Linkage::LinkOnceAny,
            visibility: Visibility::Hidden,
            align: PTR_ALIGN,
            init: GlobalInit::ZeroArray { len: 2 },
        });
        module.add_used(itm::CLONE_TABLE);
        module.add_used(itm::CLONE_TABLE_END);
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::IrType;
    use crate::ir::ir::{FnSig, IrFunction, Terminator};

    fn txsafe_func(name: &str) -> IrFunction {
        let mut f = IrFunction::new(name, FnSig::new(IrType::Void, vec![]));
        f.attrs.insert(Attributes::TRANSACTION_SAFE);
        let b = f.add_block();
        f.set_terminator(b, Terminator::Return(None));
        f
    }

    #[test]
    fn clones_and_registers_txsafe_functions() {
        let mut module = IrModule::new();
        module.functions.push(txsafe_func("foo"));
        module.functions.push(txsafe_func("bar"));
        let mut diags = DiagnosticEngine::new();

        assert!(run(&mut module, &mut diags));

        let foo_clone = module.function(&itm::clone_name("foo")).unwrap();
        assert!(!foo_clone.attrs.contains(Attributes::TRANSACTION_SAFE));

        let table = module.global(itm::CLONE_TABLE).unwrap();
        assert_eq!(table.section.as_deref(), Some(itm::CLONE_TABLE_SECTION));
        assert_eq!(table.linkage, Linkage::LinkOnceAny);
        match &table.init {
            GlobalInit::FunctionPtrArray(entries) => {
                assert_eq!(
                    entries,
                    &vec![
                        "foo".to_string(),
                        itm::clone_name("foo"),
                        "bar".to_string(),
                        itm::clone_name("bar"),
                    ]
                );
            }
            other => panic!("expected function pointer array, got {other:?}"),
        }

        let end = module.global(itm::CLONE_TABLE_END).unwrap();
        assert_eq!(end.visibility, Visibility::Hidden);
        assert_eq!(end.init, GlobalInit::ZeroArray { len: 2 });
        assert!(module.used.contains(&itm::CLONE_TABLE.to_string()));
        assert!(module.used.contains(&itm::CLONE_TABLE_END.to_string()));
        assert!(diags.is_empty());
    }

    #[test]
    fn empty_and_unflagged_functions_are_ignored() {
        let mut module = IrModule::new();
        let mut decl_like = IrFunction::new("ext", FnSig::new(IrType::Void, vec![]));
        decl_like.attrs.insert(Attributes::TRANSACTION_SAFE);
        module.functions.push(decl_like); // empty body
        module.functions.push({
            let mut f = IrFunction::new("plain", FnSig::new(IrType::Void, vec![]));
            let b = f.add_block();
            f.set_terminator(b, Terminator::Return(None));
            f
        });
        let mut diags = DiagnosticEngine::new();

        assert!(!run(&mut module, &mut diags));
        assert_eq!(module.functions.len(), 2);
        assert!(module.global(itm::CLONE_TABLE).is_none());
        assert!(module.global(itm::CLONE_TABLE_END).is_none());
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut module = IrModule::new();
        module.functions.push(txsafe_func("foo"));
        let mut diags = DiagnosticEngine::new();

        assert!(run(&mut module, &mut diags));
        let funcs_after_first = module.functions.len();
        let globals_after_first = module.globals.len();

        assert!(!run(&mut module, &mut diags));
        assert_eq!(module.functions.len(), funcs_after_first);
        assert_eq!(module.globals.len(), globals_after_first);
    }

    #[test]
    fn collision_with_different_signature_is_reported() {
        let mut module = IrModule::new();
        module.functions.push(txsafe_func("foo"));
        // A function already squatting on the clone name, different sig.
        module.functions.push({
            let mut f = IrFunction::new(
                itm::clone_name("foo"),
                FnSig::new(IrType::I32, vec![IrType::I32]),
            );
            let b = f.add_block();
            f.set_terminator(b, Terminator::Return(None));
            f
        });
        let mut diags = DiagnosticEngine::new();

        run(&mut module, &mut diags);
        assert!(diags.has_errors());
        // No pair was registered for the colliding function.
        assert!(module.global(itm::CLONE_TABLE).is_none());
    }
}
