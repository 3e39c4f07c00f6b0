//! The transactification pipeline.
//!
//! Per module: clone creation first, so call rewriting can resolve clone
//! names. Per function: region scan, slow-path synthesis, locality, barrier
//! and call rewriting, sentinel cleanup. Locality runs after slow-path
//! synthesis on purpose: the slow-path clones of allocator calls and of
//! their derived accesses are what the barrier rewriter consults, so they
//! are classified directly. Dominator and post-dominator trees are rebuilt
//! after synthesis, which invalidates the CFG.

pub mod barriers;
pub mod cleanup;
pub mod clone_registry;
pub mod replace_calls;
pub mod slow_path;

use crate::analysis::dominators::DomTree;
use crate::analysis::{locality, regions};
use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::ir::ir::IrModule;
use crate::itm;

/// What a pass leaves intact, for the host pass manager's caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preservation {
    /// No IR mutation; every analysis stays valid.
    All,
    /// Instructions changed but the block graph did not.
    Cfg,
    /// The block graph changed; dominance information is stale.
    Nothing,
}

/// Preservation hints, in pipeline order.
pub const CLONE_REGISTRY_PRESERVES: Preservation = Preservation::Cfg;
pub const SLOW_PATH_PRESERVES: Preservation = Preservation::Nothing;
pub const BARRIERS_PRESERVES: Preservation = Preservation::Cfg;
pub const REPLACE_CALLS_PRESERVES: Preservation = Preservation::Cfg;
pub const CLEANUP_PRESERVES: Preservation = Preservation::Cfg;

/// Driver options.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Dump each function after its pipeline run, at debug level.
    pub dump_ir: bool,
    /// Structurally verify the module after the whole run and report
    /// defects as errors.
    pub verify_output: bool,
}

/// Outcome of a whole-module run.
#[derive(Debug)]
pub struct PipelineResult {
    pub changed: bool,
    pub diagnostics: DiagnosticEngine,
}

/// Run the full pipeline over a module.
pub fn run_passes(module: &mut IrModule, config: &PipelineConfig) -> PipelineResult {
    let mut diags = DiagnosticEngine::new();
    let mut changed = clone_registry::run(module, &mut diags);

    // Clones appended by the registry are processed like any other
    // function, so their bodies get barriers too.
    for idx in 0..module.functions.len() {
        changed |= run_on_function(module, idx, config, &mut diags);
    }

    if config.verify_output {
        for defect in crate::ir::verify::verify_module(module) {
            diags.emit(Diagnostic::error(defect.function, defect.message));
        }
    }

    PipelineResult { changed, diagnostics: diags }
}

fn run_on_function(
    module: &mut IrModule,
    idx: usize,
    config: &PipelineConfig,
    diags: &mut DiagnosticEngine,
) -> bool {
    let func = &module.functions[idx];
    let name = func.name.clone();

    // Scanning happens before any mutation: a malformed function is
    // skipped whole, reporting no changes.
    let mut region_list = match regions::scan_function(func) {
        Ok(list) => list,
        Err(err) => {
            diags.report(&name, &err);
            return false;
        }
    };
    let in_clone = itm::is_clone_name(&name);
    if region_list.is_empty() && !in_clone {
        return false;
    }

    let mut changed = false;
    if !region_list.is_empty() {
        changed |= slow_path::run(&mut module.functions[idx], &mut region_list, diags);
    }

    let func = &module.functions[idx];
    let dom = DomTree::dominators(func);
    let postdom = DomTree::post_dominators(func);
    let locality = locality::analyze(func, &region_list, &dom, &postdom);

    changed |= barriers::run(module, idx, &region_list, &locality, diags);
    changed |= replace_calls::run(module, idx, &region_list, diags);
    changed |= cleanup::run(&mut module.functions[idx], &region_list);

    if config.dump_ir {
        tracing::debug!(function = %name, "after pipeline:\n{}", module.functions[idx]);
    }
    changed
}
