//! Dominator and post-dominator trees.
//!
//! Iterative immediate-dominator computation over a reverse-postorder
//! numbering (the Cooper-Harvey-Kennedy scheme). Post-dominators run the
//! same fixpoint on the reversed CFG, rooted at a virtual exit node that
//! joins every `Return`/`Unreachable` block, so functions with multiple
//! exits still get a single tree.

use crate::common::fx_hash::FxHashMap;
use crate::ir::cfg;
use crate::ir::ir::{BlockId, IrFunction, Terminator};

/// Virtual root of the post-dominator tree. Never a real block label.
pub const VIRTUAL_EXIT: BlockId = BlockId(u32::MAX);

/// A dominator tree (or post-dominator tree, when built over the reversed
/// CFG). Blocks unreachable from the root have no entry and neither
/// dominate nor are dominated by anything.
#[derive(Debug)]
pub struct DomTree {
    root: BlockId,
    idom: FxHashMap<BlockId, BlockId>,
    order: FxHashMap<BlockId, usize>,
}

struct Graph {
    root: BlockId,
    succs: FxHashMap<BlockId, Vec<BlockId>>,
    preds: FxHashMap<BlockId, Vec<BlockId>>,
}

impl Graph {
    fn forward(func: &IrFunction) -> Option<Graph> {
        let root = func.entry_block()?;
        let mut succs: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for block in &func.blocks {
            let targets = cfg::successors(&block.terminator);
            for target in &targets {
                preds.entry(*target).or_default().push(block.label);
            }
            succs.insert(block.label, targets);
        }
        Some(Graph { root, succs, preds })
    }

    /// The reversed CFG: edges flipped, rooted at [`VIRTUAL_EXIT`] with an
    /// edge to every exit block.
    fn reversed(func: &IrFunction) -> Option<Graph> {
        func.entry_block()?;
        let mut succs: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut exits = Vec::new();
        for block in &func.blocks {
            succs.entry(block.label).or_default();
            match &block.terminator {
                Terminator::Return(_) | Terminator::Unreachable => exits.push(block.label),
                term => {
                    for target in cfg::successors(term) {
                        succs.entry(target).or_default().push(block.label);
                        preds.entry(block.label).or_default().push(target);
                    }
                }
            }
        }
        for exit in &exits {
            preds.entry(*exit).or_default().push(VIRTUAL_EXIT);
        }
        succs.insert(VIRTUAL_EXIT, exits);
        Some(Graph { root: VIRTUAL_EXIT, succs, preds })
    }

    /// Reverse postorder from the root, iterative DFS with deterministic
    /// successor order.
    fn rpo(&self) -> Vec<BlockId> {
        let mut postorder = Vec::new();
        let mut state: FxHashMap<BlockId, usize> = FxHashMap::default();
        let mut stack = vec![self.root];
        state.insert(self.root, 0);
        while let Some(&node) = stack.last() {
            let next = state.get_mut(&node).expect("node on stack without state");
            let succs = self.succs.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if !state.contains_key(&succ) {
                    state.insert(succ, 0);
                    stack.push(succ);
                }
            } else {
                stack.pop();
                postorder.push(node);
            }
        }
        postorder.reverse();
        postorder
    }
}

impl DomTree {
    /// Dominator tree of `func`, rooted at the entry block.
    pub fn dominators(func: &IrFunction) -> DomTree {
        match Graph::forward(func) {
            Some(graph) => Self::build(&graph),
            None => DomTree {
                root: BlockId(0),
                idom: FxHashMap::default(),
                order: FxHashMap::default(),
            },
        }
    }

    /// Post-dominator tree of `func`, rooted at the virtual exit.
    pub fn post_dominators(func: &IrFunction) -> DomTree {
        match Graph::reversed(func) {
            Some(graph) => Self::build(&graph),
            None => DomTree {
                root: VIRTUAL_EXIT,
                idom: FxHashMap::default(),
                order: FxHashMap::default(),
            },
        }
    }

    fn build(graph: &Graph) -> DomTree {
        let rpo = graph.rpo();
        let order: FxHashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

        let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        idom.insert(graph.root, graph.root);

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let preds = graph.preds.get(&node).map(Vec::as_slice).unwrap_or(&[]);
                let mut new_idom: Option<BlockId> = None;
                for &pred in preds {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&node) != Some(&new_idom) {
                        idom.insert(node, new_idom);
                        changed = true;
                    }
                }
            }
        }

        DomTree { root: graph.root, idom, order }
    }

    /// Does `a` dominate `b`? (For a post-dominator tree: does `a`
    /// post-dominate `b`?) Reflexive; false whenever either block is
    /// unreachable from the tree's root.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.order.contains_key(&a) || !self.order.contains_key(&b) {
            return false;
        }
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            let parent = match self.idom.get(&cursor) {
                Some(p) => *p,
                None => return false,
            };
            if parent == cursor {
                return false; // reached the root
            }
            cursor = parent;
        }
    }

    /// Immediate dominator of `b`; `None` for the root and for blocks
    /// unreachable from the root.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        let parent = *self.idom.get(&b)?;
        if parent == b {
            None
        } else {
            Some(parent)
        }
    }
}

fn intersect(
    idom: &FxHashMap<BlockId, BlockId>,
    order: &FxHashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}
