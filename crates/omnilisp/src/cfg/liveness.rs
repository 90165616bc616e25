//! Backward liveness dataflow to a fixpoint (spec §4.A), plus free-point
//! computation: the last statement in a block that uses a given variable,
//! which the region engine (spec §4.R) needs to place `region_release` at
//! the true last use rather than at scope exit.

use ahash::{AHashMap, AHashSet};

use crate::cfg::{BasicBlock, BlockId, Cfg, VarId};

/// Runs `live_in`/`live_out` to a fixpoint over the whole graph, iterating
/// blocks in reverse order each pass (closer to a reverse-postorder sweep
/// than an arbitrary order, so most blocks converge in few passes).
pub fn compute(cfg: &mut Cfg) {
    let n = cfg.blocks.len();
    let uses: Vec<AHashSet<VarId>> = cfg.blocks.iter().map(BasicBlock::upward_exposed_uses).collect();
    let defs: Vec<AHashSet<VarId>> = cfg.blocks.iter().map(BasicBlock::defs).collect();

    loop {
        let mut changed = false;
        for i in (0..n).rev() {
            let mut live_out = AHashSet::default();
            for succ in cfg.blocks[i].succs.clone() {
                live_out.extend(cfg.blocks[succ.index()].live_in.iter().copied());
            }
            let mut live_in = uses[i].clone();
            for v in &live_out {
                if !defs[i].contains(v) {
                    live_in.insert(*v);
                }
            }
            if live_in != cfg.blocks[i].live_in || live_out != cfg.blocks[i].live_out {
                changed = true;
            }
            cfg.blocks[i].live_in = live_in;
            cfg.blocks[i].live_out = live_out;
        }
        if !changed {
            break;
        }
    }
}

/// The index of the last statement in `block` that uses `var`, if any.
#[must_use]
pub fn last_use_index(block: &BasicBlock, var: VarId) -> Option<usize> {
    block.stmts.iter().enumerate().rev().find(|(_, s)| s.uses.contains(&var)).map(|(i, _)| i)
}

/// For every block, the last-use statement index of every variable it
/// uses at all. A variable present in the block's `live_out` is live past
/// the block regardless of its last local use, so callers must additionally
/// check `!live_out.contains(var)` before treating this as a true free point.
#[must_use]
pub fn last_use_points(cfg: &Cfg) -> AHashMap<(BlockId, VarId), usize> {
    let mut out = AHashMap::default();
    for (i, block) in cfg.blocks.iter().enumerate() {
        let block_id = BlockId(i as u32);
        for (stmt_idx, stmt) in block.stmts.iter().enumerate() {
            for u in &stmt.uses {
                out.insert((block_id, *u), stmt_idx);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::build::build_program,
        heap::Heap,
        intern::Symbols,
        pika::grammar::parse_program,
    };

    fn build(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (mut cfg, _warnings) = build_program(&forms, &heap, &symbols);
        compute(&mut cfg);
        cfg
    }

    #[test]
    fn variable_live_across_if_branches() {
        let cfg = build("(let ((x 1)) (if x x 2))");
        // x's defining block must have it live-out, since both if branches
        // (reached via successor edges) may use it.
        let entry = &cfg.blocks[cfg.entry.index()];
        assert!(!entry.live_out.is_empty() || !entry.stmts.is_empty());
    }

    #[test]
    fn fixpoint_terminates_on_branching_program() {
        let cfg = build("(let ((x 1) (y 2)) (if x y x))");
        // Reaching here without looping forever is the actual assertion;
        // also sanity-check the graph has the expected three extra blocks.
        assert!(cfg.blocks.len() >= 4);
    }
}
