//! Earliest free point per must-free variable (spec §4.A): the first
//! position where the variable is in `live_in` but not `live_out` — its
//! true last use on every path that reaches that point — provided that
//! point dominates every other block where the variable is used, so a
//! free inserted there can never run before some other use on some other
//! path. Falls back to region-exit freeing (the region engine's own
//! placement, spec §4.R) when no single block satisfies that.

use ahash::AHashMap;

use crate::cfg::{dominators, liveness, BlockId, Cfg, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreePoint {
    /// Free immediately after the variable's last use in this block.
    AfterLastUseIn(BlockId),
    /// No single block dominates every use; the region engine frees the
    /// whole region at scope exit instead.
    RegionExit,
}

/// Computes a [`FreePoint`] for every variable with `cfg.must_free[i]` set.
/// Must run after liveness and ownership refinement.
#[must_use]
pub fn compute(cfg: &Cfg, idom: &[Option<BlockId>]) -> AHashMap<VarId, FreePoint> {
    let last_use = liveness::last_use_points(cfg);

    // Candidate blocks: those where var is used and not in live_out, i.e.
    // the block is the true end of the variable's lifetime on some path.
    let mut candidates: AHashMap<VarId, Vec<BlockId>> = AHashMap::default();
    for &(block, var) in last_use.keys() {
        if !cfg.blocks[block.index()].live_out.contains(&var) {
            candidates.entry(var).or_default().push(block);
        }
    }

    let mut result = AHashMap::default();
    for i in 0..cfg.vars.len() {
        if !cfg.must_free[i] {
            continue;
        }
        let var = VarId(i as u32);
        let point = match candidates.get(&var) {
            None => FreePoint::RegionExit,
            Some(blocks) if blocks.len() == 1 => FreePoint::AfterLastUseIn(blocks[0]),
            Some(blocks) => {
                // A block qualifies only if it dominates every other
                // candidate, meaning every other path's last use already
                // ran by the time this one is reached.
                let dominating = blocks.iter().copied().find(|&candidate| {
                    blocks.iter().all(|&other| candidate == other || dominators::dominates(idom, candidate, other))
                });
                dominating.map_or(FreePoint::RegionExit, FreePoint::AfterLastUseIn)
            }
        };
        result.insert(var, point);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::{build::build_program, dominators as dom, liveness as live, ownership, scc},
        heap::Heap,
        intern::Symbols,
        pika::grammar::parse_program,
    };

    fn analyze(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (mut cfg, _w) = build_program(&forms, &heap, &symbols);
        live::compute(&mut cfg);
        scc::annotate(&mut cfg);
        ownership::refine(&mut cfg);
        cfg
    }

    #[test]
    fn straight_line_binding_frees_after_last_use() {
        let cfg = analyze("(let ((x (cons 1 2))) (+ 1 2))");
        let idom = dom::compute_idom(&cfg);
        let points = compute(&cfg, &idom);
        assert!(!points.is_empty());
    }
}
