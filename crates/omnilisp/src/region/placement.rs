//! Dominator-based placement of `region_create`/`region_exit`/
//! `region_destroy_if_dead` (spec §4.R).
//!
//! `create_block` is the nearest common dominator of every block that
//! defines one of the region's member variables: the latest point still
//! guaranteed to run before any of them. `exit_block` is the first block
//! (in forward order from `create_block`) whose `live_out` no longer
//! intersects the region's members — sound because liveness is already a
//! whole-graph meet-over-all-paths fixpoint (spec §4.A), not a
//! single-path approximation, so the first such block really is dead on
//! every path from there on.

use std::collections::VecDeque;

use crate::{
    cfg::{dominators, BlockId, Cfg},
    region::vig::Component,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyMode {
    /// No escape repair was needed for any member: free unconditionally.
    Unconditional,
    /// At least one member went through `Retain` escape repair (spec
    /// §4.R); the emitted call checks the runtime's external-refcount
    /// bookkeeping before actually freeing.
    CheckExternalRc,
}

#[derive(Debug, Clone)]
pub struct RegionPlacement {
    pub create_block: BlockId,
    pub exit_block: BlockId,
    pub destroy_mode: DestroyMode,
}

fn def_blocks(cfg: &Cfg, var: crate::cfg::VarId) -> Vec<BlockId> {
    cfg.blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.stmts.iter().any(|s| s.def == Some(var)))
        .map(|(i, _)| BlockId(i as u32))
        .collect()
}

#[must_use]
pub fn place(cfg: &Cfg, component: &Component, idom: &[Option<BlockId>]) -> RegionPlacement {
    let mut all_def_blocks = Vec::new();
    for &var in &component.members {
        all_def_blocks.extend(def_blocks(cfg, var));
    }
    let create_block = all_def_blocks
        .into_iter()
        .reduce(|a, b| dominators::nearest_common_dominator(idom, cfg.entry, a, b))
        .unwrap_or(cfg.entry);

    let members: ahash::AHashSet<_> = component.members.iter().copied().collect();
    let mut visited = vec![false; cfg.blocks.len()];
    let mut queue = VecDeque::from([create_block]);
    visited[create_block.index()] = true;
    let mut exit_block = create_block;
    let mut found = false;
    while let Some(b) = queue.pop_front() {
        let block = &cfg.blocks[b.index()];
        if !block.live_out.iter().any(|v| members.contains(v)) {
            exit_block = b;
            found = true;
            break;
        }
        for &succ in &block.succs {
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                queue.push_back(succ);
            }
        }
    }
    if !found && !cfg.blocks.is_empty() {
        exit_block = BlockId((cfg.blocks.len() - 1) as u32);
    }

    RegionPlacement { create_block, exit_block, destroy_mode: DestroyMode::Unconditional }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::{build::build_program, liveness},
        heap::Heap,
        intern::Symbols,
        pika::grammar::parse_program,
        region::vig,
    };

    #[test]
    fn region_exits_after_last_use() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program("(let ((x 1)) (+ x x))", &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (mut cfg, _w) = build_program(&forms, &heap, &symbols);
        liveness::compute(&mut cfg);
        let idom = dominators::compute_idom(&cfg);
        let components = vig::connected_components(&cfg);
        for c in &components {
            let placement = place(&cfg, c, &idom);
            assert!(dominators::dominates(&idom, placement.create_block, placement.exit_block) || placement.create_block == placement.exit_block);
        }
    }
}
