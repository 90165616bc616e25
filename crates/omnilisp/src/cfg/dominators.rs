//! Cooper-Harvey-Kennedy iterative dominator computation (spec §4.A): "A
//! Simple, Fast Dominance Algorithm," used here instead of Lengauer-Tarjan
//! because it is a handful of lines and fast enough for the block counts a
//! single function body produces.

use ahash::AHashMap;

use crate::cfg::{BlockId, Cfg};

fn reverse_postorder(cfg: &Cfg) -> Vec<BlockId> {
    let mut visited = vec![false; cfg.blocks.len()];
    let mut postorder = Vec::with_capacity(cfg.blocks.len());
    let mut stack = vec![(cfg.entry, 0usize)];
    visited[cfg.entry.index()] = true;
    while let Some((block, child_idx)) = stack.pop() {
        let succs = &cfg.blocks[block.index()].succs;
        if child_idx < succs.len() {
            let next = succs[child_idx];
            stack.push((block, child_idx + 1));
            if !visited[next.index()] {
                visited[next.index()] = true;
                stack.push((next, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    postorder
}

/// Returns each block's immediate dominator; the entry block is its own
/// immediate dominator by convention.
#[must_use]
pub fn compute_idom(cfg: &Cfg) -> Vec<Option<BlockId>> {
    let rpo = reverse_postorder(cfg);
    let rpo_number: AHashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
    let n = cfg.blocks.len();
    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[cfg.entry.index()] = Some(cfg.entry.index());

    let intersect = |a0: usize, b0: usize, idom: &[Option<usize>]| -> usize {
        let (mut a, mut b) = (a0, b0);
        loop {
            while rpo_number[&BlockId(a as u32)] > rpo_number[&BlockId(b as u32)] {
                a = idom[a].expect("processed node has idom");
            }
            while rpo_number[&BlockId(b as u32)] > rpo_number[&BlockId(a as u32)] {
                b = idom[b].expect("processed node has idom");
            }
            if a == b {
                return a;
            }
        }
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &block in rpo.iter().filter(|&&b| b != cfg.entry) {
            let mut new_idom: Option<usize> = None;
            for &pred in &cfg.blocks[block.index()].preds {
                if idom[pred.index()].is_some() {
                    new_idom = Some(match new_idom {
                        None => pred.index(),
                        Some(cur) => intersect(cur, pred.index(), &idom),
                    });
                }
            }
            if let Some(ni) = new_idom {
                if idom[block.index()] != Some(ni) {
                    idom[block.index()] = Some(ni);
                    changed = true;
                }
            }
        }
    }
    idom.into_iter().map(|o| o.map(|i| BlockId(i as u32))).collect()
}

/// True if `a` dominates `b` (every path from entry to `b` passes through `a`).
#[must_use]
pub fn dominates(idom: &[Option<BlockId>], a: BlockId, mut b: BlockId) -> bool {
    loop {
        if a == b {
            return true;
        }
        match idom[b.index()] {
            Some(next) if next != b => b = next,
            _ => return false,
        }
    }
}

/// Nearest common dominator of `a` and `b`: the deepest block that
/// dominates both, found by walking `a`'s idom chain up to `entry` and
/// then walking `b`'s chain until it lands on a block `a` already
/// visited. Used by the region engine (spec §4.R) to place a region's
/// `region_create` at the latest point still guaranteed to precede every
/// definition of the region's members.
#[must_use]
pub fn nearest_common_dominator(idom: &[Option<BlockId>], entry: BlockId, a: BlockId, b: BlockId) -> BlockId {
    let mut ancestors = ahash::AHashSet::default();
    let mut cur = a;
    loop {
        ancestors.insert(cur);
        if cur == entry {
            break;
        }
        match idom[cur.index()] {
            Some(next) if next != cur => cur = next,
            _ => break,
        }
    }

    let mut cur = b;
    loop {
        if ancestors.contains(&cur) {
            return cur;
        }
        if cur == entry {
            return entry;
        }
        match idom[cur.index()] {
            Some(next) if next != cur => cur = next,
            _ => return entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::build::build_program, heap::Heap, intern::Symbols, pika::grammar::parse_program};

    #[test]
    fn join_block_is_dominated_by_entry_only() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program("(if 1 2 3)", &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (cfg, _warnings) = build_program(&forms, &heap, &symbols);
        let idom = compute_idom(&cfg);
        // The join block (last block created) is dominated by entry, but
        // not by either branch block individually, since both branches
        // reach it.
        let join = BlockId((cfg.blocks.len() - 1) as u32);
        assert!(dominates(&idom, cfg.entry, join));
    }
}
