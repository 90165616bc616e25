//! Refines the analyzer's per-variable picture beyond the provisional
//! escape/ownership facts `build.rs` lowers directly (spec §4.A, §3):
//! memory shape (tree/dag/cyclic), whether this scope must free the
//! variable itself, and whether a cyclic variable is "static-symmetric" —
//! entirely contained, with no escape, inside the loop that creates it,
//! so the region engine can collapse it to an in-place free instead of
//! routing it through reference counting.
//!
//! Shape is an approximation: a true aliasing graph is the region
//! engine's variable interaction graph (spec §4.R), built later from the
//! same `def`/`uses` edges this pass already has access to. Here we only
//! need enough signal to decide `must_free` and `is_static_scc` without
//! waiting on that later pass.

use ahash::AHashMap;

use crate::cfg::{BlockId, Cfg, EscapeClass, MemoryShape, OwnershipClass, VarId};

/// `scc::annotate` only assigns a non-negative `scc_id` to blocks inside a
/// genuine (non-trivial or self-looping) SCC, so membership in a real loop
/// is just "not the sentinel".
fn block_in_real_loop(cfg: &Cfg, b: BlockId) -> bool {
    cfg.blocks[b.index()].scc_id >= 0
}

/// Populates `cfg.shape`, `cfg.must_free`, and `cfg.is_static_scc` from the
/// escape/ownership facts and SCC annotation already on `cfg`. Must run
/// after [`super::liveness::compute`] and [`super::scc::annotate`].
pub fn refine(cfg: &mut Cfg) {
    let mut first_def_block: AHashMap<VarId, BlockId> = AHashMap::default();
    let mut use_site_count: AHashMap<VarId, usize> = AHashMap::default();
    for (bi, block) in cfg.blocks.iter().enumerate() {
        for stmt in &block.stmts {
            if let Some(d) = stmt.def {
                first_def_block.entry(d).or_insert(BlockId(bi as u32));
            }
            for &u in &stmt.uses {
                *use_site_count.entry(u).or_insert(0) += 1;
            }
        }
    }

    for i in 0..cfg.vars.len() {
        let var = VarId(i as u32);

        let shape = if cfg.cyclic_candidate[i] {
            MemoryShape::Cyclic
        } else if use_site_count.get(&var).copied().unwrap_or(0) > 1 {
            MemoryShape::Dag
        } else {
            MemoryShape::Tree
        };
        cfg.shape[i] = shape;

        cfg.must_free[i] = matches!(cfg.ownership[i], OwnershipClass::Local | OwnershipClass::Shared)
            && cfg.escape[i] == EscapeClass::None;

        let in_real_loop = first_def_block.get(&var).is_some_and(|&b| block_in_real_loop(cfg, b));
        cfg.is_static_scc[i] = shape == MemoryShape::Cyclic && cfg.escape[i] == EscapeClass::None && in_real_loop;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cfg::{build::build_program, liveness, scc, MemoryShape},
        heap::Heap,
        intern::Symbols,
        pika::grammar::parse_program,
    };

    fn analyze(src: &str) -> crate::cfg::Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (mut cfg, _w) = build_program(&forms, &heap, &symbols);
        liveness::compute(&mut cfg);
        scc::annotate(&mut cfg);
        super::refine(&mut cfg);
        cfg
    }

    #[test]
    fn letrec_self_reference_is_cyclic() {
        let cfg = analyze("(letrec ((f (lambda (n) (f n)))) (f 1))");
        assert!(cfg.shape.iter().any(|s| *s == MemoryShape::Cyclic));
    }

    #[test]
    fn non_escaping_local_must_be_freed() {
        let cfg = analyze("(let ((x (cons 1 2))) 3)");
        assert!(cfg.must_free.iter().any(|&m| m));
    }
}
