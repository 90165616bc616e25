//! Region inference and placement (spec §4.R). Builds the variable
//! interaction graph ([`vig`]), collapses it to connected components,
//! places each component's lifecycle calls via dominator analysis
//! ([`placement`]), and decides an escape-repair strategy ([`repair`])
//! for every member that actually escapes. [`stats`] gives each plan a
//! compile-time byte/chunk estimate, both for the debug quota check and
//! to feed the repair policy's threshold comparison.

pub mod placement;
pub mod repair;
pub mod stats;
pub mod vig;

use ahash::AHashMap;

use crate::{
    cfg::{dominators, freepoints, BlockId, Cfg, EscapeClass, VarId},
    context::CompileOptions,
    errors::RegionError,
};
use placement::{place, DestroyMode, RegionPlacement};
use repair::RepairStrategy;
use stats::RegionStats;
use vig::Component;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

/// One region's full compile-time plan (spec §4.R steps 1-4 plus escape
/// repair): its members, where to place `region_create`/`region_exit`/
/// `region_destroy_if_dead`, its byte/chunk estimate, and a repair
/// decision for every member whose escape class is not `None`.
#[derive(Debug, Clone)]
pub struct RegionPlan {
    pub id: RegionId,
    pub members: Vec<VarId>,
    pub placement: RegionPlacement,
    pub stats: RegionStats,
    pub free_points: AHashMap<VarId, freepoints::FreePoint>,
    pub repairs: AHashMap<VarId, RepairStrategy>,
}

/// Runs the full region-inference pipeline over one already-analyzed
/// `Cfg`. Each connected component of the variable interaction graph
/// becomes one [`RegionPlan`]. Use [`check_quota`] afterward if
/// `options.debug_region_quota` should be enforced.
pub fn infer_regions(cfg: &Cfg, options: &CompileOptions) -> Vec<RegionPlan> {
    let idom = dominators::compute_idom(cfg);
    let components = vig::connected_components(cfg);
    let free_points = freepoints::compute(cfg, &idom);

    components
        .into_iter()
        .enumerate()
        .map(|(i, component)| build_plan(cfg, RegionId(i as u32), component, &idom, &free_points, options))
        .collect()
}

/// Checks every plan's estimated size against the configured debug
/// quota. Kept separate from [`infer_regions`] so callers that don't want
/// the quota enforced (e.g. the REPL's `,expand`-style introspection) can
/// skip it.
///
/// # Errors
/// Returns the first [`RegionError::QuotaExceeded`] found.
pub fn check_quota(plans: &[RegionPlan], options: &CompileOptions) -> Result<(), RegionError> {
    let Some(limit) = options.debug_region_quota else { return Ok(()) };
    for plan in plans {
        if plan.stats.total_bytes > limit {
            return Err(RegionError::QuotaExceeded { region: plan.id.0, limit, used: plan.stats.total_bytes });
        }
    }
    Ok(())
}

fn build_plan(
    cfg: &Cfg,
    id: RegionId,
    component: Component,
    idom: &[Option<BlockId>],
    free_points: &AHashMap<VarId, freepoints::FreePoint>,
    options: &CompileOptions,
) -> RegionPlan {
    let mut placement = place(cfg, &component, idom);
    let region_stats = stats::estimate(cfg, &component);

    let mut repairs = AHashMap::default();
    let mut any_retain = false;
    for &var in &component.members {
        if cfg.escape[var.index()] == EscapeClass::None {
            continue;
        }
        let strategy = repair::select(region_stats.total_bytes, cfg.ownership[var.index()], options);
        any_retain |= strategy == RepairStrategy::Retain;
        repairs.insert(var, strategy);
    }
    if any_retain {
        placement.destroy_mode = DestroyMode::CheckExternalRc;
    }

    let own_free_points =
        component.members.iter().filter_map(|v| free_points.get(v).map(|p| (*v, *p))).collect();

    RegionPlan { id, members: component.members, placement, stats: region_stats, free_points: own_free_points, repairs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::build::build_program, cfg::liveness, cfg::ownership, cfg::scc, heap::Heap, intern::Symbols, pika::grammar::parse_program};

    fn analyze(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let (mut cfg, _w) = build_program(&forms, &heap, &symbols);
        liveness::compute(&mut cfg);
        scc::annotate(&mut cfg);
        ownership::refine(&mut cfg);
        cfg
    }

    #[test]
    fn every_variable_lands_in_exactly_one_plan() {
        let cfg = analyze("(let ((x 1) (y 2)) (+ x y))");
        let options = CompileOptions::default();
        let plans = infer_regions(&cfg, &options);
        let total_members: usize = plans.iter().map(|p| p.members.len()).sum();
        assert!(total_members <= cfg.vars.len());
        assert!(!plans.is_empty());
    }

    #[test]
    fn quota_check_is_opt_in() {
        let cfg = analyze("(let ((x 1)) x)");
        let mut options = CompileOptions::default();
        let plans = infer_regions(&cfg, &options);
        assert!(check_quota(&plans, &options).is_ok());
        options.debug_region_quota = Some(0);
        if plans.iter().any(|p| p.stats.total_bytes > 0) {
            assert!(check_quota(&plans, &options).is_err());
        }
    }
}
