//! Translates [`RegionPlan`]s into per-block events the function emitter
//! (`codegen::function`) can consume without re-deriving anything (spec
//! §4.G step "Region create at the dominator position … region exit /
//! destroy-if-dead at scope exit").
//!
//! A region whose every member is [`OwnershipClass::Borrowed`] owns no
//! allocation of its own — it is the variable-interaction-graph's
//! equivalence class for a set of aliased parameters, not a scope this
//! function is responsible for creating or tearing down (the caller's
//! frame owns that). Such plans are dropped before they ever reach the
//! emitter, so a generated function never calls `region_create`/
//! `region_exit` for memory it was only lent.

use ahash::AHashMap;

use crate::{
    cfg::{BlockId, Cfg, OwnershipClass, VarId},
    region::{placement::DestroyMode, repair::RepairStrategy, RegionId, RegionPlan},
};

#[derive(Debug, Clone, Default)]
pub struct RegionEvents {
    pub creates_at: AHashMap<BlockId, Vec<RegionId>>,
    pub exits_at: AHashMap<BlockId, Vec<RegionId>>,
    pub destroy_mode: AHashMap<RegionId, DestroyMode>,
    pub home_region: AHashMap<VarId, RegionId>,
    pub repairs: AHashMap<RegionId, Vec<(VarId, RepairStrategy)>>,
}

fn owns_allocation(cfg: &Cfg, plan: &RegionPlan) -> bool {
    plan.members.iter().any(|v| cfg.ownership[v.index()] != OwnershipClass::Borrowed)
}

/// Builds the event map for one `Cfg`'s already-computed region plans.
/// Plans that own nothing (pure borrow groupings, see module docs) are
/// excluded entirely: they contribute no entry to any of the returned maps.
#[must_use]
pub fn collect(cfg: &Cfg, plans: &[RegionPlan]) -> RegionEvents {
    let mut events = RegionEvents::default();
    for plan in plans {
        if !owns_allocation(cfg, plan) {
            continue;
        }
        events.creates_at.entry(plan.placement.create_block).or_default().push(plan.id);
        events.exits_at.entry(plan.placement.exit_block).or_default().push(plan.id);
        events.destroy_mode.insert(plan.id, plan.placement.destroy_mode);
        for &member in &plan.members {
            events.home_region.insert(member, plan.id);
        }
        if !plan.repairs.is_empty() {
            let list = plan.repairs.iter().map(|(&v, &s)| (v, s)).collect();
            events.repairs.insert(plan.id, list);
        }
    }
    for creates in events.creates_at.values_mut() {
        creates.sort_by_key(|r| r.0);
    }
    for exits in events.exits_at.values_mut() {
        exits.sort_by_key(|r| r.0);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::CompileOptions, heap::Heap, intern::Symbols, pika::grammar::parse_program, region::infer_regions};

    fn analyze(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        crate::cfg::analyze(&forms, &heap, &symbols).0
    }

    #[test]
    fn a_plan_of_only_borrowed_params_is_dropped() {
        let cfg = analyze("(lambda (x) x)");
        let nested = &cfg.nested[0];
        let options = CompileOptions::default();
        let plans = infer_regions(nested, &options);
        let events = collect(nested, &plans);
        assert!(events.creates_at.is_empty(), "a borrow-only region should never synthesize a create");
    }

    #[test]
    fn an_owned_allocation_gets_a_home_region() {
        let cfg = analyze("(let ((x (cons 1 2))) x)");
        let options = CompileOptions::default();
        let plans = infer_regions(&cfg, &options);
        let events = collect(&cfg, &plans);
        assert!(!events.home_region.is_empty());
    }
}
