//! Compile-time byte/chunk accounting estimate for a region (spec §4.R's
//! "Accounting" paragraph): bytes, chunk count, and a per-kind breakdown.
//! Grounded on the teacher's runtime `HeapStats`/`HeapDiff` pair, but
//! computed statically from a region's member variables and the
//! statements that define them rather than sampled from a live heap —
//! the real runtime layout lives outside this crate (spec §1).

use std::{collections::BTreeMap, fmt};

use ahash::AHashSet;

use crate::{
    cfg::{Cfg, StmtKind, VarId},
    region::vig::Component,
};

/// Conservative placeholder per-allocation sizes, standing in for the
/// runtime's actual struct layout.
const CONS_BYTES: usize = 24;
const CLOSURE_BYTES: usize = 48;
const DEFAULT_BYTES: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub member_count: usize,
    pub total_bytes: usize,
    pub chunk_count: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
}

impl RegionStats {
    #[must_use]
    pub fn diff(&self, other: &Self) -> RegionDiff {
        RegionDiff {
            member_count: other.member_count as isize - self.member_count as isize,
            total_bytes: other.total_bytes as isize - self.total_bytes as isize,
            chunk_count: other.chunk_count as isize - self.chunk_count as isize,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionDiff {
    pub member_count: isize,
    pub total_bytes: isize,
    pub chunk_count: isize,
}

impl RegionDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.member_count == 0 && self.total_bytes == 0 && self.chunk_count == 0
    }
}

impl fmt::Display for RegionDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(no change)");
        }
        if self.member_count != 0 {
            writeln!(f, "members: {:+}", self.member_count)?;
        }
        if self.total_bytes != 0 {
            writeln!(f, "bytes: {:+}", self.total_bytes)?;
        }
        if self.chunk_count != 0 {
            writeln!(f, "chunks: {:+}", self.chunk_count)?;
        }
        Ok(())
    }
}

/// Estimates a region's footprint from the statements that define its
/// members: a `ClosureCreate` costs more than a plain `Call`, and every
/// member contributes at least one chunk.
#[must_use]
pub fn estimate(cfg: &Cfg, component: &Component) -> RegionStats {
    let mut stats = RegionStats { member_count: component.members.len(), ..RegionStats::default() };
    let member_set: AHashSet<VarId> = component.members.iter().copied().collect();
    for block in &cfg.blocks {
        for stmt in &block.stmts {
            let Some(def) = stmt.def else { continue };
            if !member_set.contains(&def) {
                continue;
            }
            let (kind_name, size) = match stmt.kind {
                StmtKind::ClosureCreate { .. } => ("closure", CLOSURE_BYTES),
                StmtKind::Call => ("cons", CONS_BYTES),
                _ => ("scalar", DEFAULT_BYTES),
            };
            *stats.by_kind.entry(kind_name).or_insert(0) += 1;
            stats.total_bytes += size;
            stats.chunk_count += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_of_identical_stats_is_empty() {
        let a = RegionStats { member_count: 2, total_bytes: 48, chunk_count: 2, by_kind: BTreeMap::new() };
        assert!(a.diff(&a).is_empty());
    }

    #[test]
    fn diff_reports_growth() {
        let a = RegionStats::default();
        let b = RegionStats { member_count: 1, total_bytes: 24, chunk_count: 1, by_kind: BTreeMap::new() };
        let diff = a.diff(&b);
        assert_eq!(diff.total_bytes, 24);
        assert!(!diff.is_empty());
    }
}
