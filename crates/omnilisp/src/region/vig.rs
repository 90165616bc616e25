//! Variable Interaction Graph construction (spec §4.R).
//!
//! An edge connects a statement's defined variable to each variable it
//! uses: assignment and aliasing (`StmtKind::VarRef`/`Mutate`), structural
//! sharing and constructor coupling (`StmtKind::Call` — a call may well be
//! a container constructor, and this pass does not need to distinguish
//! that from an arbitrary call since both share a variable's lifetime the
//! same way), and closure capture (`StmtKind::ClosureCreate`). Connected
//! components of this graph become regions.
//!
//! A captured variable (bound by the *enclosing* scope, spec §4.A) is
//! never unioned into a component: it is a borrowed alias into the
//! enclosing `Cfg`'s own region, not a value this `Cfg` owns the lifetime
//! of, so it is excluded from this function's own region set entirely.

use ahash::AHashSet;

use crate::cfg::{Cfg, StmtKind, VarId};

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// One connected component: its member vars and the root index identifying it.
#[derive(Debug, Clone)]
pub struct Component {
    pub root: usize,
    pub members: Vec<VarId>,
}

/// Builds the VIG's edges and collapses it to connected components,
/// skipping any edge touching a captured variable. Returns one
/// [`Component`] per root, `members` in variable-id order.
#[must_use]
pub fn connected_components(cfg: &Cfg) -> Vec<Component> {
    let n = cfg.vars.len();
    let captured: AHashSet<VarId> = cfg.captured_vars.iter().copied().collect();
    let mut dsu = DisjointSet::new(n);

    for block in &cfg.blocks {
        for stmt in &block.stmts {
            let Some(def) = stmt.def else { continue };
            if captured.contains(&def) {
                continue;
            }
            if matches!(stmt.kind, StmtKind::TailValue) {
                continue;
            }
            for &u in &stmt.uses {
                if captured.contains(&u) {
                    continue;
                }
                dsu.union(def.0 as usize, u.0 as usize);
            }
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<VarId>> = std::collections::BTreeMap::new();
    for i in 0..n {
        if captured.contains(&VarId(i as u32)) {
            continue;
        }
        let root = dsu.find(i);
        groups.entry(root).or_default().push(VarId(i as u32));
    }
    groups.into_iter().map(|(root, members)| Component { root, members }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::build::build_program, heap::Heap, intern::Symbols, pika::grammar::parse_program};

    fn build(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        build_program(&forms, &heap, &symbols).0
    }

    #[test]
    fn aliased_variables_share_a_component() {
        let cfg = build("(let ((x 1) (y x)) y)");
        let components = connected_components(&cfg);
        let has_multi = components.iter().any(|c| c.members.len() > 1);
        assert!(has_multi, "x and y should end up in the same region");
    }

    #[test]
    fn unrelated_bindings_are_separate_components() {
        let cfg = build("(let ((x 1) (y 2)) 3)");
        let components = connected_components(&cfg);
        assert!(components.len() >= 2);
    }
}
