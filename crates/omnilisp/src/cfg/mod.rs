//! Flow analysis over an explicit control-flow graph (spec §4.A).
//!
//! A [`Cfg`] is built per lambda body (and once for the top-level program,
//! treated as a zero-parameter lambda). Lowering works directly over the
//! expanded AST: each syntactic value-producing position gets a
//! three-address-style [`VarId`], so `if`/`let`/`let*`/`letrec`/`lambda`/
//! `set!` each get the prescribed block shape described in `build.rs`,
//! and every later pass (liveness, escape, dominators, region placement)
//! operates uniformly over `VarId`s and `BlockId`s rather than re-walking
//! the original `Value` tree.

pub mod build;
pub mod dominators;
pub mod freepoints;
pub mod liveness;
pub mod ownership;
pub mod scc;

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::{errors::AnalysisWarning, heap::Heap, intern::{SymbolId, Symbols}, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl VarId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: Option<SymbolId>,
    pub is_param: bool,
}

/// Escape classification, ordered `None < Arg < ReturnOrClosure < Global`
/// (spec §4.A). Facts from different use sites join to the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscapeClass {
    None,
    Arg,
    ReturnOrClosure,
    Global,
}

impl EscapeClass {
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Ownership classification (spec §3, §4.A). `build.rs` assigns the
/// definite classes directly while lowering: a `let` binding is `Local`, a
/// lambda parameter is `Borrowed`, every `letrec` binding is unconditionally
/// upgraded to `Shared` (spec §4.A: "`letrec` bindings are upgraded to
/// `shared`"), and a binding whose RHS is itself another bound name
/// transfers ownership — the source becomes `Transferred`. `Weak` is left
/// for the region engine (spec §4.R) to assign when it breaks a reference
/// cycle it finds in the variable interaction graph; nothing in the
/// analyzer itself produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipClass {
    Local,
    Borrowed,
    Transferred,
    Shared,
    Weak,
}

/// Aliasing shape a variable's value takes on, approximated from ownership
/// and use-site counts ahead of the region engine's own variable
/// interaction graph (spec §3, §4.A). `Cyclic` matches a `letrec`-style
/// self-reference; `Dag` a value read from more than one use site (shared
/// structure without a cycle); `Tree` everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryShape {
    Tree,
    Dag,
    Cyclic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    Literal,
    /// Re-reads an already-bound variable (e.g. the `x` in `(let ((y x)) ...)`).
    VarRef,
    Call,
    ClosureCreate { cfg_index: usize },
    Mutate,
    /// Marks the tail-position value of a lambda body: its defining var's
    /// escape class is joined with `ReturnOrClosure`.
    TailValue,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub def: Option<VarId>,
    pub uses: SmallVec<[VarId; 4]>,
    pub kind: StmtKind,
    /// The literal `Value` this statement materializes, when `kind` is
    /// [`StmtKind::Literal`] and the originating AST node was known at
    /// lowering time (codegen needs the actual constant to emit, not just
    /// the fact that a value is produced here).
    pub literal: Option<Value>,
    /// For `kind == StmtKind::Call` with a statically-known symbolic head
    /// (e.g. `(+ a b)`, not a computed closure call), the called name —
    /// codegen mangles this directly into `o_<name>(...)` instead of
    /// routing through a closure's function-pointer field.
    pub callee: Option<SymbolId>,
}

impl Stmt {
    #[must_use]
    pub fn new(def: Option<VarId>, uses: SmallVec<[VarId; 4]>, kind: StmtKind) -> Self {
        Self { def, uses, kind, literal: None, callee: None }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub stmts: Vec<Stmt>,
    pub succs: SmallVec<[BlockId; 2]>,
    pub preds: SmallVec<[BlockId; 2]>,
    pub live_in: AHashSet<VarId>,
    pub live_out: AHashSet<VarId>,
    /// Id of this block's strongly-connected component, or `-1` if it
    /// belongs to no non-trivial SCC (spec §3: "strongly-connected-
    /// component identifier (−1 if not in any non-trivial SCC)"), written
    /// by [`scc::annotate`]. A singleton, non-looping block keeps this
    /// sentinel rather than being assigned a component of its own.
    pub scc_id: i64,
    /// True only for the header of a genuine (non-trivial or self-looping)
    /// SCC — the one block reached from outside the component — written
    /// by [`scc::annotate`]. False for every block not in a real cycle.
    pub is_scc_entry: bool,
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self {
            stmts: Vec::new(),
            succs: SmallVec::new(),
            preds: SmallVec::new(),
            live_in: AHashSet::default(),
            live_out: AHashSet::default(),
            scc_id: -1,
            is_scc_entry: false,
        }
    }
}

impl BasicBlock {
    /// Variables defined anywhere in this block.
    #[must_use]
    pub fn defs(&self) -> AHashSet<VarId> {
        self.stmts.iter().filter_map(|s| s.def).collect()
    }

    /// Variables used in this block before any local redefinition
    /// (the standard "upward exposed uses" set liveness needs).
    #[must_use]
    pub fn upward_exposed_uses(&self) -> AHashSet<VarId> {
        let mut defined_so_far = AHashSet::default();
        let mut uses = AHashSet::default();
        for stmt in &self.stmts {
            for u in &stmt.uses {
                if !defined_so_far.contains(u) {
                    uses.insert(*u);
                }
            }
            if let Some(d) = stmt.def {
                defined_so_far.insert(d);
            }
        }
        uses
    }
}

/// One function's (or the top-level program's) control-flow graph.
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    pub vars: Vec<VarInfo>,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub params: Vec<VarId>,
    pub escape: Vec<EscapeClass>,
    pub ownership: Vec<OwnershipClass>,
    pub shape: Vec<MemoryShape>,
    /// True when this scope owns the variable's value outright and it
    /// never escapes, so a plain free belongs at its free point rather
    /// than a region-exit or escape-repair call (spec §4.A, §4.R).
    pub must_free: Vec<bool>,
    /// True for a `letrec` binding whose right-hand side refers back into
    /// its own binding group, i.e. a genuine self/mutual-reference cycle
    /// (spec §3: memory shape `cyclic`), set while lowering in
    /// [`build::Builder::lower_letrec`]. This is independent of
    /// `ownership` — a `letrec` binding is always `Shared` regardless of
    /// whether it actually cycles — and is the signal [`ownership::refine`]
    /// uses to classify `MemoryShape::Cyclic`.
    pub cyclic_candidate: Vec<bool>,
    /// True for a cyclic, non-escaping variable whose every member dies
    /// inside the loop that defines it (spec §3's "static-symmetric"
    /// case) — the region engine can free the whole cycle in place
    /// instead of routing it through reference counting.
    pub is_static_scc: Vec<bool>,
    /// Transient: set by the region engine while a borrow's epoch tether
    /// is open (spec §4.R's epoch-tethered borrowing), cleared once the
    /// tether ends. Starts false for every variable.
    pub tethered: Vec<bool>,
    /// Nested closures captured while lowering this body, in creation order.
    pub nested: Vec<Cfg>,
    /// Vars that stand in for a value captured from an enclosing scope
    /// (bound here like a parameter, but owned by the outer region, not
    /// this one). The region engine excludes these from this `Cfg`'s own
    /// connected-components pass (spec §4.R).
    pub captured_vars: Vec<VarId>,
}

impl Cfg {
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        id
    }

    pub fn new_var(&mut self, name: Option<SymbolId>, is_param: bool) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarInfo { name, is_param });
        self.escape.push(EscapeClass::None);
        self.ownership.push(if is_param { OwnershipClass::Borrowed } else { OwnershipClass::Local });
        self.shape.push(MemoryShape::Tree);
        self.must_free.push(false);
        self.cyclic_candidate.push(false);
        self.is_static_scc.push(false);
        self.tethered.push(false);
        id
    }

    pub fn join_escape(&mut self, var: VarId, class: EscapeClass) {
        self.escape[var.index()] = self.escape[var.index()].join(class);
    }

    pub fn link(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    pub fn push_stmt(&mut self, block: BlockId, stmt: Stmt) {
        self.blocks[block.index()].stmts.push(stmt);
    }
}

/// Builds and fully analyzes the program: CFG construction, then liveness
/// to a fixpoint, applied recursively to every nested closure body.
#[must_use]
pub fn analyze(forms: &[Value], heap: &Heap, symbols: &Symbols) -> (Cfg, Vec<AnalysisWarning>) {
    let (mut cfg, warnings) = build::build_program(forms, heap, symbols);
    analyze_recursive(&mut cfg);
    (cfg, warnings)
}

fn analyze_recursive(cfg: &mut Cfg) {
    liveness::compute(cfg);
    scc::annotate(cfg);
    ownership::refine(cfg);
    for nested in &mut cfg.nested {
        analyze_recursive(nested);
    }
}
