//! AST-to-CFG lowering (spec §4.A): gives `if`, `let`, `let*`, `letrec`,
//! `lambda`, and `set!` their prescribed basic-block shapes.
//!
//! Lowering is three-address-style: every value-producing position gets a
//! fresh [`VarId`], even a bare literal, so every later pass can treat
//! "the value of this subexpression" uniformly as a variable reference
//! rather than special-casing literals.

use ahash::AHashSet;
use indexmap::IndexMap;
use smallvec::smallvec;

use crate::{
    cfg::{BlockId, Cfg, EscapeClass, OwnershipClass, Stmt, StmtKind, VarId},
    errors::AnalysisWarning,
    heap::Heap,
    intern::{SymbolId, Symbols},
    value::Value,
};

fn decompose_list(heap: &Heap, mut v: Value) -> (Vec<Value>, Value) {
    let mut items = Vec::new();
    loop {
        match v {
            Value::Cons(id) => {
                let (car, cdr) = heap.get_cons(id);
                items.push(car.clone());
                v = cdr.clone();
            }
            other => return (items, other),
        }
    }
}

struct Builder<'a> {
    heap: &'a Heap,
    symbols: &'a Symbols,
    cfg: Cfg,
    current: BlockId,
    scope: Vec<IndexMap<SymbolId, VarId>>,
    /// Names of free references this builder could not resolve locally.
    /// For a nested (lambda-body) builder these are implicit captures,
    /// bound on first reference (see `lower_symbol_ref`); for the
    /// top-level builder they are genuinely unbound and only warned about.
    free_names: Vec<SymbolId>,
    is_nested: bool,
    warnings: Vec<AnalysisWarning>,
}

/// Builds the top-level program's `Cfg`, treating the whole program as a
/// zero-parameter lambda body.
#[must_use]
pub fn build_program(forms: &[Value], heap: &Heap, symbols: &Symbols) -> (Cfg, Vec<AnalysisWarning>) {
    let mut b = Builder {
        heap,
        symbols,
        cfg: Cfg::default(),
        current: BlockId(0),
        scope: vec![IndexMap::new()],
        free_names: Vec::new(),
        is_nested: false,
        warnings: Vec::new(),
    };
    b.current = b.cfg.new_block();
    b.cfg.entry = b.current;
    b.lower_body(forms);
    (b.cfg, b.warnings)
}

impl<'a> Builder<'a> {
    fn resolve(&self, name: SymbolId) -> Option<VarId> {
        for scope in self.scope.iter().rev() {
            if let Some(&v) = scope.get(&name) {
                return Some(v);
            }
        }
        None
    }

    fn bind(&mut self, name: SymbolId, var: VarId) {
        self.scope.last_mut().expect("at least one scope").insert(name, var);
    }

    fn fresh(&mut self, name: Option<SymbolId>) -> VarId {
        self.cfg.new_var(name, false)
    }

    fn lower_body(&mut self, forms: &[Value]) -> Option<VarId> {
        let mut last = None;
        for (i, form) in forms.iter().enumerate() {
            let v = self.lower_expr(form);
            if i + 1 == forms.len() {
                self.cfg.push_stmt(self.current, Stmt::new(None, smallvec![v], StmtKind::TailValue));
                self.cfg.join_escape(v, EscapeClass::ReturnOrClosure);
            }
            last = Some(v);
        }
        last
    }

    /// Lowers one expression, returning the `VarId` that holds its value.
    fn lower_expr(&mut self, expr: &Value) -> VarId {
        match expr {
            Value::Symbol(s) => self.lower_symbol_ref(*s),
            Value::Cons(_) => {
                let (items, tail) = decompose_list(self.heap, expr.clone());
                if !matches!(tail, Value::Nil) {
                    return self.lower_literal(None);
                }
                self.lower_list_form(&items)
            }
            other => self.lower_literal(Some(other.clone())),
        }
    }

    /// Lowers a literal-producing position. `value` is the originating
    /// `Value` when known (codegen emits the actual constant); callers that
    /// reach here via an error-recovery path (free variable, malformed
    /// `set!` target, and similar) pass `None` and get a placeholder
    /// `nothing` at codegen time instead.
    fn lower_literal(&mut self, value: Option<Value>) -> VarId {
        let v = self.fresh(None);
        let mut stmt = Stmt::new(Some(v), smallvec![], StmtKind::Literal);
        stmt.literal = value;
        self.cfg.push_stmt(self.current, stmt);
        v
    }

    /// Binds `name` here as an implicit capture, exactly like a parameter,
    /// so every reference to it resolves within this `Cfg`'s own var space
    /// instead of aliasing a `VarId` that belongs to the enclosing `Cfg`
    /// (spec §4.R relies on each `Cfg`'s vars being its own
    /// region-inference universe). Idempotent per name.
    fn bind_capture(&mut self, name: SymbolId) -> VarId {
        if let Some(&v) = self.scope.first().and_then(|s| s.get(&name)) {
            return v;
        }
        let var = self.fresh(Some(name));
        self.scope.first_mut().expect("at least one scope").insert(name, var);
        self.cfg.captured_vars.push(var);
        self.free_names.push(name);
        var
    }

    fn lower_symbol_ref(&mut self, name: SymbolId) -> VarId {
        if self.resolve(name).is_none() && self.is_nested {
            self.bind_capture(name);
        }
        if let Some(existing) = self.resolve(name) {
            let v = self.fresh(None);
            self.cfg.push_stmt(self.current, Stmt::new(Some(v), smallvec![existing], StmtKind::VarRef));
            return v;
        }
        self.warnings.push(AnalysisWarning::FreeVariable {
            pos: crate::errors::SourcePos::default(),
            name: self.symbols.resolve(name).to_owned(),
        });
        self.lower_literal(None)
    }

    fn lower_list_form(&mut self, items: &[Value]) -> VarId {
        let Some(Value::Symbol(head)) = items.first() else {
            return self.lower_call(items);
        };
        match self.symbols.resolve(*head) {
            // The quoted datum itself is the literal codegen must emit, so
            // `(quote x)`/`'x` carries `x`, not the wrapping form.
            "quote" | "quasiquote" | "type-literal" => self.lower_literal(items.get(1).cloned()),
            "if" => self.lower_if(&items[1..]),
            "let" => self.lower_let(&items[1..], false),
            "let*" => self.lower_let(&items[1..], true),
            "letrec" => self.lower_letrec(&items[1..]),
            "lambda" => self.lower_lambda(&items[1..]),
            "set!" => self.lower_set(&items[1..]),
            "begin" => self.lower_body(&items[1..]).unwrap_or_else(|| self.lower_literal(None)),
            _ => self.lower_call(items),
        }
    }

    fn lower_if(&mut self, rest: &[Value]) -> VarId {
        let cond_var = self.lower_expr(&rest[0]);
        self.cfg.push_stmt(self.current, Stmt::new(None, smallvec![cond_var], StmtKind::VarRef));
        let result = self.fresh(None);

        let then_block = self.cfg.new_block();
        let else_block = self.cfg.new_block();
        let join_block = self.cfg.new_block();
        self.cfg.link(self.current, then_block);
        self.cfg.link(self.current, else_block);

        self.current = then_block;
        let then_val = self.lower_expr(&rest[1]);
        self.cfg.push_stmt(self.current, Stmt::new(Some(result), smallvec![then_val], StmtKind::VarRef));
        self.cfg.link(self.current, join_block);

        self.current = else_block;
        let else_val = if rest.len() > 2 { self.lower_expr(&rest[2]) } else { self.lower_literal(Some(Value::Nothing)) };
        self.cfg.push_stmt(self.current, Stmt::new(Some(result), smallvec![else_val], StmtKind::VarRef));
        self.cfg.link(self.current, join_block);

        self.current = join_block;
        result
    }

    /// A binding whose right-hand side is itself a previously bound name
    /// transfers ownership out of that name: the source becomes
    /// `Transferred` (spec §4.A). Must run after the source name was bound
    /// and before anything later re-derives a class for it.
    fn transfer_ownership_if_bound_name(&mut self, rhs_expr: &Value) {
        if let Value::Symbol(name) = rhs_expr {
            if let Some(source) = self.resolve(*name) {
                self.cfg.ownership[source.index()] = OwnershipClass::Transferred;
            }
        }
    }

    fn lower_let(&mut self, rest: &[Value], sequential: bool) -> VarId {
        let bindings = self.heap.list_to_vec(&rest[0]).unwrap_or_default();
        self.scope.push(IndexMap::new());
        // Plain `let` evaluates every RHS against the *outer* scope, so we
        // must resolve them all before any binding becomes visible; `let*`
        // instead binds as it goes.
        let mut pending = Vec::new();
        for binding in &bindings {
            let pair = self.heap.list_to_vec(binding).unwrap_or_default();
            let name = match pair.first() {
                Some(Value::Symbol(s)) => *s,
                _ => continue,
            };
            if !sequential {
                // Evaluate against the scope as it stood before this `let`.
                self.scope.pop();
                self.transfer_ownership_if_bound_name(&pair[1]);
                let rhs = self.lower_expr(&pair[1]);
                self.scope.push(IndexMap::new());
                pending.push((name, rhs));
            } else {
                self.transfer_ownership_if_bound_name(&pair[1]);
                let rhs = self.lower_expr(&pair[1]);
                let var = self.fresh(Some(name));
                self.cfg.push_stmt(self.current, Stmt::new(Some(var), smallvec![rhs], StmtKind::VarRef));
                self.bind(name, var);
            }
        }
        for (name, rhs) in pending {
            let var = self.fresh(Some(name));
            self.cfg.push_stmt(self.current, Stmt::new(Some(var), smallvec![rhs], StmtKind::VarRef));
            self.bind(name, var);
        }
        let result = self.lower_body(&rest[1..]).unwrap_or_else(|| self.lower_literal(Some(Value::Nothing)));
        self.scope.pop();
        result
    }

    fn lower_letrec(&mut self, rest: &[Value]) -> VarId {
        let bindings = self.heap.list_to_vec(&rest[0]).unwrap_or_default();
        self.scope.push(IndexMap::new());
        let mut vars = Vec::new();
        // All names are declared before any RHS is lowered, so mutually
        // recursive references (classic letrec, e.g. even/odd) resolve.
        // Every letrec binding is unconditionally `Shared` (spec §4.A),
        // set here so the transfer-ownership pass below can still
        // override it to `Transferred` for any binding used as another
        // binding's direct alias, regardless of declaration order.
        for binding in &bindings {
            let pair = self.heap.list_to_vec(binding).unwrap_or_default();
            if let Some(Value::Symbol(name)) = pair.first() {
                let var = self.fresh(Some(*name));
                self.cfg.ownership[var.index()] = OwnershipClass::Shared;
                self.bind(*name, var);
                vars.push((*name, var, pair.get(1).cloned()));
            }
        }
        let group: AHashSet<VarId> = vars.iter().map(|(_, v, _)| *v).collect();
        for (_, var, rhs) in &vars {
            let Some(rhs) = rhs else { continue };
            self.transfer_ownership_if_bound_name(rhs);
            let rhs_var = self.lower_expr(rhs);
            self.cfg.push_stmt(self.current, Stmt::new(Some(*var), smallvec![rhs_var], StmtKind::VarRef));
            // A letrec binding whose RHS refers back into its own binding
            // group is a cycle candidate (spec §3 memory shape `cyclic`);
            // the region engine's VIG decides whether it actually needs a
            // weak edge (spec §4.R).
            if self.cfg.blocks[self.current.index()]
                .stmts
                .iter()
                .any(|s| s.uses.iter().any(|u| group.contains(u)))
            {
                self.cfg.cyclic_candidate[var.index()] = true;
            }
        }
        let result = self.lower_body(&rest[1..]).unwrap_or_else(|| self.lower_literal(Some(Value::Nothing)));
        self.scope.pop();
        result
    }

    fn lower_lambda(&mut self, rest: &[Value]) -> VarId {
        let (param_items, param_tail) = decompose_list(self.heap, rest[0].clone());
        let mut params = Vec::new();
        for p in &param_items {
            if let Value::Symbol(s) = p {
                params.push(*s);
            }
        }
        if let Value::Symbol(rest_name) = param_tail {
            params.push(rest_name);
        }

        let mut nested = Builder {
            heap: self.heap,
            symbols: self.symbols,
            cfg: Cfg::default(),
            current: BlockId(0),
            scope: vec![IndexMap::new()],
            free_names: Vec::new(),
            is_nested: true,
            warnings: Vec::new(),
        };
        nested.current = nested.cfg.new_block();
        nested.cfg.entry = nested.current;
        for p in &params {
            let var = nested.fresh(Some(*p));
            nested.bind(*p, var);
            nested.cfg.params.push(var);
        }
        nested.lower_body(&rest[1..]);

        // Captures are resolved against *this* (enclosing) builder's scope,
        // not the nested one: the nested Cfg only ever knows its captured
        // names, never the enclosing Cfg's VarIds.
        let free_names = nested.free_names.clone();
        let mut capture_uses = smallvec::SmallVec::<[VarId; 4]>::new();
        for name in &free_names {
            if let Some(var) = self.resolve(*name) {
                self.cfg.join_escape(var, EscapeClass::ReturnOrClosure);
                capture_uses.push(var);
            } else if !self.free_names.contains(name) && !self.is_nested {
                self.warnings.push(AnalysisWarning::FreeVariable {
                    pos: crate::errors::SourcePos::default(),
                    name: self.symbols.resolve(*name).to_owned(),
                });
            } else if self.is_nested {
                // Free two levels up: bind it as a capture of *this*
                // lambda too, so it threads outward to whichever scope
                // actually binds it, and the inner `ClosureCreate` can
                // reference this lambda's own copy of the captured value.
                let var = self.bind_capture(*name);
                self.cfg.join_escape(var, EscapeClass::ReturnOrClosure);
                capture_uses.push(var);
            }
        }
        self.warnings.extend(nested.warnings.iter().cloned());

        let nested_cfg = nested.cfg;
        let cfg_index = self.cfg.nested.len();
        self.cfg.nested.push(nested_cfg);
        let result = self.fresh(None);
        self.cfg.push_stmt(self.current, Stmt::new(Some(result), capture_uses, StmtKind::ClosureCreate { cfg_index }));
        result
    }

    fn lower_set(&mut self, rest: &[Value]) -> VarId {
        let Value::Symbol(name) = rest[0] else { return self.lower_literal(None) };
        let rhs = self.lower_expr(&rest[1]);
        match self.resolve(name) {
            Some(var) => {
                self.cfg.push_stmt(self.current, Stmt::new(Some(var), smallvec![rhs], StmtKind::Mutate));
                var
            }
            None => {
                self.warnings.push(AnalysisWarning::SetOnUnbound {
                    pos: crate::errors::SourcePos::default(),
                    name: self.symbols.resolve(name).to_owned(),
                });
                self.lower_literal(None)
            }
        }
    }

    fn lower_call(&mut self, items: &[Value]) -> VarId {
        // A statically-named head (the common case, `(+ a b)`/`(f x)`, any
        // global that isn't shadowed by a local binding) mangles directly
        // to `o_<name>(...)` at codegen time, so its own symbol position
        // carries no runtime value and is never lowered — only a locally
        // bound head (a parameter or `let`-bound closure) needs a `VarId`
        // for the indirect call through that value's closure pointer.
        let callee = match items.first() {
            Some(Value::Symbol(s)) if self.resolve(*s).is_some() => None,
            Some(Value::Symbol(s)) => Some(*s),
            _ => None,
        };
        let arg_items: &[Value] = if callee.is_some() { &items[1..] } else { items };
        let uses: smallvec::SmallVec<[VarId; 4]> = arg_items.iter().map(|it| self.lower_expr(it)).collect();
        for u in &uses {
            self.cfg.join_escape(*u, EscapeClass::Arg);
        }
        let result = self.fresh(None);
        let mut stmt = Stmt::new(Some(result), uses, StmtKind::Call);
        stmt.callee = callee;
        self.cfg.push_stmt(self.current, stmt);
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::{cfg::{Cfg, OwnershipClass}, heap::Heap, intern::Symbols, pika::grammar::parse_program};

    fn build(src: &str) -> Cfg {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty(), "{diags:?}");
        let (cfg, _warnings) = super::build_program(&forms, &heap, &symbols);
        cfg
    }

    #[test]
    fn every_letrec_binding_is_unconditionally_shared() {
        // Neither `even?` nor `odd?` refers back into its own binding group
        // from a direct statement in this block (the self-reference lives
        // inside each lambda's nested body), yet both must still be
        // `Shared` per spec §4.A's unconditional rule.
        let cfg = build(
            "(letrec ((even? (lambda (n) (if (= n 0) true (odd? (- n 1)))))
                      (odd?  (lambda (n) (if (= n 0) false (even? (- n 1))))))
               (even? 10))",
        );
        let letrec_vars: Vec<_> = cfg.vars.iter().enumerate().filter(|(_, v)| v.name.is_some()).collect();
        assert!(!letrec_vars.is_empty());
        for (i, _) in &letrec_vars {
            assert_eq!(cfg.ownership[*i], OwnershipClass::Shared);
        }
    }

    #[test]
    fn a_plain_let_binding_is_local_by_default() {
        let cfg = build("(let ((x 1)) x)");
        let x = cfg.vars.iter().position(|v| v.name.is_some()).expect("x is bound");
        assert_eq!(cfg.ownership[x], OwnershipClass::Local);
    }

    #[test]
    fn binding_a_name_to_another_bound_name_transfers_the_source() {
        // `y`'s right-hand side is the bare name `x`, so `x` is the source
        // of a transfer and must become `Transferred` (spec §4.A).
        let cfg = build("(let ((x 1)) (let ((y x)) y))");
        let x = cfg.vars.iter().position(|v| v.name.is_some()).expect("x is bound");
        assert_eq!(cfg.ownership[x], OwnershipClass::Transferred);
    }
}
