//! A tree-walking reference evaluator over the expanded AST (SPEC_FULL §3).
//!
//! Runs independently of the region engine and code generator: the REPL's
//! bare-expression feedback and `,time`, and the crate's end-to-end tests
//! (spec §8 scenarios), exercise this module rather than emitted C. Sharing
//! here is ordinary `Rc`-style structural sharing through the session
//! [`Heap`] — regions and reference counts are a property of *generated*
//! code (spec §4.X), not of this evaluator.
//!
//! Closures capture their defining environment by reference (stored in a
//! side table keyed by the closure's [`HeapId`], alongside the flat
//! snapshot [`Closure::captured`] the rest of the data model expects), so
//! mutual recursion (`letrec`, internal `define`) and `set!` across a
//! closure boundary both work the way a Scheme reader would expect. This
//! is a genuine divergence from the code generator, which treats
//! `quasiquote` as an opaque literal (see `cfg::build::lower_list_form`)
//! and never reconstructs `unquote` splices at all; this evaluator
//! implements `quasiquote`/`unquote`/`unquote-splicing` in full, since nothing
//! about the reference-evaluator contract in SPEC_FULL §3 excuses the gap.
//! See DESIGN.md.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    errors::{EvalError, SourcePos},
    forms,
    heap::{Closure, Heap, HeapData, Kind, OArray, ODict, UserInstance},
    intern::{SymbolId, Symbols},
    value::{HeapId, Value},
};

type EnvRef = Rc<RefCell<EnvFrame>>;

#[derive(Debug, Default)]
struct EnvFrame {
    bindings: AHashMap<SymbolId, Value>,
    parent: Option<EnvRef>,
}

fn new_frame(parent: Option<EnvRef>) -> EnvRef {
    Rc::new(RefCell::new(EnvFrame { bindings: AHashMap::default(), parent }))
}

fn env_get(env: &EnvRef, name: SymbolId) -> Option<Value> {
    let frame = env.borrow();
    if let Some(v) = frame.bindings.get(&name) {
        return Some(v.clone());
    }
    frame.parent.as_ref().and_then(|p| env_get(p, name))
}

fn env_define(env: &EnvRef, name: SymbolId, value: Value) {
    env.borrow_mut().bindings.insert(name, value);
}

fn env_set(env: &EnvRef, name: SymbolId, value: Value) -> bool {
    if env.borrow().bindings.contains_key(&name) {
        env.borrow_mut().bindings.insert(name, value);
        return true;
    }
    let parent = env.borrow().parent.clone();
    match parent {
        Some(p) => env_set(&p, name, value),
        None => false,
    }
}

/// Owns the live state a single evaluation session needs beyond the
/// compile-session [`Heap`]/[`Symbols`] it's handed: the global frame and
/// the closure-environment side table.
pub struct Evaluator<'a> {
    heap: &'a mut Heap,
    symbols: &'a mut Symbols,
    global: EnvRef,
    closure_envs: AHashMap<HeapId, EnvRef>,
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub fn new(heap: &'a mut Heap, symbols: &'a mut Symbols) -> Self {
        Self { heap, symbols, global: new_frame(None), closure_envs: AHashMap::default() }
    }

    fn resume(heap: &'a mut Heap, symbols: &'a mut Symbols, global: EnvRef, closure_envs: AHashMap<HeapId, EnvRef>) -> Self {
        Self { heap, symbols, global, closure_envs }
    }

    /// Evaluates each top-level form against the persistent global
    /// environment in order, returning the last one's value (spec §6:
    /// "without `-c` and without `-o`, compile and run"). A REPL driver
    /// calls this once per input line so `define`s accumulate across lines.
    pub fn eval_top(&mut self, forms: &[Value]) -> Result<Value, EvalError> {
        let global = self.global.clone();
        let mut last = Value::Nothing;
        for form in forms {
            last = self.eval(form, &global)?;
        }
        Ok(last)
    }

    fn eval(&mut self, expr: &Value, env: &EnvRef) -> Result<Value, EvalError> {
        match expr {
            Value::Symbol(s) => env_get(env, *s).ok_or_else(|| EvalError::UnboundVariable {
                pos: SourcePos::default(),
                name: self.symbols.resolve(*s).to_owned(),
            }),
            Value::Cons(id) => {
                let (car, cdr) = self.heap.get_cons(*id);
                let car = car.clone();
                let cdr = cdr.clone();
                self.eval_list(&car, &cdr, env)
            }
            // Every other variant is self-evaluating: immediates, and
            // heap-backed data a previous evaluation already constructed
            // (arrays, strings, closures, ...) re-entering `eval` verbatim,
            // e.g. as an argument already reduced by the caller.
            other => Ok(other.clone()),
        }
    }

    fn eval_list(&mut self, head: &Value, tail: &Value, env: &EnvRef) -> Result<Value, EvalError> {
        if let Value::Symbol(s) = head {
            let name = self.symbols.resolve(*s).to_owned();
            if let Some(items) = self.heap.list_to_vec(tail) {
                match name.as_str() {
                    "quote" => return Ok(items.first().cloned().unwrap_or(Value::Nil)),
                    "quasiquote" => {
                        let datum = items.first().cloned().unwrap_or(Value::Nil);
                        return self.eval_quasiquote(&datum, env, 1);
                    }
                    "unquote" | "unquote-splicing" => {
                        return Err(EvalError::Unsupported {
                            pos: SourcePos::default(),
                            what: "unquote outside quasiquote",
                        })
                    }
                    "if" => return self.eval_if(&items, env),
                    "let" => return self.eval_let(&items, env, false),
                    "let*" => return self.eval_let(&items, env, true),
                    "letrec" => return self.eval_letrec(&items, env),
                    "lambda" => return self.eval_lambda(&items, env, None),
                    "define" => return self.eval_define(&items, env),
                    "set!" => return self.eval_set(&items, env),
                    "begin" => return self.eval_body(&items, env),
                    "and" => return self.eval_and(&items, env),
                    "or" => return self.eval_or(&items, env),
                    "cond" => return self.eval_cond(&items, env),
                    "type-literal" => return self.eval_type_literal(&items),
                    "dict-literal" => return self.eval_dict_literal(&items, env),
                    "vector-literal" => return self.eval_vector_literal(&items, env),
                    "string-concat" => return self.eval_string_concat(&items, env),
                    _ if forms::CORE_PRIMITIVES.contains(&name.as_str()) => {
                        let args = items.iter().map(|a| self.eval(a, env)).collect::<Result<Vec<_>, _>>()?;
                        return self.apply_primitive(&name, args);
                    }
                    _ => {}
                }
            }
        }
        let callee = self.eval(head, env)?;
        let arg_items = self.heap.list_to_vec(tail).unwrap_or_default();
        let args = arg_items.iter().map(|a| self.eval(a, env)).collect::<Result<Vec<_>, _>>()?;
        self.apply(callee, args)
    }

    fn apply(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, EvalError> {
        let Value::Closure(id) = callee else {
            return Err(EvalError::TypeMismatch {
                pos: SourcePos::default(),
                expected: "closure",
                got: callee.type_name().to_owned(),
            });
        };
        let (params, rest_param, body) = {
            let HeapData::Closure(c) = self.heap.get(id) else { unreachable!("Closure HeapId must hold Closure") };
            (c.params.clone(), c.rest_param, c.body.clone())
        };
        let parent = self.closure_envs.get(&id).cloned().unwrap_or_else(|| self.global.clone());
        let frame = new_frame(Some(parent));
        self.bind_args(&params, rest_param, args, &frame)?;
        self.eval_body(&body, &frame)
    }

    fn bind_args(
        &mut self,
        params: &[SymbolId],
        rest_param: Option<SymbolId>,
        args: Vec<Value>,
        frame: &EnvRef,
    ) -> Result<(), EvalError> {
        if args.len() < params.len() || (rest_param.is_none() && args.len() > params.len()) {
            return Err(EvalError::TypeMismatch {
                pos: SourcePos::default(),
                expected: "matching argument count",
                got: format!("{} arguments for {} parameters", args.len(), params.len()),
            });
        }
        let mut args = args.into_iter();
        for &p in params {
            env_define(frame, p, args.next().expect("length checked above"));
        }
        if let Some(rest) = rest_param {
            let remaining: Vec<Value> = args.collect();
            env_define(frame, rest, self.heap.alloc_list(&remaining));
        }
        Ok(())
    }

    fn eval_body(&mut self, forms: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let mut last = Value::Nothing;
        for form in forms {
            last = self.eval(form, env)?;
        }
        Ok(last)
    }

    fn eval_if(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let cond = self.eval(&items[0], env)?;
        if cond.is_truthy() {
            self.eval(&items[1], env)
        } else if items.len() > 2 {
            self.eval(&items[2], env)
        } else {
            Ok(Value::Nothing)
        }
    }

    fn eval_let(&mut self, items: &[Value], env: &EnvRef, sequential: bool) -> Result<Value, EvalError> {
        let bindings = self.heap.list_to_vec(&items[0]).unwrap_or_default();
        let frame = new_frame(Some(env.clone()));
        // Plain `let` evaluates every RHS against the outer environment
        // before any binding becomes visible; `let*` binds as it goes, so
        // each RHS sees the ones before it (spec §9 glossary "let*").
        let eval_env = if sequential { &frame } else { env };
        for binding in &bindings {
            let pair = self.heap.list_to_vec(binding).unwrap_or_default();
            let Some(Value::Symbol(name)) = pair.first() else { continue };
            let rhs = pair.get(1).map_or(Ok(Value::Nothing), |rhs| self.eval(rhs, eval_env))?;
            env_define(&frame, *name, rhs);
        }
        self.eval_body(&items[1..], &frame)
    }

    fn eval_letrec(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let bindings = self.heap.list_to_vec(&items[0]).unwrap_or_default();
        let frame = new_frame(Some(env.clone()));
        let mut names = Vec::new();
        for binding in &bindings {
            let pair = self.heap.list_to_vec(binding).unwrap_or_default();
            if let Some(Value::Symbol(name)) = pair.first() {
                env_define(&frame, *name, Value::Nothing);
                names.push((*name, pair.get(1).cloned()));
            }
        }
        for (name, rhs) in names {
            let Some(rhs) = rhs else { continue };
            let value = self.eval(&rhs, &frame)?;
            env_define(&frame, name, value);
        }
        self.eval_body(&items[1..], &frame)
    }

    fn eval_lambda(&mut self, items: &[Value], env: &EnvRef, name: Option<SymbolId>) -> Result<Value, EvalError> {
        let (param_items, param_tail) = self.decompose_params(&items[0]);
        let body = items[1..].to_vec();
        let closure = Closure { name, params: param_items, rest_param: param_tail, body, captured: Default::default() };
        let id = self.heap.alloc(HeapData::Closure(closure));
        self.closure_envs.insert(id, env.clone());
        Ok(Value::Closure(id))
    }

    /// Splits a (possibly improper) parameter list into fixed params and an
    /// optional rest param named by the tail symbol, matching the CFG
    /// builder's own `lower_lambda` convention for `.`-tailed lambda lists.
    fn decompose_params(&self, list: &Value) -> (Vec<SymbolId>, Option<SymbolId>) {
        let mut params = Vec::new();
        let mut cur = list.clone();
        loop {
            match cur {
                Value::Nil => return (params, None),
                Value::Symbol(s) => return (params, Some(s)),
                Value::Cons(id) => {
                    let (car, cdr) = self.heap.get_cons(id);
                    if let Value::Symbol(s) = car {
                        params.push(*s);
                    }
                    cur = cdr.clone();
                }
                _ => return (params, None),
            }
        }
    }

    fn eval_define(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        match &items[0] {
            Value::Symbol(name) => {
                let value = items.get(1).map_or(Ok(Value::Nothing), |rhs| self.eval(rhs, env))?;
                if let Value::Closure(id) = &value {
                    if let HeapData::Closure(c) = self.heap.get_mut(*id) {
                        if c.name.is_none() {
                            c.name = Some(*name);
                        }
                    }
                }
                env_define(env, *name, value);
                Ok(Value::Symbol(*name))
            }
            // `(define (name . params) body...)` function shorthand.
            head @ (Value::Cons(_) | Value::Nil) => {
                let (header, tail) = self.decompose_params(head);
                let Some((&name, params)) = header.split_first() else {
                    return Err(EvalError::Unsupported { pos: SourcePos::default(), what: "anonymous define" });
                };
                let param_list = match tail {
                    Some(rest) => append_dotted(self.heap, params, rest),
                    None => self.heap.alloc_list(&params.iter().copied().map(Value::Symbol).collect::<Vec<_>>()),
                };
                let mut lambda_items = vec![param_list];
                lambda_items.extend(items[1..].iter().cloned());
                let value = self.eval_lambda(&lambda_items, env, Some(name))?;
                env_define(env, name, value);
                Ok(Value::Symbol(name))
            }
            _ => Err(EvalError::Unsupported { pos: SourcePos::default(), what: "malformed define" }),
        }
    }

    fn eval_set(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let Value::Symbol(name) = items[0] else {
            return Err(EvalError::Unsupported { pos: SourcePos::default(), what: "set! target must be a symbol" });
        };
        let value = self.eval(&items[1], env)?;
        if env_set(env, name, value) {
            Ok(Value::Nothing)
        } else {
            Err(EvalError::UnboundVariable { pos: SourcePos::default(), name: self.symbols.resolve(name).to_owned() })
        }
    }

    fn eval_and(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let mut last = Value::Bool(true);
        for item in items {
            last = self.eval(item, env)?;
            if !last.is_truthy() {
                return Ok(last);
            }
        }
        Ok(last)
    }

    fn eval_or(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        for item in items {
            let v = self.eval(item, env)?;
            if v.is_truthy() {
                return Ok(v);
            }
        }
        Ok(Value::Bool(false))
    }

    fn eval_cond(&mut self, clauses: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let else_sym = self.symbols.intern("else");
        for clause in clauses {
            let parts = self.heap.list_to_vec(clause).unwrap_or_default();
            let Some(test) = parts.first() else { continue };
            let matched = matches!(test, Value::Symbol(s) if *s == else_sym) || self.eval(test, env)?.is_truthy();
            if matched {
                return self.eval_body(&parts[1..], env);
            }
        }
        Ok(Value::Nothing)
    }

    fn eval_quasiquote(&mut self, expr: &Value, env: &EnvRef, depth: u32) -> Result<Value, EvalError> {
        match expr {
            Value::Cons(id) => {
                let (car, cdr) = self.heap.get_cons(*id);
                let car = car.clone();
                let cdr = cdr.clone();
                if let Value::Symbol(s) = &car {
                    let name = self.symbols.resolve(*s);
                    if name == "unquote" {
                        let inner = self.heap.list_to_vec(&cdr).and_then(|v| v.into_iter().next()).unwrap_or(Value::Nil);
                        return if depth == 1 {
                            self.eval(&inner, env)
                        } else {
                            let rebuilt = self.eval_quasiquote(&inner, env, depth - 1)?;
                            Ok(self.heap.alloc_list(&[Value::Symbol(*s), rebuilt]))
                        };
                    }
                    if name == "quasiquote" {
                        let inner = self.heap.list_to_vec(&cdr).and_then(|v| v.into_iter().next()).unwrap_or(Value::Nil);
                        let rebuilt = self.eval_quasiquote(&inner, env, depth + 1)?;
                        return Ok(self.heap.alloc_list(&[Value::Symbol(*s), rebuilt]));
                    }
                }
                if let Value::Cons(head_id) = &car {
                    let (head_head, head_tail) = self.heap.get_cons(*head_id);
                    let is_splice = matches!(head_head, Value::Symbol(s) if self.symbols.resolve(*s) == "unquote-splicing");
                    let head_tail = head_tail.clone();
                    if is_splice && depth == 1 {
                        let spliced_expr =
                            self.heap.list_to_vec(&head_tail).and_then(|v| v.into_iter().next()).unwrap_or(Value::Nil);
                        let spliced = self.eval(&spliced_expr, env)?;
                        let mut items = self.heap.list_to_vec(&spliced).unwrap_or_default();
                        let rest = self.eval_quasiquote(&cdr, env, depth)?;
                        let rest_items = self.heap.list_to_vec(&rest).unwrap_or_default();
                        items.extend(rest_items);
                        return Ok(self.heap.alloc_list(&items));
                    }
                }
                let car_out = self.eval_quasiquote(&car, env, depth)?;
                let cdr_out = self.eval_quasiquote(&cdr, env, depth)?;
                Ok(Value::Cons(self.heap.alloc_cons(car_out, cdr_out)))
            }
            other => Ok(other.clone()),
        }
    }

    fn eval_type_literal(&mut self, items: &[Value]) -> Result<Value, EvalError> {
        let Some(Value::Symbol(name)) = items.first() else {
            return Err(EvalError::TypeMismatch {
                pos: SourcePos::default(),
                expected: "type name symbol",
                got: items.first().map_or("nothing", Value::type_name).to_owned(),
            });
        };
        let slots = items[1..]
            .iter()
            .filter_map(|v| if let Value::Symbol(s) = v { Some(*s) } else { None })
            .collect();
        let kind = Kind { name: *name, params: Vec::new(), slots };
        Ok(Value::Kind(self.heap.alloc(HeapData::Kind(kind))))
    }

    fn eval_dict_literal(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let mut dict = ODict::default();
        for pair in items.chunks(2) {
            if pair.len() < 2 {
                break;
            }
            let key = self.eval(&pair[0], env)?;
            let value = self.eval(&pair[1], env)?;
            dict.insert(key, value, self.heap)?;
        }
        Ok(Value::Dict(self.heap.alloc(HeapData::Dict(dict))))
    }

    fn eval_vector_literal(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let mut arr = OArray::default();
        for item in items {
            let v = self.eval(item, env)?;
            arr.push(v);
        }
        Ok(Value::Array(self.heap.alloc(HeapData::Array(arr))))
    }

    fn eval_string_concat(&mut self, items: &[Value], env: &EnvRef) -> Result<Value, EvalError> {
        let mut out = String::new();
        for item in items {
            let v = self.eval(item, env)?;
            out.push_str(&self.stringify(&v));
        }
        Ok(Value::Str(self.heap.alloc_str(out)))
    }

    /// String-interpolation-friendly rendering: a string's own contents, no
    /// surrounding quotes; everything else falls back to the canonical
    /// printer (spec §3 "string interpolation ... desugars to a
    /// string-concat call").
    fn stringify(&self, v: &Value) -> String {
        match v {
            Value::Str(id) => self.heap.get_str(*id).to_owned(),
            other => crate::pika::print::print(other, self.symbols, self.heap),
        }
    }

    fn apply_primitive(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name {
            "+" => self.fold_numeric(args, 0.0, 0, |a, b| a + b, |a, b| a.checked_add(b)),
            "-" => self.fold_numeric_nonassoc(args, |a, b| a - b, i64::checked_sub),
            "*" => self.fold_numeric(args, 1.0, 1, |a, b| a * b, |a, b| a.checked_mul(b)),
            "/" => self.eval_divide(args),
            "<" => self.chain_compare(&args, |a, b| a < b),
            ">" => self.chain_compare(&args, |a, b| a > b),
            "<=" => self.chain_compare(&args, |a, b| a <= b),
            ">=" => self.chain_compare(&args, |a, b| a >= b),
            "=" => Ok(Value::Bool(args.windows(2).all(|w| w[0].structural_eq(&w[1], self.heap)))),
            "not" => Ok(Value::Bool(!args.first().map(Value::is_truthy).unwrap_or(false))),
            "cons" | "mk-pair" => {
                let (a, b) = (arg(&args, 0)?, arg(&args, 1)?);
                Ok(Value::Cons(self.heap.alloc_cons(a, b)))
            }
            "car" => match arg(&args, 0)? {
                Value::Cons(id) => Ok(self.heap.get_cons(id).0.clone()),
                other => Err(type_error("cons", &other)),
            },
            "cdr" => match arg(&args, 0)? {
                Value::Cons(id) => Ok(self.heap.get_cons(id).1.clone()),
                other => Err(type_error("cons", &other)),
            },
            "list" => Ok(self.heap.alloc_list(&args)),
            "get" => self.eval_get(arg(&args, 0)?, arg(&args, 1)?),
            "gensym" => {
                let prefix = match args.first() {
                    Some(Value::Symbol(s)) => self.symbols.resolve(*s).to_owned(),
                    Some(Value::Str(id)) => self.heap.get_str(*id).to_owned(),
                    _ => "g".to_owned(),
                };
                Ok(Value::Symbol(self.symbols.gensym(&prefix)))
            }
            "type-literal" | "dict-literal" | "vector-literal" | "string-concat" => {
                unreachable!("handled before evaluating arguments, in eval_list")
            }
            _ => Err(EvalError::Unsupported { pos: SourcePos::default(), what: "primitive" }),
        }
    }

    fn eval_get(&mut self, obj: Value, key: Value) -> Result<Value, EvalError> {
        match obj {
            Value::Array(id) => {
                let idx = as_index(&key)?;
                self.heap.get_array(id).items.get(idx).cloned().ok_or_else(|| EvalError::TypeMismatch {
                    pos: SourcePos::default(),
                    expected: "in-bounds array index",
                    got: format!("{idx}"),
                })
            }
            Value::Tuple(id) => {
                let idx = as_index(&key)?;
                self.heap.get_tuple(id).get(idx).cloned().ok_or_else(|| EvalError::TypeMismatch {
                    pos: SourcePos::default(),
                    expected: "in-bounds tuple index",
                    got: format!("{idx}"),
                })
            }
            Value::Dict(id) => {
                let HeapData::Dict(dict) = self.heap.get(id) else { unreachable!() };
                dict.get(&key, self.heap)?.cloned().ok_or_else(|| EvalError::TypeMismatch {
                    pos: SourcePos::default(),
                    expected: "present dict key",
                    got: crate::pika::print::print(&key, self.symbols, self.heap),
                })
            }
            Value::NamedTuple(id) => {
                let HeapData::NamedTuple { names, values } = self.heap.get(id) else { unreachable!() };
                let Value::Symbol(field) = key else {
                    return Err(type_error("symbol field name", &key));
                };
                names
                    .iter()
                    .position(|n| *n == field)
                    .and_then(|i| values.get(i).cloned())
                    .ok_or_else(|| EvalError::UnboundVariable {
                        pos: SourcePos::default(),
                        name: self.symbols.resolve(field).to_owned(),
                    })
            }
            Value::UserType(id) => {
                let HeapData::UserType(UserInstance { fields, .. }) = self.heap.get(id) else { unreachable!() };
                let Value::Symbol(field) = key else {
                    return Err(type_error("symbol field name", &key));
                };
                fields.get(&field).cloned().ok_or_else(|| EvalError::UnboundVariable {
                    pos: SourcePos::default(),
                    name: self.symbols.resolve(field).to_owned(),
                })
            }
            other => Err(type_error("array, tuple, dict, named-tuple, or user-type", &other)),
        }
    }

    fn eval_divide(&mut self, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut it = args.into_iter();
        let first = it.next().ok_or_else(|| EvalError::TypeMismatch {
            pos: SourcePos::default(),
            expected: "at least one argument",
            got: "none".to_owned(),
        })?;
        let mut acc = as_f64(&first)?;
        let mut all_int = matches!(first, Value::Int(_));
        let mut int_acc = if let Value::Int(n) = first { n } else { 0 };
        let mut saw_any = false;
        for v in it {
            saw_any = true;
            let f = as_f64(&v)?;
            if f == 0.0 {
                return Err(EvalError::DivisionByZero { pos: SourcePos::default() });
            }
            acc /= f;
            all_int = all_int && matches!(v, Value::Int(_));
            if let Value::Int(n) = v {
                if int_acc % n == 0 {
                    int_acc /= n;
                } else {
                    all_int = false;
                }
            }
        }
        if !saw_any {
            // `(/ x)` is reciprocal.
            if acc == 0.0 {
                return Err(EvalError::DivisionByZero { pos: SourcePos::default() });
            }
            return Ok(if all_int && int_acc != 0 && 1 % int_acc == 0 { Value::Int(1 / int_acc) } else { Value::Float(1.0 / as_f64(&Value::Int(int_acc))?) });
        }
        Ok(if all_int { Value::Int(int_acc) } else { Value::Float(acc) })
    }

    fn fold_numeric(
        &self,
        args: Vec<Value>,
        float_id: f64,
        int_id: i64,
        float_op: impl Fn(f64, f64) -> f64,
        int_op: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, EvalError> {
        let mut all_int = true;
        let mut int_acc = int_id;
        let mut float_acc = float_id;
        for v in &args {
            match v {
                Value::Int(n) => {
                    int_acc = int_op(int_acc, *n).ok_or_else(|| EvalError::TypeMismatch {
                        pos: SourcePos::default(),
                        expected: "integer result within range",
                        got: "overflow".to_owned(),
                    })?;
                    float_acc = float_op(float_acc, *n as f64);
                }
                Value::Float(x) => {
                    all_int = false;
                    float_acc = float_op(float_acc, *x);
                }
                other => return Err(type_error("number", other)),
            }
        }
        Ok(if all_int { Value::Int(int_acc) } else { Value::Float(float_acc) })
    }

    fn fold_numeric_nonassoc(
        &self,
        args: Vec<Value>,
        float_op: impl Fn(f64, f64) -> f64,
        int_op: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, EvalError> {
        let mut it = args.into_iter();
        let first = it.next().ok_or_else(|| EvalError::TypeMismatch {
            pos: SourcePos::default(),
            expected: "at least one argument",
            got: "none".to_owned(),
        })?;
        // Unary minus negates; everything else folds left-to-right.
        let mut all_int = matches!(first, Value::Int(_));
        let mut int_acc = if let Value::Int(n) = first { n } else { 0 };
        let mut float_acc = as_f64(&first)?;
        let mut saw_any = false;
        for v in it {
            saw_any = true;
            match v {
                Value::Int(n) => {
                    int_acc = int_op(int_acc, n).ok_or_else(|| EvalError::TypeMismatch {
                        pos: SourcePos::default(),
                        expected: "integer result within range",
                        got: "overflow".to_owned(),
                    })?;
                    float_acc = float_op(float_acc, n as f64);
                }
                Value::Float(x) => {
                    all_int = false;
                    float_acc = float_op(float_acc, x);
                }
                other => return Err(type_error("number", &other)),
            }
        }
        if !saw_any {
            return Ok(if all_int { Value::Int(-int_acc) } else { Value::Float(-float_acc) });
        }
        Ok(if all_int { Value::Int(int_acc) } else { Value::Float(float_acc) })
    }

    fn chain_compare(&self, args: &[Value], cmp: impl Fn(f64, f64) -> bool) -> Result<Value, EvalError> {
        for w in args.windows(2) {
            let (a, b) = (as_f64(&w[0])?, as_f64(&w[1])?);
            if !cmp(a, b) {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }
}

/// A persistent top-level environment, reusable across many [`Evaluator`]
/// borrows so `define`d bindings and live closure environments survive
/// between REPL inputs (`src/repl.rs`), the way the teacher's
/// `ReplSession` survives across `execute_interactive` calls even though
/// each one borrows its `Heap` fresh.
#[derive(Default)]
pub struct EvalSession {
    global: Option<EnvRef>,
    closure_envs: AHashMap<HeapId, EnvRef>,
}

impl EvalSession {
    #[must_use]
    pub fn new() -> Self {
        Self { global: Some(new_frame(None)), closure_envs: AHashMap::default() }
    }

    /// Evaluates `forms` against this session's persistent global
    /// environment, threading the live closure-environment table through
    /// so a closure defined in an earlier call still resolves its captures
    /// correctly in a later one.
    pub fn eval_top(&mut self, heap: &mut Heap, symbols: &mut Symbols, forms: &[Value]) -> Result<Value, EvalError> {
        let global = self.global.take().unwrap_or_else(|| new_frame(None));
        let closure_envs = std::mem::take(&mut self.closure_envs);
        let mut evaluator = Evaluator::resume(heap, symbols, global.clone(), closure_envs);
        let result = evaluator.eval_top(forms);
        self.closure_envs = evaluator.closure_envs;
        self.global = Some(global);
        result
    }

    /// Every name currently bound at the top level, for the REPL's `,env`
    /// meta-command (spec §6).
    #[must_use]
    pub fn bindings(&self, symbols: &Symbols) -> Vec<(String, Value)> {
        let Some(global) = &self.global else { return Vec::new() };
        global.borrow().bindings.iter().map(|(k, v)| (symbols.resolve(*k).to_owned(), v.clone())).collect()
    }
}

fn arg(args: &[Value], i: usize) -> Result<Value, EvalError> {
    args.get(i).cloned().ok_or_else(|| EvalError::TypeMismatch {
        pos: SourcePos::default(),
        expected: "argument present",
        got: "missing".to_owned(),
    })
}

fn as_index(v: &Value) -> Result<usize, EvalError> {
    match v {
        Value::Int(n) if *n >= 0 => Ok(*n as usize),
        other => Err(type_error("non-negative integer index", other)),
    }
}

fn as_f64(v: &Value) -> Result<f64, EvalError> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(x) => Ok(*x),
        other => Err(type_error("number", other)),
    }
}

fn type_error(expected: &'static str, got: &Value) -> EvalError {
    EvalError::TypeMismatch { pos: SourcePos::default(), expected, got: got.type_name().to_owned() }
}

/// Builds `(a b ... . rest)` from a fixed prefix and a dotted tail symbol.
fn append_dotted(heap: &mut Heap, params: &[SymbolId], rest: SymbolId) -> Value {
    let mut tail = Value::Symbol(rest);
    for &p in params.iter().rev() {
        tail = Value::Cons(heap.alloc_cons(Value::Symbol(p), tail));
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::CompileOptions, macros::expander, pika};

    fn run(src: &str) -> Value {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (program, errs) = pika::parse(src, &mut symbols, &mut heap);
        assert!(errs.is_empty(), "{errs:?}");
        let options = CompileOptions::default();
        let expanded = expander::expand_program(&program, &mut symbols, &mut heap, options.macro_recursion_cap).unwrap();
        let forms = heap.list_to_vec(&expanded).unwrap_or_else(|| vec![expanded.clone()]);
        let begin = symbols.intern("begin");
        let forms: Vec<_> =
            if forms.first().is_some_and(|f| matches!(f, Value::Symbol(s) if *s == begin)) { forms[1..].to_vec() } else { forms };
        let mut evaluator = Evaluator::new(&mut heap, &mut symbols);
        evaluator.eval_top(&forms).unwrap()
    }

    #[test]
    fn arithmetic_promotes_only_when_a_float_appears() {
        assert!(matches!(run("(+ 1 2)"), Value::Int(3)));
        assert!(matches!(run("(+ 1 2.5)"), Value::Float(x) if (x - 3.5).abs() < 1e-9));
    }

    #[test]
    fn factorial_recurses_through_a_top_level_define() {
        let v = run("(define (fact n) (if (< n 2) 1 (* n (fact (- n 1))))) (fact 10)");
        assert!(matches!(v, Value::Int(3628800)));
    }

    #[test]
    fn when_macro_expansion_still_evaluates_through_the_core_forms() {
        let v = run(
            "(define-syntax when (syntax-rules () ((when t b ...) (if t (begin b ...) nothing)))) (when true 1 2 3)",
        );
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn let_binds_over_cons_chains() {
        let v = run("(let ((x (cons 1 (cons 2 nil)))) (car x))");
        assert!(matches!(v, Value::Int(1)));
    }

    #[test]
    fn mutual_recursion_resolves_through_letrec() {
        let v = run(
            "(letrec ((even? (lambda (n) (if (= n 0) true (odd? (- n 1))))) \
              (odd? (lambda (n) (if (= n 0) false (even? (- n 1)))))) (even? 10))",
        );
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn quasiquote_splices_unquoted_lists() {
        let v = run("(let ((xs (list 2 3))) `(1 ,@xs 4))");
        let Value::Cons(_) = v else { panic!("expected a list, got {v:?}") };
    }

    #[test]
    fn set_bang_mutates_the_defining_frame() {
        let v = run("(define x 1) (define (bump) (set! x (+ x 1))) (bump) (bump) x");
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn division_by_zero_is_an_eval_error() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (program, _) = pika::parse("(/ 1 0)", &mut symbols, &mut heap);
        let forms = heap.list_to_vec(&program).unwrap();
        let forms = forms[1..].to_vec();
        let mut evaluator = Evaluator::new(&mut heap, &mut symbols);
        assert!(matches!(evaluator.eval_top(&forms), Err(EvalError::DivisionByZero { .. })));
    }

    fn forms_of(heap: &mut Heap, symbols: &mut Symbols, src: &str) -> Vec<Value> {
        let (program, errs) = pika::parse(src, symbols, heap);
        assert!(errs.is_empty(), "{errs:?}");
        let options = CompileOptions::default();
        let expanded = expander::expand_program(&program, symbols, heap, options.macro_recursion_cap).unwrap();
        let forms = heap.list_to_vec(&expanded).unwrap_or_else(|| vec![expanded.clone()]);
        let begin = symbols.intern("begin");
        if forms.first().is_some_and(|f| matches!(f, Value::Symbol(s) if *s == begin)) { forms[1..].to_vec() } else { forms }
    }

    #[test]
    fn a_session_remembers_defines_across_separate_inputs() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let mut session = EvalSession::new();
        let first = forms_of(&mut heap, &mut symbols, "(define x 41)");
        session.eval_top(&mut heap, &mut symbols, &first).unwrap();
        let second = forms_of(&mut heap, &mut symbols, "(+ x 1)");
        let v = session.eval_top(&mut heap, &mut symbols, &second).unwrap();
        assert!(matches!(v, Value::Int(42)));
    }

    #[test]
    fn a_session_keeps_a_closure_usable_across_separate_inputs() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let mut session = EvalSession::new();
        let first = forms_of(&mut heap, &mut symbols, "(define (make-adder n) (lambda (x) (+ x n)))");
        session.eval_top(&mut heap, &mut symbols, &first).unwrap();
        let second = forms_of(&mut heap, &mut symbols, "(define add5 (make-adder 5))");
        session.eval_top(&mut heap, &mut symbols, &second).unwrap();
        let third = forms_of(&mut heap, &mut symbols, "(add5 10)");
        let v = session.eval_top(&mut heap, &mut symbols, &third).unwrap();
        assert!(matches!(v, Value::Int(15)));
    }
}
