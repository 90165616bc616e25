//! The macro table and the bottom-up expansion fixpoint (spec §4.M).
//!
//! `define-syntax` forms are processed in program order as the top-level
//! `begin` sequence is walked: each one snapshots the current top-level
//! definition environment into [`MacroDef::captured`] (definition-time
//! binding capture), then registers its clauses. Every other top-level
//! form, and every subform reached while walking one, has its macro calls
//! expanded to a fixed point: a call site is rewritten by substituting its
//! matched clause's template, then the *result* is recursively re-expanded
//! (which also reaches any macro calls nested in the original arguments,
//! since they are copied into the template's substitution sites verbatim).

use ahash::{AHashMap, AHashSet};

use crate::{
    errors::{MacroError, SourcePos},
    forms,
    heap::{Heap, HeapData},
    intern::{SymbolId, Symbols},
    macros::{
        hygiene::HygieneContext,
        pattern::{match_pattern, Bindings},
        template,
    },
    value::Value,
};

/// Default bound on re-expansion depth (spec §4.M: "to a fixed recursion
/// cap" guards non-terminating macros, Testable Property 2).
pub const DEFAULT_MACRO_RECURSION_CAP: u32 = 512;

#[derive(Debug, Clone)]
pub struct MacroClause {
    pub pattern: Value,
    pub template: Value,
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub literals: AHashSet<SymbolId>,
    pub clauses: Vec<MacroClause>,
    /// Free template symbols snapshotted from the top-level definition
    /// environment at `define-syntax` time (spec §4.M).
    pub captured: AHashMap<SymbolId, Value>,
}

#[derive(Debug, Default)]
pub struct MacroTable {
    defs: AHashMap<SymbolId, MacroDef>,
}

impl MacroTable {
    #[must_use]
    pub fn get(&self, name: SymbolId) -> Option<&MacroDef> {
        self.defs.get(&name)
    }

    pub fn insert(&mut self, name: SymbolId, def: MacroDef) {
        self.defs.insert(name, def);
    }

    #[must_use]
    pub fn contains(&self, name: SymbolId) -> bool {
        self.defs.contains_key(&name)
    }
}

/// Expands every macro call in a whole program, threading a top-level
/// definition environment through `define`/`define-syntax` forms in order.
pub fn expand_program(program: &Value, symbols: &mut Symbols, heap: &mut Heap, cap: u32) -> Result<Value, MacroError> {
    let begin = symbols.intern("begin");
    let define_sym = symbols.intern("define");
    let define_syntax_sym = symbols.intern("define-syntax");
    let syntax_rules_sym = symbols.intern("syntax-rules");

    let Some(mut forms) = heap.list_to_vec(program) else {
        return Ok(program.clone());
    };
    if forms.first().is_some_and(|f| matches!(f, Value::Symbol(s) if *s == begin)) {
        forms.remove(0);
    }

    let mut table = MacroTable::default();
    let mut def_env: AHashMap<SymbolId, Value> = AHashMap::default();
    let mut out = vec![Value::Symbol(begin)];

    for form in &forms {
        if let Some(items) = heap.list_to_vec(form) {
            if items.first().is_some_and(|h| matches!(h, Value::Symbol(s) if *s == define_syntax_sym)) && items.len() == 3 {
                let Value::Symbol(name) = items[1] else {
                    out.push(form.clone());
                    continue;
                };
                let def = parse_syntax_rules(&items[2], syntax_rules_sym, heap, &def_env)?;
                table.insert(name, def);
                continue;
            }
            if items.first().is_some_and(|h| matches!(h, Value::Symbol(s) if *s == define_sym)) && items.len() >= 3 {
                let expanded = expand_form(form, &table, symbols, heap, 0, cap, &mut Vec::new())?;
                if let Some(expanded_items) = heap.list_to_vec(&expanded) {
                    if let Value::Symbol(target) = &expanded_items[1] {
                        def_env.insert(*target, expanded_items[2].clone());
                    } else if let Some(sig) = heap.list_to_vec(&expanded_items[1]) {
                        // `(define (name args...) body...)`: captures the
                        // whole lambda shape as a `lambda` form.
                        if let Some(Value::Symbol(target)) = sig.first() {
                            let lambda_sym = symbols.intern("lambda");
                            let params = heap.alloc_list(&sig[1..]);
                            let mut body = vec![Value::Symbol(lambda_sym), params];
                            body.extend(expanded_items[2..].iter().cloned());
                            def_env.insert(*target, heap.alloc_list(&body));
                        }
                    }
                }
                out.push(expanded);
                continue;
            }
        }
        out.push(expand_form(form, &table, symbols, heap, 0, cap, &mut Vec::new())?);
    }
    Ok(heap.alloc_list(&out))
}

fn parse_syntax_rules(
    v: &Value,
    syntax_rules_sym: SymbolId,
    heap: &mut Heap,
    def_env: &AHashMap<SymbolId, Value>,
) -> Result<MacroDef, MacroError> {
    let items = heap.list_to_vec(v).unwrap_or_default();
    if items.first().is_none_or(|h| !matches!(h, Value::Symbol(s) if *s == syntax_rules_sym)) {
        return Ok(MacroDef { literals: AHashSet::default(), clauses: Vec::new(), captured: def_env.clone() });
    }
    let literals: AHashSet<SymbolId> = heap
        .list_to_vec(&items[1])
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| if let Value::Symbol(s) = v { Some(s) } else { None })
        .collect();
    let mut clauses = Vec::new();
    for clause in &items[2..] {
        if let Some(pair) = heap.list_to_vec(clause) {
            if pair.len() == 2 {
                clauses.push(MacroClause { pattern: pair[0].clone(), template: pair[1].clone() });
            }
        }
    }
    Ok(MacroDef { literals, clauses, captured: def_env.clone() })
}

fn apply_macro(name: SymbolId, def: &MacroDef, form: &Value, symbols: &mut Symbols, heap: &mut Heap, pos: SourcePos) -> Result<Value, MacroError> {
    let ellipsis = symbols.intern("...");
    let wildcard = symbols.intern("_");
    for clause in &def.clauses {
        let mut bindings = Bindings::default();
        if match_pattern(&clause.pattern, form, &def.literals, ellipsis, wildcard, heap, &mut bindings) {
            let mut hygiene = HygieneContext::new(symbols);
            return template::substitute(&clause.template, &bindings, &def.captured, ellipsis, &mut hygiene, symbols, heap, pos);
        }
    }
    Err(MacroError::NoMatchingClause { pos, macro_name: symbols.resolve(name).to_owned() })
}

/// Expands macro calls in `v` to a fixed point, bottom-up: subforms are
/// expanded first, and a call whose head names a macro is rewritten and the
/// *result* re-expanded from scratch, bounded by `cap`.
pub fn expand_form(
    v: &Value,
    table: &MacroTable,
    symbols: &mut Symbols,
    heap: &mut Heap,
    depth: u32,
    cap: u32,
    chain: &mut Vec<String>,
) -> Result<Value, MacroError> {
    if depth > cap {
        return Err(MacroError::RecursionLimitExceeded { pos: SourcePos::default(), limit: cap, chain: chain.clone() });
    }
    match v {
        Value::Cons(_) | Value::Nil => {
            let Some(items) = heap.list_to_vec(v) else {
                return expand_improper(v, table, symbols, heap, depth, cap, chain);
            };
            if let Some(Value::Symbol(head)) = items.first() {
                if let Some(def) = table.get(*head) {
                    chain.push(symbols.resolve(*head).to_owned());
                    let expanded = apply_macro(*head, def, v, symbols, heap, SourcePos::default())?;
                    let result = expand_form(&expanded, table, symbols, heap, depth + 1, cap, chain);
                    chain.pop();
                    return result;
                }
            }
            let mut new_items = Vec::with_capacity(items.len());
            for item in &items {
                new_items.push(expand_form(item, table, symbols, heap, depth + 1, cap, chain)?);
            }
            Ok(heap.alloc_list(&new_items))
        }
        Value::Array(id) => {
            let items = heap.get_array(*id).items.clone();
            let mut new_items = Vec::with_capacity(items.len());
            for item in &items {
                new_items.push(expand_form(item, table, symbols, heap, depth + 1, cap, chain)?);
            }
            let mut arr = crate::heap::OArray::default();
            for item in new_items {
                arr.push(item);
            }
            Ok(Value::Array(heap.alloc(HeapData::Array(arr))))
        }
        other => Ok(other.clone()),
    }
}

fn expand_improper(
    v: &Value,
    table: &MacroTable,
    symbols: &mut Symbols,
    heap: &mut Heap,
    depth: u32,
    cap: u32,
    chain: &mut Vec<String>,
) -> Result<Value, MacroError> {
    if let Value::Cons(id) = v {
        let (car, cdr) = heap.get_cons(*id);
        let (car, cdr) = (car.clone(), cdr.clone());
        let new_car = expand_form(&car, table, symbols, heap, depth + 1, cap, chain)?;
        let new_cdr = expand_form(&cdr, table, symbols, heap, depth + 1, cap, chain)?;
        Ok(Value::Cons(heap.alloc_cons(new_car, new_cdr)))
    } else {
        Ok(v.clone())
    }
}

#[allow(dead_code)]
fn is_reserved_head(name: &str) -> bool {
    forms::is_reserved(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pika::grammar::parse_program;

    fn expand_source(src: &str) -> (Value, Symbols, Heap) {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty(), "{diags:?}");
        let begin = symbols.intern("begin");
        let mut all = vec![Value::Symbol(begin)];
        all.extend(forms);
        let program = heap.alloc_list(&all);
        let expanded = expand_program(&program, &mut symbols, &mut heap, DEFAULT_MACRO_RECURSION_CAP).unwrap();
        (expanded, symbols, heap)
    }

    #[test]
    fn when_macro_expands_to_if_begin() {
        let src = "(define-syntax when (syntax-rules () ((_ c b ...) (if c (begin b ...) nothing)))) (when true 1 2 3)";
        let (expanded, symbols, heap) = expand_source(src);
        let items = heap.list_to_vec(&expanded).unwrap();
        let last = items.last().unwrap();
        let call = heap.list_to_vec(last).unwrap();
        let Value::Symbol(head) = call[0] else { panic!() };
        assert_eq!(symbols.resolve(head), "if");
    }

    #[test]
    fn non_macro_forms_pass_through_unchanged() {
        let (expanded, _symbols, heap) = expand_source("(+ 1 2)");
        let items = heap.list_to_vec(&expanded).unwrap();
        let call = heap.list_to_vec(&items[1]).unwrap();
        assert_eq!(call.len(), 3);
    }

    #[test]
    fn exceeding_recursion_cap_is_an_error() {
        let src = "(define-syntax loop (syntax-rules () ((_ ) (loop)))) (loop)";
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty());
        let begin = symbols.intern("begin");
        let mut all = vec![Value::Symbol(begin)];
        all.extend(forms);
        let program = heap.alloc_list(&all);
        let result = expand_program(&program, &mut symbols, &mut heap, 8);
        assert!(matches!(result, Err(MacroError::RecursionLimitExceeded { .. })));
    }
}
