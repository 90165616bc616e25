//! Pattern matching for `syntax-rules` clauses (spec §4.M).
//!
//! A pattern is itself an ordinary [`Value`] tree (lists, arrays, atoms);
//! there is no separate pattern AST. Matching walks the pattern and the
//! input form together, producing a [`Bindings`] map keyed by pattern
//! variable. A pattern variable under one or more `...` binds vertically:
//! each repetition contributes one [`Binding::Single`], accumulated into a
//! [`Binding::Seq`] in source order.

use ahash::AHashMap;

use crate::{heap::Heap, intern::SymbolId, value::Value};

#[derive(Debug, Clone)]
pub enum Binding {
    Single(Value),
    /// One entry per repetition of the ellipsis this variable sits under.
    Seq(Vec<Binding>),
}

pub type Bindings = AHashMap<SymbolId, Binding>;

/// Unpacks a list value into its spine and final tail (`Nil` for a proper list).
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

fn decompose_array(heap: &Heap, id: crate::value::HeapId) -> Vec<Value> {
    heap.get_array(id).items.clone()
}

/// Collects every pattern-variable symbol occurring in `pattern`, in the
/// order they first appear. Needed so an ellipsis sub-pattern that never
/// actually repeats (zero matches) still binds its variables, to an empty
/// [`Binding::Seq`], rather than leaving them unbound.
pub fn collect_pattern_vars(pattern: &Value, literals: &ahash::AHashSet<SymbolId>, ellipsis: SymbolId, wildcard: SymbolId, heap: &Heap, out: &mut Vec<SymbolId>) {
    match pattern {
        Value::Symbol(s) => {
            if *s != ellipsis && *s != wildcard && !literals.contains(s) && !out.contains(s) {
                out.push(*s);
            }
        }
        Value::Cons(_) | Value::Nil => {
            let (items, tail) = decompose_list(heap, pattern.clone());
            for item in &items {
                collect_pattern_vars(item, literals, ellipsis, wildcard, heap, out);
            }
            collect_pattern_vars(&tail, literals, ellipsis, wildcard, heap, out);
        }
        Value::Array(id) => {
            for item in decompose_array(heap, *id) {
                collect_pattern_vars(&item, literals, ellipsis, wildcard, heap, out);
            }
        }
        _ => {}
    }
}

/// Attempts to match `pattern` against `input`, extending `bindings` on
/// success. On failure, `bindings` may have been partially extended; callers
/// discard it and try the clause's sibling or the next clause entirely.
pub fn match_pattern(
    pattern: &Value,
    input: &Value,
    literals: &ahash::AHashSet<SymbolId>,
    ellipsis: SymbolId,
    wildcard: SymbolId,
    heap: &Heap,
    bindings: &mut Bindings,
) -> bool {
    match pattern {
        Value::Symbol(s) if *s == wildcard => true,
        Value::Symbol(s) if literals.contains(s) => matches!(input, Value::Symbol(i) if i == s),
        Value::Symbol(s) => {
            bindings.insert(*s, Binding::Single(input.clone()));
            true
        }
        Value::Cons(_) | Value::Nil => {
            let (pat_items, pat_tail) = decompose_list(heap, pattern.clone());
            match input {
                Value::Cons(_) | Value::Nil => {
                    let (in_items, in_tail) = decompose_list(heap, input.clone());
                    match_sequence(&pat_items, &pat_tail, &in_items, &in_tail, literals, ellipsis, wildcard, heap, bindings)
                }
                _ => false,
            }
        }
        Value::Array(pid) => {
            if let Value::Array(iid) = input {
                let pat_items = decompose_array(heap, *pid);
                let in_items = decompose_array(heap, *iid);
                match_sequence(&pat_items, &Value::Nil, &in_items, &Value::Nil, literals, ellipsis, wildcard, heap, bindings)
            } else {
                false
            }
        }
        Value::Int(n) => matches!(input, Value::Int(m) if n == m),
        Value::Float(x) => matches!(input, Value::Float(y) if x == y),
        Value::Bool(b) => matches!(input, Value::Bool(c) if b == c),
        Value::Keyword(s) => matches!(input, Value::Keyword(i) if s == i),
        Value::Nothing => matches!(input, Value::Nothing),
        Value::Str(pid) => matches!(input, Value::Str(iid) if heap.get_str(*pid) == heap.get_str(*iid)),
        _ => false,
    }
}

/// Matches a flat sequence of pattern items (list spine or array contents)
/// against a flat sequence of input items, handling at most the first
/// `...`-suffixed item in the sequence (spec §4.M allows one ellipsis per
/// sequence level; a second would be ambiguous to unfold and is not needed
/// by any form in this language).
#[allow(clippy::too_many_arguments)]
fn match_sequence(
    pat_items: &[Value],
    pat_tail: &Value,
    in_items: &[Value],
    in_tail: &Value,
    literals: &ahash::AHashSet<SymbolId>,
    ellipsis: SymbolId,
    wildcard: SymbolId,
    heap: &Heap,
    bindings: &mut Bindings,
) -> bool {
    let ellipsis_at = pat_items.iter().position(|v| matches!(v, Value::Symbol(s) if *s == ellipsis));

    let Some(ellipsis_pos) = ellipsis_at else {
        if pat_items.len() != in_items.len() {
            return false;
        }
        for (p, i) in pat_items.iter().zip(in_items) {
            if !match_pattern(p, i, literals, ellipsis, wildcard, heap, bindings) {
                return false;
            }
        }
        return match_pattern(pat_tail, in_tail, literals, ellipsis, wildcard, heap, bindings);
    };

    // pat_items[ellipsis_pos - 1] is the repeated sub-pattern; `...` itself
    // is a marker, consuming no input.
    let repeated = &pat_items[ellipsis_pos - 1];
    let before = &pat_items[..ellipsis_pos - 1];
    let after = &pat_items[ellipsis_pos + 1..];

    if in_items.len() < before.len() + after.len() {
        return false;
    }
    for (p, i) in before.iter().zip(in_items) {
        if !match_pattern(p, i, literals, ellipsis, wildcard, heap, bindings) {
            return false;
        }
    }

    let repeat_count = in_items.len() - before.len() - after.len();
    let mut vars = Vec::new();
    collect_pattern_vars(repeated, literals, ellipsis, wildcard, heap, &mut vars);
    let mut acc: AHashMap<SymbolId, Vec<Binding>> = vars.iter().map(|v| (*v, Vec::new())).collect();

    for idx in 0..repeat_count {
        let item = &in_items[before.len() + idx];
        let mut local = Bindings::default();
        if !match_pattern(repeated, item, literals, ellipsis, wildcard, heap, &mut local) {
            return false;
        }
        for var in &vars {
            let b = local.remove(var).unwrap_or_else(|| Binding::Seq(Vec::new()));
            acc.get_mut(var).expect("seeded above").push(b);
        }
    }
    for (var, seq) in acc {
        bindings.insert(var, Binding::Seq(seq));
    }

    for (p, i) in after.iter().zip(&in_items[in_items.len() - after.len()..]) {
        if !match_pattern(p, i, literals, ellipsis, wildcard, heap, bindings) {
            return false;
        }
    }
    match_pattern(pat_tail, in_tail, literals, ellipsis, wildcard, heap, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::Heap, intern::Symbols};

    fn setup() -> (Symbols, Heap, SymbolId, SymbolId) {
        let mut symbols = Symbols::new();
        let heap = Heap::new();
        let ellipsis = symbols.intern("...");
        let wildcard = symbols.intern("_");
        (symbols, heap, ellipsis, wildcard)
    }

    #[test]
    fn matches_fixed_arity_list() {
        let (mut symbols, mut heap, ellipsis, wildcard) = setup();
        let a = symbols.intern("a");
        let pattern = heap.alloc_list(&[Value::Symbol(a)]);
        let input = heap.alloc_list(&[Value::Int(5)]);
        let lits = ahash::AHashSet::default();
        let mut b = Bindings::default();
        assert!(match_pattern(&pattern, &input, &lits, ellipsis, wildcard, &heap, &mut b));
        assert!(matches!(b[&a], Binding::Single(Value::Int(5))));
    }

    #[test]
    fn ellipsis_binds_vertically() {
        let (mut symbols, mut heap, ellipsis, wildcard) = setup();
        let x = symbols.intern("x");
        let pattern = heap.alloc_list(&[Value::Symbol(x), Value::Symbol(ellipsis)]);
        let input = heap.alloc_list(&[Value::Int(1), Value::Int(2), Value::Int(3)]);
        let lits = ahash::AHashSet::default();
        let mut b = Bindings::default();
        assert!(match_pattern(&pattern, &input, &lits, ellipsis, wildcard, &heap, &mut b));
        let Binding::Seq(seq) = &b[&x] else { panic!("expected Seq") };
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn arity_mismatch_fails() {
        let (mut symbols, mut heap, ellipsis, wildcard) = setup();
        let a = symbols.intern("a");
        let b_sym = symbols.intern("b");
        let pattern = heap.alloc_list(&[Value::Symbol(a), Value::Symbol(b_sym)]);
        let input = heap.alloc_list(&[Value::Int(1)]);
        let lits = ahash::AHashSet::default();
        let mut bindings = Bindings::default();
        assert!(!match_pattern(&pattern, &input, &lits, ellipsis, wildcard, &heap, &mut bindings));
    }
}
