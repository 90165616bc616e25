//! Template substitution for `syntax-rules` clauses (spec §4.M).
//!
//! Walks a template `Value` tree, replacing pattern-variable references
//! with their matched values and unfolding `...`-suffixed sub-templates by
//! the minimum repetition count across the ellipsis-bound variables they
//! reference. Every other symbol passes through [`hygiene::HygieneContext`]
//! so it cannot capture or be captured by an identically-named identifier
//! at the macro's use site, except for the definition-time-captured and
//! reserved-form cases handled here directly.

use ahash::AHashMap;

use crate::{
    errors::{MacroError, SourcePos},
    forms,
    heap::{Heap, HeapData},
    intern::{SymbolId, Symbols},
    macros::{
        hygiene::HygieneContext,
        pattern::{Binding, Bindings},
    },
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

/// Produces a new bindings table for ellipsis iteration `idx`: every
/// `Seq`-bound variable is reduced to its `idx`-th element (one ellipsis
/// depth peeled off); `Single`-bound variables, which sit outside this
/// ellipsis, pass through untouched.
fn slice_bindings(bindings: &Bindings, idx: usize) -> Bindings {
    let mut out = Bindings::default();
    for (k, v) in bindings {
        match v {
            Binding::Single(_) => {
                out.insert(*k, v.clone());
            }
            Binding::Seq(seq) => {
                if let Some(b) = seq.get(idx) {
                    out.insert(*k, b.clone());
                }
            }
        }
    }
    out
}

/// Finds the minimum repetition count across every ellipsis-bound variable
/// referenced anywhere in `template`, failing if none is referenced (spec
/// §4.M: a `...` sub-template with no ellipsis-bound pattern variable is
/// a macro error, not silently zero repetitions).
fn ellipsis_count(template: &Value, bindings: &Bindings, heap: &Heap, pos: SourcePos) -> Result<usize, MacroError> {
    let mut min: Option<usize> = None;
    collect_seq_lengths(template, bindings, heap, &mut min);
    min.ok_or(MacroError::EllipsisWithoutVariable { pos })
}

fn collect_seq_lengths(template: &Value, bindings: &Bindings, heap: &Heap, min: &mut Option<usize>) {
    match template {
        Value::Symbol(s) => {
            if let Some(Binding::Seq(seq)) = bindings.get(s) {
                *min = Some(min.map_or(seq.len(), |m| m.min(seq.len())));
            }
        }
        Value::Cons(_) | Value::Nil => {
            let (items, tail) = decompose_list(heap, template.clone());
            for item in &items {
                collect_seq_lengths(item, bindings, heap, min);
            }
            collect_seq_lengths(&tail, bindings, heap, min);
        }
        Value::Array(id) => {
            for item in &heap.get_array(*id).items {
                collect_seq_lengths(item, bindings, heap, min);
            }
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
pub fn substitute(
    template: &Value,
    bindings: &Bindings,
    captured: &AHashMap<SymbolId, Value>,
    ellipsis: SymbolId,
    hygiene: &mut HygieneContext,
    symbols: &mut Symbols,
    heap: &mut Heap,
    pos: SourcePos,
) -> Result<Value, MacroError> {
    match template {
        Value::Symbol(s) => substitute_symbol(*s, bindings, captured, hygiene, symbols, pos),
        Value::Cons(_) | Value::Nil => {
            let (items, tail) = decompose_list(heap, template.clone());
            let new_items = substitute_sequence(&items, bindings, captured, ellipsis, hygiene, symbols, heap, pos)?;
            let new_tail = substitute(&tail, bindings, captured, ellipsis, hygiene, symbols, heap, pos)?;
            Ok(build_list(heap, new_items, new_tail))
        }
        Value::Array(id) => {
            let items = heap.get_array(*id).items.clone();
            let new_items = substitute_sequence(&items, bindings, captured, ellipsis, hygiene, symbols, heap, pos)?;
            let mut arr = crate::heap::OArray::default();
            for item in new_items {
                arr.push(item);
            }
            Ok(Value::Array(heap.alloc(HeapData::Array(arr))))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_symbol(
    s: SymbolId,
    bindings: &Bindings,
    captured: &AHashMap<SymbolId, Value>,
    hygiene: &mut HygieneContext,
    symbols: &mut Symbols,
    pos: SourcePos,
) -> Result<Value, MacroError> {
    match bindings.get(&s) {
        Some(Binding::Single(v)) => return Ok(v.clone()),
        Some(Binding::Seq(_)) => return Err(MacroError::EllipsisWithoutVariable { pos }),
        None => {}
    }
    if forms::is_reserved(symbols.resolve(s)) {
        return Ok(Value::Symbol(s));
    }
    if let Some(v) = captured.get(&s) {
        return Ok(v.clone());
    }
    let name = symbols.resolve(s);
    if name.starts_with('_') {
        return Ok(Value::Symbol(s));
    }
    if name.ends_with('#') {
        return Ok(Value::Symbol(hygiene.auto_gensym(s, symbols)));
    }
    Ok(Value::Symbol(hygiene.rename(s, symbols)))
}

#[allow(clippy::too_many_arguments)]
fn substitute_sequence(
    items: &[Value],
    bindings: &Bindings,
    captured: &AHashMap<SymbolId, Value>,
    ellipsis: SymbolId,
    hygiene: &mut HygieneContext,
    symbols: &mut Symbols,
    heap: &mut Heap,
    pos: SourcePos,
) -> Result<Vec<Value>, MacroError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < items.len() {
        let next_is_ellipsis = matches!(items.get(i + 1), Some(Value::Symbol(s)) if *s == ellipsis);
        if next_is_ellipsis {
            let count = ellipsis_count(&items[i], bindings, heap, pos)?;
            for idx in 0..count {
                let sliced = slice_bindings(bindings, idx);
                let v = substitute(&items[i], &sliced, captured, ellipsis, hygiene, symbols, heap, pos)?;
                out.push(v);
            }
            i += 2;
        } else {
            let v = substitute(&items[i], bindings, captured, ellipsis, hygiene, symbols, heap, pos)?;
            out.push(v);
            i += 1;
        }
    }
    Ok(out)
}

fn build_list(heap: &mut Heap, items: Vec<Value>, tail: Value) -> Value {
    let mut cur = tail;
    for item in items.into_iter().rev() {
        cur = Value::Cons(heap.alloc_cons(item, cur));
    }
    cur
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::pattern::match_pattern;

    fn setup() -> (Symbols, Heap, SymbolId, SymbolId) {
        let mut symbols = Symbols::new();
        let heap = Heap::new();
        let ellipsis = symbols.intern("...");
        let wildcard = symbols.intern("_");
        (symbols, heap, ellipsis, wildcard)
    }

    #[test]
    fn substitutes_bound_pattern_variable() {
        let (mut symbols, mut heap, ellipsis, _wildcard) = setup();
        let x = symbols.intern("x");
        let mut bindings = Bindings::default();
        bindings.insert(x, Binding::Single(Value::Int(7)));
        let captured = AHashMap::default();
        let mut hygiene = HygieneContext::new(&mut symbols);
        let out = substitute(
            &Value::Symbol(x),
            &bindings,
            &captured,
            ellipsis,
            &mut hygiene,
            &mut symbols,
            &mut heap,
            SourcePos::default(),
        )
        .unwrap();
        assert!(matches!(out, Value::Int(7)));
    }

    #[test]
    fn renames_template_introduced_symbols() {
        let (mut symbols, mut heap, ellipsis, _wildcard) = setup();
        let tmp = symbols.intern("tmp");
        let bindings = Bindings::default();
        let captured = AHashMap::default();
        let mut hygiene = HygieneContext::new(&mut symbols);
        let out = substitute(
            &Value::Symbol(tmp),
            &bindings,
            &captured,
            ellipsis,
            &mut hygiene,
            &mut symbols,
            &mut heap,
            SourcePos::default(),
        )
        .unwrap();
        let Value::Symbol(renamed) = out else { panic!("expected symbol") };
        assert_ne!(renamed, tmp);
        assert!(symbols.resolve(renamed).starts_with("tmp_m"));
    }

    #[test]
    fn unfolds_ellipsis_template_by_matched_count() {
        let (mut symbols, mut heap, ellipsis, wildcard) = setup();
        let x = symbols.intern("x");
        let pattern = heap.alloc_list(&[Value::Symbol(x), Value::Symbol(ellipsis)]);
        let input = heap.alloc_list(&[Value::Int(1), Value::Int(2), Value::Int(3)]);
        let lits = ahash::AHashSet::default();
        let mut bindings = Bindings::default();
        assert!(match_pattern(&pattern, &input, &lits, ellipsis, wildcard, &heap, &mut bindings));

        let template = heap.alloc_list(&[Value::Symbol(x), Value::Symbol(ellipsis)]);
        let captured = AHashMap::default();
        let mut hygiene = HygieneContext::new(&mut symbols);
        let out = substitute(
            &template,
            &bindings,
            &captured,
            ellipsis,
            &mut hygiene,
            &mut symbols,
            &mut heap,
            SourcePos::default(),
        )
        .unwrap();
        let items = heap.list_to_vec(&out).unwrap();
        assert_eq!(items.len(), 3);
    }
}
