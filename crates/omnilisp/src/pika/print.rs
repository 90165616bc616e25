//! Canonical printer, establishing Testable Property 1: every AST the
//! parser produces reprints to text that reparses to an equivalent AST.
//! Whitespace and comments need not be preserved, so this printer always
//! normalizes to one canonical layout rather than trying to recover the
//! original formatting.

use std::fmt::Write as _;

use crate::{
    heap::HeapData,
    intern::Symbols,
    value::{HeapId, Value},
    heap::Heap,
};

#[must_use]
pub fn print(value: &Value, symbols: &Symbols, heap: &Heap) -> String {
    let mut out = String::new();
    write_value(&mut out, value, symbols, heap);
    out
}

fn write_value(out: &mut String, value: &Value, symbols: &Symbols, heap: &Heap) {
    match value {
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Float(x) => {
            let _ = write!(out, "{x}");
        }
        Value::Char(c) => write_char(out, *c),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Nothing => out.push_str("nothing"),
        Value::Nil => out.push_str("()"),
        Value::Symbol(s) => out.push_str(symbols.resolve(*s)),
        Value::Keyword(s) => {
            out.push(':');
            out.push_str(symbols.resolve(*s));
        }
        Value::Str(id) => write_string(out, heap.get_str(*id)),
        Value::Cons(_) => write_list(out, value, symbols, heap),
        Value::Array(id) => write_array(out, *id, symbols, heap),
        Value::Tuple(id) => {
            out.push_str("#(");
            write_seq(out, heap.get_tuple(*id), symbols, heap);
            out.push(')');
        }
        other => {
            let _ = write!(out, "#<{}>", other_type_name(other));
        }
    }
}

fn other_type_name(v: &Value) -> &'static str {
    match v {
        Value::Dict(_) => "dict",
        Value::Set(_) => "set",
        Value::NamedTuple(_) => "named-tuple",
        Value::Closure(_) => "closure",
        Value::Generic(_) => "generic",
        Value::Kind(_) => "kind",
        Value::Box(_) => "box",
        Value::Continuation(_) => "continuation",
        Value::Atom(_) => "atom",
        Value::Channel(_) => "channel",
        Value::ThreadHandle(_) => "thread",
        Value::Error(_) => "error",
        Value::UserType(_) => "user-type",
        _ => "value",
    }
}

fn write_seq(out: &mut String, items: &[Value], symbols: &Symbols, heap: &Heap) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, item, symbols, heap);
    }
}

fn write_array(out: &mut String, id: HeapId, symbols: &Symbols, heap: &Heap) {
    let arr = heap.get_array(id);
    out.push('[');
    write_seq(out, &arr.items, symbols, heap);
    out.push(']');
}

fn write_list(out: &mut String, value: &Value, symbols: &Symbols, heap: &Heap) {
    out.push('(');
    let mut cur = value.clone();
    let mut first = true;
    loop {
        match cur {
            Value::Nil => break,
            Value::Cons(id) => {
                if !first {
                    out.push(' ');
                }
                first = false;
                let HeapData::Cons(car, cdr) = heap.get(id).clone() else { unreachable!() };
                write_value(out, &car, symbols, heap);
                cur = cdr;
            }
            other => {
                out.push_str(" . ");
                write_value(out, &other, symbols, heap);
                break;
            }
        }
    }
    out.push(')');
}

fn write_char(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("#\\newline"),
        ' ' => out.push_str("#\\space"),
        '\t' => out.push_str("#\\tab"),
        '\r' => out.push_str("#\\return"),
        _ => {
            out.push_str("#\\");
            out.push(c);
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::Heap, pika::grammar::parse_program};

    fn round_trip(src: &str) {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (forms, diags) = parse_program(src, &mut symbols, &mut heap);
        assert!(diags.is_empty(), "unexpected diagnostics for {src:?}: {diags:?}");
        let printed = print(&forms[0], &symbols, &heap);

        let mut symbols2 = Symbols::new();
        let mut heap2 = Heap::new();
        let (forms2, diags2) = parse_program(&printed, &mut symbols2, &mut heap2);
        assert!(diags2.is_empty(), "reprint {printed:?} failed to reparse");
        let printed_again = print(&forms2[0], &symbols2, &heap2);
        assert_eq!(printed, printed_again, "printer is not a fixpoint for {src:?}");
    }

    #[test]
    fn round_trips_calls_and_atoms() {
        round_trip("(+ 1 2)");
        round_trip("(define (fact n) (if (< n 2) 1 (* n (fact (- n 1)))))");
        round_trip("[1 2 3]");
        round_trip("true");
        round_trip("\"hello\"");
    }

    #[test]
    fn round_trips_improper_lists() {
        round_trip("(1 2 . 3)");
    }
}
