//! The universal dynamically-tagged value (spec §3 "Value").
//!
//! Uses a hybrid design like the teacher's `Value`: small immediate values
//! (integers, floats, characters, booleans, `nothing`, the empty list) are
//! stored inline; everything else is a [`HeapId`] into the compile
//! session's [`Heap`](crate::heap::Heap) arena.
//!
//! Unlike the teacher's `Value`, this one carries no manual reference
//! count: the compiler's AST/value heap has a single owner (the
//! [`CompilerContext`](crate::context::CompilerContext) that created it)
//! and is freed in bulk when compilation ends, exactly the way one region
//! in the emitted program is freed in bulk at scope exit. Per-value RC is
//! a property of *generated* code (spec §4.X), not of this compile-time
//! value representation, so `Value` derives `Clone` freely.

use std::fmt;

use crate::{heap::Heap, intern::SymbolId};

/// Index into the session [`Heap`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HeapId(pub(crate) usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The universal value. AST nodes, macro pattern/template data, and
/// reference-evaluator runtime values are all instances of this type
/// (spec §3: "AST node — a Value. The AST is homoiconic").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Value {
    // --- Immediates: never allocate (Testable Property 8). ---
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    Nothing,
    /// The empty list, `nil` / `()`. Distinct from `Cons` so `car`/`cdr` on
    /// it is a clean type error rather than a null-pointer special case.
    Nil,
    Symbol(SymbolId),
    Keyword(SymbolId),

    // --- Heap-allocated: indirect through the arena. ---
    Str(HeapId),
    Cons(HeapId),
    Array(HeapId),
    Dict(HeapId),
    Set(HeapId),
    Tuple(HeapId),
    NamedTuple(HeapId),
    Closure(HeapId),
    Generic(HeapId),
    Kind(HeapId),
    Box(HeapId),
    Continuation(HeapId),
    Atom(HeapId),
    /// Kept for data-model completeness (spec §3 lists it as a variant);
    /// no construction primitive exists. See DESIGN.md's resolution of
    /// the channel-semantics Open Question in spec §9.
    Channel(HeapId),
    ThreadHandle(HeapId),
    Error(HeapId),
    UserType(HeapId),
}

impl Value {
    /// `is_truthy` treats only `false` and `nothing` as falsy (spec §3 invariant).
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nothing)
    }

    /// True for the variants the spec requires to be non-allocating.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Value::Int(_)
                | Value::Float(_)
                | Value::Char(_)
                | Value::Bool(_)
                | Value::Nothing
                | Value::Nil
                | Value::Symbol(_)
                | Value::Keyword(_)
        )
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Char(_) => "character",
            Value::Bool(_) => "boolean",
            Value::Nothing => "nothing",
            Value::Nil => "nil",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::Str(_) => "string",
            Value::Cons(_) => "cons",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Tuple(_) => "tuple",
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
        }
    }

    /// Structural equality on keys, used by dict/set storage (spec §3: dicts
    /// have "structural equality on keys"). Containers compare by identity of
    /// contents where that's well-defined for keys; mutable containers are
    /// not comparable as keys at all (callers must reject them earlier via
    /// `heap::is_hashable`).
    #[must_use]
    pub fn structural_eq(&self, other: &Value, heap: &Heap) -> bool {
        use Value::{Array, Atom, Bool, Box as VBox, Char, Cons, Dict, Float, Int, Keyword, Nil, Nothing, Set, Str, Symbol, Tuple};
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Float(a), Float(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Nothing, Nothing) | (Nil, Nil) => true,
            (Symbol(a), Symbol(b)) | (Keyword(a), Keyword(b)) => a == b,
            (Str(a), Str(b)) => heap.get_str(*a) == heap.get_str(*b),
            (Cons(a), Cons(b)) => {
                let (ca, da) = heap.get_cons(*a);
                let (cb, db) = heap.get_cons(*b);
                ca.structural_eq(cb, heap) && da.structural_eq(db, heap)
            }
            (Array(a), Array(b)) => {
                let (xa, xb) = (heap.get_array(*a), heap.get_array(*b));
                xa.items.len() == xb.items.len()
                    && xa.items.iter().zip(&xb.items).all(|(x, y)| x.structural_eq(y, heap))
            }
            (Tuple(a), Tuple(b)) => {
                let (xa, xb) = (heap.get_tuple(*a), heap.get_tuple(*b));
                xa.len() == xb.len() && xa.iter().zip(xb).all(|(x, y)| x.structural_eq(y, heap))
            }
            (Dict(a), Dict(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (VBox(a), VBox(b)) | (Atom(a), Atom(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Heap-backed variants need the interner/arena to render their
        // contents, which this impl doesn't have access to; see
        // `pika::print::print` for the full printer the REPL and the
        // canonical round-trip property actually use.
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Char(c) => write!(f, "#\\{c}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nothing => write!(f, "nothing"),
            Value::Nil => write!(f, "()"),
            Value::Symbol(_) => write!(f, "<symbol>"),
            Value::Keyword(_) => write!(f, "<keyword>"),
            _ => write!(f, "<{}>", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_false_and_nothing_are_falsy() {
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Nothing.is_truthy());
        assert!(Value::Nil.is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Bool(true).is_truthy());
    }

    #[test]
    fn immediates_never_allocate() {
        assert!(Value::Int(42).is_immediate());
        assert!(Value::Bool(true).is_immediate());
        assert!(Value::Char('a').is_immediate());
        assert!(Value::Nothing.is_immediate());
        assert!(Value::Nil.is_immediate());
        assert!(!Value::Str(HeapId(0)).is_immediate());
    }
}
