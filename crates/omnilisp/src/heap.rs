//! The compile-session arena backing every heap-allocated [`Value`].
//!
//! Slots are reused via a free list the way the teacher's `Heap::allocate`
//! reuses `free_list` entries, but this arena has no refcount field: the
//! whole arena is owned by one [`crate::context::CompilerContext`] and
//! dropped in bulk at the end of compilation (see `value.rs`'s module doc).

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    errors::{EvalError, SourcePos},
    intern::SymbolId,
    value::{HeapId, Value},
};

/// `array (growable, indexed, with has_boxed flag)` (spec §3).
///
/// `has_boxed` is set once any non-immediate element is stored; the
/// region engine and escape analyzer use it as a fast pre-filter before
/// walking an array's contents for edges/escapes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OArray {
    pub items: Vec<Value>,
    pub has_boxed: bool,
}

impl OArray {
    pub fn push(&mut self, v: Value) {
        if !v.is_immediate() {
            self.has_boxed = true;
        }
        self.items.push(v);
    }
}

/// Canonical, heap-independent representation of a value usable as a
/// dict/set key. Computed eagerly at insertion time (mirroring the
/// teacher's `HashState::for_data` precomputed hash), so lookups never
/// need to re-borrow the arena recursively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) enum HashKey {
    Int(i64),
    /// Float and char bit patterns, canonicalized so `HashKey` can derive `Hash`.
    Bits(u64),
    Bool(bool),
    Nil,
    Nothing,
    Symbol(SymbolId),
    Keyword(SymbolId),
    Str(String),
    Tuple(Vec<HashKey>),
}

/// `dictionary (insertion-ordered key/value mapping with structural
/// equality on keys)` (spec §3).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ODict {
    pub(crate) entries: IndexMap<HashKey, (Value, Value)>,
}

impl ODict {
    pub fn insert(&mut self, key: Value, value: Value, heap: &Heap) -> Result<Option<Value>, EvalError> {
        let hk = heap.hash_key(&key)?;
        Ok(self.entries.insert(hk, (key, value)).map(|(_, v)| v))
    }

    pub fn get(&self, key: &Value, heap: &Heap) -> Result<Option<&Value>, EvalError> {
        let hk = heap.hash_key(key)?;
        Ok(self.entries.get(&hk).map(|(_, v)| v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }
}

/// `set` (spec §3), stored the same way as `ODict` but with no payload value.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OSet {
    pub(crate) entries: IndexMap<HashKey, Value>,
}

impl OSet {
    pub fn insert(&mut self, value: Value, heap: &Heap) -> Result<bool, EvalError> {
        let hk = heap.hash_key(&value)?;
        Ok(self.entries.insert(hk, value).is_none())
    }

    pub fn contains(&self, value: &Value, heap: &Heap) -> Result<bool, EvalError> {
        let hk = heap.hash_key(value)?;
        Ok(self.entries.contains_key(&hk))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A closure: a function pointer (its body, as a `Value` AST node), its
/// captured bindings, its arity, and an optional name (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Closure {
    pub name: Option<SymbolId>,
    pub params: Vec<SymbolId>,
    pub rest_param: Option<SymbolId>,
    pub body: Vec<Value>,
    pub captured: IndexMap<SymbolId, Value>,
}

impl Closure {
    #[must_use]
    pub fn arity(&self) -> (usize, Option<usize>) {
        (self.params.len(), if self.rest_param.is_some() { None } else { Some(self.params.len()) })
    }
}

/// One method of a [`Generic`] dispatch table: a list of parameter kinds
/// and the closure invoked when an argument list matches them.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenericMethod {
    pub param_kinds: Vec<Value>,
    pub specificity: u32,
    pub body: HeapId,
}

/// `generic (multi-method dispatch table sorted by specificity)` (spec §3).
///
/// Only the data representation is in scope here: full multi-dispatch
/// resolution belongs to the standard library of primitives, which spec
/// §1 explicitly treats as an external collaborator once it exists as a
/// first-class value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Generic {
    pub name: SymbolId,
    pub methods: Vec<GenericMethod>,
}

impl Generic {
    /// Methods sorted most-specific first, as the spec requires.
    pub fn sort_by_specificity(&mut self) {
        self.methods.sort_by(|a, b| b.specificity.cmp(&a.specificity));
    }
}

/// `kind (first-class type descriptor with parametric slots)` (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Kind {
    pub name: SymbolId,
    pub params: Vec<SymbolId>,
    pub slots: Vec<SymbolId>,
}

/// `user-defined type instance` (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserInstance {
    pub kind: HeapId,
    pub fields: IndexMap<SymbolId, Value>,
}

/// `error` value (spec §3), distinct from [`crate::errors::CompileError`]:
/// this is a first-class runtime value a program can construct, raise, and
/// inspect, not a Rust-level error type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OError {
    pub kind: SymbolId,
    pub message: String,
    pub payload: Value,
}

/// Everything a [`HeapId`] can point to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum HeapData {
    Str(String),
    Cons(Value, Value),
    Array(OArray),
    Dict(ODict),
    Set(OSet),
    Tuple(Vec<Value>),
    NamedTuple { names: Vec<SymbolId>, values: Vec<Value> },
    Closure(Closure),
    Generic(Generic),
    Kind(Kind),
    /// Mutable cell (spec §3 "box").
    BoxCell(Value),
    /// Opaque marker; `reset`/`shift`/`handle`/`perform` are out of scope for
    /// the reference evaluator (see spec §9 Open Questions and DESIGN.md).
    Continuation,
    /// Atomic reference for shared state. The reference evaluator is
    /// single-threaded, so "atomic" here only means "updated via a single
    /// `compare_and_swap`-shaped method," not lock-free in the OS sense;
    /// generated code uses the real `ATOMIC_*` macros (spec §4.G).
    Atom(Value),
    /// No channel value is ever constructed (spec §9); the variant exists
    /// only so `HeapData` has a slot matching `Value::Channel` for the rare
    /// case a user type descriptor predicate needs to name every kind.
    Channel,
    ThreadHandle,
    Error(OError),
    UserType(UserInstance),
}

impl HeapData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapData::Str(_) => "string",
            HeapData::Cons(..) => "cons",
            HeapData::Array(_) => "array",
            HeapData::Dict(_) => "dict",
            HeapData::Set(_) => "set",
            HeapData::Tuple(_) => "tuple",
            HeapData::NamedTuple { .. } => "named-tuple",
            HeapData::Closure(_) => "closure",
            HeapData::Generic(_) => "generic",
            HeapData::Kind(_) => "kind",
            HeapData::BoxCell(_) => "box",
            HeapData::Continuation => "continuation",
            HeapData::Atom(_) => "atom",
            HeapData::Channel => "channel",
            HeapData::ThreadHandle => "thread",
            HeapData::Error(_) => "error",
            HeapData::UserType(_) => "user-type",
        }
    }
}

/// The compile-session value arena.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Heap {
    entries: Vec<Option<HeapData>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(data);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(data));
            id
        }
    }

    /// Frees a slot for reuse. The compiler core never calls this itself
    /// (the whole arena is dropped at once, see `value.rs`); it exists for
    /// the reference evaluator, which does want individual cons cells and
    /// boxes to become collectible garbage for long REPL sessions.
    pub fn free(&mut self, id: HeapId) {
        self.entries[id.index()] = None;
        self.free_list.push(id);
    }

    /// Count of allocated (non-freed) slots, for tests asserting that a
    /// pass of purely-immediate arithmetic never touches the arena.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries[id.index()].as_ref().expect("dangling HeapId")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries[id.index()].as_mut().expect("dangling HeapId")
    }

    #[must_use]
    pub fn get_str(&self, id: HeapId) -> &str {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected Str, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn get_cons(&self, id: HeapId) -> (&Value, &Value) {
        match self.get(id) {
            HeapData::Cons(car, cdr) => (car, cdr),
            other => panic!("expected Cons, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn get_array(&self, id: HeapId) -> &OArray {
        match self.get(id) {
            HeapData::Array(a) => a,
            other => panic!("expected Array, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn get_tuple(&self, id: HeapId) -> &[Value] {
        match self.get(id) {
            HeapData::Tuple(t) => t,
            other => panic!("expected Tuple, found {}", other.type_name()),
        }
    }

    pub fn alloc_cons(&mut self, car: Value, cdr: Value) -> HeapId {
        self.alloc(HeapData::Cons(car, cdr))
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> HeapId {
        self.alloc(HeapData::Str(s.into()))
    }

    /// Builds a proper list `(a b c)` from a slice, ending in `Value::Nil`.
    pub fn alloc_list(&mut self, items: &[Value]) -> Value {
        let mut tail = Value::Nil;
        for item in items.iter().rev() {
            let id = self.alloc_cons(item.clone(), tail);
            tail = Value::Cons(id);
        }
        tail
    }

    /// Walks a proper list into a `Vec`. Returns `None` if the list is improper.
    #[must_use]
    pub fn list_to_vec(&self, mut v: &Value) -> Option<Vec<Value>> {
        let mut out = Vec::new();
        loop {
            match v {
                Value::Nil => return Some(out),
                Value::Cons(id) => {
                    let (car, cdr) = self.get_cons(*id);
                    out.push(car.clone());
                    v = cdr;
                }
                _ => return None,
            }
        }
    }

    /// Canonicalizes a value into a [`HashKey`] for dict/set storage.
    /// Mirrors the teacher's `type_error_unhashable*` family: mutable
    /// containers are rejected with a `TypeMismatch` error rather than
    /// silently hashing by identity.
    pub(crate) fn hash_key(&self, v: &Value) -> Result<HashKey, EvalError> {
        let unhashable = |got: &str| EvalError::TypeMismatch {
            pos: SourcePos::default(),
            expected: "hashable value",
            got: got.to_owned(),
        };
        match v {
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Float(x) => Ok(HashKey::Bits(x.to_bits())),
            Value::Char(c) => Ok(HashKey::Bits(u64::from(*c as u32))),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            Value::Nothing => Ok(HashKey::Nothing),
            Value::Nil => Ok(HashKey::Nil),
            Value::Symbol(s) => Ok(HashKey::Symbol(*s)),
            Value::Keyword(s) => Ok(HashKey::Keyword(*s)),
            Value::Str(id) => Ok(HashKey::Str(self.get_str(*id).to_owned())),
            Value::Tuple(id) => {
                let items = self
                    .get_tuple(*id)
                    .iter()
                    .map(|x| self.hash_key(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HashKey::Tuple(items))
            }
            other => Err(unhashable(other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_freed_slots() {
        let mut heap = Heap::new();
        let a = heap.alloc_str("a");
        let b = heap.alloc_str("b");
        heap.free(a);
        let c = heap.alloc_str("c");
        assert_eq!(a, c, "freed slot should be reused before growing the arena");
        assert_ne!(b, c);
    }

    #[test]
    fn list_round_trips_through_cons_cells() {
        let mut heap = Heap::new();
        let items = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let list = heap.alloc_list(&items);
        let back = heap.list_to_vec(&list).unwrap();
        assert_eq!(back.len(), 3);
        assert!(matches!(back[0], Value::Int(1)));
    }

    #[test]
    fn dict_uses_structural_equality_on_keys() {
        let mut heap = Heap::new();
        let s1 = heap.alloc_str("k");
        let s2 = heap.alloc_str("k");
        let mut dict = ODict::default();
        dict.insert(Value::Str(s1), Value::Int(1), &heap).unwrap();
        let got = dict.get(&Value::Str(s2), &heap).unwrap();
        assert!(matches!(got, Some(Value::Int(1))), "distinct HeapIds with equal content must collide");
    }

    #[test]
    fn arrays_cannot_be_dict_keys() {
        let heap = Heap::new();
        let err = heap.hash_key(&Value::Array(HeapId(0)));
        assert!(err.is_err());
    }
}
