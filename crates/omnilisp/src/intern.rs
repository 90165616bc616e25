//! Symbol interning and gensym generation.
//!
//! Every symbol and keyword name that appears in source text, a macro
//! template, or a hygiene-renamed identifier is interned here and referred
//! to by [`SymbolId`] everywhere else in the compiler. This avoids cloning
//! strings through the parser, macro expander, and analyzer, and gives
//! `SymbolId` a cheap `Copy` + `Eq` + `Hash` that the CFG/VIG hash maps rely
//! on instead of linear string scans.

use ahash::AHashMap;

/// Index into the [`Symbols`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interns symbol and keyword text, plus drives gensym allocation.
///
/// `names` is the forward table (`SymbolId -> &str`); `lookup` is the
/// reverse table (`&str -> SymbolId`) used to dedupe on intern.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Symbols {
    names: Vec<String>,
    #[serde(skip)]
    lookup: AHashMap<String, SymbolId>,
    gensym_counter: u64,
    /// Monotonic per-macro-invocation hygiene mark counter (spec §4.M).
    mark_counter: u32,
}

impl Symbols {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its existing id if already interned.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.lookup.insert(name.to_owned(), id);
        id
    }

    #[must_use]
    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.names[id.index()]
    }

    /// Allocates a fresh hygiene mark. One is drawn per macro invocation (spec §4.M).
    pub fn fresh_mark(&mut self) -> u32 {
        self.mark_counter += 1;
        self.mark_counter
    }

    /// `(gensym [prefix])`: returns a symbol of the form `_<prefix>_<counter>`
    /// with a global monotonic counter (spec §4.M).
    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        self.gensym_counter += 1;
        let name = format!("_{prefix}_{}", self.gensym_counter);
        self.intern(&name)
    }

    /// Builds the hygiene-renamed name `<name>_m<mark>` for a template-introduced
    /// identifier, interning it if this is the first occurrence for this
    /// `(name, mark)` pair. Callers memoize the `(SymbolId, mark) -> SymbolId`
    /// mapping themselves (see `macros::hygiene::HygieneContext`) so repeated
    /// references within one expansion resolve to the same renamed symbol.
    pub fn mark_rename(&mut self, name: &str, mark: u32) -> SymbolId {
        let renamed = format!("{name}_m{mark}");
        self.intern(&renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedupes() {
        let mut s = Symbols::new();
        let a = s.intern("foo");
        let b = s.intern("foo");
        assert_eq!(a, b);
        assert_eq!(s.resolve(a), "foo");
    }

    #[test]
    fn gensym_is_monotonic_and_unique() {
        let mut s = Symbols::new();
        let a = s.gensym("tmp");
        let b = s.gensym("tmp");
        assert_ne!(a, b);
        assert_eq!(s.resolve(a), "_tmp_1");
        assert_eq!(s.resolve(b), "_tmp_2");
    }

    #[test]
    fn marks_are_fresh_per_invocation() {
        let mut s = Symbols::new();
        let m1 = s.fresh_mark();
        let m2 = s.fresh_mark();
        assert_ne!(m1, m2);
    }
}
