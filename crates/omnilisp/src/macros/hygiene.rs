//! Hygiene marks for one macro expansion (spec §4.M).
//!
//! Every symbol the template introduces (i.e. is not a substituted pattern
//! variable, not a reserved special form or primitive, and not
//! underscore-prefixed) is renamed to `<name>_m<mark>` so it cannot capture,
//! or be captured by, an identically-spelled identifier at the use site.
//! A name ending in `#` instead gets a true gensym, matching `(gensym
//! prefix)` semantics, memoized the same way so repeated occurrences of
//! `tmp#` within one expansion name the same fresh symbol.

use ahash::AHashMap;

use crate::intern::{SymbolId, Symbols};

pub struct HygieneContext {
    mark: u32,
    renamed: AHashMap<SymbolId, SymbolId>,
    gensymed: AHashMap<SymbolId, SymbolId>,
}

impl HygieneContext {
    pub fn new(symbols: &mut Symbols) -> Self {
        Self {
            mark: symbols.fresh_mark(),
            renamed: AHashMap::default(),
            gensymed: AHashMap::default(),
        }
    }

    /// Standard `<name>_m<mark>` rename, memoized per original symbol.
    pub fn rename(&mut self, name: SymbolId, symbols: &mut Symbols) -> SymbolId {
        if let Some(&r) = self.renamed.get(&name) {
            return r;
        }
        let text = symbols.resolve(name).to_owned();
        let r = symbols.mark_rename(&text, self.mark);
        self.renamed.insert(name, r);
        r
    }

    /// Auto-gensym for a `name#`-suffixed template symbol: a real fresh
    /// symbol via [`Symbols::gensym`], memoized per original symbol so
    /// repeated uses within one expansion agree.
    pub fn auto_gensym(&mut self, name: SymbolId, symbols: &mut Symbols) -> SymbolId {
        if let Some(&r) = self.gensymed.get(&name) {
            return r;
        }
        let text = symbols.resolve(name).to_owned();
        let stripped = text.strip_suffix('#').unwrap_or(&text).to_owned();
        let r = symbols.gensym(&stripped);
        self.gensymed.insert(name, r);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_is_memoized_within_one_context() {
        let mut symbols = Symbols::new();
        let name = symbols.intern("tmp");
        let mut ctx = HygieneContext::new(&mut symbols);
        let a = ctx.rename(name, &mut symbols);
        let b = ctx.rename(name, &mut symbols);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_contexts_rename_differently() {
        let mut symbols = Symbols::new();
        let name = symbols.intern("tmp");
        let mut ctx1 = HygieneContext::new(&mut symbols);
        let a = ctx1.rename(name, &mut symbols);
        let mut ctx2 = HygieneContext::new(&mut symbols);
        let b = ctx2.rename(name, &mut symbols);
        assert_ne!(a, b, "different invocations must use different marks");
    }

    #[test]
    fn auto_gensym_is_memoized_and_fresh_per_context() {
        let mut symbols = Symbols::new();
        let name = symbols.intern("tmp#");
        let mut ctx = HygieneContext::new(&mut symbols);
        let a = ctx.auto_gensym(name, &mut symbols);
        let b = ctx.auto_gensym(name, &mut symbols);
        assert_eq!(a, b);
        assert!(symbols.resolve(a).starts_with("_tmp_"));
    }
}
