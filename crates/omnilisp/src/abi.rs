//! The runtime ABI manifest (spec §4.X "Runtime Contract").
//!
//! This module owns two things the code generator and nothing else needs:
//! the name-mangling scheme turned into code (spec §4.G), and the fixed
//! list of C entry points generated code is allowed to call. Neither the
//! runtime library itself nor the system C compiler that links against it
//! is implemented here — both are external collaborators per spec §1; this
//! is the contract the generator emits calls consistent with, so a real
//! `omni.h`/`libomnirt` implementing it would make the emitted translation
//! unit link and run unmodified.

/// One runtime entry point the generator is allowed to call, with its C
/// declaration spelled out so [`crate::codegen`] can emit a forward
/// declaration from `omni.h` without hand-duplicating signatures in two
/// places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFn {
    pub name: &'static str,
    pub c_signature: &'static str,
}

macro_rules! runtime_fns {
    ($($konst:ident => $name:literal, $sig:literal;)*) => {
        $(pub const $konst: RuntimeFn = RuntimeFn { name: $name, c_signature: $sig };)*

        /// Every runtime entry point generated code may call (spec §4.X).
        pub const ALL: &[RuntimeFn] = &[$($konst),*];
    };
}

runtime_fns! {
    MK_INT_REGION      => "mk_int_region",      "OValue mk_int_region(Region* r, int64_t n)";
    MK_FLOAT_REGION    => "mk_float_region",    "OValue mk_float_region(Region* r, double x)";
    MK_PAIR_REGION     => "mk_pair_region",     "OValue mk_pair_region(Region* r, OValue car, OValue cdr)";
    MK_ARRAY_REGION    => "mk_array_region",    "OValue mk_array_region(Region* r, size_t capacity)";
    MK_DICT_REGION     => "mk_dict_region",     "OValue mk_dict_region(Region* r, size_t capacity)";
    MK_STRING_REGION   => "mk_string_region",   "OValue mk_string_region(Region* r, const char* bytes, size_t len)";
    MK_CLOSURE         => "mk_closure",         "OValue mk_closure(Region* r, void* fn, OValue* captured, size_t n_captured)";

    REGION_CREATE            => "region_create",            "Region* region_create(void)";
    REGION_EXIT              => "region_exit",              "void region_exit(Region* r)";
    REGION_DESTROY_IF_DEAD   => "region_destroy_if_dead",   "void region_destroy_if_dead(Region* r)";
    REGION_ALLOC             => "region_alloc",              "void* region_alloc(Region* r, size_t bytes)";

    REGION_RETAIN_INTERNAL   => "region_retain_internal",   "void region_retain_internal(Region* r)";
    REGION_RELEASE_INTERNAL  => "region_release_internal",  "void region_release_internal(Region* r)";
    REGION_TETHER_START      => "region_tether_start",      "void region_tether_start(Region* r)";
    REGION_TETHER_END        => "region_tether_end",        "void region_tether_end(Region* r)";

    TRANSMIGRATE             => "transmigrate",              "OValue transmigrate(OValue root, Region* src, Region* dst)";

    CLOSURE_CALL              => "closure_call",              "OValue closure_call(Region* r, OValue closure, OValue* args, size_t n_args)";
}

/// Thread-locality macros (spec §4.G: "Emit thread locality as macros … so
/// atomic policy is swappable"). These are preprocessor macros in `omni.h`,
/// not functions, so they are named here rather than in [`ALL`].
pub const ATOMIC_INC_REF: &str = "ATOMIC_INC_REF";
pub const ATOMIC_DEC_REF: &str = "ATOMIC_DEC_REF";
pub const SPAWN_THREAD: &str = "SPAWN_THREAD";

/// Immediate-tag constructor macros (spec §3 Testable Property 8: immediates
/// never allocate). Unlike [`ALL`]'s entries, these never take a `Region*` —
/// an immediate lives entirely inside the tagged `OValue` word, so no
/// region bookkeeping applies to it at all.
pub const O_INT: &str = "O_INT";
pub const O_FLOAT: &str = "O_FLOAT";
pub const O_CHAR: &str = "O_CHAR";
pub const O_BOOL: &str = "O_BOOL";
pub const O_NOTHING: &str = "O_NOTHING";
pub const O_NIL: &str = "O_NIL";
pub const O_SYMBOL: &str = "O_SYMBOL";
pub const O_KEYWORD: &str = "O_KEYWORD";

/// `truthy(v)`: the runtime's implementation of the is-truthy rule (spec
/// §3: only `false` and `nothing` are falsy), used by every emitted branch.
pub const TRUTHY: &str = "truthy";

/// Maps one punctuation character to its mnemonic mangling suffix (spec
/// §4.G: "operator and punctuation mapped to mnemonic suffixes"). Symbols
/// are mangled character-by-character; alphanumerics and `_` pass through
/// verbatim (ASCII only — non-ASCII identifiers are rejected upstream by
/// the parser's symbol grammar).
fn mangle_char(c: char) -> &'static str {
    match c {
        '+' => "_add",
        '-' => "_sub",
        '*' => "_mul",
        '/' => "_div",
        '<' => "_lt",
        '>' => "_gt",
        '=' => "_eq",
        '?' => "_p",
        '!' => "_b",
        '.' => "_d",
        '_' => "__",
        '%' => "_pct",
        '&' => "_amp",
        '$' => "_dlr",
        '@' => "_at",
        '^' => "_crt",
        '~' => "_tld",
        _ => "",
    }
}

/// Mangles an OmniLisp identifier into a valid C identifier under the `o_`
/// prefix (spec §4.G). Every character of a legal symbol (alnum plus
/// `! $ % & * + - / < = > ? @ ^ _ ~`, spec §6) maps to either itself or a
/// named suffix, so the result is always `[A-Za-z0-9_]+` and distinct
/// source names never collide (no two punctuation characters share a
/// suffix, and alphanumerics are untouched).
#[must_use]
pub fn mangle(name: &str) -> String {
    let mut out = String::from("o_");
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push_str(mangle_char(c));
        }
    }
    out
}

/// `omni_module_<name>_init`: the exported entry point for a `--shared`
/// compile (spec §6).
#[must_use]
pub fn module_init_symbol(module_name: &str) -> String {
    format!("omni_module_{module_name}_init")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_operators_to_mnemonic_suffixes() {
        assert_eq!(mangle("+"), "o__add");
        assert_eq!(mangle("fact?"), "o_fact_p");
        assert_eq!(mangle("set!"), "o_set_b");
    }

    #[test]
    fn alphanumerics_pass_through() {
        assert_eq!(mangle("fact"), "o_fact");
        assert_eq!(mangle("fib10"), "o_fib10");
    }

    #[test]
    fn every_mangled_name_is_a_valid_c_identifier() {
        for name in ["+", "-", "*", "/", "<", ">", "<=", ">=", "=", "cons?", "my-func", "a.b", "_priv"] {
            let m = mangle(name);
            assert!(m.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'), "{m} is not a valid C identifier");
            assert!(!m.is_empty());
        }
    }

    #[test]
    fn module_init_symbol_matches_spec_naming() {
        assert_eq!(module_init_symbol("mymod"), "omni_module_mymod_init");
    }
}
