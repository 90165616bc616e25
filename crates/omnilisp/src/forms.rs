//! The reserved vocabulary shared by the macro expander's hygiene pass and
//! the analyzer's CFG builder: core special forms (which the CFG builder
//! gives prescribed shapes, spec §4.A) and core primitives. Symbols in
//! this set are never hygiene-renamed (spec §4.M) because they name
//! language-level structure, not user bindings.

/// Forms the CFG builder recognizes structurally by head symbol.
pub const SPECIAL_FORMS: &[&str] = &[
    "if", "let", "let*", "letrec", "lambda", "define", "define-syntax", "set!", "quote", "quasiquote", "unquote",
    "unquote-splicing", "syntax-quote", "begin", "and", "or", "cond", "syntax-rules",
];

/// Built-in primitives that a program may call but never shadow hygienically.
pub const CORE_PRIMITIVES: &[&str] = &[
    "+", "-", "*", "/", "<", ">", "<=", ">=", "=", "not", "cons", "car", "cdr", "mk-pair", "list", "get", "type-literal",
    "dict-literal", "vector-literal", "string-concat", "gensym",
];

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name) || CORE_PRIMITIVES.contains(&name)
}

#[must_use]
pub fn is_special_form(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}
