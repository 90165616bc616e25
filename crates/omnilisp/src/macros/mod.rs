//! The hygienic `syntax-rules`-style macro expander (spec §4.M).

pub mod expander;
pub mod hygiene;
pub mod pattern;
pub mod template;

use crate::{errors::MacroError, heap::Heap, intern::Symbols, value::Value};

/// Expands every macro call in a parsed program to a fixed point.
pub fn expand(program: &Value, symbols: &mut Symbols, heap: &mut Heap) -> Result<Value, MacroError> {
    expander::expand_program(program, symbols, heap, expander::DEFAULT_MACRO_RECURSION_CAP)
}
