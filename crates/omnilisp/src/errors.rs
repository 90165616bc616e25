//! Error taxonomy for every pass in the pipeline.
//!
//! Mirrors the shape of a hand-written, dependency-free exception
//! hierarchy rather than a `thiserror` derive tree: each pass gets a
//! plain enum plus a manual [`fmt::Display`] impl, and a single
//! [`CompileError`] unifies them at the CLI boundary.

use std::fmt;

/// A `(line, column)` location in the original source text, 1-based.
///
/// Produced by the Pika parser for every AST node and carried through
/// macro expansion and analysis so diagnostics always point at real
/// source text, per the user-visible message contract in the spec's
/// error-handling section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
    /// Byte offset into the source buffer; used to slice out the failing form's text.
    pub offset: u32,
}

impl SourcePos {
    #[must_use]
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lexical and syntactic failures raised by the Pika parser (spec §4.P).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnterminatedString { pos: SourcePos },
    InvalidEscape { pos: SourcePos, escape: String },
    SymbolOverflow { pos: SourcePos, limit: usize },
    IntegerOverflow { pos: SourcePos, text: String },
    DepthOverflow { pos: SourcePos, limit: u32 },
    /// The grammar has no rule that matches at this position.
    NoMatch { pos: SourcePos, rule: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString { pos } => write!(f, "{pos}: unterminated string"),
            Self::InvalidEscape { pos, escape } => write!(f, "{pos}: invalid escape sequence '\\{escape}'"),
            Self::SymbolOverflow { pos, limit } => {
                write!(f, "{pos}: symbol exceeds maximum length of {limit} bytes")
            }
            Self::IntegerOverflow { pos, text } => write!(f, "{pos}: integer literal '{text}' does not fit in 60 bits"),
            Self::DepthOverflow { pos, limit } => {
                write!(f, "{pos}: nesting depth exceeds limit of {limit}")
            }
            Self::NoMatch { pos, rule } => write!(f, "{pos}: expected {rule}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Macro-expansion failures (spec §4.M / §7). Arity mismatch on a single
/// clause is not represented here: the expander retries the next clause
/// internally and only surfaces `NoMatchingClause` once every clause in
/// a `syntax-rules` form has failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroError {
    NoMatchingClause { pos: SourcePos, macro_name: String },
    EllipsisWithoutVariable { pos: SourcePos },
    RecursionLimitExceeded { pos: SourcePos, limit: u32, chain: Vec<String> },
    UnboundSyntax { pos: SourcePos, name: String },
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingClause { pos, macro_name } => {
                write!(f, "{pos}: no pattern in '{macro_name}' matches this form")
            }
            Self::EllipsisWithoutVariable { pos } => {
                write!(f, "{pos}: '...' sub-template has no ellipsis-bound pattern variable")
            }
            Self::RecursionLimitExceeded { pos, limit, chain } => {
                write!(
                    f,
                    "{pos}: macro expansion exceeded recursion cap of {limit} (via {})",
                    chain.join(" -> ")
                )
            }
            Self::UnboundSyntax { pos, name } => write!(f, "{pos}: '{name}' is not a macro"),
        }
    }
}

impl std::error::Error for MacroError {}

/// Non-fatal analysis findings (spec §7: "the analyzer never aborts; it
/// annotates and proceeds"). Collected alongside the analyzer's output
/// rather than returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisWarning {
    FreeVariable { pos: SourcePos, name: String },
    SetOnUnbound { pos: SourcePos, name: String },
}

impl fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeVariable { pos, name } => write!(f, "{pos}: warning: free variable '{name}'"),
            Self::SetOnUnbound { pos, name } => {
                write!(f, "{pos}: warning: 'set!' on unbound name '{name}'")
            }
        }
    }
}

/// Region-engine internal-invariant violations (spec §4.R / §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    QuotaExceeded { region: u32, limit: usize, used: usize },
    UnreachableTransmigrateRoot { region: u32 },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded { region, limit, used } => {
                write!(f, "region {region}: quota exceeded ({used} > {limit} bytes)")
            }
            Self::UnreachableTransmigrateRoot { region } => {
                write!(f, "region {region}: transmigrate root is unreachable from any live owner (internal error)")
            }
        }
    }
}

impl std::error::Error for RegionError {}

/// Code-generation failures; the generator halts on the first one (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    UnsupportedForm { pos: SourcePos, form: String },
    MissingRegionPlan { var: String },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedForm { pos, form } => write!(f, "{pos}: cannot emit C for '{form}'"),
            Self::MissingRegionPlan { var } => {
                write!(f, "internal error: variable '{var}' has no region placement")
            }
        }
    }
}

impl std::error::Error for CodegenError {}

/// Runtime failures raised by the reference evaluator (spec §7's "Runtime" row).
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    DivisionByZero { pos: SourcePos },
    TypeMismatch { pos: SourcePos, expected: &'static str, got: String },
    UnboundVariable { pos: SourcePos, name: String },
    AssertionFailed { pos: SourcePos, message: String },
    Cancelled,
    Unsupported { pos: SourcePos, what: &'static str },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivisionByZero { pos } => write!(f, "{pos}: division by zero"),
            Self::TypeMismatch { pos, expected, got } => {
                write!(f, "{pos}: expected {expected}, got {got}")
            }
            Self::UnboundVariable { pos, name } => write!(f, "{pos}: unbound variable '{name}'"),
            Self::AssertionFailed { pos, message } => write!(f, "{pos}: assertion failed: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unsupported { pos, what } => write!(f, "{pos}: unsupported: {what}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Unifying error type at the CLI boundary. Each pass's own error type
/// converts into this via `From`, matching the teacher's
/// `From<ExceptionRaise> for RunError` / `From<SimpleException> for RunError` pattern.
#[derive(Debug, Clone)]
pub enum CompileError {
    Parse(ParseError),
    Macro(MacroError),
    Region(RegionError),
    Codegen(CodegenError),
    Eval(EvalError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Macro(e) => write!(f, "{e}"),
            Self::Region(e) => write!(f, "{e}"),
            Self::Codegen(e) => write!(f, "{e}"),
            Self::Eval(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<MacroError> for CompileError {
    fn from(e: MacroError) -> Self {
        Self::Macro(e)
    }
}

impl From<RegionError> for CompileError {
    fn from(e: RegionError) -> Self {
        Self::Region(e)
    }
}

impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        Self::Codegen(e)
    }
}

impl From<EvalError> for CompileError {
    fn from(e: EvalError) -> Self {
        Self::Eval(e)
    }
}

/// Result alias used throughout the crate, named the way the teacher names `RunResult<T>`.
pub type Result<T> = std::result::Result<T, CompileError>;
