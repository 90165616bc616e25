#![doc = include_str!("../../../README.md")]

pub mod abi;
pub mod cfg;
pub mod codegen;
pub mod context;
pub mod errors;
pub mod eval;
pub mod forms;
pub mod heap;
pub mod intern;
pub mod macros;
pub mod pika;
pub mod region;
pub mod repl;
pub mod tracer;
pub mod value;

pub use crate::{
    context::{CompileArtifacts, CompileOptions, CompilerContext},
    errors::{CompileError, Result},
    eval::{EvalSession, Evaluator},
    repl::Repl,
    tracer::{NoopTracer, PassTracer, RecordingTracer, StderrTracer, Tracer},
};
