//! Compiler configuration and the top-level pipeline that threads the
//! parser, macro expander, analyzer, region engine, and code generator
//! together (spec §4, §6). Mirrors the teacher's pattern of a single
//! config struct plus a thin driver function rather than a builder.

use crate::{
    abi, cfg,
    codegen::{self, CodegenOutput},
    errors::{CompileError, Result},
    heap::Heap,
    intern::Symbols,
    macros,
    pika,
    region,
    tracer::{PassTracer, Tracer},
};

/// Default byte threshold below which escape repair copies the value
/// (`Transmigrate`) rather than retaining the source region (spec §4.R).
pub const DEFAULT_TRANSMIGRATE_THRESHOLD: usize = 4096;

/// Default cap on `syntax-rules` expansion recursion (spec §4.M / §7).
pub const DEFAULT_MACRO_RECURSION_CAP: u32 = crate::macros::expander::DEFAULT_MACRO_RECURSION_CAP;

/// Default Pika parser nesting-depth cap (spec §4.P / §7).
pub const DEFAULT_PARSE_DEPTH_CAP: u32 = 256;

/// Tunables for one compilation run. Every field has a spec-mandated or
/// implementation-defined default; callers only override what they need.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Byte threshold for the escape-repair selection policy (spec §4.R).
    pub transmigrate_threshold: usize,
    /// `syntax-rules` expansion recursion cap (spec §4.M).
    pub macro_recursion_cap: u32,
    /// Pika parser nesting-depth cap (spec §4.P).
    pub parse_depth_cap: u32,
    /// Optional debug-only byte quota per region; `None` disables the check.
    pub debug_region_quota: Option<usize>,
    /// Emit to a shared library rather than an executable's `main` (spec §6 `--shared`).
    pub emit_shared_library: bool,
    /// C identifier used as the module's exported entry point (spec §6 `--module-name`).
    pub module_name: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            transmigrate_threshold: DEFAULT_TRANSMIGRATE_THRESHOLD,
            macro_recursion_cap: DEFAULT_MACRO_RECURSION_CAP,
            parse_depth_cap: DEFAULT_PARSE_DEPTH_CAP,
            debug_region_quota: None,
            emit_shared_library: false,
            module_name: "omnilisp_module".to_string(),
        }
    }
}

/// Diagnostics and regions gathered across a run, alongside the final
/// artifact. Parse/macro/region/codegen failures short-circuit via `Err`;
/// analyzer warnings never do (spec §7: "the analyzer never aborts").
#[derive(Debug, Clone)]
pub struct CompileArtifacts {
    pub warnings: Vec<crate::errors::AnalysisWarning>,
    pub region_plans: Vec<region::RegionPlan>,
    pub c_source: String,
}

/// Threads interning, diagnostics, and the macro/hygiene counters a whole
/// compilation shares. Owns the [`Heap`] and [`Symbols`] tables so callers
/// (the CLI, the REPL, tests) don't have to wire them through by hand.
pub struct CompilerContext {
    pub symbols: Symbols,
    pub heap: Heap,
    pub options: CompileOptions,
}

impl CompilerContext {
    #[must_use]
    pub fn new(options: CompileOptions) -> Self {
        Self { symbols: Symbols::new(), heap: Heap::new(), options }
    }

    /// Runs Parse -> Macro -> Analyze -> Region -> Codegen over `source`
    /// and returns the generated C99 translation unit plus diagnostics.
    pub fn compile(&mut self, source: &str) -> Result<CompileArtifacts> {
        self.compile_traced(source, &mut crate::tracer::NoopTracer)
    }

    /// Same as [`Self::compile`], reporting per-pass timing to `tracer`
    /// (spec §6's `,time` REPL command and `-v` CLI flag).
    pub fn compile_traced(&mut self, source: &str, tracer: &mut dyn Tracer) -> Result<CompileArtifacts> {
        let (program, parse_errors) = PassTracer::new(tracer, "parse")
            .run(|| pika::parse(source, &mut self.symbols, &mut self.heap));
        if let Some(e) = parse_errors.into_iter().next() {
            return Err(CompileError::from(e));
        }

        let expanded = PassTracer::new(tracer, "macro").run(|| {
            macros::expander::expand_program(&program, &mut self.symbols, &mut self.heap, self.options.macro_recursion_cap)
        })?;

        let forms = program_forms(&self.heap, &mut self.symbols, &expanded);

        let (cfg, warnings) =
            PassTracer::new(tracer, "analyze").run(|| cfg::analyze(&forms, &self.heap, &self.symbols));

        let region_plans = PassTracer::new(tracer, "region").run(|| region::infer_regions(&cfg, &self.options));

        let output: CodegenOutput = PassTracer::new(tracer, "codegen").run(|| {
            codegen::generate(&cfg, &region_plans, &self.symbols, &self.heap, &self.options)
        })?;

        Ok(CompileArtifacts { warnings, region_plans, c_source: output.source })
    }
}

/// Strips the wrapping `(begin ...)` the parser and expander both
/// produce, returning the bare top-level forms `cfg::analyze` expects.
/// Public so `repl.rs` and the `omni` CLI's direct-run path can share it
/// rather than re-deriving the same begin-stripping logic.
pub fn program_forms(heap: &Heap, symbols: &mut Symbols, program: &crate::value::Value) -> Vec<crate::value::Value> {
    let Some(mut forms) = heap.list_to_vec(program) else {
        return vec![program.clone()];
    };
    let begin = symbols.intern("begin");
    if forms.first().is_some_and(|f| matches!(f, crate::value::Value::Symbol(s) if *s == begin)) {
        forms.remove(0);
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program_without_panicking() {
        let mut ctx = CompilerContext::new(CompileOptions::default());
        let result = ctx.compile("(+ 1 2)");
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn default_threshold_matches_spec_constant() {
        assert_eq!(CompileOptions::default().transmigrate_threshold, 4096);
    }
}
