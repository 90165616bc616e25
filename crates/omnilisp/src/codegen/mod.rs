//! C99 code generation (spec §4.G): the last pass in
//! [`crate::context::CompilerContext::compile`]'s pipeline, turning an
//! analyzed [`Cfg`] and its [`RegionPlan`]s into a translation unit that
//! links against the runtime contract in [`crate::abi`].
//!
//! One emitted C function per `Cfg` (the top-level program counts as a
//! zero-parameter one), each responsible for its own regions' lifecycle:
//! `region_create` at the dominator position a region's members need,
//! allocation calls threaded with that region, escape-repair calls at the
//! boundary where a value crosses into an enclosing scope, and
//! `region_exit`/`region_destroy_if_dead` at the end. See
//! `codegen::function` for the per-function emitter and `codegen::regions`
//! for how a `RegionPlan` becomes a set of per-block events.

pub mod function;
pub mod regions;

use crate::{
    cfg::Cfg,
    context::CompileOptions,
    errors::CodegenError,
    heap::Heap,
    intern::Symbols,
    region::RegionPlan,
};

/// The generated translation unit, ready to hand to a C99 compiler linked
/// against `libomnirt` (spec §1: the runtime and its C compiler are both
/// external collaborators this crate never invokes itself).
#[derive(Debug, Clone)]
pub struct CodegenOutput {
    pub source: String,
}

const PRELUDE: &str = "/* Generated by the OmniLisp compiler. Do not edit. */\n\n#include \"omni.h\"\n\n";

/// Runs code generation over an already-analyzed program (spec §4.G).
///
/// # Errors
/// Returns [`CodegenError::MissingRegionPlan`] if `region_plans` doesn't
/// cover every variable the top-level `cfg` owns (a region-engine
/// invariant violation upstream of this pass) — every other shape of
/// `Cfg`/`RegionPlan` this pass can reach is handled by construction.
pub fn generate(
    cfg: &Cfg,
    region_plans: &[RegionPlan],
    symbols: &Symbols,
    heap: &Heap,
    options: &CompileOptions,
) -> Result<CodegenOutput, CodegenError> {
    check_coverage(cfg, region_plans)?;

    let entry_name =
        if options.emit_shared_library { crate::abi::module_init_symbol(&options.module_name) } else { "o_main".to_string() };

    let (entry_def, nested_defs) = function::emit_cfg(cfg, region_plans, symbols, heap, options, &entry_name);

    let mut source = String::from(PRELUDE);
    for def in &nested_defs {
        source.push_str(def);
    }
    source.push_str(&entry_def);
    source.push_str(&emit_driver(&entry_name, options));

    Ok(CodegenOutput { source })
}

/// A region whose connected component includes at least one non-borrowed
/// member needs a plan; this just confirms the region engine produced one
/// for every such variable in `cfg` itself (nested closures re-run
/// inference independently in `function::emit_cfg` and are not this
/// function's concern).
fn check_coverage(cfg: &Cfg, plans: &[RegionPlan]) -> Result<(), CodegenError> {
    let planned: ahash::AHashSet<_> = plans.iter().flat_map(|p| p.members.iter().copied()).collect();
    for i in 0..cfg.vars.len() {
        let var = crate::cfg::VarId(i as u32);
        if cfg.captured_vars.contains(&var) {
            continue;
        }
        if !planned.contains(&var) {
            return Err(CodegenError::MissingRegionPlan { var: format!("v{i}") });
        }
    }
    Ok(())
}

/// For an executable compile, a thin `main` that creates the top-level
/// region and calls the program's entry point; for `--shared`, the
/// generated function already *is* the exported entry point, so nothing
/// more is emitted (spec §6 `--shared`/`--module-name`).
fn emit_driver(entry_name: &str, options: &CompileOptions) -> String {
    if options.emit_shared_library {
        return String::new();
    }
    format!(
        "int main(void) {{\n    Region* r_top = {create}();\n    OValue result = {entry}(r_top);\n    (void)result;\n    {exit}(r_top);\n    return 0;\n}}\n",
        create = crate::abi::REGION_CREATE.name,
        entry = entry_name,
        exit = crate::abi::REGION_EXIT.name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg, heap::Heap, intern::Symbols, macros::expander, pika, region};

    fn generate_source(src: &str) -> String {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (program, errs) = pika::parse(src, &mut symbols, &mut heap);
        assert!(errs.is_empty(), "{errs:?}");
        let options = CompileOptions::default();
        let expanded =
            expander::expand_program(&program, &mut symbols, &mut heap, options.macro_recursion_cap).unwrap();
        let forms = heap.list_to_vec(&expanded).unwrap_or_else(|| vec![expanded.clone()]);
        let begin = symbols.intern("begin");
        let forms: Vec<_> = if forms.first().is_some_and(|f| matches!(f, crate::value::Value::Symbol(s) if *s == begin))
        {
            forms[1..].to_vec()
        } else {
            forms
        };
        let (cfg, _warnings) = cfg::analyze(&forms, &heap, &symbols);
        let plans = region::infer_regions(&cfg, &options);
        generate(&cfg, &plans, &symbols, &heap, &options).unwrap().source
    }

    #[test]
    fn emits_a_runnable_main_for_a_trivial_program() {
        let source = generate_source("(+ 1 2)");
        assert!(source.contains("#include \"omni.h\""));
        assert!(source.contains("int main(void)"));
        assert!(source.contains("o_main"));
    }

    #[test]
    fn shared_library_mode_skips_the_driver() {
        let mut symbols = Symbols::new();
        let mut heap = Heap::new();
        let (program, errs) = pika::parse("(+ 1 2)", &mut symbols, &mut heap);
        assert!(errs.is_empty());
        let mut options = CompileOptions::default();
        options.emit_shared_library = true;
        options.module_name = "demo".to_string();
        let expanded =
            expander::expand_program(&program, &mut symbols, &mut heap, options.macro_recursion_cap).unwrap();
        let forms = heap.list_to_vec(&expanded).unwrap_or_else(|| vec![expanded.clone()]);
        let (cfg, _w) = cfg::analyze(&forms, &heap, &symbols);
        let plans = region::infer_regions(&cfg, &options);
        let output = generate(&cfg, &plans, &symbols, &heap, &options).unwrap();
        assert!(!output.source.contains("int main(void)"));
        assert!(output.source.contains("omni_module_demo_init"));
    }

    #[test]
    fn a_closure_body_emits_a_second_function() {
        let source = generate_source("(lambda (x) x)");
        assert!(source.contains("_k0("), "nested closure function missing: {source}");
    }
}
