//! `omni`: the command-line driver (spec §6). Argument parsing, file I/O,
//! and invoking the system C compiler are all external collaborators per
//! spec §1 — this binary is a thin shell over `omnilisp`'s library API,
//! hand-parsing its flags the way the teacher's `ouros-cli` main.rs does
//! rather than pulling in an argument-parsing crate the teacher's stack
//! doesn't carry.

use std::{
    env, fs,
    io::IsTerminal,
    process::{Command, ExitCode},
};

use omnilisp::{
    context::{program_forms, CompileOptions, CompilerContext},
    eval::Evaluator,
    intern::Symbols,
    heap::Heap,
    macros::expander,
    pika,
    repl::Repl,
    tracer::StderrTracer,
};

struct Args {
    file: Option<String>,
    emit_c: bool,
    output: Option<String>,
    eval_expr: Option<String>,
    verbose: bool,
    runtime: Option<String>,
    shared: bool,
    module_name: Option<String>,
}

enum ParsedArgs {
    Run(Args),
    Help,
    Version,
}

fn parse_args(raw: &[String]) -> Result<ParsedArgs, String> {
    let mut args = Args {
        file: None,
        emit_c: false,
        output: None,
        eval_expr: None,
        verbose: false,
        runtime: None,
        shared: false,
        module_name: None,
    };
    let mut it = raw.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParsedArgs::Help),
            "--version" => return Ok(ParsedArgs::Version),
            "-c" => args.emit_c = true,
            "-v" => args.verbose = true,
            "--shared" => args.shared = true,
            "-o" => {
                args.output = Some(it.next().ok_or("-o requires a file argument")?.clone());
            }
            "-e" => {
                args.eval_expr = Some(it.next().ok_or("-e requires an expression argument")?.clone());
            }
            "--runtime" => {
                args.runtime = Some(it.next().ok_or("--runtime requires a path argument")?.clone());
            }
            "--module-name" => {
                args.module_name = Some(it.next().ok_or("--module-name requires a name argument")?.clone());
            }
            other if other.starts_with('-') => return Err(format!("unrecognized option '{other}'")),
            other => args.file = Some(other.to_owned()),
        }
    }
    Ok(ParsedArgs::Run(args))
}

fn print_help() {
    println!(
        "omni [options] [file]\n\n\
         Options:\n\
         \x20\x20-c                emit C to stdout or -o file, don't run\n\
         \x20\x20-o <file>         output target\n\
         \x20\x20-e <expr>         evaluate an expression\n\
         \x20\x20-v                verbose (print pass timings)\n\
         \x20\x20--runtime <path>  path to the omni runtime (libomnirt)\n\
         \x20\x20--shared          compile as a shared module\n\
         \x20\x20--module-name <n> C identifier used as the module's exported entry point\n\
         \x20\x20-h, --help        show this help\n\
         \x20\x20--version         show the version"
    );
}

fn main() -> ExitCode {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(ParsedArgs::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(ParsedArgs::Version) => {
            println!("omni {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Ok(ParsedArgs::Run(args)) => args,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(expr) = &args.eval_expr {
        return run_eval(expr);
    }

    let Some(file) = &args.file else {
        if std::io::stdin().is_terminal() {
            Repl::new(CompileOptions::default()).run();
            return ExitCode::SUCCESS;
        }
        eprintln!("error: no input file and stdin is not a terminal");
        return ExitCode::FAILURE;
    };

    if let Some(runtime) = &args.runtime {
        if args.verbose {
            eprintln!("using runtime: {runtime}");
        }
    }

    let source = match fs::read_to_string(file) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: couldn't read '{file}': {err}");
            return ExitCode::FAILURE;
        }
    };

    let options = CompileOptions {
        emit_shared_library: args.shared,
        module_name: args.module_name.clone().unwrap_or_else(|| CompileOptions::default().module_name),
        ..CompileOptions::default()
    };
    let mut ctx = CompilerContext::new(options);

    let artifacts = if args.verbose {
        ctx.compile_traced(&source, &mut StderrTracer)
    } else {
        ctx.compile(&source)
    };
    let artifacts = match artifacts {
        Ok(a) => a,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };
    for warning in &artifacts.warnings {
        eprintln!("{warning}");
    }

    if args.emit_c || args.output.is_some() {
        return match &args.output {
            Some(path) => match fs::write(path, &artifacts.c_source) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("error: couldn't write '{path}': {err}");
                    ExitCode::FAILURE
                }
            },
            None => {
                print!("{}", artifacts.c_source);
                ExitCode::SUCCESS
            }
        };
    }

    // Without -c and without -o, compile and run (spec §6): this crate
    // never invokes the system C compiler itself (spec §1), so "run" means
    // evaluating the program directly through the reference evaluator.
    run_source_directly(&source)
}

fn run_eval(expr: &str) -> ExitCode {
    run_source_directly(expr)
}

/// Parses, expands, and evaluates `source` through the reference
/// evaluator, printing its result the way a compiled executable would
/// print its exit value. `--runtime` has nothing to consult on this path
/// (it names the C runtime library the external compiler would link
/// against); it is accepted for CLI-contract completeness and ignored here.
fn run_source_directly(source: &str) -> ExitCode {
    let mut symbols = Symbols::new();
    let mut heap = Heap::new();
    let (program, parse_errors) = pika::parse(source, &mut symbols, &mut heap);
    if let Some(err) = parse_errors.into_iter().next() {
        eprintln!("error:\n{err}");
        return ExitCode::FAILURE;
    }
    let cap = CompileOptions::default().macro_recursion_cap;
    let expanded = match expander::expand_program(&program, &mut symbols, &mut heap, cap) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };
    let forms = program_forms(&heap, &mut symbols, &expanded);
    let mut evaluator = Evaluator::new(&mut heap, &mut symbols);
    match evaluator.eval_top(&forms) {
        Ok(value) => {
            println!("{}", pika::print::print(&value, &symbols, &heap));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error:\n{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_flags_parse_without_a_file() {
        let args = match parse_args(&["-c".to_owned(), "-v".to_owned()]).unwrap() {
            ParsedArgs::Run(a) => a,
            _ => panic!("expected Run"),
        };
        assert!(args.emit_c);
        assert!(args.verbose);
        assert!(args.file.is_none());
    }

    #[test]
    fn dash_o_requires_its_argument() {
        assert!(parse_args(&["-o".to_owned()]).is_err());
    }

    #[test]
    fn file_argument_is_recognized() {
        let args = match parse_args(&["prog.omni".to_owned()]).unwrap() {
            ParsedArgs::Run(a) => a,
            _ => panic!("expected Run"),
        };
        assert_eq!(args.file.as_deref(), Some("prog.omni"));
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert!(matches!(parse_args(&["-h".to_owned()]).unwrap(), ParsedArgs::Help));
        assert!(matches!(parse_args(&["--version".to_owned()]).unwrap(), ParsedArgs::Version));
    }

    /// Not exercised as a subprocess test (no system C compiler available in
    /// this sandbox); `Command` is only referenced here to keep the
    /// `--runtime`-driving-a-real-linker contract visibly out of scope
    /// rather than silently unused.
    #[test]
    fn command_type_is_available_for_a_future_real_linker_integration() {
        let _ = Command::new("true");
    }
}
