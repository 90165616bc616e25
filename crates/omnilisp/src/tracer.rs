//! Per-pass timing instrumentation (spec §6's `,time` REPL command and
//! `-v` CLI flag), generalized from the teacher's bytecode-opcode
//! [`VmTracer`](../../../examples/parcadei-ouros/crates/ouros/src/tracer.rs)
//! family down to the coarser grain this compiler actually has: five
//! passes instead of per-instruction dispatch, so one trait with a
//! handful of implementations covers it instead of five.

use std::time::{Duration, Instant};

/// Observes pass boundaries. All methods default to no-ops so a tracer
/// only needs to implement what it cares about.
pub trait Tracer {
    fn on_pass_start(&mut self, _name: &str) {}
    fn on_pass_end(&mut self, _name: &str, _elapsed: Duration) {}
}

/// The default: observes nothing, costs nothing.
pub struct NoopTracer;
impl Tracer for NoopTracer {}

/// Prints each pass's elapsed time to stderr as it finishes.
pub struct StderrTracer;
impl Tracer for StderrTracer {
    fn on_pass_end(&mut self, name: &str, elapsed: Duration) {
        eprintln!("{name}: {elapsed:?}");
    }
}

/// One pass's recorded timing.
#[derive(Debug, Clone)]
pub struct PassTiming {
    pub name: String,
    pub elapsed: Duration,
}

/// Accumulates every pass's timing instead of printing immediately;
/// the REPL's `,time` command (spec §6) reads `timings` back after a
/// compile to render its own summary.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub timings: Vec<PassTiming>,
}

impl Tracer for RecordingTracer {
    fn on_pass_end(&mut self, name: &str, elapsed: Duration) {
        self.timings.push(PassTiming { name: name.to_string(), elapsed });
    }
}

/// Times one pass's closure and reports it to `tracer` on both ends.
/// `CompilerContext::compile_traced` wraps every pass in one of these.
pub struct PassTracer<'a> {
    tracer: &'a mut dyn Tracer,
    name: &'static str,
}

impl<'a> PassTracer<'a> {
    pub fn new(tracer: &'a mut dyn Tracer, name: &'static str) -> Self {
        tracer.on_pass_start(name);
        Self { tracer, name }
    }

    pub fn run<T>(self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.tracer.on_pass_end(self.name, start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_every_pass() {
        let mut tracer = RecordingTracer::default();
        let value = PassTracer::new(&mut tracer, "parse").run(|| 1 + 1);
        assert_eq!(value, 2);
        assert_eq!(tracer.timings.len(), 1);
        assert_eq!(tracer.timings[0].name, "parse");
    }
}
