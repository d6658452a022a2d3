//! The REPL `test` command: a fixed expression run under each tier.
//!
//! Each tier evaluates the same compiled inputs a million times; sums are
//! accumulated so the work cannot be optimized away, then printed together
//! with the elapsed wall-clock milliseconds.

use std::time::Instant;

use crate::compiler;
use crate::jit;
use crate::reader::read_str;
use crate::vm::Vm;

const ITERATIONS: u32 = 1_000_000;

/// Five copies of an expression worth −5, joined by `+`.
const SOURCE: &str = "2 * (3 + 1 / 2 - 6) + 2 * (3 + 1 / 2 - 6) + 2 * (3 + 1 / 2 - 6) \
                      + 2 * (3 + 1 / 2 - 6) + 2 * (3 + 1 / 2 - 6)";

/// Run the benchmark and print one line per tier.
pub fn run() -> Result<(), String> {
    let expr = read_str(SOURCE).map_err(|e| e.to_string())?;
    let program = compiler::compile(&expr);
    let code = jit::compile(&program).map_err(|e| e.to_string())?;
    let mut vm = Vm::new();

    let start = Instant::now();
    let mut sum = 0.0;
    for _ in 0..ITERATIONS {
        sum += expr.eval();
    }
    report("tree eval", sum, start);

    let start = Instant::now();
    let mut sum = 0.0;
    for _ in 0..ITERATIONS {
        sum += vm.run(&program).map_err(|e| e.to_string())?;
    }
    report("bytecode ", sum, start);

    let start = Instant::now();
    let mut sum = 0.0;
    for _ in 0..ITERATIONS {
        sum += code.call();
    }
    report("jit      ", sum, start);

    Ok(())
}

fn report(tier: &str, sum: f64, start: Instant) {
    println!(
        "{} sum = {}  elapsed = {} ms",
        tier,
        sum,
        start.elapsed().as_millis()
    );
}
