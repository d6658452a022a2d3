use std::process;

use jitcalc::repl::Repl;
use jitcalc::{bench, compiler, jit, read_str};
use rustyline::error::ReadlineError;

/// Run one line of source through the full pipeline under the JIT tier.
fn evaluate(line: &str) -> Result<f64, String> {
    let expr = read_str(line).map_err(|e| e.to_string())?;
    let program = compiler::compile(&expr);
    let code = jit::compile(&program).map_err(|e| e.to_string())?;
    Ok(code.call())
}

fn clear_screen() {
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("cmd").args(["/c", "cls"]).status();
    }
    #[cfg(not(windows))]
    {
        use std::io::Write;

        // ANSI: clear screen, cursor home.
        print!("\x1b[2J\x1b[H");
        let _ = std::io::stdout().flush();
    }
}

fn main() {
    let mut repl = match Repl::new() {
        Ok(repl) => repl,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    loop {
        let line = match repl.read_line("$ ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        repl.add_history(line);

        match line {
            "exit" => break,
            "cls" => {
                clear_screen();
                continue;
            }
            "test" => {
                if let Err(e) = bench::run() {
                    println!("error: {}", e);
                }
            }
            _ => match evaluate(line) {
                Ok(value) => println!("{}", value),
                Err(e) => println!("error: {}", e),
            },
        }

        println!();
    }

    repl.finalize();
}
