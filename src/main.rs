// File: src/main.rs
//
// CLI entry point. With no script path, drops into the REPL; with one,
// reads the file, interprets it, and exits with the status code the run
// produced. Anything else is a usage error.

mod chunk;
mod compiler;
mod debug;
mod errors;
mod heap;
mod lexer;
mod natives;
mod object;
mod repl;
mod table;
mod value;
mod vm;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use colored::Colorize;

use vm::{InterpretResult, Vm};

#[derive(ClapParser)]
#[command(name = "ruff", about = "Ruff: a small bytecode-compiled scripting language", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a Ruff script. Omit to start the interactive REPL.
    script: Option<PathBuf>,

    /// Run the garbage collector on every allocation instead of only past
    /// the heap threshold. Slow; exists to shake out root-marking bugs.
    #[arg(long)]
    stress_gc: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.script {
        None => {
            if let Err(e) = repl::run(cli.stress_gc) {
                eprintln!("{} {}", "REPL error:".red().bold(), e);
                return ExitCode::from(70);
            }
            ExitCode::SUCCESS
        }
        Some(path) => run_file(&path, cli.stress_gc),
    }
}

fn run_file(path: &PathBuf, stress_gc: bool) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} could not read '{}': {}", "Error:".red().bold(), path.display(), e);
            return ExitCode::from(65);
        }
    };

    let mut stdout = std::io::stdout();
    let mut vm = Vm::new(&mut stdout);
    vm.set_stress_gc(stress_gc);
    let result = vm.interpret(&source);

    for diagnostic in vm.diagnostics() {
        eprint!("{}", diagnostic);
    }

    match result {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}
