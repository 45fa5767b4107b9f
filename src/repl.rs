// File: src/repl.rs
//
// Interactive REPL. Grounded in the teacher's `repl.rs`: rustyline for
// line editing and history, colored for banner/error rendering, multi-line
// input held until braces balance. Each accepted chunk is compiled and run
// against a VM that persists across inputs so globals defined in one line
// are visible to the next.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::Vm;

pub fn run(stress_gc: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = DefaultEditor::new()?;
    show_banner();

    let mut stdout = std::io::stdout();
    let mut vm = Vm::new(&mut stdout);
    vm.set_stress_gc(stress_gc);
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "ruff> ".bright_green().to_string() } else { "....> ".bright_blue().to_string() };

        match editor.readline(&prompt) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());

                if buffer.is_empty() && line.trim() == ":quit" {
                    println!("{}", "Goodbye!".bright_cyan());
                    break;
                }

                buffer.push_str(&line);
                buffer.push('\n');

                if is_input_complete(&buffer) {
                    eval_and_report(&mut vm, &buffer);
                    buffer.clear();
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C (Ctrl+C to interrupt, :quit to exit)".bright_yellow());
                buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "\nGoodbye!".bright_cyan());
                break;
            }
            Err(err) => {
                eprintln!("{} {}", "Error:".bright_red(), err);
                break;
            }
        }
    }

    Ok(())
}

fn show_banner() {
    println!("{}", "Ruff REPL — :quit to exit".bright_cyan());
}

fn eval_and_report(vm: &mut Vm, source: &str) {
    let before = vm.diagnostics().len();
    vm.interpret(source);
    for diagnostic in &vm.diagnostics()[before..] {
        eprint!("{}", diagnostic);
    }
}

/// An input chunk is complete once every brace it opened has closed and
/// we aren't mid-string; matches the teacher's bracket-balance heuristic,
/// narrowed to braces since Ruff has no bracket/paren-only continuations
/// worth waiting on at the REPL.
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut brace_count: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in trimmed.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => brace_count -= 1,
            _ => {}
        }
    }

    !in_string && brace_count <= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_is_immediately_complete() {
        assert!(is_input_complete("print 1;\n"));
    }

    #[test]
    fn unclosed_brace_is_incomplete() {
        assert!(!is_input_complete("fun f() {\n"));
    }

    #[test]
    fn closing_the_brace_completes_it() {
        assert!(is_input_complete("fun f() {\n  return 1;\n}\n"));
    }
}
