// File: src/errors.rs
//
// Diagnostics for the three error kinds the pipeline can raise: a bad
// token straight out of the scanner, a parser/compiler error pinned to a
// token, and a runtime error raised mid-execution with a call stack
// attached. None of these carry source snippets — only a line number, in
// keeping with the per-byte line map the rest of the VM already tracks.

use colored::Colorize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
}

impl SourceLocation {
    pub fn new(line: u32) -> Self {
        SourceLocation { line }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[line {}]", self.line)
    }
}

/// One entry in a runtime stack trace: the name printed for the frame
/// ("script" for the top-level frame) and the line its instruction
/// pointer was at when the error was raised.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A scanner error token: just a message and the line it was found on.
    Lex { message: String, location: SourceLocation },
    /// A parser/compiler error pinned to the offending token's lexeme.
    Compile { message: String, lexeme: String, location: SourceLocation },
    /// A VM error with the call stack active at the moment it was raised,
    /// innermost frame first.
    Runtime { message: String, trace: Vec<TraceFrame> },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Diagnostic::Lex { message, location } => {
                writeln!(f, "{} {}: {}", location, "Error".red().bold(), message)
            }
            Diagnostic::Compile { message, lexeme, location } => {
                writeln!(
                    f,
                    "{} {} at '{}': {}",
                    location,
                    "Error".red().bold(),
                    lexeme,
                    message
                )
            }
            Diagnostic::Runtime { message, trace } => {
                writeln!(f, "{}", message.red().bold())?;
                for frame in trace {
                    let who = if frame.name.is_empty() {
                        "script".to_string()
                    } else {
                        format!("{}()", frame.name)
                    };
                    writeln!(f, "[line {}] in {}", frame.line, who)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Diagnostic {}
