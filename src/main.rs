//! CLI entry point: runs a file or drops into a REPL (spec.md §7).

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use wisp::{InterpretError, Vm};

#[derive(Parser)]
#[command(name = "wisp", about = "A minimal Lisp dialect interpreter")]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    path: Option<String>,
}

const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

/// The original C REPL read each line into a fixed 1024-byte buffer;
/// `rustyline` hands back an unbounded `String`, so a line past that
/// length is truncated here to the same effective limit. Truncates at
/// a char boundary so multi-byte UTF-8 never splits.
const REPL_LINE_MAX: usize = 1024;

fn truncate_repl_line(mut line: String) -> String {
    if line.len() > REPL_LINE_MAX {
        let mut boundary = REPL_LINE_MAX;
        while !line.is_char_boundary(boundary) {
            boundary -= 1;
        }
        line.truncate(boundary);
    }
    line
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("Usage: wisp [path]");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match cli.path {
        Some(path) => run_file(&path),
        None => run_repl(),
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path).with_context(|| format!("could not read '{path}'")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(errors)) => {
            for error in &errors {
                eprintln!("{error}");
            }
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
        Err(InterpretError::Runtime { error, trace }) => {
            print_runtime_error(&error, &trace);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn run_repl() -> ExitCode {
    let mut vm = Vm::new();
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Could not start the line editor: {e}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = truncate_repl_line(line);
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&line) {
                    Ok(value) => println!("{value:?}"),
                    Err(InterpretError::Compile(errors)) => {
                        for error in &errors {
                            eprintln!("{error}");
                        }
                    }
                    Err(InterpretError::Runtime { error, trace }) => {
                        print_runtime_error(&error, &trace);
                    }
                }
            }
            Err(ReadlineError::Eof) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(e) => {
                eprintln!("Readline error: {e}");
                return ExitCode::from(EXIT_IO_ERROR);
            }
        }
    }
}

/// Message, then one `[line N]` per active call frame, innermost
/// outward (spec.md §6 "Diagnostics").
fn print_runtime_error(error: &wisp::RuntimeError, trace: &[u32]) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(handle, "{error}");
    for line in trace {
        let _ = writeln!(handle, "[line {line}]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lines_pass_through_untouched() {
        assert_eq!(truncate_repl_line("(car '(1 2))".to_string()), "(car '(1 2))");
    }

    #[test]
    fn lines_past_the_buffer_limit_are_truncated() {
        let line = "x".repeat(REPL_LINE_MAX + 50);
        assert_eq!(truncate_repl_line(line).len(), REPL_LINE_MAX);
    }

    #[test]
    fn truncation_never_splits_a_multibyte_character() {
        // Pad so the 1024-byte cut would otherwise land inside the final 'λ' (2 bytes).
        let line = format!("{}{}", "x".repeat(REPL_LINE_MAX - 1), "\u{3BB}");
        let truncated = truncate_repl_line(line);
        assert!(truncated.len() <= REPL_LINE_MAX);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
