//! Library error types (spec.md §7). `CompileError` covers lexing and
//! compilation; `RuntimeError` covers everything the VM can fail on.
//! A `FatalError` (allocator failure) is not represented here: spec.md
//! treats it as unrecoverable and the process terminates directly
//! rather than returning it as a `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A scanner-level error (e.g. an unterminated token); the message
    /// already describes the problem, so there's no "at"/"at end"
    /// locus to add.
    #[error("[line {line}] Error: {message}")]
    Lexical { line: u32, message: String },

    #[error("[line {line}] Error at end: {message}")]
    AtEnd { line: u32, message: String },

    #[error("[line {line}] Error at '{lexeme}': {message}")]
    At { line: u32, lexeme: String, message: String },
}

/// Carries no source line of its own — `Display` gives just the
/// message text; the VM prepends one `[line N]` per active call frame
/// when printing the full diagnostic (spec.md §6 "Diagnostics").
#[derive(Debug, Error, PartialEq, Clone)]
pub enum RuntimeError {
    #[error("Operand must be a cons pair")]
    NotAPair,

    #[error("Can only call functions")]
    NotCallable,

    #[error("Expected {expected} arguments but got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("Undefined variable '{name}'")]
    UndefinedGlobal { name: String },

    #[error("Operand must be a number")]
    NotANumber,

    #[error("Stack overflow")]
    StackOverflow,

    #[error("A lambda must be applied to a cons pair")]
    SpreadNotAPair,

    #[error("Attempt to apply a lambda to a non-list pair")]
    SpreadNotAList,
}

/// Discriminated outcome of `interpret` (spec.md §7): the caller picks
/// a process exit code from which variant comes back.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime { error: RuntimeError, trace: Vec<u32> },
}
