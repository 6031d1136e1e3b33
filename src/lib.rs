//! A minimal Lisp dialect: a lexer, a single-pass compiler, and a
//! stack-based VM, plus the runtime services (tagged values, a
//! tracing garbage collector, an atom-interning pool, and a globals
//! table) they share.

pub mod atoms;
pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod errors;
pub mod gc;
pub mod memory;
pub mod natives;
pub mod object;
pub mod objects;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

pub use errors::{CompileError, InterpretError, RuntimeError};
pub use value::Value;
pub use vm::Vm;

/// Compiles and runs one self-contained source unit in a fresh `Vm`.
/// A REPL wants a persistent `Vm` across lines instead — construct one
/// directly and call `Vm::interpret` per line.
pub fn interpret(source: &str) -> Result<Value, InterpretError> {
    Vm::new().interpret(source)
}
