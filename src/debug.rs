//! Bytecode disassembler, compiled in only when a `debug_*` feature is
//! on (spec.md §9 mirrors the teacher's `debug_print_code` /
//! `debug_trace_execution` gates).

use crate::chunk::{Chunk, OpCode};
use crate::value::format_value;

#[cfg(any(feature = "debug_print_code", feature = "debug_trace_execution"))]
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

#[cfg(any(feature = "debug_print_code", feature = "debug_trace_execution"))]
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    match OpCode::from_byte(byte) {
        Some(OpCode::Constant) => constant_instruction("OP_CONSTANT", chunk, offset),
        Some(OpCode::Nil) => simple_instruction("OP_NIL", offset),
        Some(OpCode::DefineGlobal) => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        Some(OpCode::GetGlobal) => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        Some(OpCode::GetLocal) => byte_instruction("OP_GET_LOCAL", chunk, offset),
        Some(OpCode::GetUpvalue) => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        Some(OpCode::Closure) => closure_instruction(chunk, offset),
        Some(OpCode::Call) => byte_instruction("OP_CALL", chunk, offset),
        Some(OpCode::DotCall) => byte_instruction("OP_DOT_CALL", chunk, offset),
        Some(OpCode::Cons) => simple_instruction("OP_CONS", offset),
        Some(OpCode::Car) => simple_instruction("OP_CAR", offset),
        Some(OpCode::Cdr) => simple_instruction("OP_CDR", offset),
        Some(OpCode::Return) => simple_instruction("OP_RETURN", offset),
        None => {
            println!("Unknown opcode {byte}");
            offset + 1
        }
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:<18} {slot:4}");
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let value = &chunk.constants[index as usize];
    println!("{name:<18} {index:4} '{}'", format_value(value));
    offset + 2
}

/// OP_CLOSURE carries a variable-length tail of `(is_local, index)`
/// descriptor pairs that a plain byte/constant instruction can't show.
fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let value = &chunk.constants[index as usize];
    println!("OP_CLOSURE          {index:4} '{}'", format_value(value));

    let upvalue_count = match value {
        crate::value::Value::Obj(o) => unsafe {
            (*(*o as *const crate::objects::lambda::ObjectLambda)).upvalue_count as usize
        },
        _ => 0,
    };
    let mut cursor = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[cursor];
        let slot = chunk.code[cursor + 1];
        println!(
            "{cursor:04}      |                     {} {slot}",
            if is_local != 0 { "local" } else { "upvalue" }
        );
        cursor += 2;
    }
    cursor
}
