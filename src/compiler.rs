//! The single-pass compiler (spec.md §4.5): walks S-expressions and
//! emits bytecode directly, with no separate AST stage.

use std::cell::RefCell;

use crate::atoms::AtomPool;
use crate::chunk::{Chunk, OpCode};
use crate::errors::CompileError;
use crate::gc::{self, Gc};
use crate::memory::Heap;
use crate::object::Object;
use crate::objects::lambda::ObjectLambda;
use crate::scanner::{Scanner, Token, TokenType};
use crate::table::Table;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Lambda,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct CompilerFrame<'src> {
    lambda: *mut ObjectLambda,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    #[allow(dead_code)]
    function_type: FunctionType,
}

/// Compiles `source` into a top-level lambda. On error, every
/// diagnostic is both printed to stderr (as it's found, panic-mode
/// suppressed) and returned for the caller to inspect.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    atom_pool: &mut AtomPool,
    globals: &Table,
) -> Result<*mut ObjectLambda, Vec<CompileError>> {
    let mut parser = Parser::new(source, heap, atom_pool, globals);
    parser.advance();
    while !parser.check(TokenType::Eof) {
        parser.sexp(false);
        if parser.panic_mode {
            parser.synchronize();
        }
    }
    let lambda = parser.finish_script();
    if parser.had_error {
        Err(parser.errors)
    } else {
        Ok(lambda)
    }
}

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    compilers: Vec<CompilerFrame<'src>>,
    heap: &'h mut Heap,
    atom_pool: &'h mut AtomPool,
    globals: &'h Table,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap, atom_pool: &'h mut AtomPool, globals: &'h Table) -> Self {
        let placeholder = Token { kind: TokenType::Eof, lexeme: "", line: 0 };
        let mut parser = Parser {
            scanner: Scanner::new(source),
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            compilers: Vec::new(),
            heap,
            atom_pool,
            globals,
        };
        parser.begin_frame(FunctionType::Script);
        parser
    }

    // ---- token plumbing ----

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            self.error_at_current("");
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenType) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenType, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let err = match token.kind {
            TokenType::Error => CompileError::Lexical { line: token.line, message: token.lexeme.to_string() },
            TokenType::Eof => CompileError::AtEnd { line: token.line, message: message.to_string() },
            _ => CompileError::At { line: token.line, lexeme: token.lexeme.to_string(), message: message.to_string() },
        };
        eprintln!("{err}");
        self.errors.push(err);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at_previous(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    /// Synchronisation point: the next top-level `)` or the next
    /// primitive keyword (spec.md §4.5.6).
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenType::Eof) {
            if self.previous.kind == TokenType::RightParen {
                return;
            }
            match self.current.kind {
                TokenType::Define
                | TokenType::Lambda
                | TokenType::Quote
                | TokenType::Cons
                | TokenType::Car
                | TokenType::Cdr => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- frames ----

    fn begin_frame(&mut self, function_type: FunctionType) {
        self.maybe_collect_garbage();
        let lambda = self.heap.alloc_lambda();
        let scope_depth = match function_type {
            FunctionType::Script => 0,
            FunctionType::Lambda => 1,
        };
        let locals = vec![Local { name: "", depth: scope_depth, captured: false }];
        self.compilers.push(CompilerFrame {
            lambda,
            locals,
            upvalues: Vec::new(),
            scope_depth,
            function_type,
        });
    }

    fn end_frame(&mut self) -> (*mut ObjectLambda, Vec<UpvalueDesc>) {
        let frame = self.compilers.pop().expect("compiler frame stack underflow");
        unsafe {
            (*frame.lambda).upvalue_count = frame.upvalues.len() as i32;
        }
        (frame.lambda, frame.upvalues)
    }

    fn finish_script(&mut self) -> *mut ObjectLambda {
        self.emit_byte(OpCode::Return.to_byte());
        let lambda = self.end_frame().0;
        #[cfg(feature = "debug_print_code")]
        if !self.had_error {
            crate::debug::disassemble_chunk(unsafe { &(*lambda).chunk }, "script");
        }
        lambda
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        let lambda = self.compilers.last().unwrap().lambda;
        unsafe { &mut (*lambda).chunk }
    }

    fn set_arity(&mut self, arity: usize) {
        let lambda = self.compilers.last().unwrap().lambda;
        unsafe {
            (*lambda).arity = arity as i32;
        }
    }

    fn set_has_param_list(&mut self, flag: bool) {
        let lambda = self.compilers.last().unwrap().lambda;
        unsafe {
            (*lambda).has_param_list = flag;
        }
    }

    // ---- emission ----

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn add_constant_value(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(k) => k,
            None => {
                self.error_at_previous("Too many constants in one chunk");
                0
            }
        }
    }

    /// Every compile-time allocation (atom interning, lambda creation)
    /// goes through this check first so the GC can use the in-progress
    /// compiler frames and the globals table as roots (spec.md §3 root
    /// list item 5).
    fn maybe_collect_garbage(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let gc_cell = RefCell::new(Gc::new());
        for frame in &self.compilers {
            gc_cell.borrow_mut().mark_object(frame.lambda as *mut Object);
        }
        self.globals.mark(
            |o| gc_cell.borrow_mut().mark_object(o),
            |v| gc_cell.borrow_mut().mark_value(v),
        );
        let mut gc = gc_cell.into_inner();
        gc.trace();
        gc::sweep(self.heap, self.atom_pool);
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        self.maybe_collect_garbage();
        let atom = self.atom_pool.intern(self.heap, name.lexeme.as_bytes());
        self.add_constant_value(Value::Obj(atom as *mut Object))
    }

    fn emit_atom_constant(&mut self, lexeme: &str) {
        self.maybe_collect_garbage();
        let atom = self.atom_pool.intern(self.heap, lexeme.as_bytes());
        let k = self.add_constant_value(Value::Obj(atom as *mut Object));
        self.emit_bytes(OpCode::Constant.to_byte(), k);
    }

    // ---- locals / upvalues ----

    fn declare_local(&mut self, name: Token<'src>) {
        let frame_idx = self.compilers.len() - 1;
        let duplicate = self.compilers[frame_idx].locals.iter().any(|l| l.name == name.lexeme);
        if duplicate {
            self.error_at(name, "Already a variable with this name in this scope");
            return;
        }
        if self.compilers[frame_idx].locals.len() >= 256 {
            self.error_at(name, "Too many local variables in one lambda");
            return;
        }
        self.compilers[frame_idx].locals.push(Local { name: name.lexeme, depth: -1, captured: false });
    }

    fn mark_initialized(&mut self) {
        let frame_idx = self.compilers.len() - 1;
        let depth = self.compilers[frame_idx].scope_depth;
        if let Some(last) = self.compilers[frame_idx].locals.last_mut() {
            last.depth = depth;
        }
    }

    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<usize> {
        let mut found = None;
        {
            let locals = &self.compilers[frame_idx].locals;
            for i in (0..locals.len()).rev() {
                if locals[i].name == name {
                    found = Some((i, locals[i].depth));
                    break;
                }
            }
        }
        let (index, depth) = found?;
        if depth == -1 {
            self.error_at_previous("Can't read a variable in its own initializer");
        }
        Some(index)
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<usize> {
        if frame_idx == 0 {
            return None;
        }
        let enclosing = frame_idx - 1;
        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[local_slot].captured = true;
            return Some(self.add_upvalue(frame_idx, local_slot, true));
        }
        if let Some(up_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_idx, up_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: usize, is_local: bool) -> usize {
        {
            let upvalues = &self.compilers[frame_idx].upvalues;
            for (i, uv) in upvalues.iter().enumerate() {
                if uv.index == index as u8 && uv.is_local == is_local {
                    return i;
                }
            }
        }
        if self.compilers[frame_idx].upvalues.len() >= 256 {
            self.error_at_previous("Too many upvalues in one lambda");
            return 0;
        }
        self.compilers[frame_idx].upvalues.push(UpvalueDesc { index: index as u8, is_local });
        self.compilers[frame_idx].upvalues.len() - 1
    }

    fn named_variable(&mut self, name: Token<'src>) {
        let frame_idx = self.compilers.len() - 1;
        if let Some(slot) = self.resolve_local(frame_idx, name.lexeme) {
            self.emit_bytes(OpCode::GetLocal.to_byte(), slot as u8);
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, name.lexeme) {
            self.emit_bytes(OpCode::GetUpvalue.to_byte(), slot as u8);
        } else {
            let k = self.identifier_constant(name);
            self.emit_bytes(OpCode::GetGlobal.to_byte(), k);
        }
    }

    // ---- grammar ----

    fn sexp(&mut self, quoted: bool) {
        self.advance();
        self.sexp_from_previous(quoted);
    }

    fn sexp_from_previous(&mut self, quoted: bool) {
        match self.previous.kind {
            TokenType::Identifier => self.identifier_expr(quoted),
            TokenType::Define | TokenType::Lambda | TokenType::Cons | TokenType::Car | TokenType::Cdr if quoted => {
                self.emit_atom_constant(self.previous.lexeme);
            }
            TokenType::Number => self.number_expr(),
            TokenType::Quote => self.sexp(true),
            TokenType::LeftParen => {
                if quoted {
                    self.literal_list();
                } else {
                    self.form();
                }
            }
            _ => self.error_at_previous("Unexpected token"),
        }
    }

    fn identifier_expr(&mut self, quoted: bool) {
        let name = self.previous;
        if quoted {
            self.emit_atom_constant(name.lexeme);
        } else {
            self.named_variable(name);
        }
    }

    fn number_expr(&mut self) {
        let lexeme = self.previous.lexeme;
        let value = match lexeme.parse::<f64>() {
            Ok(n) => n,
            Err(_) => {
                self.error_at_previous("Invalid number literal");
                0.0
            }
        };
        let k = self.add_constant_value(Value::Num(value));
        self.emit_bytes(OpCode::Constant.to_byte(), k);
    }

    /// Compiles the body of a quoted `(...)`, after its opening paren
    /// has already been consumed (spec.md §4.5.2).
    fn literal_list(&mut self) {
        if self.match_token(TokenType::RightParen) {
            self.emit_byte(OpCode::Nil.to_byte());
            return;
        }
        let mut count = 0usize;
        loop {
            self.sexp(true);
            count += 1;
            if self.match_token(TokenType::Dot) {
                self.sexp(true);
                self.consume(TokenType::RightParen, "Expect ')' after dotted tail");
                for _ in 0..count {
                    self.emit_byte(OpCode::Cons.to_byte());
                }
                return;
            }
            if self.match_token(TokenType::RightParen) {
                self.emit_byte(OpCode::Nil.to_byte());
                for _ in 0..count {
                    self.emit_byte(OpCode::Cons.to_byte());
                }
                return;
            }
            if self.check(TokenType::Eof) {
                self.error_at_current("Expect ')' to close list");
                return;
            }
        }
    }

    /// Compiles the body of an unquoted `(...)`, after its opening
    /// paren has already been consumed (spec.md §4.5.3).
    fn form(&mut self) {
        if self.check(TokenType::RightParen) {
            self.error_at_current("Expect function to call");
            self.advance();
            return;
        }
        self.advance();
        match self.previous.kind {
            TokenType::Define => self.define_form(),
            TokenType::Lambda => self.lambda_form(),
            TokenType::Quote => {
                self.sexp(true);
                self.consume(TokenType::RightParen, "Expect ')' after quote");
            }
            TokenType::Cons => self.cons_form(),
            TokenType::Car => self.car_form(),
            TokenType::Cdr => self.cdr_form(),
            _ => self.call_form(),
        }
    }

    fn define_form(&mut self) {
        self.consume(TokenType::Identifier, "Expect variable name");
        let name = self.previous;
        if self.compilers.last().unwrap().scope_depth > 0 {
            self.declare_local(name);
            self.sexp(false);
            self.mark_initialized();
            self.consume(TokenType::RightParen, "Expect ')' after define");
        } else {
            self.sexp(false);
            self.consume(TokenType::RightParen, "Expect ')' after define");
            let k = self.identifier_constant(name);
            self.emit_bytes(OpCode::DefineGlobal.to_byte(), k);
        }
    }

    fn cons_form(&mut self) {
        self.sexp(false);
        self.sexp(false);
        self.consume(TokenType::RightParen, "Expect ')' after cons");
        self.emit_byte(OpCode::Cons.to_byte());
    }

    fn car_form(&mut self) {
        self.sexp(false);
        self.consume(TokenType::RightParen, "Expect ')' after car");
        self.emit_byte(OpCode::Car.to_byte());
    }

    fn cdr_form(&mut self) {
        self.sexp(false);
        self.consume(TokenType::RightParen, "Expect ')' after cdr");
        self.emit_byte(OpCode::Cdr.to_byte());
    }

    fn call_form(&mut self) {
        self.sexp_from_previous(false);
        let mut arg_count: usize = 0;
        let mut dotted = false;
        loop {
            if self.match_token(TokenType::RightParen) {
                break;
            }
            if self.match_token(TokenType::Dot) {
                self.sexp(false);
                self.consume(TokenType::RightParen, "Expect ')' after call");
                dotted = true;
                break;
            }
            if self.check(TokenType::Eof) {
                self.error_at_current("Expect ')' to close call");
                return;
            }
            self.sexp(false);
            arg_count += 1;
            if arg_count > 255 {
                self.error_at_previous("Can't have more than 255 arguments");
                return;
            }
        }
        if dotted {
            self.emit_bytes(OpCode::DotCall.to_byte(), arg_count as u8);
        } else {
            self.emit_bytes(OpCode::Call.to_byte(), arg_count as u8);
        }
    }

    /// `(lambda P body)` (spec.md §4.5.4).
    fn lambda_form(&mut self) {
        self.begin_frame(FunctionType::Lambda);
        self.compile_params();
        self.sexp(false);
        self.emit_byte(OpCode::Return.to_byte());
        self.consume(TokenType::RightParen, "Expect ')' after lambda body");
        let (lambda, upvalues) = self.end_frame();
        #[cfg(feature = "debug_print_code")]
        if !self.had_error {
            crate::debug::disassemble_chunk(unsafe { &(*lambda).chunk }, "lambda");
        }
        let k = self.add_constant_value(Value::Obj(lambda as *mut Object));
        self.emit_bytes(OpCode::Closure.to_byte(), k);
        for uv in upvalues {
            self.emit_byte(uv.is_local as u8);
            self.emit_byte(uv.index);
        }
    }

    fn compile_params(&mut self) {
        if self.match_token(TokenType::Identifier) {
            let name = self.previous;
            self.declare_local(name);
            self.mark_initialized();
            self.set_arity(1);
            self.set_has_param_list(true);
            return;
        }
        self.consume(TokenType::LeftParen, "Expect parameter list");
        let mut count = 0usize;
        loop {
            if self.match_token(TokenType::RightParen) {
                self.set_arity(count);
                self.set_has_param_list(false);
                return;
            }
            if self.match_token(TokenType::Dot) {
                self.consume(TokenType::Identifier, "Expect rest parameter name");
                let rest_name = self.previous;
                self.declare_local(rest_name);
                self.mark_initialized();
                count += 1;
                self.consume(TokenType::RightParen, "Expect ')' after rest parameter");
                self.set_arity(count);
                self.set_has_param_list(true);
                return;
            }
            self.consume(TokenType::Identifier, "Expect parameter name");
            let name = self.previous;
            self.declare_local(name);
            self.mark_initialized();
            count += 1;
            if count > 255 {
                self.error_at_previous("Can't have more than 255 parameters");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_compile(source: &str) -> Result<*mut ObjectLambda, Vec<CompileError>> {
        let mut heap = Heap::new();
        let mut pool = AtomPool::new();
        let globals = Table::new();
        compile(source, &mut heap, &mut pool, &globals)
    }

    #[test]
    fn defines_and_reads_a_global() {
        let result = try_compile("(define x 42) x");
        assert!(result.is_ok());
        let lambda = result.unwrap();
        let code = unsafe { &(*lambda).chunk.code };
        assert!(code.contains(&OpCode::DefineGlobal.to_byte()));
        assert!(code.contains(&OpCode::GetGlobal.to_byte()));
    }

    #[test]
    fn unbalanced_parens_report_an_error() {
        let result = try_compile("(car 1");
        assert!(result.is_err());
    }

    #[test]
    fn unterminated_form_reports_the_eof_locus() {
        let errors = try_compile("(car").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "[line 1] Error at end: Expect ')' after car");
    }

    #[test]
    fn duplicate_local_name_is_an_error() {
        let result = try_compile("(lambda (x x) x)");
        assert!(result.is_err());
    }

    #[test]
    fn empty_unquoted_list_is_an_error() {
        let result = try_compile("()");
        assert!(result.is_err());
    }

    #[test]
    fn quoted_list_emits_right_associated_cons_chain() {
        let result = try_compile("'(1 2 3)");
        assert!(result.is_ok());
        let lambda = result.unwrap();
        let ops: Vec<u8> = unsafe { (*lambda).chunk.code.clone() };
        let cons_count = ops.iter().filter(|&&b| b == OpCode::Cons.to_byte()).count();
        assert_eq!(cons_count, 3);
    }

    #[test]
    fn call_with_too_many_arguments_is_an_error() {
        let mut source = String::from("(define f (lambda args args)) (f");
        for i in 0..260 {
            source.push_str(&format!(" {i}"));
        }
        source.push(')');
        let result = try_compile(&source);
        assert!(result.is_err());
    }
}
