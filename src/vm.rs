//! The stack-based VM (spec.md §4.6). Owns the runtime heap, atom
//! pool and globals table for the lifetime of the interpreter; a REPL
//! reuses one `Vm` across lines, so only the value stack and call
//! frames are reset between top-level `interpret` calls.

use std::cell::RefCell;

use crate::atoms::AtomPool;
use crate::chunk::OpCode;
use crate::compiler;
use crate::errors::{InterpretError, RuntimeError};
use crate::gc::{self, Gc};
use crate::memory::Heap;
use crate::object::{Object, ObjectType};
use crate::objects::closure::ObjectClosure;
use crate::objects::pair::ObjectPair;
use crate::objects::upvalue::ObjectUpvalue;
use crate::table::Table;
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: *mut ObjectClosure,
    ip: usize,
    slots: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    stack_top: usize,
    frames: Vec<CallFrame>,
    open_upvalues: *mut ObjectUpvalue,
    pub heap: Heap,
    pub atom_pool: AtomPool,
    pub globals: Table,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            stack: vec![Value::Nil; STACK_MAX],
            stack_top: 0,
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: std::ptr::null_mut(),
            heap: Heap::new(),
            atom_pool: AtomPool::new(),
            globals: Table::new(),
        };
        vm.define_native("+", crate::natives::add);
        vm.define_native("-", crate::natives::sub);
        vm.define_native("*", crate::natives::mul);
        vm.define_native("/", crate::natives::div);
        vm.define_native("=", crate::natives::eq);
        vm
    }

    fn define_native(&mut self, name: &str, native: crate::objects::closure::NativeFn) {
        let atom = self.atom_pool.intern(&mut self.heap, name.as_bytes());
        let closure = self.heap.alloc_native_closure(native);
        self.globals.set(atom, Value::Obj(closure as *mut Object));
    }

    /// Compiles and runs one top-level unit of source against this
    /// VM's persistent globals/heap/atom pool, resetting the value
    /// stack and call frames first (spec.md §5, §7).
    pub fn interpret(&mut self, source: &str) -> Result<Value, InterpretError> {
        let lambda = compiler::compile(source, &mut self.heap, &mut self.atom_pool, &self.globals)
            .map_err(InterpretError::Compile)?;

        let upvalue_count = unsafe { (*lambda).upvalue_count as usize };
        let closure = self.heap.alloc_closure(lambda, upvalue_count);

        self.stack_top = 0;
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
        self.push(Value::Obj(closure as *mut Object));
        self.frames.push(CallFrame { closure, ip: 0, slots: 0 });

        match self.run() {
            Ok(value) => Ok(value),
            Err(error) => {
                let trace = self.frames.iter().rev().map(|f| self.frame_line(f)).collect();
                self.frames.clear();
                self.stack_top = 0;
                self.open_upvalues = std::ptr::null_mut();
                Err(InterpretError::Runtime { error, trace })
            }
        }
    }

    fn push(&mut self, value: Value) {
        self.stack[self.stack_top] = value;
        self.stack_top += 1;
    }

    fn pop(&mut self) -> Value {
        self.stack_top -= 1;
        self.stack[self.stack_top]
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run() never called with an empty frame stack")
    }

    fn frame_line(&self, frame: &CallFrame) -> u32 {
        let closure = unsafe { &*frame.closure };
        let lambda = unsafe { &*closure.lambda };
        lambda.chunk.lines[frame.ip.saturating_sub(1)]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("run() never called with an empty frame stack");
        let closure = unsafe { &*frame.closure };
        let lambda = unsafe { &*closure.lambda };
        let byte = lambda.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_constant(&self, index: u8) -> Value {
        let frame = self.current_frame();
        let closure = unsafe { &*frame.closure };
        let lambda = unsafe { &*closure.lambda };
        lambda.chunk.constants[index as usize]
    }

    /// Main dispatch loop (spec.md §4.6.6). Returns the final
    /// expression's value once the root frame returns.
    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            #[cfg(feature = "debug_trace_execution")]
            self.trace_instruction();

            let byte = self.read_byte();
            let op = OpCode::from_byte(byte).expect("corrupt bytecode: unknown opcode");

            match op {
                OpCode::Constant => {
                    let k = self.read_byte();
                    let value = self.read_constant(k);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::DefineGlobal => {
                    let k = self.read_byte();
                    let name = self.read_constant(k).as_obj() as *mut crate::objects::atom::ObjectAtom;
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::GetGlobal => {
                    let k = self.read_byte();
                    let name_value = self.read_constant(k);
                    let name = name_value.as_obj() as *mut crate::objects::atom::ObjectAtom;
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let name = unsafe { (*name).as_str().to_string() };
                            return Err(RuntimeError::UndefinedGlobal { name });
                        }
                    }
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let index = self.current_frame().slots + slot;
                    self.push(self.stack[index]);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = unsafe { &*self.current_frame().closure };
                    let upvalue = closure.upvalues[slot];
                    let value = unsafe { *(*upvalue).location };
                    self.push(value);
                }
                OpCode::Closure => self.op_closure()?,
                OpCode::Call => {
                    let n = self.read_byte() as usize;
                    self.call_value(n)?;
                }
                OpCode::DotCall => {
                    let n = self.read_byte() as usize;
                    let total = self.spread_args(n)?;
                    self.call_value(total)?;
                }
                OpCode::Cons => {
                    self.maybe_collect_garbage();
                    let cdr = self.pop();
                    let car = self.pop();
                    let pair = self.heap.alloc_pair(car, cdr);
                    self.push(Value::Obj(pair as *mut Object));
                }
                OpCode::Car => {
                    let pair = self.expect_pair()?;
                    self.pop();
                    self.push(unsafe { (*pair).car });
                }
                OpCode::Cdr => {
                    let pair = self.expect_pair()?;
                    self.pop();
                    self.push(unsafe { (*pair).cdr });
                }
                OpCode::Return => {
                    let result = self.pop();
                    let boundary = self.current_frame().slots;
                    self.close_upvalues(boundary);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.stack_top = 0;
                        return Ok(result);
                    }
                    self.stack_top = boundary;
                    self.push(result);
                }
            }
        }
    }

    fn expect_pair(&self) -> Result<*mut ObjectPair, RuntimeError> {
        match self.peek(0) {
            Value::Obj(o) if unsafe { (*o).obj_type == ObjectType::Pair } => Ok(o as *mut ObjectPair),
            _ => Err(RuntimeError::NotAPair),
        }
    }

    /// `OP_CLOSURE` (spec.md §4.6.5): allocates the closure, pushes it
    /// immediately so it's stack-rooted, then wires each upvalue
    /// descriptor that follows the constant index in the bytecode.
    fn op_closure(&mut self) -> Result<(), RuntimeError> {
        let k = self.read_byte();
        let lambda_value = self.read_constant(k);
        let lambda = lambda_value.as_obj() as *mut crate::objects::lambda::ObjectLambda;
        let upvalue_count = unsafe { (*lambda).upvalue_count as usize };

        self.maybe_collect_garbage();
        let closure = self.heap.alloc_closure(lambda, upvalue_count);
        self.push(Value::Obj(closure as *mut Object));

        for i in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            let upvalue = if is_local {
                let base = self.current_frame().slots;
                self.capture_upvalue(base + index)
            } else {
                let enclosing = unsafe { &*self.current_frame().closure };
                enclosing.upvalues[index]
            };
            unsafe { (*closure).upvalues[i] = upvalue };
        }
        Ok(())
    }

    /// `OP_CALL`/`OP_DOT_CALL` shared tail: validates the callee and
    /// arity, folds excess positional arguments into the rest-list
    /// slot for a variadic lambda, and pushes the new call frame
    /// (spec.md §4.6.1).
    fn call_value(&mut self, n: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(n);
        let closure_ptr = match callee {
            Value::Obj(o) if unsafe { (*o).obj_type == ObjectType::Closure } => o as *mut ObjectClosure,
            _ => return Err(RuntimeError::NotCallable),
        };

        if let Some(native) = unsafe { (*closure_ptr).native } {
            let args: Vec<Value> = (0..n).map(|i| self.peek(n - 1 - i)).collect();
            let result = native(&args)?;
            self.stack_top -= n + 1;
            self.push(result);
            return Ok(());
        }

        let lambda = unsafe { (*closure_ptr).lambda };
        let arity = unsafe { (*lambda).arity as usize };
        let has_param_list = unsafe { (*lambda).has_param_list };

        let final_n = if !has_param_list {
            if n != arity {
                return Err(RuntimeError::ArityMismatch { expected: arity, got: n });
            }
            n
        } else {
            let positional = arity - 1;
            if n < positional {
                return Err(RuntimeError::ArityMismatch { expected: positional, got: n });
            }
            let extra = n - positional;
            self.push(Value::Nil);
            for _ in 0..extra {
                self.maybe_collect_garbage();
                let cdr = self.pop();
                let car = self.pop();
                let pair = self.heap.alloc_pair(car, cdr);
                self.push(Value::Obj(pair as *mut Object));
            }
            positional + 1
        };

        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }

        let slots = self.stack_top - final_n - 1;
        self.frames.push(CallFrame { closure: closure_ptr, ip: 0, slots });
        Ok(())
    }

    /// `OP_DOT_CALL`'s argument spread (spec.md §4.6.2): walks the
    /// trailing cons list on top of the stack, pushing each element as
    /// an ordinary positional argument, and returns the total argument
    /// count for `call_value`.
    fn spread_args(&mut self, n: usize) -> Result<usize, RuntimeError> {
        let mut tail = self.pop();
        let mut count = n;
        loop {
            match tail {
                Value::Nil => return Ok(count),
                Value::Obj(o) if unsafe { (*o).obj_type == ObjectType::Pair } => {
                    let pair = unsafe { &*(o as *const ObjectPair) };
                    self.push(pair.car);
                    count += 1;
                    tail = pair.cdr;
                }
                _ if count == n => return Err(RuntimeError::SpreadNotAPair),
                _ => return Err(RuntimeError::SpreadNotAList),
            }
        }
    }

    fn stack_address(&self, upvalue: *mut ObjectUpvalue) -> usize {
        let location = unsafe { (*upvalue).location };
        unsafe { location.offset_from(self.stack.as_ptr()) as usize }
    }

    /// Finds or creates the open upvalue for `index`, keeping the
    /// open-upvalue list sorted by descending stack address
    /// (spec.md §4.6.4). `self.stack` is preallocated to `STACK_MAX`
    /// and never reallocated, so pointers into it stay valid for the
    /// VM's lifetime.
    fn capture_upvalue(&mut self, index: usize) -> *mut ObjectUpvalue {
        let mut prev: *mut ObjectUpvalue = std::ptr::null_mut();
        let mut current = self.open_upvalues;
        while !current.is_null() && self.stack_address(current) > index {
            prev = current;
            current = unsafe { (*current).next };
        }
        if !current.is_null() && self.stack_address(current) == index {
            return current;
        }

        self.maybe_collect_garbage();
        let location = unsafe { self.stack.as_mut_ptr().add(index) };
        let created = self.heap.alloc_upvalue(location);
        unsafe { (*created).next = current };
        if prev.is_null() {
            self.open_upvalues = created;
        } else {
            unsafe { (*prev).next = created };
        }
        created
    }

    /// Closes every open upvalue at or above `boundary`, copying the
    /// stack slot's current value into the upvalue's own storage
    /// before the frame that owns that slot is torn down
    /// (spec.md §4.6.4).
    fn close_upvalues(&mut self, boundary: usize) {
        while !self.open_upvalues.is_null() && self.stack_address(self.open_upvalues) >= boundary {
            let upvalue = self.open_upvalues;
            unsafe {
                let location = (*upvalue).location;
                (*upvalue).closed = *location;
                (*upvalue).location = &mut (*upvalue).closed as *mut Value;
                self.open_upvalues = (*upvalue).next;
                (*upvalue).next = std::ptr::null_mut();
            }
        }
    }

    /// Mirrors the compiler's own root enumeration with the VM's
    /// roots instead (spec.md §3 root list): every live stack slot,
    /// every active frame's closure, every open upvalue, and the
    /// globals table.
    fn maybe_collect_garbage(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let gc = RefCell::new(Gc::new());

        for i in 0..self.stack_top {
            gc.borrow_mut().mark_value(&self.stack[i]);
        }
        for frame in &self.frames {
            gc.borrow_mut().mark_object(frame.closure as *mut Object);
        }
        let mut upvalue = self.open_upvalues;
        while !upvalue.is_null() {
            gc.borrow_mut().mark_object(upvalue as *mut Object);
            upvalue = unsafe { (*upvalue).next };
        }
        self.globals.mark(
            |o| gc.borrow_mut().mark_object(o),
            |v| gc.borrow_mut().mark_value(v),
        );

        let mut gc = gc.into_inner();
        gc.trace();
        gc::sweep(&mut self.heap, &mut self.atom_pool);
    }

    #[cfg(feature = "debug_trace_execution")]
    fn trace_instruction(&self) {
        print!("          ");
        for i in 0..self.stack_top {
            print!("[ {} ]", crate::value::format_value(&self.stack[i]));
        }
        println!();
        let frame = self.current_frame();
        let closure = unsafe { &*frame.closure };
        let lambda = unsafe { &*closure.lambda };
        crate::debug::disassemble_instruction(&lambda.chunk, frame.ip);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ok(source: &str) -> Value {
        let mut vm = Vm::new();
        match vm.interpret(source) {
            Ok(value) => value,
            Err(e) => panic!("expected success, got {e:?}"),
        }
    }

    fn run_err(source: &str) -> RuntimeError {
        let mut vm = Vm::new();
        match vm.interpret(source) {
            Err(InterpretError::Runtime { error, .. }) => error,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn defines_and_reads_back_a_global() {
        let value = run_ok("(define x 42) x");
        assert_eq!(value, Value::Num(42.0));
    }

    #[test]
    fn car_and_cdr_on_a_quoted_list() {
        assert_eq!(run_ok("(car '(1 2 3))"), Value::Num(1.0));
        assert_eq!(format!("{:?}", run_ok("(cdr '(1 2 3))")), "(2 3)");
    }

    #[test]
    fn lambda_call_builds_a_pair() {
        let value = run_ok("((lambda (x y) (cons x y)) 1 2)");
        assert_eq!(format!("{value:?}"), "(1 . 2)");
    }

    #[test]
    fn closures_capture_enclosing_locals() {
        let value = run_ok(
            "(define make-adder (lambda (n) (lambda (x) (cons n x)))) \
             (define add5 (make-adder 5)) \
             (add5 10)",
        );
        assert_eq!(format!("{value:?}"), "(5 . 10)");
    }

    #[test]
    fn variadic_lambda_collects_all_arguments_into_a_list() {
        let value = run_ok("((lambda args args) 1 2 3)");
        assert_eq!(format!("{value:?}"), "(1 2 3)");
    }

    #[test]
    fn dotted_lambda_collects_only_the_trailing_arguments() {
        let value = run_ok("((lambda (a b . rest) rest) 1 2 3 4)");
        assert_eq!(format!("{value:?}"), "(3 4)");
    }

    #[test]
    fn dot_call_spreads_a_list_onto_the_argument_stack() {
        let value = run_ok("((lambda (a b c) (cons a (cons b c))) 1 . '(2 3))");
        assert_eq!(format!("{value:?}"), "(1 2 . 3)");
    }

    #[test]
    fn car_of_a_number_is_a_runtime_error() {
        assert_eq!(run_err("(car 1)"), RuntimeError::NotAPair);
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        assert_eq!(run_err("(1 2)"), RuntimeError::NotCallable);
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        match run_err("undefined-name") {
            RuntimeError::UndefinedGlobal { name } => assert_eq!(name, "undefined-name"),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn native_plus_is_callable_as_an_ordinary_global() {
        assert_eq!(run_ok("(+ 1 2)"), Value::Num(3.0));
    }

    #[test]
    fn native_eq_compares_by_value_and_identity() {
        assert_eq!(run_ok("(= 3 3)"), Value::Num(1.0));
        assert_eq!(run_ok("(= 3 4)"), Value::Nil);
    }

    #[test]
    fn runtime_error_trace_has_one_line_per_active_frame() {
        let mut vm = Vm::new();
        let err = vm.interpret("(define f (lambda (x) (car x))) (f 1)");
        match err {
            Err(InterpretError::Runtime { error, trace }) => {
                assert_eq!(error, RuntimeError::NotAPair);
                assert_eq!(trace.len(), 2);
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }
}
