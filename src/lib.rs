//! A bytecode compiler and virtual machine for `tiny`, a minimalist
//! imperative scripting language: globals, procedures, arrays, and a
//! small set of arithmetic/comparison operators, compiled to a flat
//! instruction stream and executed by a stack machine with a
//! mark-and-sweep garbage-collected heap.
//!
//! The embedding surface is [`Interpreter`]: bind foreign functions,
//! compile source, then run it.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod constants;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod value;
pub mod vm;

use std::io::{BufRead, Write};

use log::{error, warn};

use bytecode::Op;
use compiler::Compiler;
use constants::{Constant, ConstantPool};
use error::{CompileResult, RuntimeError, RuntimeResult, TinyResult};
use parser::Parser;
use symbols::{ForeignFn, FunctionTable, GlobalTable};
use value::{Handle, Heap, Roots, Value};
use vm::{LineSource, Vm};

/// The embeddable interpreter: owns the heap, symbol tables, and VM
/// state for one compiled program. Foreign functions are bound before
/// [`Interpreter::compile`] is called, since call sites resolve against
/// whichever names are already registered at parse time (matching
/// tiny.c's `BindForeignFunction`/`RegisterFunction` ordering).
pub struct Interpreter {
    vm: Vm,
    heap: Heap,
    constants: ConstantPool,
    globals: GlobalTable,
    functions: FunctionTable,
    input: Box<dyn LineSource>,
    output: Box<dyn Write>,
}

impl Interpreter {
    /// Build an interpreter reading `READ` input from stdin and writing
    /// `PRINT`/`write` output to stdout.
    pub fn new() -> Self {
        Self::with_io(Box::new(std::io::BufReader::new(std::io::stdin())), Box::new(std::io::stdout()))
    }

    pub fn with_io(input: Box<dyn LineSource>, output: Box<dyn Write>) -> Self {
        Interpreter {
            vm: Vm::new(Vec::new()),
            heap: Heap::new(),
            constants: ConstantPool::new(),
            globals: GlobalTable::new(),
            functions: FunctionTable::new(),
            input,
            output,
        }
    }

    /// Bind a foreign function under `name`, callable from `tiny` source
    /// as `name(...)`. Must be called before [`Interpreter::compile`].
    pub fn bind_foreign(&mut self, name: &str, callable: ForeignFn) -> CompileResult<()> {
        self.functions.bind_foreign(name, callable)
    }

    /// Lex, parse, and lower `source` to bytecode, replacing any
    /// previously compiled program. Accepts anything implementing
    /// `std::io::Read`, matching spec.md §6.
    pub fn compile(&mut self, mut source: impl std::io::Read) -> TinyResult<()> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .map_err(|_| error::TinyError::Runtime(RuntimeError::AllocationFailure))?;

        let program = {
            let mut parser = Parser::new(&bytes, &mut self.constants, &mut self.globals, &mut self.functions)?;
            parser.parse_program()?
        };
        let code = Compiler::new(&mut self.constants, &mut self.globals, &mut self.functions).compile(&program)?;
        self.vm = Vm::new(code);
        Ok(())
    }

    /// Run the compiled program to completion (`OP_HALT`) or until a
    /// fatal runtime error. Per spec.md §7, the interpreter must not be
    /// run again after an error without recompiling: the VM's stack and
    /// pc are left in whatever state the failing instruction produced.
    pub fn run(&mut self) -> RuntimeResult<()> {
        while !self.step()? {}
        Ok(())
    }

    /// Fetch, decode, and execute exactly one instruction. Returns `true`
    /// if it was `OP_HALT`. Shared by `run` (drives to completion) and
    /// `call_proc` (drives until a specific call frame returns).
    fn step(&mut self) -> RuntimeResult<bool> {
        let pc_at_fetch = self.vm.pc;
        let opcode = self.vm.fetch_byte()?;
        let op = Op::from_byte(opcode).ok_or(RuntimeError::BadInstruction { opcode, pc: pc_at_fetch })?;

        match op {
            Op::Halt => return Ok(true),
            Op::Pop => {
                self.vm.pop()?;
            }
            Op::Push => {
                let idx = self.vm.fetch_i32()? as u32;
                let value = match self.constants.get(idx) {
                    Constant::Number(n) => Value::Number(*n),
                    Constant::String(s) => Value::String(s.clone()),
                };
                let handle = self.alloc(value)?;
                self.vm.push(handle)?;
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => self.exec_numeric(op)?,
            Op::Or | Op::And => self.exec_logical(op)?,
            Op::Lt | Op::Lte | Op::Gt | Op::Gte | Op::Equ | Op::Nequ => self.exec_compare(op)?,
            Op::Print => {
                let handle = self.vm.pop()?;
                vm::write_value(self.output.as_mut(), self.heap.get(handle))
                    .map_err(|_| RuntimeError::AllocationFailure)?;
            }
            Op::Set => {
                let idx = self.vm.fetch_i32()? as u32;
                let handle = self.vm.pop()?;
                self.globals.get_mut(idx).value = Some(handle);
            }
            Op::Get => {
                let idx = self.vm.fetch_i32()? as u32;
                let handle = self.globals.get(idx).value.ok_or(RuntimeError::MissingReturnValue)?;
                self.vm.push(handle)?;
            }
            Op::GetLocal => {
                let slot = self.vm.fetch_i32()?;
                let idx = self.vm.local_index(slot)?;
                self.vm.push(self.vm.stack[idx])?;
            }
            Op::SetLocal => {
                let slot = self.vm.fetch_i32()?;
                let idx = self.vm.local_index(slot)?;
                let handle = self.vm.pop()?;
                self.vm.stack[idx] = handle;
            }
            Op::Read => {
                let text = self.input.read_line().map_err(|_| RuntimeError::AllocationFailure)?.unwrap_or_default();
                let n: f64 = text.trim().parse().unwrap_or(0.0);
                let handle = self.alloc(Value::Number(n))?;
                self.vm.push(handle)?;
            }
            Op::Goto => {
                let target = self.vm.fetch_i32()? as usize;
                self.vm.pc = target;
            }
            Op::Gotoz => {
                let target = self.vm.fetch_i32()? as usize;
                let cond = self.vm.pop()?;
                if !self.heap.get(cond).truthy() {
                    self.vm.pc = target;
                }
            }
            Op::Gotonz => {
                let target = self.vm.fetch_i32()? as usize;
                let cond = self.vm.pop()?;
                if self.heap.get(cond).truthy() {
                    self.vm.pc = target;
                }
            }
            Op::Call => {
                let target = self.vm.fetch_i32()? as usize;
                let nargs = self.vm.fetch_i32()?;
                self.vm.call(target, nargs)?;
            }
            Op::Callf => {
                let idx = self.vm.fetch_i32()? as u32;
                let _nargs = self.vm.fetch_i32()?;
                if idx as usize >= self.functions.foreign_len() {
                    return Err(RuntimeError::UnboundForeignFunction { index: idx as usize });
                }
                let callable = self.functions.foreign(idx).callable;
                callable(self)?;
            }
            Op::Return => {
                if self.vm.at_top_level() {
                    return Ok(true);
                }
                self.vm.do_return(None)?;
            }
            Op::ReturnValue => {
                let value = self.vm.pop()?;
                if self.vm.at_top_level() {
                    return Ok(true);
                }
                self.vm.do_return(Some(value))?;
            }
            Op::MakeArray => {
                let len_handle = self.vm.pop()?;
                let len = self.heap.get(len_handle).as_number().max(0.0) as usize;
                let handle = self.alloc(Value::Array(vec![None; len]))?;
                self.vm.push(handle)?;
            }
            Op::SetIndex => {
                let value_handle = self.vm.pop()?;
                let index_handle = self.vm.pop()?;
                let array_handle = self.vm.pop()?;
                let index = self.heap.get(index_handle).as_number() as i64;
                match self.heap.get_mut(array_handle) {
                    Value::Array(elements) => {
                        let length = elements.len();
                        if index < 0 || index as usize >= length {
                            return Err(RuntimeError::IndexOutOfBounds { index, length });
                        }
                        elements[index as usize] = Some(value_handle);
                    }
                    _ => return Err(RuntimeError::BadInstruction { opcode, pc: pc_at_fetch }),
                }
            }
            Op::GetIndex => {
                let index_handle = self.vm.pop()?;
                let array_handle = self.vm.pop()?;
                let index = self.heap.get(index_handle).as_number() as i64;
                let element = match self.heap.get(array_handle) {
                    Value::Array(elements) => {
                        let length = elements.len();
                        if index < 0 || index as usize >= length {
                            return Err(RuntimeError::IndexOutOfBounds { index, length });
                        }
                        elements[index as usize]
                    }
                    _ => return Err(RuntimeError::BadInstruction { opcode, pc: pc_at_fetch }),
                };
                let handle = match element {
                    Some(handle) => handle,
                    None => self.alloc(Value::Number(0.0))?,
                };
                self.vm.push(handle)?;
            }
        }
        Ok(false)
    }

    /// Call an already-defined procedure directly from embedding code: the
    /// caller must have already pushed `nargs` argument values (e.g. via
    /// `push_number`/`push_string`), matching spec.md §6's `call_proc`.
    /// Runs until that call's frame returns, then pops and returns its
    /// result.
    pub fn call_proc(&mut self, name: &str, nargs: i32) -> RuntimeResult<Handle> {
        let id = self
            .functions
            .find_user(name)
            .ok_or_else(|| RuntimeError::UnknownProcedure { name: name.to_string() })?;
        let entry_pc = self.functions.entry_pc(id);
        let depth_before = self.vm.indirect.len();
        self.vm.call(entry_pc as usize, nargs)?;
        while self.vm.indirect.len() > depth_before {
            self.step()?;
        }
        self.vm.pop()
    }

    /// Allocate a heap array of `length` unset (zero-valued on read)
    /// slots, matching spec.md §6's `new_array`.
    pub fn new_array(&mut self, length: usize) -> RuntimeResult<Handle> {
        self.alloc(Value::Array(vec![None; length]))
    }

    /// Allocate an opaque native value, matching spec.md §6's
    /// `new_native(handle, free_cb, mark_cb)`: `data` is released via
    /// `free` when the GC reclaims it, and traced via `mark` so any
    /// `Handle`s it closes over stay alive.
    pub fn new_native(
        &mut self,
        data: Box<dyn std::any::Any>,
        free: Option<value::NativeFreeFn>,
        mark: Option<value::NativeMarkFn>,
    ) -> RuntimeResult<Handle> {
        self.alloc(Value::Native(value::Native { data, free, mark }))
    }

    /// Push a handle already obtained from `new_array`/`new_native`/etc.
    /// onto the VM stack, for use by foreign functions and `call_proc`.
    pub fn push(&mut self, handle: Handle) -> RuntimeResult<()> {
        self.vm.push(handle)
    }

    /// Pop the top of the VM stack, for use by foreign functions.
    pub fn pop(&mut self) -> RuntimeResult<Handle> {
        self.vm.pop()
    }

    /// Read a value already on the heap, for foreign functions that need
    /// more than `pop_number`/`pop_string` give them (e.g. to inspect an
    /// array argument).
    pub fn value(&self, handle: Handle) -> &Value {
        self.heap.get(handle)
    }

    fn alloc(&mut self, value: Value) -> RuntimeResult<Handle> {
        let stack = self.vm.stack.clone();
        let globals = self.globals.initialized_handles();
        let roots = Roots { stack: &stack, globals: &globals };
        self.heap.new_value(value, &roots)
    }

    /// Push a freshly allocated number onto the VM stack. For use by
    /// foreign functions implementing `ForeignFn`.
    pub fn push_number(&mut self, value: f64) -> RuntimeResult<()> {
        let handle = self.alloc(Value::Number(value))?;
        self.vm.push(handle)
    }

    /// Push a freshly allocated string onto the VM stack.
    pub fn push_string(&mut self, value: &[u8]) -> RuntimeResult<()> {
        let handle = self.alloc(Value::String(value.to_vec()))?;
        self.vm.push(handle)
    }

    /// Pop the top of the VM stack and read it as a number (`0.0` if the
    /// top happens to be a non-numeric value).
    pub fn pop_number(&mut self) -> RuntimeResult<f64> {
        let handle = self.vm.pop()?;
        Ok(self.heap.get(handle).as_number())
    }

    /// Pop the top of the VM stack and read it as a string's bytes
    /// (empty if the top happens to be a non-string value).
    pub fn pop_string(&mut self) -> RuntimeResult<Vec<u8>> {
        let handle = self.vm.pop()?;
        match self.heap.get(handle) {
            Value::String(bytes) => Ok(bytes.clone()),
            _ => {
                warn!("pop_string called on a non-string value");
                Ok(Vec::new())
            }
        }
    }

    fn exec_numeric(&mut self, op: Op) -> RuntimeResult<()> {
        let rhs = self.vm.pop()?;
        let lhs = self.vm.pop()?;
        let a = self.heap.get(lhs).as_number();
        let b = self.heap.get(rhs).as_number();
        let result = match op {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            Op::Mod => a % b,
            _ => unreachable!(),
        };
        let handle = self.alloc(Value::Number(result))?;
        self.vm.push(handle)
    }

    fn exec_logical(&mut self, op: Op) -> RuntimeResult<()> {
        let rhs = self.vm.pop()?;
        let lhs = self.vm.pop()?;
        let a = self.heap.get(lhs).truthy();
        let b = self.heap.get(rhs).truthy();
        let result = match op {
            Op::Or => a || b,
            Op::And => a && b,
            _ => unreachable!(),
        };
        let handle = self.alloc(Value::Number(if result { 1.0 } else { 0.0 }))?;
        self.vm.push(handle)
    }

    fn exec_compare(&mut self, op: Op) -> RuntimeResult<()> {
        let rhs = self.vm.pop()?;
        let lhs = self.vm.pop()?;
        let a = self.heap.get(lhs).as_number();
        let b = self.heap.get(rhs).as_number();
        let result = match op {
            Op::Lt => a < b,
            Op::Lte => a <= b,
            Op::Gt => a > b,
            Op::Gte => a >= b,
            Op::Equ => a == b,
            Op::Nequ => a != b,
            _ => unreachable!(),
        };
        let handle = self.alloc(Value::Number(if result { 1.0 } else { 0.0 }))?;
        self.vm.push(handle)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// A `LineSource`/`Write` pair over fixed in-memory buffers, for tests and
/// embedders that don't want real stdio.
pub struct MemoryIo {
    lines: std::collections::VecDeque<String>,
}

impl MemoryIo {
    pub fn new(input: &str) -> Self {
        MemoryIo { lines: input.lines().map(|l| format!("{l}\n")).collect() }
    }
}

impl LineSource for MemoryIo {
    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Log a runtime error at `error` level the way an embedding CLI would
/// before surfacing it to its caller; kept here since both a future CLI
/// front-end and `tests/end_to_end.rs` want the same phrasing.
pub fn log_fatal(err: &error::TinyError) {
    error!("tiny program aborted: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_source(src: &str, input: &str) -> (String, RuntimeResult<()>) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let mut interp = Interpreter::with_io(Box::new(MemoryIo::new(input)), Box::new(SharedBuffer(buffer.clone())));
        interp.compile(src.as_bytes()).unwrap();
        let result = interp.run();
        let out = String::from_utf8(buffer.borrow().clone()).unwrap();
        (out, result)
    }

    #[test]
    fn arithmetic_expression() {
        let (out, result) = run_source("write 1 + 2 * 3 end", "");
        assert!(result.is_ok());
        assert_eq!(out, "7\n");
    }

    #[test]
    fn globals_and_control_flow() {
        let (out, result) = run_source("x = 3 while x > 0 write x end x = x - 1 end", "");
        assert!(result.is_ok());
        assert_eq!(out, "3\n2\n1\n");
    }

    #[test]
    fn recursive_procedure() {
        let src = "write fact(5) end proc fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end";
        let (out, result) = run_source(src, "");
        assert!(result.is_ok());
        assert_eq!(out, "120\n");
    }

    #[test]
    fn array_roundtrip() {
        let src = "a = [3] a[0] = 7 a[1] = 8 a[2] = 9 write a[0] a[1] a[2] end";
        let (out, result) = run_source(src, "");
        assert!(result.is_ok());
        assert_eq!(out, "7\n8\n9\n");
    }

    #[test]
    fn empty_program_halts_cleanly() {
        let (out, result) = run_source("begin end", "");
        assert!(result.is_ok());
        assert_eq!(out, "");
    }

    #[test]
    fn array_index_at_length_is_out_of_bounds() {
        let src = "a = [2] write a[2] end";
        let (_out, result) = run_source(src, "");
        assert!(matches!(result, Err(RuntimeError::IndexOutOfBounds { index: 2, length: 2 })));
    }
}
