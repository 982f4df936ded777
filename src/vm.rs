use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};
use crate::code::{read_u16, Instructions, Operation};
use crate::compiler::ByteCode;
use crate::object::{native_bool_to_object, Closure, CompiledFunction, HashKey, HashPair, Object, NULL};

const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
const MAX_FRAMES: usize = 1024;

/// A hard stop of the machine. These never become language-level values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("frame overflow: more than {0} nested calls")]
    FrameOverflow(usize),
    #[error("opcode {opcode} undefined at {position}")]
    UnknownOpcode { opcode: u8, position: usize },
    #[error("truncated instruction at {0}")]
    TruncatedInstruction(usize),
    #[error("unsupported types for binary operation: {left} {operator} {right}")]
    UnsupportedOperands { operator: &'static str, left: &'static str, right: &'static str },
    #[error("unsupported type for {operator}: {operand}")]
    UnsupportedPrefix { operator: &'static str, operand: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArgumentCount { want: usize, got: usize },
    #[error("calling non-function: {0}")]
    NotCallable(&'static str),
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("constant {0} is missing or not a function")]
    InvalidConstant(usize),
    #[error("global slot {0} is out of range")]
    InvalidGlobal(usize),
    #[error("local slot {0} is out of range")]
    InvalidLocal(usize),
    #[error("free variable {0} is out of range")]
    InvalidFree(usize),
}

#[derive(Debug, Clone)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }

    fn instructions(&self) -> &Instructions {
        &self.closure.function.instructions
    }
}

pub struct VM {
    constants: Vec<Object>,

    stack: Vec<Object>,
    sp: usize, // stack pointer, always points to the next free slot
    globals: Vec<Object>,

    frames: Vec<Frame>,
    returned: bool,
}

impl VM {
    pub fn new(byte_code: ByteCode) -> Self {
        Self::new_with_globals_store(byte_code, vec![NULL; GLOBALS_SIZE])
    }

    /// Runs against globals left behind by an earlier program.
    pub fn new_with_globals_store(byte_code: ByteCode, globals: Vec<Object>) -> Self {
        let main_fn = CompiledFunction {
            instructions: byte_code.instructions,
            num_locals: 0,
            num_parameters: 0,
            source: String::new(),
        };
        let main_closure = Closure { function: Rc::new(main_fn), free: vec![] };

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_closure), 0));

        Self {
            constants: byte_code.constants,

            stack: vec![NULL; STACK_SIZE],
            sp: 0,
            globals,

            frames,
            returned: false,
        }
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    pub fn stack_top(&self) -> Option<Object> {
        if self.sp == 0 {
            None
        } else {
            Some(self.stack[self.sp - 1].clone())
        }
    }

    /// The slot just above the stack pointer holds whatever was popped last.
    pub fn last_popped_stack_elem(&self) -> Object {
        self.stack.get(self.sp).cloned().unwrap_or(NULL)
    }

    /// True when the program ended through a top-level `return`.
    pub fn returned(&self) -> bool {
        self.returned
    }

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), FatalError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(FatalError::FrameOverflow(MAX_FRAMES));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn push(&mut self, object: Object) -> Result<(), FatalError> {
        if self.sp >= STACK_SIZE {
            return Err(FatalError::StackOverflow);
        }
        self.stack[self.sp] = object;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, FatalError> {
        if self.sp == 0 {
            return Err(FatalError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Takes the top `n` values off the stack, oldest first.
    fn take(&mut self, n: usize) -> Result<Vec<Object>, FatalError> {
        if self.sp < n {
            return Err(FatalError::StackUnderflow);
        }
        let values = self.stack[self.sp - n..self.sp].to_vec();
        self.sp -= n;
        Ok(values)
    }

    fn read_operand(&mut self, width: usize) -> Result<usize, FatalError> {
        let frame = self.current_frame_mut();
        let ins = frame.closure.function.instructions.as_slice();
        if frame.ip + width > ins.len() {
            return Err(FatalError::TruncatedInstruction(frame.ip - 1));
        }
        let operand = match width {
            2 => read_u16(&ins[frame.ip..]) as usize,
            _ => ins[frame.ip] as usize,
        };
        frame.ip += width;
        Ok(operand)
    }

    pub fn run(&mut self) -> Result<(), FatalError> {
        debug!(constants = self.constants.len(), "running bytecode");
        loop {
            let frame = self.current_frame();
            let ip = frame.ip;
            if ip >= frame.instructions().len() {
                break;
            }
            let byte = frame.instructions()[ip];
            let op = Operation::from_byte(byte)
                .ok_or(FatalError::UnknownOpcode { opcode: byte, position: ip })?;
            trace!(ip, sp = self.sp, frames = self.frames.len(), "{}", op);
            self.current_frame_mut().ip += 1;

            match op {
                Operation::OpConstant => {
                    let const_idx = self.read_operand(2)?;
                    let constant = self.constants.get(const_idx).cloned()
                        .ok_or(FatalError::InvalidConstant(const_idx))?;
                    self.push(constant)?;
                },
                Operation::OpAdd | Operation::OpSub | Operation::OpMul | Operation::OpDiv => {
                    self.execute_binary_operation(op)?;
                },
                Operation::OpEqual | Operation::OpNotEqual | Operation::OpGreaterThan => {
                    self.execute_comparison(op)?;
                },
                Operation::OpPop => {
                    self.pop()?;
                },
                Operation::OpTrue => self.push(native_bool_to_object(true))?,
                Operation::OpFalse => self.push(native_bool_to_object(false))?,
                Operation::OpNull => self.push(NULL)?,
                Operation::OpBang => {
                    let operand = self.pop()?;
                    self.push(native_bool_to_object(!operand.is_truthy()))?;
                },
                Operation::OpMinus => {
                    let operand = self.pop()?;
                    match operand {
                        Object::Integer(i) => self.push(Object::Integer(i.wrapping_neg()))?,
                        other => return Err(FatalError::UnsupportedPrefix {
                            operator: "-",
                            operand: other.type_name(),
                        }),
                    }
                },
                Operation::OpJump => {
                    let pos = self.read_operand(2)?;
                    self.current_frame_mut().ip = pos;
                },
                Operation::OpJumpNotTruthy => {
                    let pos = self.read_operand(2)?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = pos;
                    }
                },
                Operation::OpSetGlobal => {
                    let global_idx = self.read_operand(2)?;
                    let value = self.pop()?;
                    let slot = self.globals.get_mut(global_idx)
                        .ok_or(FatalError::InvalidGlobal(global_idx))?;
                    *slot = value;
                },
                Operation::OpGetGlobal => {
                    let global_idx = self.read_operand(2)?;
                    let value = self.globals.get(global_idx).cloned()
                        .ok_or(FatalError::InvalidGlobal(global_idx))?;
                    self.push(value)?;
                },
                Operation::OpArray => {
                    let num_elements = self.read_operand(2)?;
                    let elements = self.take(num_elements)?;
                    self.push(Object::Array(Rc::new(elements)))?;
                },
                Operation::OpHash => {
                    let num_elements = self.read_operand(2)?;
                    let hash = self.build_hash(num_elements)?;
                    self.push(hash)?;
                },
                Operation::OpIndex => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                },
                Operation::OpCall => {
                    let num_args = self.read_operand(1)?;
                    self.call_function(num_args)?;
                },
                Operation::OpReturnValue => {
                    let return_value = self.pop()?;
                    if self.return_from_frame(return_value)? {
                        break;
                    }
                },
                Operation::OpReturn => {
                    if self.return_from_frame(NULL)? {
                        break;
                    }
                },
                Operation::OpSetLocal => {
                    let local_idx = self.read_operand(1)?;
                    let slot = self.local_slot(local_idx)?;
                    let value = self.pop()?;
                    self.stack[slot] = value;
                },
                Operation::OpGetLocal => {
                    let local_idx = self.read_operand(1)?;
                    let slot = self.local_slot(local_idx)?;
                    self.push(self.stack[slot].clone())?;
                },
                Operation::OpClosure => {
                    let const_idx = self.read_operand(2)?;
                    let num_free = self.read_operand(1)?;
                    self.push_closure(const_idx, num_free)?;
                },
                Operation::OpGetFree => {
                    let free_idx = self.read_operand(1)?;
                    let free = self.current_frame().closure.free.get(free_idx).cloned()
                        .ok_or(FatalError::InvalidFree(free_idx))?;
                    self.push(free)?;
                },
                Operation::OpCurrentClosure => {
                    let current = Rc::clone(&self.current_frame().closure);
                    self.push(Object::Closure(current))?;
                },
            }
        }
        Ok(())
    }

    /// Stack position of a local in the current frame. Only slots the
    /// function reserved on entry are addressable.
    fn local_slot(&self, local_idx: usize) -> Result<usize, FatalError> {
        let frame = self.current_frame();
        if local_idx >= frame.closure.function.num_locals {
            return Err(FatalError::InvalidLocal(local_idx));
        }
        Ok(frame.base_pointer + local_idx)
    }

    /// Leaves the current frame with `value`. Returns true when the frame was
    /// the main program, which halts the machine.
    fn return_from_frame(&mut self, value: Object) -> Result<bool, FatalError> {
        if self.frames.len() == 1 {
            // park the value where last_popped_stack_elem looks for it
            if let Some(slot) = self.stack.get_mut(self.sp) {
                *slot = value;
            }
            self.returned = true;
            return Ok(true);
        }

        let frame = self.frames.pop().ok_or(FatalError::StackUnderflow)?;
        self.sp = frame.base_pointer - 1;
        self.push(value)?;
        Ok(false)
    }

    fn call_function(&mut self, num_args: usize) -> Result<(), FatalError> {
        if self.sp < num_args + 1 {
            return Err(FatalError::StackUnderflow);
        }
        let callee = self.stack[self.sp - 1 - num_args].clone();
        let closure = match callee {
            Object::Closure(closure) => closure,
            other => return Err(FatalError::NotCallable(other.type_name())),
        };

        let function = Rc::clone(&closure.function);
        if num_args != function.num_parameters {
            return Err(FatalError::WrongArgumentCount {
                want: function.num_parameters,
                got: num_args,
            });
        }

        let base_pointer = self.sp - num_args;
        if base_pointer + function.num_locals > STACK_SIZE {
            return Err(FatalError::StackOverflow);
        }
        self.push_frame(Frame::new(closure, base_pointer))?;
        self.sp = base_pointer + function.num_locals;
        Ok(())
    }

    fn push_closure(&mut self, const_idx: usize, num_free: usize) -> Result<(), FatalError> {
        let function = match self.constants.get(const_idx) {
            Some(Object::CompiledFunction(func)) => Rc::clone(func),
            _ => return Err(FatalError::InvalidConstant(const_idx)),
        };
        let free = self.take(num_free)?;
        self.push(Object::Closure(Rc::new(Closure { function, free })))
    }

    fn build_hash(&mut self, num_elements: usize) -> Result<Object, FatalError> {
        let elements = self.take(num_elements)?;
        let mut hash = BTreeMap::new();
        for pair in elements.chunks(2) {
            let (key, value) = match pair {
                [key, value] => (key.clone(), value.clone()),
                _ => return Err(FatalError::StackUnderflow),
            };
            let hash_key = HashKey::from_object(&key)
                .ok_or(FatalError::UnusableHashKey(key.type_name()))?;
            hash.insert(hash_key, HashPair { key, value });
        }
        Ok(Object::Hash(Rc::new(hash)))
    }

    fn execute_binary_operation(&mut self, op: Operation) -> Result<(), FatalError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => Object::Integer(match op {
                Operation::OpAdd => l.wrapping_add(*r),
                Operation::OpSub => l.wrapping_sub(*r),
                Operation::OpMul => l.wrapping_mul(*r),
                Operation::OpDiv if *r == 0 => return Err(FatalError::DivisionByZero),
                Operation::OpDiv => l.wrapping_div(*r),
                _ => return Err(unsupported_operands(op, &left, &right)),
            }),
            (Object::String(l), Object::String(r)) if op == Operation::OpAdd => {
                Object::String(format!("{}{}", l, r))
            },
            _ => return Err(unsupported_operands(op, &left, &right)),
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, op: Operation) -> Result<(), FatalError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (op, &left, &right) {
            (Operation::OpGreaterThan, Object::Integer(l), Object::Integer(r)) => l > r,
            (Operation::OpEqual, _, _) => left.identical(&right),
            (Operation::OpNotEqual, _, _) => !left.identical(&right),
            _ => return Err(unsupported_operands(op, &left, &right)),
        };
        self.push(native_bool_to_object(result))
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> Result<(), FatalError> {
        let result = match (&left, &index) {
            (Object::Array(arr), Object::Integer(i)) => {
                if *i < 0 || *i >= arr.len() as i64 {
                    NULL
                } else {
                    arr[*i as usize].clone()
                }
            },
            (Object::Hash(hash), _) => {
                let key = HashKey::from_object(&index)
                    .ok_or(FatalError::UnusableHashKey(index.type_name()))?;
                hash.get(&key).map(|pair| pair.value.clone()).unwrap_or(NULL)
            },
            _ => return Err(FatalError::IndexNotSupported(left.type_name())),
        };
        self.push(result)
    }
}

fn unsupported_operands(op: Operation, left: &Object, right: &Object) -> FatalError {
    let operator = match op {
        Operation::OpAdd => "+",
        Operation::OpSub => "-",
        Operation::OpMul => "*",
        Operation::OpDiv => "/",
        Operation::OpEqual => "==",
        Operation::OpNotEqual => "!=",
        Operation::OpGreaterThan => ">",
        other => other.definition().name,
    };
    FatalError::UnsupportedOperands {
        operator,
        left: left.type_name(),
        right: right.type_name(),
    }
}
