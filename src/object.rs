use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;
use itertools::Itertools;
use crate::ast::{BlockStatement, Identifier};
use crate::code::Instructions;
use crate::environment::Environment;

pub const TRUE: Object = Object::Boolean(true);
pub const FALSE: Object = Object::Boolean(false);
pub const NULL: Object = Object::Null;

pub fn native_bool_to_object(input: bool) -> Object {
    if input { TRUE } else { FALSE }
}

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum HashKey {
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Integer(i) => write!(f, "{}", i),
            HashKey::String(s) => write!(f, "{}", s),
            HashKey::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl HashKey {
    /// Only integers, strings and booleans can key a hash.
    pub fn from_object(obj: &Object) -> Option<Self> {
        match obj {
            Object::Integer(i) => Some(HashKey::Integer(*i)),
            Object::String(st) => Some(HashKey::String(st.clone())),
            Object::Boolean(b) => Some(HashKey::Boolean(*b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

pub type HashPairs = BTreeMap<HashKey, HashPair>;

/// A closure produced by the tree-walking evaluator.
pub struct Function {
    pub parameters: Vec<Identifier>,
    pub body: BlockStatement,
    pub env: Rc<RefCell<Environment>>,
}

impl fmt::Debug for Function {
    // the captured environment may contain this very function
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}) {{ {} }}", self.parameters.iter().join(", "), self.body)
    }
}

/// A function body lowered to bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
    /// Source form of the literal, shown when the value is printed.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

#[derive(Debug, Clone)]
pub enum Object {
    Integer(i64),
    String(String),
    Boolean(bool),
    Null,
    Error(String),
    Array(Rc<Vec<Object>>),
    Hash(Rc<HashPairs>),
    Function(Rc<Function>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::String(_) => "STRING",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::Error(_) => "ERROR",
            Object::Array(_) => "ARRAY",
            Object::Hash(_) => "HASH",
            Object::Function(_) => "FUNCTION",
            Object::CompiledFunction(_) => "COMPILED_FUNCTION",
            Object::Closure(_) => "CLOSURE",
        }
    }

    /// Only `false` and `null` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Null => false,
            Object::Boolean(b) => *b,
            _ => true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    /// Equality as seen by `==` in the language: integers, booleans, null
    /// and strings by value, everything else by reference.
    pub fn identical(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Integer(l), Object::Integer(r)) => l == r,
            (Object::Boolean(l), Object::Boolean(r)) => l == r,
            (Object::Null, Object::Null) => true,
            (Object::String(l), Object::String(r)) => l == r,
            (Object::Array(l), Object::Array(r)) => Rc::ptr_eq(l, r),
            (Object::Hash(l), Object::Hash(r)) => Rc::ptr_eq(l, r),
            (Object::Function(l), Object::Function(r)) => Rc::ptr_eq(l, r),
            (Object::CompiledFunction(l), Object::CompiledFunction(r)) => Rc::ptr_eq(l, r),
            (Object::Closure(l), Object::Closure(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }
}

/// Structural equality, used by tests. Evaluator closures compare by
/// reference since their environments may be cyclic.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Integer(l), Object::Integer(r)) => l == r,
            (Object::String(l), Object::String(r)) => l == r,
            (Object::Boolean(l), Object::Boolean(r)) => l == r,
            (Object::Null, Object::Null) => true,
            (Object::Error(l), Object::Error(r)) => l == r,
            (Object::Array(l), Object::Array(r)) => l == r,
            (Object::Hash(l), Object::Hash(r)) => l == r,
            (Object::Function(l), Object::Function(r)) => Rc::ptr_eq(l, r),
            (Object::CompiledFunction(l), Object::CompiledFunction(r)) => l == r,
            (Object::Closure(l), Object::Closure(r)) => l == r,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(i) => write!(f, "{}", i),
            Object::String(s) => write!(f, "{}", s),
            Object::Boolean(b) => write!(f, "{}", b),
            Object::Null => write!(f, "null"),
            Object::Error(msg) => write!(f, "ERROR: {}", msg),
            Object::Array(arr) => write!(f, "[{}]", arr.iter().join(", ")),
            Object::Hash(hash) => write!(f, "{{{}}}",
                hash.values().map(|pair| format!("{}: {}", pair.key, pair.value)).join(", ")),
            Object::Function(func) => write!(f, "{}", func),
            Object::CompiledFunction(func) => write!(f, "{}", func.source),
            Object::Closure(closure) => write!(f, "{}", closure.function.source),
        }
    }
}
