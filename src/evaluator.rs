use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::trace;
use crate::ast::{BlockStatement, Expression, FunctionLiteral, Program, Statement};
use crate::environment::Environment;
use crate::object::{native_bool_to_object, Function, HashKey, HashPair, Object, NULL};

/// Deepest call nesting allowed unless configured otherwise. Fits the 2 MiB
/// stack of a spawned thread in an unoptimised build.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Non-local exits threaded through evaluation. `?` stops at the first one.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Return(Object),
    Error(String),
}

type EvalResult = Result<Object, Signal>;

fn error<T>(msg: String) -> Result<T, Signal> {
    Err(Signal::Error(msg))
}

pub struct Evaluator {
    env: Rc<RefCell<Environment>>,
    depth: usize,
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_environment(Rc::new(RefCell::new(Environment::new())))
    }

    pub fn with_environment(env: Rc<RefCell<Environment>>) -> Self {
        Self {
            env,
            depth: 0,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn environment(&self) -> Rc<RefCell<Environment>> {
        Rc::clone(&self.env)
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        self.env.borrow().get(key)
    }

    fn set(&mut self, key: String, value: Object) {
        self.env.borrow_mut().set(key, value)
    }

    /// Evaluates a whole program. A top-level `return` ends the program with
    /// its value; an error ends it with an `Object::Error`.
    pub fn eval(&mut self, program: &Program) -> Object {
        let mut result = NULL;

        for stmt in program.statements.iter() {
            match self.eval_statement(stmt) {
                Ok(obj) => result = obj,
                Err(Signal::Return(obj)) => return obj,
                Err(Signal::Error(msg)) => return Object::Error(msg),
            }
        }
        result
    }

    fn eval_block_statement(&mut self, block: &BlockStatement) -> EvalResult {
        let mut result = NULL;

        for stmt in block.statements.iter() {
            result = self.eval_statement(stmt)?;
        }

        Ok(result)
    }

    fn eval_statement(&mut self, stmt: &Statement) -> EvalResult {
        match stmt {
            Statement::Block(block) => self.eval_block_statement(block),
            Statement::Expression { expression, .. } => self.eval_expression(expression),
            Statement::Return { value, .. } => {
                let val = self.eval_expression(value)?;
                Err(Signal::Return(val))
            },
            Statement::Let { name, value, .. } => {
                let val = self.eval_expression(value)?;
                self.set(name.value.clone(), val);
                Ok(NULL)
            }
        }
    }

    fn eval_expression(&mut self, exp: &Expression) -> EvalResult {
        match exp {
            Expression::Integer { value, .. } => Ok(Object::Integer(*value)),
            Expression::String { value, .. } => Ok(Object::String(value.clone())),
            Expression::Boolean { value, .. } => Ok(native_bool_to_object(*value)),
            Expression::Null { .. } => Ok(NULL),
            Expression::Prefix { operator, right, .. } => {
                let right = self.eval_expression(right)?;
                eval_prefix_expression(operator, right)
            },
            Expression::Infix { operator, left, right, .. } => {
                let left = self.eval_expression(left)?;
                let right = self.eval_expression(right)?;
                eval_infix_expression(operator, left, right)
            },
            Expression::If { condition, consequence, alternative, .. } => {
                let condition = self.eval_expression(condition)?;
                if condition.is_truthy() {
                    self.eval_block_statement(consequence)
                } else {
                    match alternative {
                        None => Ok(NULL),
                        Some(alt) => self.eval_block_statement(alt),
                    }
                }
            },
            Expression::Identifier(ident) => match self.get(&ident.value) {
                Some(obj) => Ok(obj),
                None => error(format!("identifier not found: {}", ident.value)),
            },
            Expression::Function(FunctionLiteral { parameters, body, .. }) => {
                Ok(Object::Function(Rc::new(Function {
                    parameters: parameters.clone(),
                    body: body.clone(),
                    env: Rc::clone(&self.env),
                })))
            },
            Expression::Call { function, arguments, .. } => {
                let function = self.eval_expression(function)?;
                let args = self.eval_expressions(arguments)?;
                self.apply_function(function, args)
            },
            Expression::Array { elements, .. } => {
                let elements = self.eval_expressions(elements)?;
                Ok(Object::Array(Rc::new(elements)))
            },
            Expression::Index { left, index, .. } => {
                let left = self.eval_expression(left)?;
                let index = self.eval_expression(index)?;
                eval_index_expression(left, index)
            },
            Expression::Hash { pairs, .. } => self.eval_hash_literal(pairs),
        }
    }

    fn eval_expressions(&mut self, exps: &[Expression]) -> Result<Vec<Object>, Signal> {
        exps.iter().map(|exp| self.eval_expression(exp)).collect()
    }

    fn eval_hash_literal(&mut self, pairs: &[(Expression, Expression)]) -> EvalResult {
        let mut hash = BTreeMap::new();
        for (key, value) in pairs {
            let key = self.eval_expression(key)?;
            let hash_key = match HashKey::from_object(&key) {
                Some(k) => k,
                None => return error(format!("unusable as hash key: {}", key.type_name())),
            };

            let value = self.eval_expression(value)?;
            hash.insert(hash_key, HashPair { key, value });
        }
        Ok(Object::Hash(Rc::new(hash)))
    }

    fn apply_function(&self, function: Object, args: Vec<Object>) -> EvalResult {
        let function = match function {
            Object::Function(f) => f,
            other => return error(format!("not a function: {}", other.type_name())),
        };

        if function.parameters.len() != args.len() {
            return error(format!("wrong number of arguments: want={}, got={}",
                function.parameters.len(), args.len()));
        }
        if self.depth >= self.max_depth {
            return error(format!("maximum call depth exceeded ({})", self.max_depth));
        }
        trace!(depth = self.depth + 1, "calling {}", function);

        // the call frame hangs off the defining environment, not the caller's
        let frame = Environment::new_enclosed(Rc::clone(&function.env));
        let mut eval = Evaluator {
            env: Rc::new(RefCell::new(frame)),
            depth: self.depth + 1,
            max_depth: self.max_depth,
        };
        for (param, arg) in function.parameters.iter().zip(args) {
            eval.set(param.value.clone(), arg);
        }

        match eval.eval_block_statement(&function.body) {
            Ok(obj) | Err(Signal::Return(obj)) => Ok(obj),
            Err(err) => Err(err),
        }
    }
}

/// Evaluates `program` against an existing environment.
pub fn evaluate(program: &Program, env: &Rc<RefCell<Environment>>) -> Object {
    Evaluator::with_environment(Rc::clone(env)).eval(program)
}

fn eval_prefix_expression(operator: &str, right: Object) -> EvalResult {
    match operator {
        "!" => Ok(native_bool_to_object(!right.is_truthy())),
        "-" => match right {
            Object::Integer(i) => Ok(Object::Integer(i.wrapping_neg())),
            _ => error(format!("unknown operator: -{}", right.type_name())),
        },
        _ => error(format!("unknown operator: {}{}", operator, right.type_name())),
    }
}

fn eval_infix_expression(operator: &str, left: Object, right: Object) -> EvalResult {
    match (&left, &right) {
        (Object::Integer(l), Object::Integer(r)) => eval_integer_infix_expression(operator, *l, *r),
        (Object::String(l), Object::String(r)) => eval_string_infix_expression(operator, l, r),
        _ => match operator {
            "==" => Ok(native_bool_to_object(left.identical(&right))),
            "!=" => Ok(native_bool_to_object(!left.identical(&right))),
            _ if left.type_name() != right.type_name() => error(format!("type mismatch: {} {} {}",
                left.type_name(), operator, right.type_name())),
            _ => error(format!("unknown operator: {} {} {}",
                left.type_name(), operator, right.type_name())),
        }
    }
}

fn eval_integer_infix_expression(operator: &str, left: i64, right: i64) -> EvalResult {
    match operator {
        "+" => Ok(Object::Integer(left.wrapping_add(right))),
        "-" => Ok(Object::Integer(left.wrapping_sub(right))),
        "*" => Ok(Object::Integer(left.wrapping_mul(right))),
        "/" if right == 0 => error("division by zero".to_string()),
        "/" => Ok(Object::Integer(left.wrapping_div(right))),
        "<" => Ok(native_bool_to_object(left < right)),
        ">" => Ok(native_bool_to_object(left > right)),
        "==" => Ok(native_bool_to_object(left == right)),
        "!=" => Ok(native_bool_to_object(left != right)),
        _ => error(format!("unknown operator: INTEGER {} INTEGER", operator)),
    }
}

fn eval_string_infix_expression(operator: &str, left: &str, right: &str) -> EvalResult {
    match operator {
        "+" => Ok(Object::String(format!("{}{}", left, right))),
        "==" => Ok(native_bool_to_object(left == right)),
        "!=" => Ok(native_bool_to_object(left != right)),
        _ => error(format!("unknown operator: STRING {} STRING", operator)),
    }
}

fn eval_index_expression(left: Object, index: Object) -> EvalResult {
    match (&left, &index) {
        (Object::Array(arr), Object::Integer(i)) => {
            if *i < 0 || *i >= arr.len() as i64 {
                Ok(NULL)
            } else {
                Ok(arr[*i as usize].clone())
            }
        },
        (Object::Hash(hash), _) => match HashKey::from_object(&index) {
            Some(key) => Ok(hash.get(&key).map(|pair| pair.value.clone()).unwrap_or(NULL)),
            None => error(format!("unusable as hash key: {}", index.type_name())),
        },
        _ => error(format!("index operator not supported: {}", left.type_name())),
    }
}
