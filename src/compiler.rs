use std::rc::Rc;
use thiserror::Error;
use tracing::debug;
use crate::ast::{BlockStatement, Expression, FunctionLiteral, Program, Statement};
use crate::code::{make, Instructions, Operation};
use crate::object::{CompiledFunction, Object};
use crate::symbol_table::{Symbol, SymbolScope, SymbolTable};

/// Placeholder operand for jumps whose target is not known yet.
const UNRESOLVED_JUMP: usize = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("unknown operator {0}")]
    UnknownOperator(String),
    #[error("too many constants, the pool holds at most {}", u16::MAX as usize + 1)]
    TooManyConstants,
    #[error("too many local bindings in one function, at most {}", u8::MAX as usize + 1)]
    TooManyLocals,
    #[error("too many global bindings, at most {}", u16::MAX as usize + 1)]
    TooManyGlobals,
    #[error("too many arguments in one call, at most {}", u8::MAX)]
    TooManyArguments,
    #[error("too many free variables in one function, at most {}", u8::MAX)]
    TooManyFreeVariables,
    #[error("too many elements in one literal, at most {}", u16::MAX)]
    TooManyElements,
    #[error("jump target {0} is out of range")]
    JumpOutOfRange(usize),
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Operation,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::new_with_state(SymbolTable::new(), vec![])
    }

    /// Continues from the globals and constants of an earlier compilation.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for s in program.statements.iter() {
            self.compile_statement(s)?;
        }
        debug!(bytes = self.current_instructions().len(), constants = self.constants.len(), "compiled program");
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Expression { expression, .. } => {
                self.compile_expression(expression)?;
                self.emit(Operation::OpPop, &[]);
            },
            Statement::Let { name, value, .. } => {
                match value {
                    Expression::Function(func) => self.compile_function(func, Some(name.value.as_str()))?,
                    _ => self.compile_expression(value)?,
                }
                let symbol = self.symbol_table.define(&name.value);
                match symbol.scope {
                    SymbolScope::Global => {
                        if symbol.index > u16::MAX as usize {
                            return Err(CompileError::TooManyGlobals);
                        }
                        self.emit(Operation::OpSetGlobal, &[symbol.index])
                    },
                    _ => {
                        if symbol.index > u8::MAX as usize {
                            return Err(CompileError::TooManyLocals);
                        }
                        self.emit(Operation::OpSetLocal, &[symbol.index])
                    },
                };
            },
            Statement::Return { value, .. } => {
                self.compile_expression(value)?;
                self.emit(Operation::OpReturnValue, &[]);
            },
            Statement::Block(block) => self.compile_block(block)?,
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        for s in block.statements.iter() {
            self.compile_statement(s)?;
        }
        Ok(())
    }

    /// Compiles a block that must leave exactly one value on the stack.
    fn compile_block_value(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        self.compile_block(block)?;
        if self.last_instruction_is(Operation::OpPop) {
            self.remove_last_pop();
        } else {
            self.emit(Operation::OpNull, &[]);
        }
        Ok(())
    }

    fn compile_expression(&mut self, exp: &Expression) -> Result<(), CompileError> {
        match exp {
            Expression::Infix { operator, left, right, .. } => {
                if operator == "<" {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Operation::OpGreaterThan, &[]);
                    return Ok(());
                }

                self.compile_expression(left)?;
                self.compile_expression(right)?;

                let op = match operator.as_str() {
                    "+" => Operation::OpAdd,
                    "-" => Operation::OpSub,
                    "*" => Operation::OpMul,
                    "/" => Operation::OpDiv,
                    ">" => Operation::OpGreaterThan,
                    "==" => Operation::OpEqual,
                    "!=" => Operation::OpNotEqual,
                    _ => return Err(CompileError::UnknownOperator(operator.clone())),
                };
                self.emit(op, &[]);
            },
            Expression::Prefix { operator, right, .. } => {
                self.compile_expression(right)?;

                let op = match operator.as_str() {
                    "!" => Operation::OpBang,
                    "-" => Operation::OpMinus,
                    _ => return Err(CompileError::UnknownOperator(operator.clone())),
                };
                self.emit(op, &[]);
            },
            Expression::Integer { value, .. } => {
                let pos = self.add_constant(Object::Integer(*value))?;
                self.emit(Operation::OpConstant, &[pos]);
            },
            Expression::String { value, .. } => {
                let pos = self.add_constant(Object::String(value.clone()))?;
                self.emit(Operation::OpConstant, &[pos]);
            },
            Expression::Boolean { value, .. } => {
                if *value {
                    self.emit(Operation::OpTrue, &[]);
                } else {
                    self.emit(Operation::OpFalse, &[]);
                }
            },
            Expression::Null { .. } => {
                self.emit(Operation::OpNull, &[]);
            },
            Expression::If { condition, consequence, alternative, .. } => {
                self.compile_expression(condition)?;

                let jump_not_truthy_pos = self.emit(Operation::OpJumpNotTruthy, &[UNRESOLVED_JUMP]);
                self.compile_block_value(consequence)?;
                let jump_pos = self.emit(Operation::OpJump, &[UNRESOLVED_JUMP]);

                let after_consequence_pos = self.current_instructions().len();
                self.change_jump_target(jump_not_truthy_pos, after_consequence_pos)?;

                match alternative {
                    None => {
                        self.emit(Operation::OpNull, &[]);
                    },
                    Some(alt) => self.compile_block_value(alt)?,
                }

                let after_alternative_pos = self.current_instructions().len();
                self.change_jump_target(jump_pos, after_alternative_pos)?;
            },
            Expression::Identifier(ident) => {
                let symbol = self.symbol_table.resolve(&ident.value)
                    .ok_or_else(|| CompileError::UndefinedVariable(ident.value.clone()))?;
                self.load_symbol(&symbol)?;
            },
            Expression::Array { elements, .. } => {
                for el in elements {
                    self.compile_expression(el)?;
                }
                if elements.len() > u16::MAX as usize {
                    return Err(CompileError::TooManyElements);
                }
                self.emit(Operation::OpArray, &[elements.len()]);
            },
            Expression::Hash { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                if pairs.len() * 2 > u16::MAX as usize {
                    return Err(CompileError::TooManyElements);
                }
                self.emit(Operation::OpHash, &[pairs.len() * 2]);
            },
            Expression::Index { left, index, .. } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Operation::OpIndex, &[]);
            },
            Expression::Function(func) => self.compile_function(func, None)?,
            Expression::Call { function, arguments, .. } => {
                self.compile_expression(function)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                if arguments.len() > u8::MAX as usize {
                    return Err(CompileError::TooManyArguments);
                }
                self.emit(Operation::OpCall, &[arguments.len()]);
            },
        }
        Ok(())
    }

    fn compile_function(&mut self, func: &FunctionLiteral, name: Option<&str>) -> Result<(), CompileError> {
        self.enter_scope();

        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for param in func.parameters.iter() {
            self.symbol_table.define(&param.value);
        }

        self.compile_block(&func.body)?;

        if self.last_instruction_is(Operation::OpPop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Operation::OpReturnValue) {
            self.emit(Operation::OpReturn, &[]);
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions;
        let instructions = self.leave_scope();

        if num_locals > u8::MAX as usize + 1 {
            return Err(CompileError::TooManyLocals);
        }
        if free_symbols.len() > u8::MAX as usize {
            return Err(CompileError::TooManyFreeVariables);
        }

        for symbol in free_symbols.iter() {
            self.load_symbol(symbol)?;
        }

        let compiled = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: func.parameters.len(),
            source: func.to_string(),
        };
        let idx = self.add_constant(Object::CompiledFunction(Rc::new(compiled)))?;
        self.emit(Operation::OpClosure, &[idx, free_symbols.len()]);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global if symbol.index > u16::MAX as usize => return Err(CompileError::TooManyGlobals),
            SymbolScope::Local if symbol.index > u8::MAX as usize => return Err(CompileError::TooManyLocals),
            SymbolScope::Free if symbol.index > u8::MAX as usize => return Err(CompileError::TooManyFreeVariables),
            SymbolScope::Global => self.emit(Operation::OpGetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Operation::OpGetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Operation::OpGetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Operation::OpCurrentClosure, &[]),
        };
        Ok(())
    }

    fn add_constant(&mut self, obj: Object) -> Result<usize, CompileError> {
        if self.constants.len() > u16::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(obj);
        Ok(self.constants.len() - 1) // returns the object's index
    }

    fn emit(&mut self, op: Operation, operands: &[usize]) -> usize {
        let ins = make(op, operands);
        let pos = self.add_instruction(ins);
        self.set_last_instruction(op, pos);
        pos
    }

    fn add_instruction(&mut self, mut ins: Vec<u8>) -> usize {
        let instructions = &mut self.current_scope_mut().instructions;
        let pos_new_instruction = instructions.len();
        instructions.append_vec(&mut ins);
        pos_new_instruction
    }

    fn set_last_instruction(&mut self, opcode: Operation, position: usize) {
        let scope = self.current_scope_mut();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn last_instruction_is(&self, op: Operation) -> bool {
        matches!(self.current_scope().last_instruction, Some(last) if last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction.as_mut() {
            scope.instructions.replace(last.position, &make(Operation::OpReturnValue, &[]));
            last.opcode = Operation::OpReturnValue;
        }
    }

    /// Backpatches the target of the jump at `pos`.
    fn change_jump_target(&mut self, pos: usize, target: usize) -> Result<(), CompileError> {
        if target > u16::MAX as usize {
            return Err(CompileError::JumpOutOfRange(target));
        }
        self.change_operand(pos, target);
        Ok(())
    }

    fn change_operand(&mut self, pos: usize, operand: usize) {
        let scope = self.current_scope_mut();
        if let Some(op) = Operation::from_byte(scope.instructions[pos]) {
            scope.instructions.replace(pos, &make(op, &[operand]));
        }
    }

    fn current_scope(&self) -> &CompilationScope {
        // the main scope is never left
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn current_instructions(&self) -> &Instructions {
        &self.current_scope().instructions
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().unwrap_or_default();
        let table = std::mem::take(&mut self.symbol_table);
        if let Some(outer) = table.outer {
            self.symbol_table = *outer;
        }
        scope.instructions
    }

    pub fn byte_code(self) -> ByteCode {
        self.finish().0
    }

    /// Returns the program and the symbol table needed to continue the
    /// session with [`Compiler::new_with_state`].
    pub fn finish(mut self) -> (ByteCode, SymbolTable) {
        let main = self.scopes.swap_remove(0);
        (
            ByteCode {
                instructions: main.instructions,
                constants: self.constants,
            },
            self.symbol_table,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ByteCode {
    pub instructions: Instructions,
    pub constants: Vec<Object>
}

/// Compiles a program from scratch.
pub fn compile(program: &Program) -> Result<ByteCode, CompileError> {
    let mut compiler = Compiler::new();
    compiler.compile(program)?;
    Ok(compiler.byte_code())
}

#[cfg(test)]
mod test {
    use itertools::concat;
    use pretty_assertions::assert_eq;
    use crate::ast::Program;
    use crate::code::{make, Instructions, Operation};
    use crate::compiler::{compile, CompileError, Compiler};
    use crate::lexer::Lexer;
    use crate::object::Object;
    use crate::parser::Parser;

    enum Constant {
        Int(i64),
        Str(&'static str),
        Function(Vec<Vec<u8>>),
    }

    struct CompilerTestCase<'a> {
        input: &'a str,
        exp_constants: Vec<Constant>,
        exp_instructions: Vec<Vec<u8>>,
    }

    fn parse(input: &str) -> Program {
        let l = Lexer::new(input);
        let mut p = Parser::new(l);
        let program = p.parse_program();
        assert!(p.errors().is_empty(), "parser errors: {:?}", p.errors());
        program
    }

    fn run_compiler_tests(tests: Vec<CompilerTestCase>) {
        for tt in tests {
            let program = parse(tt.input);

            let byte_code = match compile(&program) {
                Err(e) => panic!("compile error {}", e),
                Ok(b) => b,
            };

            test_instructions(tt.exp_instructions, &byte_code.instructions, tt.input);
            test_constants(tt.exp_constants, &byte_code.constants, tt.input);
        }
    }

    fn test_instructions(expected: Vec<Vec<u8>>, actual: &Instructions, input: &str) {
        let concatted = Instructions::new(concat(expected));
        assert_eq!(concatted.to_string(), actual.to_string(), "instructions differ for {}", input);
    }

    fn test_constants(expected: Vec<Constant>, actual: &[Object], input: &str) {
        assert_eq!(expected.len(), actual.len(), "wrong number of constants for {}", input);
        for (exp, act) in expected.into_iter().zip(actual) {
            match (exp, act) {
                (Constant::Int(i), Object::Integer(got)) => assert_eq!(i, *got),
                (Constant::Str(s), Object::String(got)) => assert_eq!(s, got),
                (Constant::Function(ins), Object::CompiledFunction(func)) => {
                    test_instructions(ins, &func.instructions, input)
                },
                (_, other) => panic!("constant has unexpected type {} for {}", other.type_name(), input),
            }
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        let tests = vec![
            CompilerTestCase {
                input: "1 + 2",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpAdd, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "1; 2",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpPop, &[]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "1 - 2 * 3 / 4",
                exp_constants: vec![Constant::Int(1), Constant::Int(2), Constant::Int(3), Constant::Int(4)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpConstant, &[2]),
                    make(Operation::OpMul, &[]),
                    make(Operation::OpConstant, &[3]),
                    make(Operation::OpDiv, &[]),
                    make(Operation::OpSub, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "-1",
                exp_constants: vec![Constant::Int(1)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpMinus, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_boolean_expressions() {
        let tests = vec![
            CompilerTestCase {
                input: "true",
                exp_constants: vec![],
                exp_instructions: vec![make(Operation::OpTrue, &[]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "null",
                exp_constants: vec![],
                exp_instructions: vec![make(Operation::OpNull, &[]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "1 > 2",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpGreaterThan, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "1 < 2",
                exp_constants: vec![Constant::Int(2), Constant::Int(1)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpGreaterThan, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "true != false",
                exp_constants: vec![],
                exp_instructions: vec![
                    make(Operation::OpTrue, &[]),
                    make(Operation::OpFalse, &[]),
                    make(Operation::OpNotEqual, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "!(1 == 2)",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpEqual, &[]),
                    make(Operation::OpBang, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_conditionals() {
        let tests = vec![
            CompilerTestCase {
                input: "if (true) { 10 }; 3333;",
                exp_constants: vec![Constant::Int(10), Constant::Int(3333)],
                exp_instructions: vec![
                    make(Operation::OpTrue, &[]), // 0000
                    make(Operation::OpJumpNotTruthy, &[10]), // 0001
                    make(Operation::OpConstant, &[0]), // 0004
                    make(Operation::OpJump, &[11]), // 0007
                    make(Operation::OpNull, &[]), // 0010
                    make(Operation::OpPop, &[]), // 0011
                    make(Operation::OpConstant, &[1]), // 0012
                    make(Operation::OpPop, &[]), // 0015
                ]
            },
            CompilerTestCase {
                input: "if (true) { 10 } else { 20 }; 3333;",
                exp_constants: vec![Constant::Int(10), Constant::Int(20), Constant::Int(3333)],
                exp_instructions: vec![
                    make(Operation::OpTrue, &[]), // 0000
                    make(Operation::OpJumpNotTruthy, &[10]), // 0001
                    make(Operation::OpConstant, &[0]), // 0004
                    make(Operation::OpJump, &[13]), // 0007
                    make(Operation::OpConstant, &[1]), // 0010
                    make(Operation::OpPop, &[]), // 0013
                    make(Operation::OpConstant, &[2]), // 0014
                    make(Operation::OpPop, &[]), // 0017
                ]
            },
            CompilerTestCase {
                input: "if (true) { let a = 1; }",
                exp_constants: vec![Constant::Int(1)],
                exp_instructions: vec![
                    make(Operation::OpTrue, &[]), // 0000
                    make(Operation::OpJumpNotTruthy, &[14]), // 0001
                    make(Operation::OpConstant, &[0]), // 0004
                    make(Operation::OpSetGlobal, &[0]), // 0007
                    make(Operation::OpNull, &[]), // 0010
                    make(Operation::OpJump, &[15]), // 0011
                    make(Operation::OpNull, &[]), // 0014
                    make(Operation::OpPop, &[]), // 0015
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_jump_targets_bracket_the_branches() {
        let program = parse("if (1 > 2) { 10; 20 } else { 30 * 40 }");
        let byte_code = compile(&program).unwrap();
        let ins = byte_code.instructions.as_slice();

        // 0000 C0, 0003 C1, 0006 GT, 0007 JNT, 0010 consequence (C2 POP C3), 0017 JUMP, 0020 alternative
        let consequence_start = 10;
        let consequence_len = 3 + 1 + 3;
        assert_eq!(ins[7], Operation::OpJumpNotTruthy.as_byte());
        let jnt_target = u16::from_be_bytes([ins[8], ins[9]]) as usize;
        assert_eq!(jnt_target, consequence_start + consequence_len + 3);

        let jump_pos = consequence_start + consequence_len;
        assert_eq!(ins[jump_pos], Operation::OpJump.as_byte());
        let jump_target = u16::from_be_bytes([ins[jump_pos + 1], ins[jump_pos + 2]]) as usize;
        let alternative_len = 3 + 3 + 1;
        assert_eq!(jump_target, jnt_target + alternative_len);
        assert_eq!(ins[jump_target], Operation::OpPop.as_byte());
        assert_eq!(jump_target + 1, ins.len());
    }

    #[test]
    fn test_global_let_statements() {
        let tests = vec![
            CompilerTestCase {
                input: "let one = 1; let two = 2;",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpSetGlobal, &[1]),
                ]
            },
            CompilerTestCase {
                input: "let one = 1; let two = one; two;",
                exp_constants: vec![Constant::Int(1)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpGetGlobal, &[0]),
                    make(Operation::OpSetGlobal, &[1]),
                    make(Operation::OpGetGlobal, &[1]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "let x = 1; let x = 2; x",
                exp_constants: vec![Constant::Int(1), Constant::Int(2)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpGetGlobal, &[0]),
                    make(Operation::OpPop, &[]),
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_string_array_hash_index() {
        let tests = vec![
            CompilerTestCase {
                input: r#""mon" + "key""#,
                exp_constants: vec![Constant::Str("mon"), Constant::Str("key")],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpAdd, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "[]",
                exp_constants: vec![],
                exp_instructions: vec![make(Operation::OpArray, &[0]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "[1, 2, 3]",
                exp_constants: vec![Constant::Int(1), Constant::Int(2), Constant::Int(3)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpConstant, &[2]),
                    make(Operation::OpArray, &[3]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "{2: 3, 1: 4}",
                exp_constants: vec![Constant::Int(2), Constant::Int(3), Constant::Int(1), Constant::Int(4)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpConstant, &[2]),
                    make(Operation::OpConstant, &[3]),
                    make(Operation::OpHash, &[4]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "[1, 2][1]",
                exp_constants: vec![Constant::Int(1), Constant::Int(2), Constant::Int(1)],
                exp_instructions: vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpArray, &[2]),
                    make(Operation::OpConstant, &[2]),
                    make(Operation::OpIndex, &[]),
                    make(Operation::OpPop, &[]),
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_functions() {
        let tests = vec![
            CompilerTestCase {
                input: "fn() { return 5 + 10 }",
                exp_constants: vec![Constant::Int(5), Constant::Int(10), Constant::Function(vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpAdd, &[]),
                    make(Operation::OpReturnValue, &[]),
                ])],
                exp_instructions: vec![make(Operation::OpClosure, &[2, 0]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "fn() { 5 + 10 }",
                exp_constants: vec![Constant::Int(5), Constant::Int(10), Constant::Function(vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpAdd, &[]),
                    make(Operation::OpReturnValue, &[]),
                ])],
                exp_instructions: vec![make(Operation::OpClosure, &[2, 0]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "fn() { }",
                exp_constants: vec![Constant::Function(vec![make(Operation::OpReturn, &[])])],
                exp_instructions: vec![make(Operation::OpClosure, &[0, 0]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "fn() { 24 }();",
                exp_constants: vec![Constant::Int(24), Constant::Function(vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpReturnValue, &[]),
                ])],
                exp_instructions: vec![
                    make(Operation::OpClosure, &[1, 0]),
                    make(Operation::OpCall, &[0]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "let oneArg = fn(a) { a }; oneArg(24);",
                exp_constants: vec![Constant::Function(vec![
                    make(Operation::OpGetLocal, &[0]),
                    make(Operation::OpReturnValue, &[]),
                ]), Constant::Int(24)],
                exp_instructions: vec![
                    make(Operation::OpClosure, &[0, 0]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpGetGlobal, &[0]),
                    make(Operation::OpConstant, &[1]),
                    make(Operation::OpCall, &[1]),
                    make(Operation::OpPop, &[]),
                ]
            },
            CompilerTestCase {
                input: "fn() { let num = 55; num }",
                exp_constants: vec![Constant::Int(55), Constant::Function(vec![
                    make(Operation::OpConstant, &[0]),
                    make(Operation::OpSetLocal, &[0]),
                    make(Operation::OpGetLocal, &[0]),
                    make(Operation::OpReturnValue, &[]),
                ])],
                exp_instructions: vec![make(Operation::OpClosure, &[1, 0]), make(Operation::OpPop, &[])]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_closures() {
        let tests = vec![
            CompilerTestCase {
                input: "fn(a) { fn(b) { a + b } }",
                exp_constants: vec![
                    Constant::Function(vec![
                        make(Operation::OpGetFree, &[0]),
                        make(Operation::OpGetLocal, &[0]),
                        make(Operation::OpAdd, &[]),
                        make(Operation::OpReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Operation::OpGetLocal, &[0]),
                        make(Operation::OpClosure, &[0, 1]),
                        make(Operation::OpReturnValue, &[]),
                    ]),
                ],
                exp_instructions: vec![make(Operation::OpClosure, &[1, 0]), make(Operation::OpPop, &[])]
            },
            CompilerTestCase {
                input: "let countDown = fn(x) { countDown(x - 1); }; countDown(1);",
                exp_constants: vec![
                    Constant::Int(1),
                    Constant::Function(vec![
                        make(Operation::OpCurrentClosure, &[]),
                        make(Operation::OpGetLocal, &[0]),
                        make(Operation::OpConstant, &[0]),
                        make(Operation::OpSub, &[]),
                        make(Operation::OpCall, &[1]),
                        make(Operation::OpReturnValue, &[]),
                    ]),
                    Constant::Int(1),
                ],
                exp_instructions: vec![
                    make(Operation::OpClosure, &[1, 0]),
                    make(Operation::OpSetGlobal, &[0]),
                    make(Operation::OpGetGlobal, &[0]),
                    make(Operation::OpConstant, &[2]),
                    make(Operation::OpCall, &[1]),
                    make(Operation::OpPop, &[]),
                ]
            },
        ];
        run_compiler_tests(tests);
    }

    #[test]
    fn test_top_level_return() {
        run_compiler_tests(vec![CompilerTestCase {
            input: "return 5;",
            exp_constants: vec![Constant::Int(5)],
            exp_instructions: vec![make(Operation::OpConstant, &[0]), make(Operation::OpReturnValue, &[])]
        }]);
    }

    #[test]
    fn test_compile_errors() {
        let program = parse("let a = 1; a + b");
        assert_eq!(compile(&program).unwrap_err(), CompileError::UndefinedVariable("b".to_string()));
        assert_eq!(CompileError::UndefinedVariable("b".to_string()).to_string(), "undefined variable b");

        // a binding cannot refer to itself unless it is a function
        let program = parse("let y = y;");
        assert_eq!(compile(&program).unwrap_err(), CompileError::UndefinedVariable("y".to_string()));
    }

    fn numbered(prefix: &str, n: usize, sep: &str) -> String {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect::<Vec<_>>().join(sep)
    }

    #[test]
    fn test_operands_must_fit_their_width() {
        struct Test {
            input: String,
            expected: Result<(), CompileError>,
        }
        let captured = |n: usize| format!(
            "fn() {{ {} fn() {{ [{}] }} }}",
            (0..n).map(|i| format!("let a{} = {};", i, i)).collect::<String>(),
            numbered("a", n, ", "),
        );
        let tests = vec![
            Test {
                input: format!("fn(a) {{ a }}({})", numbered("", 255, ", ")),
                expected: Ok(()),
            },
            Test {
                input: format!("fn(a) {{ a }}({}, fn(x) {{ x + 100 }}, 5)", numbered("", 255, ", ")),
                expected: Err(CompileError::TooManyArguments),
            },
            Test {
                input: captured(255),
                expected: Ok(()),
            },
            Test {
                input: captured(256),
                expected: Err(CompileError::TooManyFreeVariables),
            },
            Test {
                input: format!("[{}]", vec!["true"; 65535].join(", ")),
                expected: Ok(()),
            },
            Test {
                input: format!("[{}]", vec!["true"; 65536].join(", ")),
                expected: Err(CompileError::TooManyElements),
            },
            Test {
                input: format!("{{{}}}", vec!["true: true"; 32768].join(", ")),
                expected: Err(CompileError::TooManyElements),
            },
            Test {
                input: format!("{} g0", (0..65536).map(|i| format!("let g{} = true;", i)).collect::<String>()),
                expected: Ok(()),
            },
            Test {
                input: format!("{} let g0 = 7; g65536", (0..65537).map(|i| format!("let g{} = true;", i)).collect::<String>()),
                expected: Err(CompileError::TooManyGlobals),
            },
            Test {
                // 0000 FALSE, 0001 JNT, 0004 consequence, 80007 JUMP, 80010 alternative
                input: format!("if (false) {{ {} 1 }} else {{ 2 }}", "null; ".repeat(40000)),
                expected: Err(CompileError::JumpOutOfRange(80010)),
            },
        ];

        for tt in tests {
            let program = parse(&tt.input);
            let result = compile(&program).map(|_| ());
            assert_eq!(result, tt.expected, "input starting {}", &tt.input[..tt.input.len().min(40)]);
        }
    }

    #[test]
    fn test_compiled_function_keeps_source() {
        let byte_code = compile(&parse("fn(x, y) { x + y }")).unwrap();
        match &byte_code.constants[0] {
            Object::CompiledFunction(func) => {
                assert_eq!(func.source, "fn(x, y) { (x + y) }");
                assert_eq!(func.num_parameters, 2);
                assert_eq!(func.num_locals, 2);
            },
            other => panic!("not a compiled function: {}", other),
        }
    }

    #[test]
    fn test_state_carries_over() {
        let mut compiler = Compiler::new();
        compiler.compile(&parse("let a = 1;")).unwrap();
        let (byte_code, symbols) = compiler.finish();

        let mut compiler = Compiler::new_with_state(symbols, byte_code.constants);
        compiler.compile(&parse("a + 2")).unwrap();
        let byte_code = compiler.byte_code();

        assert_eq!(byte_code.constants, vec![Object::Integer(1), Object::Integer(2)]);
        test_instructions(vec![
            make(Operation::OpGetGlobal, &[0]),
            make(Operation::OpConstant, &[1]),
            make(Operation::OpAdd, &[]),
            make(Operation::OpPop, &[]),
        ], &byte_code.instructions, "a + 2");
    }
}
