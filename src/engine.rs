use thiserror::Error;
use tracing::debug;
use crate::ast::{Program, Statement};
use crate::compiler::{ByteCode, CompileError, Compiler};
use crate::evaluator::Evaluator;
use crate::object::{Object, NULL};
use crate::symbol_table::SymbolTable;
use crate::vm::{FatalError, GLOBALS_SIZE, VM};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Run(#[from] FatalError),
}

/// A backend that runs parsed programs and keeps its bindings between runs.
pub trait Engine {
    fn run(&mut self, program: &Program) -> Result<Object, EngineError>;

    /// Bytecode listing for `program`, for backends that have one.
    fn disassemble(&self, _program: &Program) -> Option<String> {
        None
    }
}

/// Tree-walking backend. Language errors come back as `Object::Error`.
pub struct EvalEngine {
    evaluator: Evaluator,
}

impl EvalEngine {
    pub fn new(max_call_depth: usize) -> Self {
        EvalEngine { evaluator: Evaluator::new().with_max_depth(max_call_depth) }
    }
}

impl Default for EvalEngine {
    fn default() -> Self {
        EvalEngine { evaluator: Evaluator::new() }
    }
}

impl Engine for EvalEngine {
    fn run(&mut self, program: &Program) -> Result<Object, EngineError> {
        Ok(self.evaluator.eval(program))
    }
}

/// Compiler and virtual machine. Symbols, constants and globals carry over
/// from one run to the next.
///
/// Every literal compiled in a session stays in the constant pool, which
/// holds at most 65536 entries. Once it is full, any line that needs a new
/// constant fails with [`CompileError::TooManyConstants`]; a fresh engine
/// starts over with an empty pool.
pub struct VmEngine {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Object>,
}

impl Default for VmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VmEngine {
    pub fn new() -> Self {
        VmEngine {
            symbol_table: SymbolTable::new(),
            constants: vec![],
            globals: vec![NULL; GLOBALS_SIZE],
        }
    }

    /// Compiles against the session state without committing to it.
    pub fn compile(&self, program: &Program) -> Result<(ByteCode, SymbolTable), CompileError> {
        let mut compiler = Compiler::new_with_state(self.symbol_table.clone(), self.constants.clone());
        compiler.compile(program)?;
        Ok(compiler.finish())
    }

    /// Runs compiled code and adopts its session state. `yields_value` says
    /// whether the program ends in an expression statement.
    pub fn execute(&mut self, byte_code: ByteCode, symbol_table: SymbolTable, yields_value: bool) -> Result<Object, FatalError> {
        self.symbol_table = symbol_table;
        self.constants = byte_code.constants.clone();

        let globals = std::mem::take(&mut self.globals);
        let mut vm = VM::new_with_globals_store(byte_code, globals);
        let result = vm.run();

        let returned = vm.returned();
        let value = vm.last_popped_stack_elem();
        self.globals = vm.into_globals();
        result?;

        debug!(returned, "bytecode finished");
        if returned || yields_value {
            Ok(value)
        } else {
            Ok(NULL)
        }
    }
}

impl Engine for VmEngine {
    fn run(&mut self, program: &Program) -> Result<Object, EngineError> {
        let (byte_code, symbol_table) = self.compile(program)?;
        let yields_value = ends_in_expression(program.statements.last());
        Ok(self.execute(byte_code, symbol_table, yields_value)?)
    }

    fn disassemble(&self, program: &Program) -> Option<String> {
        let (byte_code, _) = self.compile(program).ok()?;
        let mut out = byte_code.instructions.to_string();
        for (i, constant) in byte_code.constants.iter().enumerate() {
            if let Object::CompiledFunction(func) = constant {
                out.push_str(&format!("constant {}: {}\n{}", i, func.source, func.instructions));
            }
        }
        Some(out)
    }
}

fn ends_in_expression(stmt: Option<&Statement>) -> bool {
    match stmt {
        Some(Statement::Expression { .. }) => true,
        Some(Statement::Block(block)) => ends_in_expression(block.statements.last()),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use crate::ast::Program;
    use crate::compiler::CompileError;
    use crate::engine::{Engine, EngineError, EvalEngine, VmEngine};
    use crate::lexer::Lexer;
    use crate::object::{Object, NULL};
    use crate::parser::Parser;
    use crate::vm::FatalError;

    fn parse(input: &str) -> Program {
        let mut p = Parser::new(Lexer::new(input));
        let program = p.parse_program();
        assert!(p.errors().is_empty(), "parser errors: {:?}", p.errors());
        program
    }

    fn run_session(engine: &mut dyn Engine, lines: &[&str]) -> Vec<Result<Object, EngineError>> {
        lines.iter().map(|line| engine.run(&parse(line))).collect()
    }

    #[test]
    fn test_sessions_keep_bindings() {
        let lines = ["let a = 5;", "let add = fn(x) { x + a };", "add(10)", "let a = 6; add(10)"];
        let expected = vec![Ok(NULL), Ok(NULL), Ok(Object::Integer(15)), Ok(Object::Integer(16))];

        assert_eq!(run_session(&mut EvalEngine::default(), &lines), expected);
        assert_eq!(run_session(&mut VmEngine::new(), &lines), expected);
    }

    #[test]
    fn test_failed_line_does_not_end_session() {
        let mut engine = VmEngine::new();
        let results = run_session(&mut engine, &["let a = 1;", "a + b", "1 + true", "a + 1"]);
        assert_eq!(results, vec![
            Ok(NULL),
            Err(EngineError::Compile(CompileError::UndefinedVariable("b".to_string()))),
            Err(EngineError::Run(FatalError::UnsupportedOperands { operator: "+", left: "INTEGER", right: "BOOLEAN" })),
            Ok(Object::Integer(2)),
        ]);
    }

    #[test]
    fn test_constant_pool_fills_up() {
        let mut engine = VmEngine::new();
        let literal = format!("[{}]", (0..65535).map(|i| i.to_string()).collect::<Vec<_>>().join(", "));
        assert!(engine.run(&parse(&literal)).is_ok());

        let results = run_session(&mut engine, &["1", "2", "true"]);
        assert_eq!(results, vec![
            Ok(Object::Integer(1)),
            Err(EngineError::Compile(CompileError::TooManyConstants)),
            Ok(Object::Boolean(true)),
        ]);
    }

    #[test]
    fn test_error_channels_differ() {
        let program = parse("1 + true");
        assert_eq!(EvalEngine::default().run(&program),
                   Ok(Object::Error("type mismatch: INTEGER + BOOLEAN".to_string())));
        assert!(matches!(VmEngine::new().run(&program), Err(EngineError::Run(_))));
    }

    #[test]
    fn test_value_of_program() {
        struct Test<'a> {
            input: &'a str,
            expected: Object,
        }
        let tests = vec![
            Test{input: "", expected: NULL},
            Test{input: "let a = 1;", expected: NULL},
            Test{input: "1; let a = 2;", expected: NULL},
            Test{input: "let a = 2; a", expected: Object::Integer(2)},
            Test{input: "return 3; 4", expected: Object::Integer(3)},
            Test{input: "if (true) { return 5; } 6", expected: Object::Integer(5)},
        ];

        for tt in tests {
            let program = parse(tt.input);
            assert_eq!(EvalEngine::default().run(&program), Ok(tt.expected.clone()), "eval: {}", tt.input);
            assert_eq!(VmEngine::new().run(&program), Ok(tt.expected), "vm: {}", tt.input);
        }
    }

    #[test]
    fn test_disassemble() {
        let program = parse("let f = fn(a) { a }; f(1)");
        assert_eq!(EvalEngine::default().disassemble(&program), None);

        let listing = VmEngine::new().disassemble(&program).unwrap();
        let expected = "0000 OpClosure 0 0\n0004 OpSetGlobal 0\n0007 OpGetGlobal 0\n0010 OpConstant 1\n\
0013 OpCall 1\n0015 OpPop\nconstant 0: fn(a) { a }\n0000 OpGetLocal 0\n0002 OpReturnValue\n";
        assert_eq!(listing, expected);
    }
}
