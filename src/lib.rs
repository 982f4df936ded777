pub mod token;
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod object;
pub mod environment;
pub mod evaluator;
pub mod code;
pub mod symbol_table;
pub mod compiler;
pub mod vm;
pub mod engine;
pub mod repl;
