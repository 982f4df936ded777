use std::io::{self, BufRead, Write};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use crate::engine::{Engine, EngineError};
use crate::lexer::Lexer;
use crate::parser::Parser;

const PROMPT: &str = ">> ";

const MONKEY_FACE: &str =
r#"
            __,__
   .--.  .-"     "-.  .--.
  / .. \/  .-. .-.  \/ .. \
 | |  '|  /   Y   \  |'  | |
 | \   \  \ 0 | 0 /  /   / |
  \ '- ,\.-"""""""-./, -' /
   ''-' /_   ^ ^   _\ '-''
       |  \._   _./  |
       \   \ '~' /   /
        '._ '-=-' _.'
           '-----'
"#;

/// Reads lines until end of input, running each one on `engine`.
pub fn start<R: BufRead, W: Write>(mut reader: R, mut writer: W, engine: &mut dyn Engine, disassemble: bool) -> io::Result<()> {
    loop {
        write!(writer, "{}", PROMPT)?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        run_source(&line, &mut writer, engine, disassemble)?;
    }
}

/// The interactive loop on a terminal, with line editing and history.
pub fn start_interactive(engine: &mut dyn Engine, disassemble: bool) -> rustyline::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let stdout = io::stdout();

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                run_source(&line, &mut stdout.lock(), engine, disassemble)?;
            },
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// Parses and runs `source`, writing the result or the failure. Returns
/// whether the source ran without any error.
pub fn run_source<W: Write>(source: &str, writer: &mut W, engine: &mut dyn Engine, disassemble: bool) -> io::Result<bool> {
    let mut p = Parser::new(Lexer::new(source));
    let program = p.parse_program();
    if !p.errors().is_empty() {
        print_parser_errors(writer, p.errors())?;
        return Ok(false);
    }

    if disassemble {
        if let Some(listing) = engine.disassemble(&program) {
            write!(writer, "{}", listing)?;
        }
    }

    match engine.run(&program) {
        Ok(obj) => {
            writeln!(writer, "{}", obj)?;
            Ok(!obj.is_error())
        },
        Err(EngineError::Compile(err)) => {
            writeln!(writer, "Woops! Compilation failed:\n {}", err)?;
            Ok(false)
        },
        Err(EngineError::Run(err)) => {
            writeln!(writer, "Woops! Executing bytecode failed:\n {}", err)?;
            Ok(false)
        },
    }
}

fn print_parser_errors<W: Write>(writer: &mut W, errs: &[String]) -> io::Result<()> {
    write!(writer, "{}", MONKEY_FACE)?;
    writeln!(writer, "Woops! We ran into some monkey business here!\n parser errors:")?;
    for msg in errs {
        writeln!(writer, "\t{}", msg)?;
    }
    writer.flush()
}
