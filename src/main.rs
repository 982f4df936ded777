use std::io::{stdin, stdout, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use ode::engine::{Engine, EvalEngine, VmEngine};
use ode::evaluator::DEFAULT_MAX_CALL_DEPTH;
use ode::repl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Walk the syntax tree directly.
    Eval,
    /// Compile to bytecode and run it on the virtual machine.
    Vm,
}

/// ode runs programs in a small expression language, interactively or from a file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Which backend runs the program.
    #[arg(short, long, value_enum, default_value_t = EngineKind::Eval)]
    engine: EngineKind,

    /// Print the bytecode before running it (vm engine only).
    #[arg(short, long)]
    disassemble: bool,

    /// Deepest call nesting the evaluator allows.
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Script to run instead of starting the interactive loop.
    file: Option<PathBuf>,
}

/// Host stack reserved for the interpreter thread, plus a share per allowed
/// evaluator call.
const BASE_STACK_SIZE: usize = 8 * 1024 * 1024;
const STACK_PER_CALL: usize = 64 * 1024;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let stack_size = BASE_STACK_SIZE.saturating_add(args.max_call_depth.saturating_mul(STACK_PER_CALL));
    let runner = thread::Builder::new()
        .name("ode".to_string())
        .stack_size(stack_size)
        .spawn(move || run(args));
    match runner {
        Ok(handle) => handle.join().unwrap_or(ExitCode::FAILURE),
        Err(e) => {
            eprintln!("could not start the interpreter: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(args: Args) -> ExitCode {
    let mut engine: Box<dyn Engine> = match args.engine {
        EngineKind::Eval => Box::new(EvalEngine::new(args.max_call_depth)),
        EngineKind::Vm => Box::new(VmEngine::new()),
    };

    let result = match &args.file {
        Some(path) => run_file(path, engine.as_mut(), args.disassemble),
        None if stdin().is_terminal() => {
            println!("Feel free to type in commands");
            repl::start_interactive(engine.as_mut(), args.disassemble).map_err(|e| e.to_string())
        },
        None => repl::start(stdin().lock(), stdout(), engine.as_mut(), args.disassemble)
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{}", msg);
            ExitCode::FAILURE
        },
    }
}

fn run_file(path: &Path, engine: &mut dyn Engine, disassemble: bool) -> Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e))?;

    let ok = repl::run_source(&source, &mut stdout(), engine, disassemble).map_err(|e| e.to_string())?;
    if ok {
        Ok(())
    } else {
        Err(format!("{} failed", path.display()))
    }
}
