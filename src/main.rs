use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, Subcommand, ValueEnum};

use erwig_lang::engine::Engine;
use erwig_lang::parser::{split_source, StatementParser};
use erwig_lang::runtime::{CallConvention, ScopeMode};

#[derive(ClapParser)]
#[command(name = "erwig", version, about = "The Erwig teaching language interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and display the command sequence
    Parse {
        /// Path to the source file, or '-' for stdin
        file: PathBuf,
    },
    /// Execute a program and print its step trace
    Run {
        /// Path to the source file, or '-' for stdin
        file: PathBuf,
        /// Calling convention for function parameters
        #[arg(short, long, value_enum)]
        convention: ConventionArg,
        /// Scoping discipline for name resolution
        #[arg(short, long, value_enum)]
        scoping: ScopingArg,
        /// Emit the trace as JSON lines instead of formatted text
        #[arg(long)]
        json: bool,
    },
}

/// CLI spelling of the calling convention. Kept separate from the runtime
/// enum so the two configuration axes stay distinctly typed end to end.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConventionArg {
    Cbv,
    Cbr,
    Cbvr,
    Cbneed,
    Cbname,
}

impl ConventionArg {
    fn to_convention(self) -> CallConvention {
        match self {
            ConventionArg::Cbv => CallConvention::Cbv,
            ConventionArg::Cbr => CallConvention::Cbr,
            ConventionArg::Cbvr => CallConvention::Cbvr,
            ConventionArg::Cbneed => CallConvention::Cbneed,
            ConventionArg::Cbname => CallConvention::Cbname,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopingArg {
    Static,
    Dynamic,
}

impl ScopingArg {
    fn to_mode(self) -> ScopeMode {
        match self {
            ScopingArg::Static => ScopeMode::Static,
            ScopingArg::Dynamic => ScopeMode::Dynamic,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Parse { file } => cmd_parse(&file),
        Commands::Run {
            file,
            convention,
            scoping,
            json,
        } => cmd_run(&file, convention.to_convention(), scoping.to_mode(), json),
    };
    process::exit(exit_code);
}

fn read_source(path: &PathBuf) -> Result<String, i32> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut source) {
            eprintln!("Error: cannot read stdin: {}", e);
            return Err(1);
        }
        return Ok(source);
    }
    match std::fs::read_to_string(path) {
        Ok(source) => Ok(source),
        Err(e) => {
            eprintln!("Error: cannot read file {}: {}", path.display(), e);
            Err(1)
        }
    }
}

fn parse_program(path: &PathBuf) -> Result<erwig_lang::command::Body, i32> {
    let source = read_source(path)?;
    let lines = split_source(&source);
    match StatementParser::new().parse(&lines) {
        Ok(program) => Ok(program),
        Err(e) => {
            eprintln!("Parse error: {}", e);
            Err(1)
        }
    }
}

fn cmd_parse(path: &PathBuf) -> i32 {
    let program = match parse_program(path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    for command in &program.commands {
        print!("{}", command);
    }
    0
}

fn cmd_run(path: &PathBuf, convention: CallConvention, mode: ScopeMode, json: bool) -> i32 {
    let program = match parse_program(path) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let mut engine = Engine::new(convention, mode);
    let result = engine.run(&program);

    for event in engine.events() {
        if json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    eprintln!("Error: cannot serialize trace event: {}", e);
                    return 1;
                }
            }
        } else {
            println!("{}", event);
        }
    }

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}
