//! Interactive REPL and script runner for the kappa Scheme runtime.
//!
//! Multi-line input works through the reader's `Incomplete` signal: an
//! unfinished expression keeps accumulating lines under a continuation
//! prompt instead of erroring.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use kappa::builtins;
use kappa::env::Env;
use kappa::eval;
use kappa::reader::Reader;
use kappa::value::Value;
use kappa::ReadErrorKind;

/// A small Scheme with proper tail calls and first-class continuations.
#[derive(Parser)]
#[command(name = "kappa", version, about)]
struct Cli {
    /// Script files evaluated against the global environment, in order
    files: Vec<PathBuf>,

    /// Evaluate the given files and exit without starting a REPL
    #[arg(long)]
    no_repl: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = builtins::global_env();

    for path in &cli.files {
        let source = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                process::exit(1);
            }
        };
        if let Err(e) = eval::load(&source, &env) {
            eprintln!("{}: {e}", path.display());
            process::exit(1);
        }
    }

    if !cli.no_repl {
        run_repl(&env);
    }
}

fn run_repl(env: &Env) {
    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("could not initialize line editing: {e}");
            process::exit(1);
        }
    };

    println!("kappa scheme repl");
    println!("Enter expressions like (+ 1 2); Ctrl+D exits.");

    let mut reader = Reader::new();
    loop {
        let prompt = if reader.has_pending() { "  ...> " } else { "kappa> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                reader.push(&line);
                reader.push("\n");
                drain_datums(&mut reader, env);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("input error: {e}");
                break;
            }
        }
    }
}

/// Evaluate every complete datum buffered so far; leave a trailing
/// incomplete expression in place for the next line.
fn drain_datums(reader: &mut Reader, env: &Env) {
    loop {
        match reader.next_datum() {
            Ok(Some(expr)) => match eval::evaluate(&expr, env) {
                Ok(Value::Void) => {}
                Ok(result) => println!("{result}"),
                Err(e) => println!("{e}"),
            },
            Ok(None) => break,
            Err(e) if e.kind == ReadErrorKind::Incomplete => break,
            Err(e) => {
                println!("{e}");
                reader.clear();
                break;
            }
        }
    }
}
