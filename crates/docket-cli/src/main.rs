//! Binary entry point for the Docket shell.
#![forbid(unsafe_code)]

mod render;
mod shell;

use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use docket_db::{Database, DbConfig};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::shell::{is_incomplete, Reply, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "docket",
    version,
    about = "Shell for a Docket database: scripts, documents and the operation profiler"
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "NAME", help = "Database name (overrides the config file)")]
    db: Option<String>,

    #[arg(long, value_name = "LEVEL", help = "Initial profiling level: 0, 1 or 2")]
    profile: Option<u8>,

    #[arg(long, value_name = "MS", help = "Slow-operation threshold for level 1")]
    slowms: Option<u64>,

    #[arg(long, value_name = "MS", help = "Evaluation time limit")]
    timeout_ms: Option<u64>,

    #[arg(long, value_name = "SCRIPT", help = "Evaluate one script and exit")]
    eval: Option<String>,

    #[arg(long, help = "Print script results as JSON outcomes")]
    json: bool,

    #[arg(
        long,
        default_value = "docket=info",
        help = "Log filter used when RUST_LOG is not set"
    )]
    log: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(default_filter: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let mut config = DbConfig::load_or_default(cli.config.as_deref())?;
    if let Some(name) = cli.db {
        config.name = name;
    }
    if let Some(level) = cli.profile {
        config.profiling_level = level;
    }
    if let Some(ms) = cli.slowms {
        config.slow_ms = ms;
    }
    if let Some(ms) = cli.timeout_ms {
        config.eval_timeout_ms = ms;
    }

    let db = Database::open(config)?;
    info!(
        db = db.name(),
        level = db.profiler().level().as_u8(),
        slow_ms = db.profiler().slow_ms(),
        "shell.started"
    );
    let color = std::io::stderr().is_terminal();
    let shell = Shell::new(db, color, cli.json);

    if let Some(script) = cli.eval {
        return Ok(match shell.execute(&script) {
            Ok(Reply::Output(text)) => {
                if !text.is_empty() {
                    println!("{text}");
                }
                ExitCode::SUCCESS
            }
            Ok(Reply::Quit) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        });
    }

    repl(&shell)?;
    Ok(ExitCode::SUCCESS)
}

fn repl(shell: &Shell) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    println!(
        "docket shell on database '{}'; type .help for commands",
        shell.db().name()
    );

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);
                if !buffer.trim_start().starts_with('.') && is_incomplete(&buffer) {
                    continue;
                }
                let input = std::mem::take(&mut buffer);
                if !input.trim().is_empty() {
                    editor.add_history_entry(input.as_str())?;
                }
                match shell.execute(&input) {
                    Ok(Reply::Output(text)) => {
                        if !text.is_empty() {
                            println!("{text}");
                        }
                    }
                    Ok(Reply::Quit) => break,
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) => buffer.clear(),
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
