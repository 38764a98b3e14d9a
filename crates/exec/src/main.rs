//! Run a stack assembly program in the terminal.
//!
//! Usage: `stackasm <program> [--debug] [--break LINE]... [--config FILE]`

mod config;
mod host;
mod loader;
mod session;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::session::{Outcome, Session};

#[derive(Parser, Debug)]
#[command(name = "stackasm")]
#[command(about = "Run a stack assembly program, optionally one instruction at a time")]
struct Args {
    /// Path to the program
    program: PathBuf,

    /// Suspend before every instruction
    #[arg(short, long)]
    debug: bool,

    /// Suspend before the instruction on this zero-based line (repeatable)
    #[arg(short = 'b', long = "break", value_name = "LINE")]
    breakpoints: Vec<usize>,

    /// Configuration file (defaults to ./stackasm.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn init_logging(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(args: &Args, mut config: Config) -> anyhow::Result<Outcome> {
    config.apply_flags(args.debug, &args.breakpoints);

    let program = loader::load(&args.program)?;
    info!(program = %args.program.display(), debug = config.debug, "loaded");

    let mut session = Session::new(program, &config, io::stdin().lock(), io::stdout())?;
    session.run()
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logging depends on the configuration, so its errors are printed directly.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.log_filter());

    match run(&args, config) {
        Ok(Outcome::Finished | Outcome::Quit) => ExitCode::SUCCESS,
        Ok(Outcome::Failed(_)) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
