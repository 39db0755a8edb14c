use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dc_cli::bootstrap::into_runtime;
use dc_cli::config::AppConfig;
use dc_cli::logging::init_tracing;

mod console;
mod label;
mod review;

#[derive(Debug, Parser)]
#[command(
    name = "dc-annotate",
    about = "Interactive labeling and clinician review for dialogue corpora"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Shared configuration file. Defaults to `dcurate.toml` when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Label assistant turns (or whole dialogues) one item at a time.
    Label(label::LabelArgs),
    /// Approve, send back or reject each dialogue of a corpus.
    Review(review::ReviewArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match AppConfig::load(cli.config.as_deref()).and_then(into_runtime) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", format!("Config invalid: {e:#}").red());
            return ExitCode::FAILURE;
        }
    };
    // Logs share the terminal with the prompts, so only warnings and up
    // unless RUST_LOG says otherwise.
    if let Err(e) = init_tracing("warn", runtime.log_format) {
        eprintln!("{}", format!("Error: {e:#}").red());
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Label(args) => label::run(args, &runtime),
        Command::Review(args) => review::run(args, &runtime),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "annotation session failed");
            eprintln!("{}", format!("Error: {e:#}").red());
            ExitCode::FAILURE
        }
    }
}
