use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dc_cli::bootstrap::{self, RuntimeConfig};
use dc_cli::commands::{dialogues, export, generate, labels, reviews, validate, Outcome};
use dc_cli::config::AppConfig;
use dc_cli::logging::init_tracing;
use dc_cli::outbound::external_generator;

#[derive(Parser)]
#[command(name = "dcurate", about = "Dialogue dataset curation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file. Defaults to ./dcurate.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate configuration and exit.
    CheckConfig,
    /// Validate a dialogue corpus.
    Validate(validate::ValidateArgs),
    /// Validate an annotator's label set.
    ValidateLabels(validate::ValidateLabelsArgs),
    /// Generate synthetic dialogues.
    Generate(generate::GenerateArgs),
    /// Grow a seed corpus to a target size with weighted synthetic dialogues.
    Expand(generate::ExpandArgs),
    /// Inter-annotator agreement over two or more label sets.
    Agreement(labels::AgreementArgs),
    /// Combine label sets into one label per item.
    MergeLabels(labels::MergeLabelsArgs),
    /// Write merged labels back into a corpus.
    AttachLabels(labels::AttachLabelsArgs),
    /// Record label-set files in the annotation store.
    ImportLabels(labels::ImportLabelsArgs),
    /// Export labeled items as classifier JSONL.
    ExportExamples(labels::ExportExamplesArgs),
    /// Apply clinician reviews and keep training-eligible dialogues.
    ApplyReviews(reviews::ApplyReviewsArgs),
    /// Merge dialogue corpora, dropping duplicates.
    MergeDialogues(dialogues::MergeDialoguesArgs),
    /// Export approved, risk-consistent dialogues for training.
    ExportTraining(export::ExportTrainingArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match AppConfig::load(cli.config.as_deref()).and_then(bootstrap::into_runtime) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Config invalid: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Command::CheckConfig = cli.command {
        match &cli.config {
            Some(path) => println!("Config valid: {}", path.display()),
            None => println!("Config valid"),
        }
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_tracing(&runtime.log_level, runtime.log_format) {
        eprintln!("Error initializing logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&runtime, cli.command).await {
        Ok((text, outcome)) => {
            print!("{text}");
            match outcome {
                Outcome::Passed => ExitCode::SUCCESS,
                Outcome::Failed => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn passed(text: String) -> Result<(String, Outcome), anyhow::Error> {
    Ok((text, Outcome::Passed))
}

async fn run(
    runtime: &RuntimeConfig,
    command: Command,
) -> Result<(String, Outcome), anyhow::Error> {
    match command {
        Command::CheckConfig => passed(String::new()),
        Command::Validate(args) => {
            let report = validate::validate_corpus(runtime, &args)?;
            Ok((
                validate::render_validation_report(&args.input, &report),
                Outcome::from_valid(report.valid),
            ))
        }
        Command::ValidateLabels(args) => {
            let report = validate::validate_labels(&args)?;
            Ok((
                validate::render_label_report(&args.input, &report),
                Outcome::from_valid(report.valid),
            ))
        }
        Command::Generate(args) => {
            let external = match &runtime.external {
                Some(settings) if !args.no_external => Some(external_generator(settings)?),
                _ => None,
            };
            let corpus = generate::generate(runtime, &args, external).await?;
            passed(generate::render_generation(&args, &corpus))
        }
        Command::Expand(args) => {
            let external = match &runtime.external {
                Some(settings) if !args.no_external => Some(external_generator(settings)?),
                _ => None,
            };
            let summary = generate::expand(runtime, &args, external).await?;
            passed(generate::render_expansion(&args, &summary))
        }
        Command::Agreement(args) => {
            let report = labels::agreement(runtime, &args)?;
            passed(labels::render_agreement(&report, &runtime.kappa_bands))
        }
        Command::MergeLabels(args) => {
            let doc = labels::merge_label_files(&args)?;
            passed(labels::render_merged_labels(&args, &doc))
        }
        Command::AttachLabels(args) => {
            let outcome = labels::attach_label_file(&args)?;
            passed(labels::render_attach(&outcome))
        }
        Command::ImportLabels(args) => {
            let summary = labels::import_labels(runtime, &args)?;
            passed(labels::render_import(&summary, &runtime.database))
        }
        Command::ExportExamples(args) => {
            let examples = labels::export_examples(runtime, &args)?;
            passed(labels::render_examples(&args, &examples))
        }
        Command::ApplyReviews(args) => {
            let doc = reviews::apply_reviews(&args)?;
            passed(reviews::render_adjudication(&args, &doc))
        }
        Command::MergeDialogues(args) => {
            let summary = dialogues::merge_dialogues(&args)?;
            passed(dialogues::render_merge_dialogues(&args, &summary))
        }
        Command::ExportTraining(args) => {
            let summary = export::export_training(&args)?;
            passed(export::render_training_export(&args, &summary))
        }
    }
}
