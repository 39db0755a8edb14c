use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use dc_core::core::Corpus;
use dc_store::{load_corpus, save_corpus, select_training_dialogues, SkipReason, SkippedDialogue};

use super::{ensure_distinct_output, heading, list_limited};

const MAX_LISTED_SKIPS: usize = 10;

#[derive(Debug, Clone, clap::Args)]
pub struct ExportTrainingArgs {
    /// Reviewed corpus (dialogues carry a review status).
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Also export dialogues marked needs_revision.
    #[arg(long)]
    pub include_revision: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExport {
    pub exported: usize,
    pub skipped: Vec<SkippedDialogue>,
}

pub fn export_training(args: &ExportTrainingArgs) -> Result<TrainingExport, anyhow::Error> {
    ensure_distinct_output(&args.output, [args.input.as_path()])?;
    let corpus = load_corpus(&args.input)
        .with_context(|| format!("reading corpus {}", args.input.display()))?;
    let selection = select_training_dialogues(corpus.dialogues, args.include_revision);
    let exported = selection.dialogues.len();
    save_corpus(
        &args.output,
        Corpus::new(
            format!("Training dialogues ({exported} examples)"),
            selection.dialogues,
        ),
    )
    .with_context(|| format!("writing training corpus {}", args.output.display()))?;
    Ok(TrainingExport {
        exported,
        skipped: selection.skipped,
    })
}

pub fn render_training_export(args: &ExportTrainingArgs, export: &TrainingExport) -> String {
    let mut out = String::new();
    heading(&mut out, "EXPORT TRAINING DIALOGUES");
    let _ = writeln!(
        out,
        "\nExported {} dialogues -> {}",
        export.exported,
        args.output.display()
    );
    if !export.skipped.is_empty() {
        let _ = writeln!(out, "\nSkipped ({}):", export.skipped.len());
        let lines: Vec<String> = export
            .skipped
            .iter()
            .map(|skip| match skip.reason {
                SkipReason::NotApproved { status: Some(status) } => {
                    format!("{}: {status}", skip.dialogue_id)
                }
                SkipReason::NotApproved { status: None } => {
                    format!("{}: not reviewed", skip.dialogue_id)
                }
                SkipReason::RiskMismatch { declared, derived } => format!(
                    "{}: max_risk_level {declared} but messages reach {derived}",
                    skip.dialogue_id
                ),
            })
            .collect();
        list_limited(&mut out, &lines, MAX_LISTED_SKIPS, "dialogues");
    }
    out
}
