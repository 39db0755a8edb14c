use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use dc_core::core::{DialogueId, DuplicateWarning};
use dc_store::{load_dialogue_sources, save_merged_dialogues};

use super::{ensure_distinct_output, heading, list_limited};

const MAX_LISTED_WARNINGS: usize = 10;

#[derive(Debug, Clone, clap::Args)]
pub struct MergeDialoguesArgs {
    /// Corpus files in priority order; the first occurrence of an id wins.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Also drop dialogues whose opening exchange repeats an earlier one.
    #[arg(long)]
    pub deduplicate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeDialoguesSummary {
    pub sources: usize,
    pub kept: usize,
    pub identity_duplicates: usize,
    pub content_duplicates: usize,
    pub excluded: Vec<DialogueId>,
    pub warnings: Vec<DuplicateWarning>,
}

pub fn merge_dialogues(args: &MergeDialoguesArgs) -> Result<MergeDialoguesSummary, anyhow::Error> {
    ensure_distinct_output(&args.output, args.files.iter().map(PathBuf::as_path))?;
    let merger = load_dialogue_sources(&args.files)?;
    let merged = merger.finish(args.deduplicate);
    let warnings = merged.warnings.clone();
    let excluded = merged.excluded.clone();

    let doc = save_merged_dialogues(&args.output, merged, Utc::now())
        .with_context(|| format!("writing merged corpus {}", args.output.display()))?;

    let identity_duplicates = warnings
        .iter()
        .filter(|w| matches!(w, DuplicateWarning::Identity { .. }))
        .count();
    let summary = MergeDialoguesSummary {
        sources: doc.source_files.len(),
        kept: doc.dialogues.len(),
        identity_duplicates,
        content_duplicates: warnings.len() - identity_duplicates,
        excluded,
        warnings,
    };
    tracing::info!(
        sources = summary.sources,
        kept = summary.kept,
        identity_duplicates = summary.identity_duplicates,
        content_duplicates = summary.content_duplicates,
        "dialogue sources merged"
    );
    Ok(summary)
}

pub fn render_merge_dialogues(
    args: &MergeDialoguesArgs,
    summary: &MergeDialoguesSummary,
) -> String {
    let mut out = String::new();
    heading(&mut out, "MERGE DIALOGUES");
    let _ = writeln!(out, "\nSources: {}", summary.sources);
    let _ = writeln!(out, "Kept dialogues: {}", summary.kept);
    let _ = writeln!(out, "Duplicate ids: {}", summary.identity_duplicates);
    if args.deduplicate {
        let _ = writeln!(out, "Duplicate content: {}", summary.content_duplicates);
    }
    if !summary.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        list_limited(&mut out, &summary.warnings, MAX_LISTED_WARNINGS, "warnings");
    }
    let _ = writeln!(out, "\nWritten to {}", args.output.display());
    out
}
