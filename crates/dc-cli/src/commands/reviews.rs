use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use dc_core::core::{adjudicate, CorpusStatistics, CORPUS_VERSION};
use dc_store::{load_corpus, load_reviews, write_json_atomic, AdjudicatedCorpusDocument};

use super::{ensure_distinct_output, heading};

#[derive(Debug, Clone, clap::Args)]
pub struct ApplyReviewsArgs {
    /// Corpus the reviews refer to.
    pub corpus: PathBuf,

    /// Review file written by the annotation tool.
    pub reviews: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Keep dialogues marked needs_revision in the output.
    #[arg(long)]
    pub include_revision: bool,
}

/// Applies clinician verdicts and writes the training-eligible dialogues.
pub fn apply_reviews(args: &ApplyReviewsArgs) -> Result<AdjudicatedCorpusDocument, anyhow::Error> {
    ensure_distinct_output(&args.output, [args.corpus.as_path(), args.reviews.as_path()])?;
    let corpus = load_corpus(&args.corpus)
        .with_context(|| format!("reading corpus {}", args.corpus.display()))?;
    let reviews = load_reviews(&args.reviews)
        .with_context(|| format!("reading reviews {}", args.reviews.display()))?;

    let total_dialogues = corpus.dialogues.len();
    let adjudication = adjudicate(corpus.dialogues, &reviews, args.include_revision);
    let counts = adjudication.counts();
    let dialogues = adjudication.training_eligible();
    let statistics = CorpusStatistics::from_dialogues(&dialogues);

    let doc = AdjudicatedCorpusDocument {
        version: CORPUS_VERSION.to_owned(),
        description: "Clinician-reviewed training dialogues".to_owned(),
        source_file: args.corpus.display().to_string(),
        reviews_file: args.reviews.display().to_string(),
        include_revision: args.include_revision,
        total_dialogues,
        counts,
        dialogues,
        statistics: Some(statistics),
    };
    write_json_atomic(&args.output, &doc)
        .with_context(|| format!("writing reviewed corpus {}", args.output.display()))?;

    tracing::info!(
        output = %args.output.display(),
        exported = doc.dialogues.len(),
        "reviewed corpus written"
    );
    Ok(doc)
}

pub fn render_adjudication(args: &ApplyReviewsArgs, doc: &AdjudicatedCorpusDocument) -> String {
    let mut out = String::new();
    heading(&mut out, "APPLY CLINICIAN REVIEWS");
    let _ = writeln!(out, "\nTotal dialogues: {}", doc.total_dialogues);
    let _ = writeln!(out, "  Approved: {}", doc.counts.approved);
    let _ = writeln!(out, "  Needs revision: {}", doc.counts.needs_revision);
    let _ = writeln!(out, "  Rejected: {}", doc.counts.rejected);
    let _ = writeln!(out, "  Unreviewed: {}", doc.counts.unreviewed);
    let _ = writeln!(
        out,
        "\nExported {} dialogues -> {}",
        doc.dialogues.len(),
        args.output.display()
    );
    out
}
