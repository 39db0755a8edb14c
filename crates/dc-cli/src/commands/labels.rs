use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use dc_core::core::{
    attach_labels, merge_labels, validate_label_set, AgreementCalculator, AgreementReport,
    AttachOutcome, KappaBands, LabelSet, MergeStrategy, SessionId,
};
use dc_store::{
    export_labeled_examples, export_to_jsonl, load_corpus, load_label_set, load_merged_labels,
    persist_label_set, save_corpus, save_merged_labels, write_atomic, write_json_atomic,
    AnnotationStore, LabeledExamples, MergedLabelDocument, SqliteAnnotationStore,
};

use super::{ensure_distinct_output, heading, list_limited};
use crate::bootstrap::RuntimeConfig;

const MAX_LISTED_ITEMS: usize = 10;

fn load_label_sets(paths: &[PathBuf]) -> Result<Vec<LabelSet>, anyhow::Error> {
    paths
        .iter()
        .map(|path| {
            load_label_set(path).with_context(|| format!("reading label set {}", path.display()))
        })
        .collect()
}

fn open_store(runtime: &RuntimeConfig) -> Result<SqliteAnnotationStore, anyhow::Error> {
    let store = SqliteAnnotationStore::new(&runtime.database)
        .with_context(|| format!("opening annotation store {}", runtime.database.display()))?;
    store.init()?;
    Ok(store)
}

// ---------------------------------------------------------------------------
// agreement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, clap::Args)]
pub struct AgreementArgs {
    /// Label-set files, one per annotator (at least two).
    #[arg(required = true, num_args = 2..)]
    pub files: Vec<PathBuf>,

    /// Also write the report as JSON.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn agreement(
    runtime: &RuntimeConfig,
    args: &AgreementArgs,
) -> Result<AgreementReport, anyhow::Error> {
    let sets = load_label_sets(&args.files)?;
    let report = AgreementCalculator::new(runtime.kappa_bands).calculate(&sets)?;
    if let Some(output) = &args.output {
        write_json_atomic(output, &report)
            .with_context(|| format!("writing agreement report {}", output.display()))?;
        tracing::debug!(output = %output.display(), "agreement report written");
    }
    Ok(report)
}

pub fn render_agreement(report: &AgreementReport, bands: &KappaBands) -> String {
    let mut out = String::new();
    heading(&mut out, "INTER-ANNOTATOR AGREEMENT REPORT");
    let _ = writeln!(out, "\nLabel sets: {}", report.label_sets);
    let _ = writeln!(out, "Common items: {}", report.common_items);

    for dimension in &report.dimensions {
        let _ = writeln!(out, "\n{}:", dimension.dimension.as_str().to_uppercase());
        let _ = writeln!(
            out,
            "  Average exact agreement: {:.1}%",
            dimension.average_exact_agreement * 100.0
        );
        match (dimension.average_kappa, dimension.level) {
            (Some(kappa), Some(level)) => {
                let _ = writeln!(out, "  Average Cohen's kappa: {kappa:.3} ({level})");
            }
            _ => {
                let _ = writeln!(out, "  Average Cohen's kappa: n/a");
            }
        }
        for pair in &dimension.pairwise {
            let kappa = pair
                .kappa
                .map_or_else(|| "n/a".to_owned(), |k| format!("{k:.3}"));
            let _ = writeln!(
                out,
                "    {} vs {}: agreement {:.1}%, kappa {kappa}",
                pair.first_annotator,
                pair.second_annotator,
                pair.exact_agreement * 100.0
            );
        }
    }

    let [slight, fair, moderate, substantial, almost] = bands.0;
    let _ = writeln!(out, "\nInterpretation:");
    let _ = writeln!(out, "  < {slight:.2}: poor");
    let _ = writeln!(out, "  {slight:.2}-{fair:.2}: slight");
    let _ = writeln!(out, "  {fair:.2}-{moderate:.2}: fair");
    let _ = writeln!(out, "  {moderate:.2}-{substantial:.2}: moderate");
    let _ = writeln!(out, "  {substantial:.2}-{almost:.2}: substantial");
    let _ = writeln!(out, "  >= {almost:.2}: almost perfect");
    out
}

// ---------------------------------------------------------------------------
// merge-labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyArg {
    Majority,
    Consensus,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Majority => MergeStrategy::Majority,
            StrategyArg::Consensus => MergeStrategy::Consensus,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct MergeLabelsArgs {
    /// Label-set files to combine.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = StrategyArg::Majority)]
    pub strategy: StrategyArg,
}

pub fn merge_label_files(args: &MergeLabelsArgs) -> Result<MergedLabelDocument, anyhow::Error> {
    let sets = load_label_sets(&args.files)?;
    let strategy = MergeStrategy::from(args.strategy);
    let outcome = merge_labels(&sets, strategy, Utc::now());
    let sources = args.files.iter().map(|p| p.display().to_string()).collect();
    let doc = MergedLabelDocument::new(strategy, sources, outcome);
    save_merged_labels(&args.output, &doc)
        .with_context(|| format!("writing merged labels {}", args.output.display()))?;
    tracing::info!(
        strategy = %strategy,
        merged = doc.total_labels,
        dropped = doc.dropped.len(),
        "label sets merged"
    );
    Ok(doc)
}

pub fn render_merged_labels(args: &MergeLabelsArgs, doc: &MergedLabelDocument) -> String {
    let mut out = String::new();
    heading(&mut out, "LABEL MERGE");
    let _ = writeln!(out, "\nStrategy: {}", doc.strategy);
    let _ = writeln!(out, "Sources: {}", doc.source_files.len());
    let _ = writeln!(out, "Merged labels: {}", doc.total_labels);
    let consensus = doc.labels.iter().filter(|label| label.consensus).count();
    let _ = writeln!(out, "Full consensus: {consensus}");
    if !doc.dropped.is_empty() {
        let _ = writeln!(out, "\nDropped ({}):", doc.dropped.len());
        let dropped: Vec<String> = doc
            .dropped
            .iter()
            .map(|item| {
                let dims: Vec<&str> = item.disagreements.iter().map(|d| d.as_str()).collect();
                format!("{} (disagreement on {})", item.item_id, dims.join(", "))
            })
            .collect();
        list_limited(&mut out, &dropped, MAX_LISTED_ITEMS, "items");
    }
    let _ = writeln!(out, "\nWritten to {}", args.output.display());
    out
}

// ---------------------------------------------------------------------------
// attach-labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, clap::Args)]
pub struct AttachLabelsArgs {
    /// Corpus to annotate.
    pub corpus: PathBuf,

    /// Merged label file.
    pub labels: PathBuf,

    /// Output corpus file; must differ from the input corpus.
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn attach_label_file(args: &AttachLabelsArgs) -> Result<AttachOutcome, anyhow::Error> {
    ensure_distinct_output(&args.output, [args.corpus.as_path(), args.labels.as_path()])?;
    let mut corpus = load_corpus(&args.corpus)
        .with_context(|| format!("reading corpus {}", args.corpus.display()))?;
    let merged = load_merged_labels(&args.labels)
        .with_context(|| format!("reading merged labels {}", args.labels.display()))?;
    let outcome = attach_labels(&mut corpus, &merged.labels);
    save_corpus(&args.output, corpus)
        .with_context(|| format!("writing corpus {}", args.output.display()))?;
    Ok(outcome)
}

pub fn render_attach(outcome: &AttachOutcome) -> String {
    let mut out = String::new();
    heading(&mut out, "ATTACH LABELS");
    let _ = writeln!(out, "\nApplied labels: {}", outcome.applied);
    let _ = writeln!(out, "Updated dialogues: {}", outcome.updated_dialogues);
    if !outcome.unknown_items.is_empty() {
        let _ = writeln!(out, "\nUnknown items ({}):", outcome.unknown_items.len());
        list_limited(&mut out, &outcome.unknown_items, MAX_LISTED_ITEMS, "items");
    }
    if !outcome.risk_conflicts.is_empty() {
        let _ = writeln!(out, "\nRisk conflicts ({}):", outcome.risk_conflicts.len());
        let conflicts: Vec<String> = outcome
            .risk_conflicts
            .iter()
            .map(|c| {
                format!(
                    "{}: labeled {}, messages say {}",
                    c.dialogue_id, c.labeled, c.derived
                )
            })
            .collect();
        list_limited(&mut out, &conflicts, MAX_LISTED_ITEMS, "conflicts");
    }
    out
}

// ---------------------------------------------------------------------------
// import-labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, clap::Args)]
pub struct ImportLabelsArgs {
    /// Label-set files to record in the annotation store.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    pub imported: Vec<(SessionId, usize)>,
    /// Passes the store already holds.
    pub skipped: Vec<SessionId>,
}

pub fn import_labels(
    runtime: &RuntimeConfig,
    args: &ImportLabelsArgs,
) -> Result<ImportSummary, anyhow::Error> {
    let store = open_store(runtime)?;
    import_into(&store, &args.files)
}

pub fn import_into(
    store: &dyn AnnotationStore,
    files: &[PathBuf],
) -> Result<ImportSummary, anyhow::Error> {
    let mut summary = ImportSummary::default();
    for set in load_label_sets(files)? {
        if store.get_label_pass(&set.session_id)?.is_some() {
            tracing::warn!(session = %set.session_id, "label pass already stored, skipping");
            summary.skipped.push(set.session_id);
            continue;
        }
        let started_at = set
            .labels()
            .iter()
            .map(|record| record.labeled_at)
            .min()
            .unwrap_or_else(Utc::now);
        persist_label_set(store, &set, started_at, Utc::now())?;
        summary.imported.push((set.session_id.clone(), set.len()));
    }
    Ok(summary)
}

pub fn render_import(summary: &ImportSummary, database: &Path) -> String {
    let mut out = String::new();
    heading(&mut out, "IMPORT LABELS");
    let _ = writeln!(out, "\nStore: {}", database.display());
    for (session, count) in &summary.imported {
        let _ = writeln!(out, "  + {session}: {count} labels");
    }
    for session in &summary.skipped {
        let _ = writeln!(out, "  = {session}: already stored");
    }
    out
}

// ---------------------------------------------------------------------------
// export-examples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, clap::Args)]
pub struct ExportExamplesArgs {
    /// Corpus the labels refer to.
    pub corpus: PathBuf,

    /// Label-set file.
    #[arg(long, conflicts_with = "session", required_unless_present = "session")]
    pub labels: Option<PathBuf>,

    /// Label pass kept in the annotation store.
    #[arg(long)]
    pub session: Option<String>,

    /// Output JSONL file.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Export even when the label set fails validation.
    #[arg(long)]
    pub allow_invalid: bool,
}

pub fn export_examples(
    runtime: &RuntimeConfig,
    args: &ExportExamplesArgs,
) -> Result<LabeledExamples, anyhow::Error> {
    let corpus = load_corpus(&args.corpus)
        .with_context(|| format!("reading corpus {}", args.corpus.display()))?;
    let set = match (&args.labels, &args.session) {
        (Some(path), _) => {
            load_label_set(path).with_context(|| format!("reading label set {}", path.display()))?
        }
        (None, Some(session)) => {
            let store = open_store(runtime)?;
            store.load_label_set(&SessionId::new(session.as_str()))?
        }
        (None, None) => bail!("either --labels or --session is required"),
    };

    let report = validate_label_set(&set);
    if !report.valid {
        if !args.allow_invalid {
            bail!(
                "label set has {} validation errors; fix them or pass --allow-invalid",
                report.errors.len()
            );
        }
        tracing::warn!(errors = report.errors.len(), "exporting an invalid label set");
    }

    let examples = export_labeled_examples(&corpus, &set);
    let jsonl = export_to_jsonl(&examples.rows)?;
    write_atomic(&args.output, jsonl.as_bytes())
        .with_context(|| format!("writing examples {}", args.output.display()))?;
    Ok(examples)
}

pub fn render_examples(args: &ExportExamplesArgs, examples: &LabeledExamples) -> String {
    let mut out = String::new();
    heading(&mut out, "EXPORT LABELED EXAMPLES");
    let _ = writeln!(
        out,
        "\nExported {} examples -> {}",
        examples.rows.len(),
        args.output.display()
    );
    if !examples.unknown_items.is_empty() {
        let _ = writeln!(out, "\nUnknown items ({}):", examples.unknown_items.len());
        list_limited(&mut out, &examples.unknown_items, MAX_LISTED_ITEMS, "items");
    }
    if !examples.incomplete.is_empty() {
        let _ = writeln!(out, "\nIncomplete labels ({}):", examples.incomplete.len());
        list_limited(&mut out, &examples.incomplete, MAX_LISTED_ITEMS, "items");
    }
    out
}
