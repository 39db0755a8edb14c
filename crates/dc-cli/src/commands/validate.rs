use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use dc_core::core::{validate_label_set, DialogueValidator, LabelSetReport, ValidationReport};
use dc_store::{load_label_set, load_raw_corpus};

use super::{distribution, heading, list_limited};
use crate::bootstrap::RuntimeConfig;

const MAX_LISTED_ERRORS: usize = 20;
const MAX_LISTED_WARNINGS: usize = 10;

#[derive(Debug, Clone, clap::Args)]
pub struct ValidateArgs {
    /// Corpus JSON file.
    pub input: PathBuf,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ValidateLabelsArgs {
    /// Label-set JSON file.
    pub input: PathBuf,
}

// ---------------------------------------------------------------------------
// Corpus validation
// ---------------------------------------------------------------------------

pub fn validate_corpus(
    runtime: &RuntimeConfig,
    args: &ValidateArgs,
) -> Result<ValidationReport, anyhow::Error> {
    let raw = load_raw_corpus(&args.input)
        .with_context(|| format!("reading corpus {}", args.input.display()))?;
    let report = DialogueValidator::new(runtime.thresholds).validate(&raw);
    tracing::info!(
        file = %args.input.display(),
        valid = report.valid,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "corpus validated"
    );
    Ok(report)
}

pub fn render_validation_report(path: &Path, report: &ValidationReport) -> String {
    let mut out = String::new();
    heading(&mut out, "DIALOGUE VALIDATION REPORT");
    let _ = writeln!(out, "\nFile: {}", path.display());
    let _ = writeln!(out, "Total Dialogues: {}", report.stats.total_dialogues);

    if report.errors.is_empty() {
        let _ = writeln!(out, "\nNo errors found");
    } else {
        let _ = writeln!(out, "\nERRORS ({}):", report.errors.len());
        list_limited(&mut out, &report.errors, MAX_LISTED_ERRORS, "errors");
    }

    if report.warnings.is_empty() {
        let _ = writeln!(out, "\nNo warnings");
    } else {
        let _ = writeln!(out, "\nWARNINGS ({}):", report.warnings.len());
        list_limited(&mut out, &report.warnings, MAX_LISTED_WARNINGS, "warnings");
    }

    let _ = writeln!(out, "\nSTATISTICS:");
    distribution(&mut out, "Session Type Distribution", &report.stats.session_types);
    distribution(&mut out, "Concern Distribution", &report.stats.concerns);
    distribution(&mut out, "Intent Distribution", &report.stats.intents);
    distribution(&mut out, "Risk Level Distribution", &report.stats.risk_levels);
    let _ = writeln!(
        out,
        "\nAverage Messages per Dialogue: {:.1}",
        report.stats.avg_messages_per_dialogue
    );
    let _ = writeln!(out, "\nResult: {}", if report.valid { "VALID" } else { "INVALID" });
    out
}

// ---------------------------------------------------------------------------
// Label-set validation
// ---------------------------------------------------------------------------

pub fn validate_labels(args: &ValidateLabelsArgs) -> Result<LabelSetReport, anyhow::Error> {
    let set = load_label_set(&args.input)
        .with_context(|| format!("reading label set {}", args.input.display()))?;
    let report = validate_label_set(&set);
    tracing::info!(
        file = %args.input.display(),
        annotator = %set.annotator,
        valid = report.valid,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "label set validated"
    );
    Ok(report)
}

pub fn render_label_report(path: &Path, report: &LabelSetReport) -> String {
    let mut out = String::new();
    heading(&mut out, "LABEL VALIDATION REPORT");
    let _ = writeln!(out, "\nFile: {}", path.display());
    let _ = writeln!(out, "Total Labels: {}", report.total);

    if !report.errors.is_empty() {
        let _ = writeln!(out, "\nERRORS ({}):", report.errors.len());
        list_limited(&mut out, &report.errors, MAX_LISTED_ERRORS, "errors");
    }
    if !report.warnings.is_empty() {
        let _ = writeln!(out, "\nWARNINGS ({}):", report.warnings.len());
        list_limited(&mut out, &report.warnings, MAX_LISTED_WARNINGS, "warnings");
    }

    distribution(&mut out, "Intent Distribution", &report.intents);
    distribution(&mut out, "Sentiment Distribution", &report.sentiments);
    distribution(&mut out, "Risk Level Distribution", &report.risk_levels);
    let _ = writeln!(out, "\nResult: {}", if report.valid { "VALID" } else { "INVALID" });
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dc_core::core::{
        CorpusStatistics, IssueKind, IssueLocation, ValidationIssue, ValidationReport,
    };

    use super::*;

    #[test]
    fn test_render_lists_errors_and_shares() {
        let errors: Vec<ValidationIssue> = (0..25)
            .map(|i| {
                ValidationIssue::new(IssueLocation::Dialogue(i), "session_type", IssueKind::Missing)
            })
            .collect();
        let mut session_types = BTreeMap::new();
        session_types.insert("check-in".to_owned(), 3);
        session_types.insert("gentle_deep".to_owned(), 1);
        let report = ValidationReport {
            valid: false,
            errors,
            warnings: Vec::new(),
            stats: CorpusStatistics {
                total_dialogues: 4,
                session_types,
                ..CorpusStatistics::default()
            },
        };

        let text = render_validation_report(Path::new("seed.json"), &report);
        assert!(text.contains("ERRORS (25):"));
        assert!(text.contains("  - Dialogue 1: Missing 'session_type'"));
        assert!(text.contains("... and 5 more errors"));
        assert!(text.contains("No warnings"));
        assert!(text.contains("check-in: 3 (75.0%)"));
        assert!(text.contains("Result: INVALID"));
    }
}
