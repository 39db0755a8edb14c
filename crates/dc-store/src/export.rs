use std::collections::HashMap;

use dc_core::core::{
    labelable_items, Corpus, Dialogue, DialogueId, Intent, ItemId, LabelSet, ReviewStatus,
    RiskLevel, Sentiment, SessionId,
};
use serde::Serialize;

use crate::store::{AnnotationStore, StoreError};

// ---------------------------------------------------------------------------
// Training corpus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NotApproved { status: Option<ReviewStatus> },
    RiskMismatch { declared: RiskLevel, derived: RiskLevel },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDialogue {
    pub dialogue_id: DialogueId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSelection {
    pub dialogues: Vec<Dialogue>,
    pub skipped: Vec<SkippedDialogue>,
}

/// Keeps dialogues a clinician approved (and, with `include_revision`, those
/// marked for revision) whose declared `max_risk_level` matches the maximum
/// derived from their messages.
pub fn select_training_dialogues(
    dialogues: Vec<Dialogue>,
    include_revision: bool,
) -> TrainingSelection {
    let mut selection = TrainingSelection::default();

    for dialogue in dialogues {
        let labels = dialogue.labels.as_ref();
        let status = labels.and_then(|l| l.review_status);
        let accepted = match status {
            Some(ReviewStatus::Approved) => true,
            Some(ReviewStatus::NeedsRevision) => include_revision,
            _ => false,
        };
        if !accepted {
            selection.skipped.push(SkippedDialogue {
                dialogue_id: dialogue.id,
                reason: SkipReason::NotApproved { status },
            });
            continue;
        }

        let derived = dialogue.derived_max_risk();
        let declared = labels
            .and_then(|l| l.max_risk_level)
            .unwrap_or(RiskLevel::None);
        if declared != derived {
            tracing::warn!(
                dialogue = %dialogue.id,
                declared = %declared,
                derived = %derived,
                "risk level mismatch, dialogue left out of training export"
            );
            selection.skipped.push(SkippedDialogue {
                dialogue_id: dialogue.id,
                reason: SkipReason::RiskMismatch { declared, derived },
            });
            continue;
        }

        selection.dialogues.push(dialogue);
    }

    tracing::info!(
        exported = selection.dialogues.len(),
        skipped = selection.skipped.len(),
        include_revision,
        "training dialogues selected"
    );
    selection
}

// ---------------------------------------------------------------------------
// Labeled examples
// ---------------------------------------------------------------------------

/// One flat classifier training row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledExample {
    pub text: String,
    pub intent: Intent,
    pub sentiment: Sentiment,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledExamples {
    pub rows: Vec<LabeledExample>,
    /// Records whose item is not in the corpus.
    pub unknown_items: Vec<ItemId>,
    /// Records lacking one of the three dimensions.
    pub incomplete: Vec<ItemId>,
}

/// Joins label records against the text the annotator saw.
pub fn export_labeled_examples(corpus: &Corpus, set: &LabelSet) -> LabeledExamples {
    let texts: HashMap<ItemId, String> = labelable_items(corpus, true)
        .into_iter()
        .map(|item| (item.item_id, item.text))
        .collect();

    let mut out = LabeledExamples::default();
    for record in set.labels() {
        let Some(text) = texts.get(&record.item_id) else {
            out.unknown_items.push(record.item_id.clone());
            continue;
        };
        let (Some(intent), Some(sentiment), Some(risk_level)) =
            (record.intent, record.sentiment, record.risk_level)
        else {
            out.incomplete.push(record.item_id.clone());
            continue;
        };
        out.rows.push(LabeledExample {
            text: text.clone(),
            intent,
            sentiment,
            risk_level,
        });
    }

    tracing::info!(
        annotator = %set.annotator,
        rows = out.rows.len(),
        unknown = out.unknown_items.len(),
        incomplete = out.incomplete.len(),
        "labeled examples exported"
    );
    out
}

/// Same as [`export_labeled_examples`] for a pass kept in the annotation store.
pub fn export_labeled_examples_from_store(
    store: &dyn AnnotationStore,
    session_id: &SessionId,
    corpus: &Corpus,
) -> Result<LabeledExamples, StoreError> {
    let set = store.load_label_set(session_id)?;
    Ok(export_labeled_examples(corpus, &set))
}

/// One JSON object per line.
pub fn export_to_jsonl(rows: &[LabeledExample]) -> Result<String, StoreError> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}
