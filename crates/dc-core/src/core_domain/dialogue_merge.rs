use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::core::{Dialogue, DialogueId};

// ---------------------------------------------------------------------------
// DuplicateWarning
// ---------------------------------------------------------------------------

/// A dialogue dropped because an earlier one already covers it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuplicateWarning {
    /// Same `dialogue_id` seen in an earlier source.
    Identity {
        dialogue_id: DialogueId,
        source: String,
    },
    /// Same opening exchange as an earlier dialogue.
    Content {
        dialogue_id: DialogueId,
        kept: DialogueId,
    },
}

impl fmt::Display for DuplicateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateWarning::Identity {
                dialogue_id,
                source,
            } => write!(f, "duplicate dialogue id {dialogue_id} in {source}"),
            DuplicateWarning::Content { dialogue_id, kept } => {
                write!(f, "dialogue {dialogue_id} duplicates the content of {kept}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DialogueMerger
// ---------------------------------------------------------------------------

/// Accumulates dialogues from several sources; the first occurrence of an
/// id wins.
#[derive(Debug, Default)]
pub struct DialogueMerger {
    dialogues: Vec<Dialogue>,
    seen: HashSet<DialogueId>,
    sources: Vec<String>,
    warnings: Vec<DuplicateWarning>,
}

impl DialogueMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one source's dialogues and returns how many were kept.
    pub fn add_source(&mut self, source: impl Into<String>, dialogues: Vec<Dialogue>) -> usize {
        let source = source.into();
        let mut kept = 0;
        for dialogue in dialogues {
            if !self.seen.insert(dialogue.id.clone()) {
                tracing::warn!(
                    dialogue = %dialogue.id,
                    source = %source,
                    "duplicate dialogue id dropped"
                );
                self.warnings.push(DuplicateWarning::Identity {
                    dialogue_id: dialogue.id,
                    source: source.clone(),
                });
                continue;
            }
            self.dialogues.push(dialogue);
            kept += 1;
        }
        tracing::info!(source = %source, kept, "dialogue source loaded");
        self.sources.push(source);
        kept
    }

    pub fn dialogues(&self) -> &[Dialogue] {
        &self.dialogues
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn warnings(&self) -> &[DuplicateWarning] {
        &self.warnings
    }

    /// Merged dialogues, optionally content-deduplicated, with every warning
    /// raised along the way.
    pub fn finish(self, deduplicate_content: bool) -> MergedDialogues {
        let mut warnings = self.warnings;
        let (dialogues, excluded) = if deduplicate_content {
            let outcome = deduplicate(self.dialogues);
            warnings.extend(outcome.duplicates);
            (outcome.dialogues, outcome.excluded)
        } else {
            (self.dialogues, Vec::new())
        };
        MergedDialogues {
            dialogues,
            sources: self.sources,
            warnings,
            excluded,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergedDialogues {
    pub dialogues: Vec<Dialogue>,
    pub sources: Vec<String>,
    pub warnings: Vec<DuplicateWarning>,
    /// Dialogues too short to fingerprint.
    pub excluded: Vec<DialogueId>,
}

// ---------------------------------------------------------------------------
// Content deduplication
// ---------------------------------------------------------------------------

/// `"<first text>|<second text>"`, lower-cased and trimmed; `None` for
/// dialogues with fewer than two messages.
pub fn content_fingerprint(dialogue: &Dialogue) -> Option<String> {
    match dialogue.messages.as_slice() {
        [first, second, ..] => Some(format!(
            "{}|{}",
            first.text.trim().to_lowercase(),
            second.text.trim().to_lowercase()
        )),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DedupOutcome {
    pub dialogues: Vec<Dialogue>,
    pub duplicates: Vec<DuplicateWarning>,
    pub excluded: Vec<DialogueId>,
}

/// Keeps the first dialogue per content fingerprint. Dialogues that cannot
/// be fingerprinted are left out.
pub fn deduplicate(dialogues: Vec<Dialogue>) -> DedupOutcome {
    let mut kept_by_fingerprint: HashMap<String, DialogueId> = HashMap::new();
    let mut outcome = DedupOutcome::default();

    for dialogue in dialogues {
        let Some(fingerprint) = content_fingerprint(&dialogue) else {
            outcome.excluded.push(dialogue.id);
            continue;
        };
        if let Some(kept) = kept_by_fingerprint.get(&fingerprint) {
            tracing::warn!(
                dialogue = %dialogue.id,
                kept = %kept,
                "duplicate dialogue content dropped"
            );
            outcome.duplicates.push(DuplicateWarning::Content {
                dialogue_id: dialogue.id,
                kept: kept.clone(),
            });
            continue;
        }
        kept_by_fingerprint.insert(fingerprint, dialogue.id.clone());
        outcome.dialogues.push(dialogue);
    }

    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
