use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Dialogue, DialogueId, ReviewError, ReviewStatus};

pub const DEFAULT_REVIEWER: &str = "clinician";

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

/// A clinician's verdict on one dialogue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub dialogue_id: DialogueId,
    pub status: ReviewStatus,
    pub reviewed_at: DateTime<Utc>,
    #[serde(default = "default_reviewer")]
    pub reviewer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<ReviewNote>,
}

fn default_reviewer() -> String {
    DEFAULT_REVIEWER.to_owned()
}

// ---------------------------------------------------------------------------
// Adjudication
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicationCounts {
    pub approved: usize,
    pub needs_revision: usize,
    pub rejected: usize,
    pub unreviewed: usize,
}

/// A partition of a corpus by review outcome.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjudication {
    pub approved: Vec<Dialogue>,
    pub needs_revision: Vec<Dialogue>,
    pub rejected: Vec<Dialogue>,
    pub unreviewed: Vec<Dialogue>,
}

impl Adjudication {
    pub fn counts(&self) -> AdjudicationCounts {
        AdjudicationCounts {
            approved: self.approved.len(),
            needs_revision: self.needs_revision.len(),
            rejected: self.rejected.len(),
            unreviewed: self.unreviewed.len(),
        }
    }

    /// Dialogues usable for training: approved, then any kept for revision.
    pub fn training_eligible(self) -> Vec<Dialogue> {
        let mut dialogues = self.approved;
        dialogues.extend(self.needs_revision);
        dialogues
    }
}

/// Applies reviews to dialogues. When a dialogue has several reviews the
/// last one counts. `needs_revision` dialogues land in their own bucket only
/// with `include_revision`; otherwise they count as rejected.
pub fn adjudicate(
    dialogues: Vec<Dialogue>,
    reviews: &[Review],
    include_revision: bool,
) -> Adjudication {
    let latest: HashMap<&DialogueId, &Review> =
        reviews.iter().map(|r| (&r.dialogue_id, r)).collect();

    let mut outcome = Adjudication::default();
    for mut dialogue in dialogues {
        let Some(review) = latest.get(&dialogue.id) else {
            outcome.unreviewed.push(dialogue);
            continue;
        };

        match review.status {
            ReviewStatus::Approved => {
                let labels = dialogue.labels_mut();
                labels.clinician_reviewed = Some(true);
                labels.clinician_approved = Some(true);
                labels.review_status = Some(ReviewStatus::Approved);
                labels.reviewed_at = Some(review.reviewed_at);
                outcome.approved.push(dialogue);
            }
            ReviewStatus::NeedsRevision if include_revision => {
                let labels = dialogue.labels_mut();
                labels.clinician_reviewed = Some(true);
                labels.clinician_approved = Some(false);
                labels.review_status = Some(ReviewStatus::NeedsRevision);
                labels.reviewed_at = Some(review.reviewed_at);
                outcome.needs_revision.push(dialogue);
            }
            ReviewStatus::NeedsRevision | ReviewStatus::Rejected => {
                outcome.rejected.push(dialogue);
            }
        }
    }

    let counts = outcome.counts();
    tracing::info!(
        approved = counts.approved,
        needs_revision = counts.needs_revision,
        rejected = counts.rejected,
        unreviewed = counts.unreviewed,
        include_revision,
        "reviews applied"
    );
    outcome
}

// ---------------------------------------------------------------------------
// ReviewSession
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct ReviewDraft {
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub feedback: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub replaced: bool,
    pub checkpoint_due: bool,
    pub reviewed: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub total: usize,
    pub approved: usize,
    pub needs_revision: usize,
    pub rejected: usize,
}

impl ReviewSummary {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let mut summary = Self {
            total: reviews.len(),
            ..Self::default()
        };
        for review in reviews {
            match review.status {
                ReviewStatus::Approved => summary.approved += 1,
                ReviewStatus::NeedsRevision => summary.needs_revision += 1,
                ReviewStatus::Rejected => summary.rejected += 1,
            }
        }
        summary
    }
}

/// Request/response clinician review pass over a fixed dialogue list.
#[derive(Debug)]
pub struct ReviewSession {
    dialogues: Vec<DialogueId>,
    known: HashSet<DialogueId>,
    reviews: Vec<Review>,
    positions: HashMap<DialogueId, usize>,
    notes: HashMap<DialogueId, Vec<ReviewNote>>,
    autosave_every: usize,
    submissions: usize,
}

impl ReviewSession {
    pub fn new(dialogues: Vec<DialogueId>, autosave_every: usize) -> Self {
        let known = dialogues.iter().cloned().collect();
        Self {
            dialogues,
            known,
            reviews: Vec::new(),
            positions: HashMap::new(),
            notes: HashMap::new(),
            autosave_every: autosave_every.max(1),
            submissions: 0,
        }
    }

    /// Continues from checkpointed reviews of dialogues in this pass.
    pub fn resume(mut self, previous: &[Review]) -> Self {
        for review in previous {
            if self.known.contains(&review.dialogue_id) {
                if !review.notes.is_empty() {
                    self.notes
                        .insert(review.dialogue_id.clone(), review.notes.clone());
                }
                self.store(review.clone());
            }
        }
        self
    }

    pub fn dialogues(&self) -> &[DialogueId] {
        &self.dialogues
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn review_for(&self, dialogue_id: &DialogueId) -> Option<&Review> {
        self.positions.get(dialogue_id).map(|&p| &self.reviews[p])
    }

    pub fn next_unreviewed(&self) -> Option<&DialogueId> {
        self.dialogues
            .iter()
            .find(|id| !self.positions.contains_key(*id))
    }

    /// Attaches a free-text note; it is carried on every later review of the dialogue.
    pub fn add_note(
        &mut self,
        dialogue_id: &DialogueId,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        self.ensure_known(dialogue_id)?;
        let note = note.trim();
        if !note.is_empty() {
            self.notes
                .entry(dialogue_id.clone())
                .or_default()
                .push(ReviewNote {
                    note: note.to_owned(),
                    timestamp: at,
                });
        }
        Ok(())
    }

    pub fn submit_review(
        &mut self,
        dialogue_id: &DialogueId,
        draft: ReviewDraft,
        reviewed_at: DateTime<Utc>,
    ) -> Result<ReviewOutcome, ReviewError> {
        self.ensure_known(dialogue_id)?;

        let reviewer = draft
            .reviewer
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(default_reviewer);
        let feedback = draft
            .feedback
            .map(|f| f.trim().to_owned())
            .filter(|f| !f.is_empty());

        let notes = self.notes.get(dialogue_id).cloned().unwrap_or_default();

        let replaced = self.store(Review {
            dialogue_id: dialogue_id.clone(),
            status: draft.status,
            reviewed_at,
            reviewer,
            feedback,
            notes,
        });
        self.submissions += 1;

        tracing::debug!(
            dialogue = %dialogue_id,
            status = %draft.status,
            replaced,
            "review submitted"
        );

        Ok(ReviewOutcome {
            replaced,
            checkpoint_due: self.submissions % self.autosave_every == 0,
            reviewed: self.reviews.len(),
            total: self.dialogues.len(),
        })
    }

    pub fn summary(&self) -> ReviewSummary {
        ReviewSummary::from_reviews(&self.reviews)
    }

    fn ensure_known(&self, dialogue_id: &DialogueId) -> Result<(), ReviewError> {
        if self.known.contains(dialogue_id) {
            Ok(())
        } else {
            Err(ReviewError::UnknownDialogue(dialogue_id.clone()))
        }
    }

    fn store(&mut self, review: Review) -> bool {
        match self.positions.get(&review.dialogue_id) {
            Some(&position) => {
                self.reviews[position] = review;
                true
            }
            None => {
                self.positions
                    .insert(review.dialogue_id.clone(), self.reviews.len());
                self.reviews.push(review);
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
