use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    AnnotatorId, Corpus, DialogueId, Intent, IssueKind, IssueLocation, ItemId, LabelingError,
    RiskLevel, Role, Sentiment, SessionId, ValidationIssue,
};

// ---------------------------------------------------------------------------
// LabelRecord / LabelSet
// ---------------------------------------------------------------------------

/// One annotator's judgement of one item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub item_id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub labeled_at: DateTime<Utc>,
}

/// Labels produced by one annotator in one pass. At most one record per item.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelSet {
    pub annotator: AnnotatorId,
    pub session_id: SessionId,
    pub source_file: String,
    labels: Vec<LabelRecord>,
}

impl LabelSet {
    /// Builds a set from records in submission order; a repeated item keeps
    /// its first position and its last record.
    pub fn from_records(
        annotator: AnnotatorId,
        session_id: SessionId,
        source_file: impl Into<String>,
        records: impl IntoIterator<Item = LabelRecord>,
    ) -> Self {
        let mut labels: Vec<LabelRecord> = Vec::new();
        let mut positions: HashMap<ItemId, usize> = HashMap::new();
        for record in records {
            match positions.get(&record.item_id) {
                Some(&position) => labels[position] = record,
                None => {
                    positions.insert(record.item_id.clone(), labels.len());
                    labels.push(record);
                }
            }
        }
        Self {
            annotator,
            session_id,
            source_file: source_file.into(),
            labels,
        }
    }

    pub fn labels(&self) -> &[LabelRecord] {
        &self.labels
    }

    pub fn get(&self, item_id: &ItemId) -> Option<&LabelRecord> {
        self.labels.iter().find(|r| &r.item_id == item_id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Item id to record lookup.
    pub fn index(&self) -> HashMap<&ItemId, &LabelRecord> {
        self.labels.iter().map(|r| (&r.item_id, r)).collect()
    }
}

// ---------------------------------------------------------------------------
// Labelable items
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct LabelItem {
    pub item_id: ItemId,
    pub dialogue_id: DialogueId,
    /// `None` for dialogue-level items.
    pub message_index: Option<usize>,
    /// Text shown to the annotator: the message itself, or the opening user turn.
    pub text: String,
}

/// One item per dialogue and, when `include_messages`, one per assistant message.
pub fn labelable_items(corpus: &Corpus, include_messages: bool) -> Vec<LabelItem> {
    let mut items = Vec::new();
    for dialogue in &corpus.dialogues {
        let opening = dialogue
            .first_message_of(Role::User)
            .map(|m| m.text.clone())
            .unwrap_or_default();
        items.push(LabelItem {
            item_id: ItemId::for_dialogue(&dialogue.id),
            dialogue_id: dialogue.id.clone(),
            message_index: None,
            text: opening,
        });

        if include_messages {
            for (index, message) in dialogue.messages.iter().enumerate() {
                if message.role != Role::Assistant {
                    continue;
                }
                items.push(LabelItem {
                    item_id: ItemId::for_message(&dialogue.id, index),
                    dialogue_id: dialogue.id.clone(),
                    message_index: Some(index),
                    text: message.text.clone(),
                });
            }
        }
    }
    items
}

// ---------------------------------------------------------------------------
// LabelingSession
// ---------------------------------------------------------------------------

/// Values an annotator submits for an item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelDraft {
    pub intent: Option<Intent>,
    pub sentiment: Option<Sentiment>,
    pub risk_level: Option<RiskLevel>,
    pub notes: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// The item already had a record in this pass.
    pub replaced: bool,
    /// The front end should persist a snapshot now.
    pub checkpoint_due: bool,
    pub labeled: usize,
    pub total: usize,
}

/// Request/response labeling pass over a fixed item list.
#[derive(Debug)]
pub struct LabelingSession {
    annotator: AnnotatorId,
    session_id: SessionId,
    source_file: String,
    items: Vec<LabelItem>,
    known: HashMap<ItemId, usize>,
    records: Vec<LabelRecord>,
    positions: HashMap<ItemId, usize>,
    autosave_every: usize,
    submissions: usize,
    finished: bool,
}

impl LabelingSession {
    pub fn new(
        annotator: AnnotatorId,
        session_id: SessionId,
        source_file: impl Into<String>,
        items: Vec<LabelItem>,
        autosave_every: usize,
    ) -> Self {
        let known = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.item_id.clone(), i))
            .collect();
        Self {
            annotator,
            session_id,
            source_file: source_file.into(),
            items,
            known,
            records: Vec::new(),
            positions: HashMap::new(),
            autosave_every: autosave_every.max(1),
            submissions: 0,
            finished: false,
        }
    }

    /// Continues from a checkpointed set. Records for items outside the
    /// item list are skipped.
    pub fn resume(mut self, checkpoint: &LabelSet) -> Self {
        for record in checkpoint.labels() {
            if self.known.contains_key(&record.item_id) {
                self.store(record.clone());
            }
        }
        self
    }

    pub fn annotator(&self) -> &AnnotatorId {
        &self.annotator
    }

    pub fn items(&self) -> &[LabelItem] {
        &self.items
    }

    pub fn record_for(&self, item_id: &ItemId) -> Option<&LabelRecord> {
        self.positions.get(item_id).map(|&p| &self.records[p])
    }

    /// First item without a record, in item order.
    pub fn next_unlabeled(&self) -> Option<&LabelItem> {
        self.items
            .iter()
            .find(|item| !self.positions.contains_key(&item.item_id))
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.records.len(), self.items.len())
    }

    pub fn submit_label(
        &mut self,
        item_id: &ItemId,
        draft: LabelDraft,
        labeled_at: DateTime<Utc>,
    ) -> Result<SubmitOutcome, LabelingError> {
        if self.finished {
            return Err(LabelingError::Finished);
        }
        if !self.known.contains_key(item_id) {
            return Err(LabelingError::UnknownItem(item_id.clone()));
        }

        let notes = draft
            .notes
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty());
        let replaced = self.store(LabelRecord {
            item_id: item_id.clone(),
            intent: draft.intent,
            sentiment: draft.sentiment,
            risk_level: draft.risk_level,
            notes,
            labeled_at,
        });
        self.submissions += 1;

        tracing::debug!(item = %item_id, replaced, "label submitted");

        Ok(SubmitOutcome {
            replaced,
            checkpoint_due: self.submissions % self.autosave_every == 0,
            labeled: self.records.len(),
            total: self.items.len(),
        })
    }

    /// Current records as a label set, for checkpoints.
    pub fn snapshot(&self) -> LabelSet {
        LabelSet::from_records(
            self.annotator.clone(),
            self.session_id.clone(),
            self.source_file.clone(),
            self.records.iter().cloned(),
        )
    }

    /// Closes the pass; later submissions are rejected.
    pub fn finish(&mut self) -> LabelSet {
        self.finished = true;
        tracing::info!(
            annotator = %self.annotator,
            session = %self.session_id,
            labeled = self.records.len(),
            total = self.items.len(),
            "labeling pass finished"
        );
        self.snapshot()
    }

    fn store(&mut self, record: LabelRecord) -> bool {
        match self.positions.get(&record.item_id) {
            Some(&position) => {
                self.records[position] = record;
                true
            }
            None => {
                self.positions
                    .insert(record.item_id.clone(), self.records.len());
                self.records.push(record);
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Label-set validation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct LabelSetReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub total: usize,
    pub intents: BTreeMap<String, usize>,
    pub sentiments: BTreeMap<String, usize>,
    pub risk_levels: BTreeMap<String, usize>,
}

/// Every record must carry all three dimensions; high risk and the
/// emergency intent are expected to go together.
pub fn validate_label_set(set: &LabelSet) -> LabelSetReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut intents = BTreeMap::new();
    let mut sentiments = BTreeMap::new();
    let mut risk_levels = BTreeMap::new();

    if set.is_empty() {
        errors.push(ValidationIssue::new(
            IssueLocation::Corpus,
            "labels",
            IssueKind::NoEntries,
        ));
    }

    for (index, record) in set.labels().iter().enumerate() {
        let here = IssueLocation::Label(index);
        if record.intent.is_none() {
            errors.push(ValidationIssue::new(here, "intent", IssueKind::Missing));
        }
        if record.sentiment.is_none() {
            errors.push(ValidationIssue::new(here, "sentiment", IssueKind::Missing));
        }
        if record.risk_level.is_none() {
            errors.push(ValidationIssue::new(here, "risk_level", IssueKind::Missing));
        }

        let high_risk = record.risk_level == Some(RiskLevel::High);
        let emergency = record.intent == Some(Intent::Emergency);
        if high_risk && !emergency {
            warnings.push(ValidationIssue::new(
                here,
                "risk_level",
                IssueKind::Inconsistent {
                    detail: "High risk but intent is not 'emergency'".to_owned(),
                },
            ));
        }
        if emergency && !high_risk {
            warnings.push(ValidationIssue::new(
                here,
                "intent",
                IssueKind::Inconsistent {
                    detail: "Emergency intent but risk_level is not 'high'".to_owned(),
                },
            ));
        }

        count(&mut intents, record.intent.map(|v| v.as_str()));
        count(&mut sentiments, record.sentiment.map(|v| v.as_str()));
        count(&mut risk_levels, record.risk_level.map(|v| v.as_str()));
    }

    LabelSetReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        total: set.len(),
        intents,
        sentiments,
        risk_levels,
    }
}

fn count(counts: &mut BTreeMap<String, usize>, value: Option<&str>) {
    *counts
        .entry(value.unwrap_or("unknown").to_owned())
        .or_insert(0) += 1;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::{Dialogue, Message, SessionType, UserProfile};

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap()
    }

    fn corpus() -> Corpus {
        let dialogue = |id: &str| Dialogue {
            id: DialogueId::new(id),
            session_type: SessionType::CheckIn,
            user_profile: UserProfile {
                age_range: None,
                concern: "stress".into(),
                mood_score: None,
                extra: Default::default(),
            },
            messages: vec![
                Message::user("Too much on my plate."),
                Message::assistant(
                    "That is a lot.",
                    Intent::Validate,
                    Sentiment::Negative,
                    RiskLevel::None,
                ),
                Message::user("Yeah."),
                Message::assistant(
                    "What happened?",
                    Intent::ProbeStory,
                    Sentiment::Neutral,
                    RiskLevel::None,
                ),
            ],
            labels: None,
            extra: Default::default(),
        };
        Corpus::new("test", vec![dialogue("d1"), dialogue("d2")])
    }

    fn draft(intent: Intent) -> LabelDraft {
        LabelDraft {
            intent: Some(intent),
            sentiment: Some(Sentiment::Negative),
            risk_level: Some(RiskLevel::None),
            notes: None,
        }
    }

    fn session(autosave_every: usize) -> LabelingSession {
        LabelingSession::new(
            AnnotatorId::new("ann1"),
            SessionId::new("s1"),
            "seed.json",
            labelable_items(&corpus(), true),
            autosave_every,
        )
    }

    fn record(item: &str, intent: Option<Intent>, risk: Option<RiskLevel>) -> LabelRecord {
        LabelRecord {
            item_id: ItemId::new(item),
            intent,
            sentiment: Some(Sentiment::Neutral),
            risk_level: risk,
            notes: None,
            labeled_at: ts(0),
        }
    }

    #[test]
    fn test_labelable_items_dialogue_and_assistant_messages() {
        let items = labelable_items(&corpus(), true);
        let ids: Vec<&str> = items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d1#1", "d1#3", "d2", "d2#1", "d2#3"]);
        assert_eq!(items[0].text, "Too much on my plate.");
        assert_eq!(items[2].message_index, Some(3));

        assert_eq!(labelable_items(&corpus(), false).len(), 2);
    }

    #[test]
    fn test_submit_unknown_item_rejected() {
        let mut session = session(10);
        let err = session
            .submit_label(&ItemId::new("d9"), draft(Intent::Validate), ts(1))
            .unwrap_err();
        assert_eq!(err, LabelingError::UnknownItem(ItemId::new("d9")));
        assert_eq!(session.progress(), (0, 6));
    }

    #[test]
    fn test_resubmission_replaces_record() {
        let mut session = session(10);
        let item = ItemId::new("d1");
        let first = session
            .submit_label(&item, draft(Intent::Validate), ts(1))
            .unwrap();
        let second = session
            .submit_label(&item, draft(Intent::Reframe), ts(2))
            .unwrap();

        assert!(!first.replaced);
        assert!(second.replaced);
        assert_eq!(second.labeled, 1);
        let set = session.finish();
        assert_eq!(set.len(), 1);
        assert_eq!(set.labels()[0].intent, Some(Intent::Reframe));
        assert_eq!(set.labels()[0].labeled_at, ts(2));
    }

    #[test]
    fn test_checkpoint_due_every_n_submissions() {
        let mut session = session(2);
        let items: Vec<ItemId> = session.items().iter().map(|i| i.item_id.clone()).collect();
        let due: Vec<bool> = items
            .iter()
            .take(5)
            .map(|id| {
                session
                    .submit_label(id, draft(Intent::Validate), ts(1))
                    .unwrap()
                    .checkpoint_due
            })
            .collect();
        assert_eq!(due, vec![false, true, false, true, false]);
    }

    #[test]
    fn test_finished_session_rejects_submissions() {
        let mut session = session(10);
        session.finish();
        let err = session
            .submit_label(&ItemId::new("d1"), draft(Intent::Validate), ts(1))
            .unwrap_err();
        assert_eq!(err, LabelingError::Finished);
    }

    #[test]
    fn test_resume_and_next_unlabeled() {
        let mut first = session(10);
        first
            .submit_label(&ItemId::new("d1"), draft(Intent::Validate), ts(1))
            .unwrap();
        let checkpoint = first.snapshot();

        let resumed = session(10).resume(&checkpoint);
        assert_eq!(resumed.progress(), (1, 6));
        assert_eq!(
            resumed.next_unlabeled().map(|i| i.item_id.as_str()),
            Some("d1#1")
        );
        assert!(resumed.record_for(&ItemId::new("d1")).is_some());
    }

    #[test]
    fn test_blank_notes_dropped() {
        let mut session = session(10);
        let mut with_notes = draft(Intent::Validate);
        with_notes.notes = Some("   ".into());
        session
            .submit_label(&ItemId::new("d1"), with_notes, ts(1))
            .unwrap();
        assert_eq!(session.record_for(&ItemId::new("d1")).unwrap().notes, None);
    }

    #[test]
    fn test_from_records_keeps_last_record_per_item() {
        let set = LabelSet::from_records(
            AnnotatorId::new("a"),
            SessionId::new("s"),
            "f.json",
            vec![
                record("x", Some(Intent::Validate), Some(RiskLevel::None)),
                record("y", Some(Intent::Close), Some(RiskLevel::None)),
                record("x", Some(Intent::Reframe), Some(RiskLevel::None)),
            ],
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.labels()[0].item_id.as_str(), "x");
        assert_eq!(set.labels()[0].intent, Some(Intent::Reframe));
    }

    #[test]
    fn test_validate_label_set() {
        let set = LabelSet::from_records(
            AnnotatorId::new("a"),
            SessionId::new("s"),
            "f.json",
            vec![
                record("x", None, Some(RiskLevel::Low)),
                record("y", Some(Intent::Validate), Some(RiskLevel::High)),
                record("z", Some(Intent::Emergency), Some(RiskLevel::Medium)),
            ],
        );

        let report = validate_label_set(&set);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].to_string(), "Label 0: Missing 'intent'");
        let warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
        assert_eq!(
            warnings,
            vec![
                "Label 1: High risk but intent is not 'emergency'",
                "Label 2: Emergency intent but risk_level is not 'high'",
            ]
        );
        assert_eq!(report.intents["unknown"], 1);
        assert_eq!(report.risk_levels["high"], 1);
        assert_eq!(report.total, 3);
    }

    #[test]
    fn test_validate_empty_label_set() {
        let set = LabelSet::from_records(
            AnnotatorId::new("a"),
            SessionId::new("s"),
            "f.json",
            Vec::new(),
        );
        let report = validate_label_set(&set);
        assert!(!report.valid);
        assert_eq!(report.errors[0].to_string(), "No labels found");
    }
}
