use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dialogue::first_max_by_count;
use crate::core::{
    technique_for_intent, Corpus, DialogueId, Intent, ItemId, LabelDimension,
    LabelRecord, LabelSet, RiskLevel, Role, Sentiment,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Majority,
    Consensus,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeStrategy::Majority => "majority",
            MergeStrategy::Consensus => "consensus",
        })
    }
}

/// One label per item, combined from several annotators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedLabel {
    pub item_id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub annotator_count: usize,
    #[serde(default)]
    pub consensus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub merged_at: DateTime<Utc>,
}

/// An item left out of a consensus merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroppedItem {
    pub item_id: ItemId,
    pub annotator_count: usize,
    pub disagreements: Vec<LabelDimension>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
    pub records: Vec<MergedLabel>,
    pub dropped: Vec<DroppedItem>,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merges label sets item by item. Items appear in first-seen order across
/// the sets.
pub fn merge_labels(
    label_sets: &[LabelSet],
    strategy: MergeStrategy,
    merged_at: DateTime<Utc>,
) -> MergeOutcome {
    let mut order: Vec<&ItemId> = Vec::new();
    let mut by_item: HashMap<&ItemId, Vec<&LabelRecord>> = HashMap::new();
    for set in label_sets {
        for record in set.labels() {
            by_item
                .entry(&record.item_id)
                .or_insert_with(|| {
                    order.push(&record.item_id);
                    Vec::new()
                })
                .push(record);
        }
    }

    let mut outcome = MergeOutcome::default();
    for item_id in order {
        let records = by_item.get(item_id).map(Vec::as_slice).unwrap_or_default();
        match strategy {
            MergeStrategy::Consensus if records.len() >= 2 => {
                match merge_consensus(item_id, records, merged_at) {
                    Ok(merged) => outcome.records.push(merged),
                    Err(dropped) => {
                        tracing::debug!(item = %item_id, "no consensus; item dropped");
                        outcome.dropped.push(dropped);
                    }
                }
            }
            _ => outcome
                .records
                .push(merge_majority(item_id, records, merged_at)),
        }
    }

    tracing::info!(
        %strategy,
        merged = outcome.records.len(),
        dropped = outcome.dropped.len(),
        "label sets merged"
    );
    outcome
}

fn merge_majority(
    item_id: &ItemId,
    records: &[&LabelRecord],
    merged_at: DateTime<Utc>,
) -> MergedLabel {
    MergedLabel {
        item_id: item_id.clone(),
        intent: majority(records.iter().filter_map(|r| r.intent)),
        sentiment: majority(records.iter().filter_map(|r| r.sentiment)),
        risk_level: majority(records.iter().filter_map(|r| r.risk_level)),
        annotator_count: records.len(),
        consensus: false,
        notes: joined_notes(records),
        merged_at,
    }
}

fn merge_consensus(
    item_id: &ItemId,
    records: &[&LabelRecord],
    merged_at: DateTime<Utc>,
) -> Result<MergedLabel, DroppedItem> {
    let intent = unanimous(records.iter().filter_map(|r| r.intent));
    let sentiment = unanimous(records.iter().filter_map(|r| r.sentiment));
    let risk_level = unanimous(records.iter().filter_map(|r| r.risk_level));

    let mut disagreements = Vec::new();
    if intent.is_none() {
        disagreements.push(LabelDimension::Intent);
    }
    if sentiment.is_none() {
        disagreements.push(LabelDimension::Sentiment);
    }
    if risk_level.is_none() {
        disagreements.push(LabelDimension::RiskLevel);
    }
    if !disagreements.is_empty() {
        return Err(DroppedItem {
            item_id: item_id.clone(),
            annotator_count: records.len(),
            disagreements,
        });
    }

    Ok(MergedLabel {
        item_id: item_id.clone(),
        intent,
        sentiment,
        risk_level,
        annotator_count: records.len(),
        consensus: true,
        notes: joined_notes(records),
        merged_at,
    })
}

/// Most frequent value; among tied values the first one seen wins.
fn majority<T: Copy + PartialEq>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    first_max_by_count(&counts)
}

/// The shared value when at least one value exists and all are equal.
fn unanimous<T: Copy + PartialEq>(mut values: impl Iterator<Item = T>) -> Option<T> {
    let first = values.next()?;
    values.all(|v| v == first).then_some(first)
}

fn joined_notes(records: &[&LabelRecord]) -> Option<String> {
    let notes: Vec<&str> = records
        .iter()
        .filter_map(|r| r.notes.as_deref())
        .filter(|n| !n.is_empty())
        .collect();
    (!notes.is_empty()).then(|| notes.join(" | "))
}

// ---------------------------------------------------------------------------
// Attach merged labels to a corpus
// ---------------------------------------------------------------------------

/// A dialogue-level risk label above what its messages support.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskConflict {
    pub dialogue_id: DialogueId,
    pub labeled: RiskLevel,
    pub derived: RiskLevel,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachOutcome {
    pub applied: usize,
    pub updated_dialogues: usize,
    pub unknown_items: Vec<ItemId>,
    pub risk_conflicts: Vec<RiskConflict>,
}

/// Writes merged labels into the corpus. Message items set the assistant
/// message's labels; dialogue items set the aggregate intent and sentiment.
/// `max_risk_level` of every touched dialogue is recomputed from its messages.
pub fn attach_labels(corpus: &mut Corpus, merged: &[MergedLabel]) -> AttachOutcome {
    let positions: HashMap<DialogueId, usize> = corpus
        .dialogues
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.clone(), i))
        .collect();

    let mut outcome = AttachOutcome::default();
    let mut touched = BTreeSet::new();
    let mut dialogue_risks: Vec<(usize, RiskLevel)> = Vec::new();

    for label in merged {
        // An id naming a dialogue outright is a dialogue item, even when it
        // happens to end in `#<digits>`.
        let whole = DialogueId::new(label.item_id.as_str());
        let (dialogue_id, message_index) = match label.item_id.message_target() {
            Some(_) if positions.contains_key(&whole) => (whole, None),
            Some((dialogue_id, index)) => (dialogue_id, Some(index)),
            None => (whole, None),
        };
        let Some(&position) = positions.get(&dialogue_id) else {
            outcome.unknown_items.push(label.item_id.clone());
            continue;
        };
        let dialogue = &mut corpus.dialogues[position];

        match message_index {
            Some(index) => {
                let Some(message) = dialogue
                    .messages
                    .get_mut(index)
                    .filter(|m| m.role == Role::Assistant)
                else {
                    outcome.unknown_items.push(label.item_id.clone());
                    continue;
                };
                if label.intent.is_some() {
                    message.intent = label.intent;
                }
                if label.sentiment.is_some() {
                    message.sentiment = label.sentiment;
                }
                if label.risk_level.is_some() {
                    message.risk_level = label.risk_level;
                }
            }
            None => {
                let labels = dialogue.labels_mut();
                if let Some(intent) = label.intent {
                    labels.primary_intent = Some(intent);
                    labels.therapeutic_technique = Some(technique_for_intent(intent).to_owned());
                }
                if label.sentiment.is_some() {
                    labels.overall_sentiment = label.sentiment;
                }
                if let Some(risk) = label.risk_level {
                    dialogue_risks.push((position, risk));
                }
            }
        }

        touched.insert(position);
        outcome.applied += 1;
    }

    for &position in &touched {
        let dialogue = &mut corpus.dialogues[position];
        let derived = dialogue.derived_max_risk();
        dialogue.labels_mut().max_risk_level = Some(derived);
    }

    for (position, labeled) in dialogue_risks {
        let dialogue = &corpus.dialogues[position];
        let derived = dialogue.derived_max_risk();
        if labeled > derived {
            tracing::warn!(
                dialogue = %dialogue.id,
                labeled = %labeled,
                derived = %derived,
                "dialogue risk label exceeds message risk levels"
            );
            outcome.risk_conflicts.push(RiskConflict {
                dialogue_id: dialogue.id.clone(),
                labeled,
                derived,
            });
        }
    }

    outcome.updated_dialogues = touched.len();
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::{AnnotatorId, Dialogue, Message, SessionId, SessionType, UserProfile};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    fn record(
        item: &str,
        intent: Option<Intent>,
        sentiment: Option<Sentiment>,
        risk: Option<RiskLevel>,
    ) -> LabelRecord {
        LabelRecord {
            item_id: ItemId::new(item),
            intent,
            sentiment,
            risk_level: risk,
            notes: None,
            labeled_at: ts(),
        }
    }

    fn set(annotator: &str, records: Vec<LabelRecord>) -> LabelSet {
        LabelSet::from_records(
            AnnotatorId::new(annotator),
            SessionId::new(format!("{annotator}_s")),
            "seed.json",
            records,
        )
    }

    fn full(item: &str, intent: Intent, risk: RiskLevel) -> LabelRecord {
        record(item, Some(intent), Some(Sentiment::Negative), Some(risk))
    }

    #[test]
    fn test_majority_prefers_most_common_risk() {
        let sets = vec![
            set("a", vec![full("x", Intent::SafetyCheck, RiskLevel::High)]),
            set("b", vec![full("x", Intent::SafetyCheck, RiskLevel::High)]),
            set("c", vec![full("x", Intent::SafetyCheck, RiskLevel::Medium)]),
        ];

        let outcome = merge_labels(&sets, MergeStrategy::Majority, ts());

        assert_eq!(outcome.records.len(), 1);
        let merged = &outcome.records[0];
        assert_eq!(merged.risk_level, Some(RiskLevel::High));
        assert_eq!(merged.annotator_count, 3);
        assert!(!merged.consensus);
        assert_eq!(merged.merged_at, ts());
    }

    #[test]
    fn test_majority_covers_union_in_first_seen_order() {
        let sets = vec![
            set(
                "a",
                vec![
                    full("x", Intent::Validate, RiskLevel::None),
                    full("y", Intent::Validate, RiskLevel::None),
                ],
            ),
            set(
                "b",
                vec![
                    full("z", Intent::Close, RiskLevel::None),
                    full("x", Intent::Reframe, RiskLevel::None),
                ],
            ),
        ];

        let outcome = merge_labels(&sets, MergeStrategy::Majority, ts());

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
        assert_eq!(outcome.records[0].intent, Some(Intent::Validate));
        assert_eq!(outcome.records[0].annotator_count, 2);
        assert_eq!(outcome.records[2].annotator_count, 1);
        assert!(outcome.dropped.is_empty());
    }

    #[test]
    fn test_majority_ignores_missing_values_and_joins_notes() {
        let mut first = record("x", None, Some(Sentiment::Neutral), None);
        first.notes = Some("unclear".into());
        let mut second = record("x", Some(Intent::Close), None, None);
        second.notes = Some("closing turn".into());

        let outcome = merge_labels(
            &[set("a", vec![first]), set("b", vec![second])],
            MergeStrategy::Majority,
            ts(),
        );

        let merged = &outcome.records[0];
        assert_eq!(merged.intent, Some(Intent::Close));
        assert_eq!(merged.sentiment, Some(Sentiment::Neutral));
        assert_eq!(merged.risk_level, None);
        assert_eq!(merged.notes.as_deref(), Some("unclear | closing turn"));
    }

    #[test]
    fn test_consensus_drops_disagreements() {
        let sets = vec![
            set(
                "a",
                vec![
                    full("agree", Intent::Validate, RiskLevel::None),
                    full("split", Intent::Validate, RiskLevel::Low),
                    full("solo", Intent::Close, RiskLevel::None),
                ],
            ),
            set(
                "b",
                vec![
                    full("agree", Intent::Validate, RiskLevel::None),
                    full("split", Intent::Validate, RiskLevel::None),
                ],
            ),
        ];

        let outcome = merge_labels(&sets, MergeStrategy::Consensus, ts());

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["agree", "solo"]);
        assert!(outcome.records[0].consensus);
        assert!(!outcome.records[1].consensus);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].item_id.as_str(), "split");
        assert_eq!(
            outcome.dropped[0].disagreements,
            vec![LabelDimension::RiskLevel]
        );
    }

    #[test]
    fn test_consensus_requires_a_value_in_every_dimension() {
        let sets = vec![
            set("a", vec![record("x", Some(Intent::Validate), Some(Sentiment::Neutral), None)]),
            set("b", vec![record("x", Some(Intent::Validate), Some(Sentiment::Neutral), None)]),
        ];
        let outcome = merge_labels(&sets, MergeStrategy::Consensus, ts());
        assert!(outcome.records.is_empty());
        assert_eq!(
            outcome.dropped[0].disagreements,
            vec![LabelDimension::RiskLevel]
        );
    }

    #[test]
    fn test_consensus_records_are_unanimous() {
        let sets = vec![
            set("a", vec![full("x", Intent::Reframe, RiskLevel::Low)]),
            set("b", vec![full("x", Intent::Reframe, RiskLevel::Low)]),
            set("c", vec![full("x", Intent::Reframe, RiskLevel::Low)]),
        ];
        let outcome = merge_labels(&sets, MergeStrategy::Consensus, ts());
        let merged = &outcome.records[0];
        for set in &sets {
            let record = set.get(&merged.item_id).unwrap();
            assert_eq!(record.intent, merged.intent);
            assert_eq!(record.sentiment, merged.sentiment);
            assert_eq!(record.risk_level, merged.risk_level);
        }
    }

    #[test]
    fn test_majority_tie_goes_to_first_annotator() {
        let sets = vec![
            set("a", vec![full("x", Intent::Reframe, RiskLevel::None)]),
            set("b", vec![full("x", Intent::Validate, RiskLevel::None)]),
        ];
        let outcome = merge_labels(&sets, MergeStrategy::Majority, ts());
        assert_eq!(outcome.records[0].intent, Some(Intent::Reframe));
    }

    fn corpus() -> Corpus {
        let dialogue = Dialogue {
            id: DialogueId::new("d1"),
            session_type: SessionType::GentleDeep,
            user_profile: UserProfile {
                age_range: None,
                concern: "grief".into(),
                mood_score: Some(4),
                extra: Default::default(),
            },
            messages: vec![
                Message::user("I miss her."),
                Message::assistant(
                    "That sounds painful.",
                    Intent::Validate,
                    Sentiment::Negative,
                    RiskLevel::None,
                ),
            ],
            labels: None,
            extra: Default::default(),
        };
        Corpus::new("test", vec![dialogue])
    }

    fn merged(item: &str, intent: Option<Intent>, risk: Option<RiskLevel>) -> MergedLabel {
        MergedLabel {
            item_id: ItemId::new(item),
            intent,
            sentiment: Some(Sentiment::VeryNegative),
            risk_level: risk,
            annotator_count: 2,
            consensus: false,
            notes: None,
            merged_at: ts(),
        }
    }

    #[test]
    fn test_attach_sets_message_and_dialogue_labels() {
        let mut corpus = corpus();
        let outcome = attach_labels(
            &mut corpus,
            &[
                merged("d1#1", Some(Intent::SafetyCheck), Some(RiskLevel::Medium)),
                merged("d1", Some(Intent::SafetyCheck), Some(RiskLevel::Medium)),
            ],
        );

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.updated_dialogues, 1);
        assert!(outcome.unknown_items.is_empty());
        assert!(outcome.risk_conflicts.is_empty());

        let dialogue = &corpus.dialogues[0];
        assert_eq!(dialogue.messages[1].intent, Some(Intent::SafetyCheck));
        assert_eq!(dialogue.messages[1].risk_level, Some(RiskLevel::Medium));
        let labels = dialogue.labels.as_ref().unwrap();
        assert_eq!(labels.primary_intent, Some(Intent::SafetyCheck));
        assert_eq!(labels.overall_sentiment, Some(Sentiment::VeryNegative));
        assert_eq!(labels.max_risk_level, Some(RiskLevel::Medium));
        assert_eq!(labels.therapeutic_technique.as_deref(), Some("other"));
    }

    #[test]
    fn test_attach_reports_conflicts_and_unknown_items() {
        let mut corpus = corpus();
        let outcome = attach_labels(
            &mut corpus,
            &[
                merged("d1", None, Some(RiskLevel::High)),
                merged("d1#0", Some(Intent::Validate), None),
                merged("d1#7", Some(Intent::Validate), None),
                merged("ghost", Some(Intent::Validate), None),
            ],
        );

        let unknown: Vec<&str> = outcome.unknown_items.iter().map(|i| i.as_str()).collect();
        assert_eq!(unknown, vec!["d1#0", "d1#7", "ghost"]);
        assert_eq!(
            outcome.risk_conflicts,
            vec![RiskConflict {
                dialogue_id: DialogueId::new("d1"),
                labeled: RiskLevel::High,
                derived: RiskLevel::None,
            }]
        );
        let labels = corpus.dialogues[0].labels.as_ref().unwrap();
        assert_eq!(labels.max_risk_level, Some(RiskLevel::None));
    }

    #[test]
    fn test_attach_matches_whole_dialogue_id_before_splitting() {
        let mut corpus = corpus();
        corpus.dialogues[0].id = DialogueId::new("batch#1");

        let outcome = attach_labels(&mut corpus, &[merged("batch#1", Some(Intent::Reframe), None)]);

        assert_eq!(outcome.applied, 1);
        assert!(outcome.unknown_items.is_empty());
        let dialogue = &corpus.dialogues[0];
        assert_eq!(dialogue.messages[1].intent, Some(Intent::Validate));
        let labels = dialogue.labels.as_ref().unwrap();
        assert_eq!(labels.primary_intent, Some(Intent::Reframe));
    }
}
