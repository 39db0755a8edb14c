use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    AgeRange, CorpusStatistics, DialogueId, Intent, ReviewStatus, RiskLevel, Role, SchemaError,
    Sentiment, SessionType,
};

pub const CORPUS_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One conversation turn. Label fields are only meaningful on assistant turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Kept verbatim; seeded corpora mix RFC 3339 and naive timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: None,
            intent: None,
            sentiment: None,
            risk_level: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        intent: Intent,
        sentiment: Sentiment,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: None,
            intent: Some(intent),
            sentiment: Some(sentiment),
            risk_level: Some(risk_level),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp.to_rfc3339()),
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// UserProfile / DialogueLabels
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<AgeRange>,
    pub concern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<u8>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Aggregate annotation of a dialogue.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueLabels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapeutic_technique: Option<String>,
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<ReviewStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinician_reviewed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinician_approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_method: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Dialogue
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    #[serde(rename = "dialogue_id")]
    pub id: DialogueId,
    pub session_type: SessionType,
    pub user_profile: UserProfile,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<DialogueLabels>,
    /// Fields this schema does not model, carried through untouched.
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Dialogue {
    /// Highest message risk level, `none` when no message carries one.
    pub fn derived_max_risk(&self) -> RiskLevel {
        max_risk_level(&self.messages)
    }

    pub fn labels_mut(&mut self) -> &mut DialogueLabels {
        self.labels.get_or_insert_with(DialogueLabels::default)
    }

    pub fn first_message_of(&self, role: Role) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == role)
    }
}

/// Maximum severity among message risk levels, defaulting to `none`.
pub fn max_risk_level(messages: &[Message]) -> RiskLevel {
    messages
        .iter()
        .filter_map(|m| m.risk_level)
        .max()
        .unwrap_or(RiskLevel::None)
}

/// Most frequent message sentiment; ties go to the value seen first.
pub fn mode_sentiment(messages: &[Message]) -> Option<Sentiment> {
    let mut counts: Vec<(Sentiment, usize)> = Vec::new();
    for sentiment in messages.iter().filter_map(|m| m.sentiment) {
        match counts.iter_mut().find(|(s, _)| *s == sentiment) {
            Some((_, count)) => *count += 1,
            None => counts.push((sentiment, 1)),
        }
    }
    first_max_by_count(&counts)
}

/// Picks the entry with the highest count; the earliest entry wins ties.
pub(crate) fn first_max_by_count<T: Copy>(counts: &[(T, usize)]) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for &(value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

/// A versioned collection of typed dialogues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub dialogues: Vec<Dialogue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<CorpusStatistics>,
}

fn default_version() -> String {
    CORPUS_VERSION.to_owned()
}

impl Corpus {
    pub fn new(description: impl Into<String>, dialogues: Vec<Dialogue>) -> Self {
        Self {
            version: default_version(),
            description: description.into(),
            dialogues,
            statistics: None,
        }
    }

    /// Builds a typed corpus from raw entries, failing on the first entry
    /// that does not fit the schema.
    pub fn from_raw(raw: RawCorpus) -> Result<Self, SchemaError> {
        let dialogues = raw
            .dialogues
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                serde_json::from_value(value).map_err(|source| SchemaError { index, source })
            })
            .collect::<Result<Vec<Dialogue>, _>>()?;

        Ok(Self {
            version: raw.version.unwrap_or_else(default_version),
            description: raw.description.unwrap_or_default(),
            dialogues,
            statistics: None,
        })
    }

    /// Replaces `statistics` with values recomputed from `dialogues`.
    pub fn with_fresh_statistics(self) -> Self {
        let statistics = CorpusStatistics::from_dialogues(&self.dialogues);
        Self {
            statistics: Some(statistics),
            ..self
        }
    }
}

/// Corpus document as read from disk, before any schema checks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawCorpus {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dialogues: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assistant(risk: Option<RiskLevel>, sentiment: Option<Sentiment>) -> Message {
        Message {
            role: Role::Assistant,
            text: "I hear you.".into(),
            timestamp: None,
            intent: Some(Intent::Validate),
            sentiment,
            risk_level: risk,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_max_risk_level_defaults_to_none() {
        assert_eq!(max_risk_level(&[]), RiskLevel::None);
        assert_eq!(
            max_risk_level(&[Message::user("hi"), assistant(None, None)]),
            RiskLevel::None
        );
    }

    #[test]
    fn test_max_risk_level_uses_severity_order() {
        let messages = vec![
            assistant(Some(RiskLevel::Low), None),
            assistant(Some(RiskLevel::High), None),
            assistant(Some(RiskLevel::Medium), None),
        ];
        assert_eq!(max_risk_level(&messages), RiskLevel::High);
    }

    #[test]
    fn test_mode_sentiment_breaks_ties_by_first_seen() {
        let messages = vec![
            assistant(None, Some(Sentiment::Neutral)),
            assistant(None, Some(Sentiment::Negative)),
            assistant(None, Some(Sentiment::Negative)),
            assistant(None, Some(Sentiment::Neutral)),
        ];
        assert_eq!(mode_sentiment(&messages), Some(Sentiment::Neutral));
        assert_eq!(mode_sentiment(&[Message::user("hi")]), None);
    }

    #[test]
    fn test_dialogue_keeps_unmodelled_fields() {
        let value = json!({
            "dialogue_id": "seed_001",
            "session_type": "check-in",
            "user_profile": {"age_range": "26-30", "concern": "stress", "mood_score": 4},
            "messages": [
                {"role": "user", "text": "Long week."},
                {"role": "assistant", "text": "That sounds heavy.", "intent": "validate"}
            ],
            "review_notes": [{"note": "check tone"}]
        });

        let dialogue: Dialogue = serde_json::from_value(value).unwrap();
        assert_eq!(dialogue.id.as_str(), "seed_001");
        assert!(dialogue.labels.is_none());
        assert!(dialogue.extra.contains_key("review_notes"));

        let back = serde_json::to_value(&dialogue).unwrap();
        assert_eq!(back["review_notes"][0]["note"], "check tone");
        assert_eq!(back["dialogue_id"], "seed_001");
    }

    #[test]
    fn test_nested_unmodelled_fields_survive_round_trip() {
        let value = json!({
            "dialogue_id": "d1",
            "session_type": "check-in",
            "user_profile": {"concern": "stress", "mood_score": 5, "occupation": "nurse"},
            "messages": [
                {"role": "user", "text": "hi", "emotion": "tired"},
                {"role": "assistant", "text": "hello", "intent": "validate", "confidence": 0.9}
            ],
            "labels": {"primary_intent": "validate", "clinician_notes": "warm"}
        });

        let dialogue: Dialogue = serde_json::from_value(value).unwrap();
        assert_eq!(dialogue.messages[0].extra["emotion"], "tired");

        let back = serde_json::to_value(&dialogue).unwrap();
        assert_eq!(back["messages"][0]["emotion"], "tired");
        assert_eq!(back["messages"][1]["confidence"], 0.9);
        assert_eq!(back["user_profile"]["occupation"], "nurse");
        assert_eq!(back["labels"]["clinician_notes"], "warm");
        assert_eq!(back["labels"]["primary_intent"], "validate");
    }

    #[test]
    fn test_corpus_from_raw_reports_failing_index() {
        let raw = RawCorpus {
            version: None,
            description: None,
            dialogues: vec![
                json!({
                    "dialogue_id": "ok",
                    "session_type": "gentle_deep",
                    "user_profile": {"concern": "grief"},
                    "messages": []
                }),
                json!({"dialogue_id": "bad", "session_type": "weekly"}),
            ],
        };

        let err = Corpus::from_raw(raw).unwrap_err();
        assert_eq!(err.index, 1);
    }
}
