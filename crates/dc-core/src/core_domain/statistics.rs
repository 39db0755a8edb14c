use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Dialogue, SessionType};

/// Distribution tallies over a corpus. Always derived from the dialogues,
/// never edited by hand.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub total_dialogues: usize,
    pub session_types: BTreeMap<String, usize>,
    pub concerns: BTreeMap<String, usize>,
    pub intents: BTreeMap<String, usize>,
    pub sentiments: BTreeMap<String, usize>,
    pub risk_levels: BTreeMap<String, usize>,
    pub therapeutic_techniques: BTreeMap<String, usize>,
    pub avg_messages_per_dialogue: f64,
}

impl CorpusStatistics {
    pub fn from_dialogues(dialogues: &[Dialogue]) -> Self {
        let mut stats = Self {
            total_dialogues: dialogues.len(),
            ..Self::default()
        };
        let mut message_total = 0usize;

        for dialogue in dialogues {
            tally(&mut stats.session_types, dialogue.session_type.as_str());
            tally(&mut stats.concerns, &dialogue.user_profile.concern);
            message_total += dialogue.messages.len();

            for message in &dialogue.messages {
                if let Some(intent) = message.intent {
                    tally(&mut stats.intents, intent.as_str());
                }
                if let Some(sentiment) = message.sentiment {
                    tally(&mut stats.sentiments, sentiment.as_str());
                }
                if let Some(risk) = message.risk_level {
                    tally(&mut stats.risk_levels, risk.as_str());
                }
            }

            if let Some(technique) = dialogue
                .labels
                .as_ref()
                .and_then(|l| l.therapeutic_technique.as_deref())
            {
                tally(&mut stats.therapeutic_techniques, technique);
            }
        }

        stats.avg_messages_per_dialogue = average(message_total, dialogues.len());
        stats
    }

    /// Same tallies over raw corpus entries. Values outside the vocabulary
    /// are counted under their literal text, missing ones under `"unknown"`.
    pub fn from_raw(dialogues: &[Value]) -> Self {
        let mut stats = Self {
            total_dialogues: dialogues.len(),
            ..Self::default()
        };
        let mut message_total = 0usize;

        for dialogue in dialogues {
            tally(&mut stats.session_types, text_or_unknown(&dialogue["session_type"]));
            tally(
                &mut stats.concerns,
                text_or_unknown(&dialogue["user_profile"]["concern"]),
            );

            if let Some(messages) = dialogue["messages"].as_array() {
                message_total += messages.len();
                for message in messages {
                    if let Some(intent) = non_empty_str(&message["intent"]) {
                        tally(&mut stats.intents, intent);
                    }
                    if let Some(sentiment) = non_empty_str(&message["sentiment"]) {
                        tally(&mut stats.sentiments, sentiment);
                    }
                    if let Some(risk) = non_empty_str(&message["risk_level"]) {
                        tally(&mut stats.risk_levels, risk);
                    }
                }
            }

            if let Some(technique) = non_empty_str(&dialogue["labels"]["therapeutic_technique"]) {
                tally(&mut stats.therapeutic_techniques, technique);
            }
        }

        stats.avg_messages_per_dialogue = average(message_total, dialogues.len());
        stats
    }

    /// Fraction of dialogues with the given session type, 0.0 for an empty corpus.
    pub fn session_share(&self, session_type: SessionType) -> f64 {
        if self.total_dialogues == 0 {
            return 0.0;
        }
        let count = self
            .session_types
            .get(session_type.as_str())
            .copied()
            .unwrap_or(0);
        count as f64 / self.total_dialogues as f64
    }
}

fn tally(counts: &mut BTreeMap<String, usize>, key: &str) {
    *counts.entry(key.to_owned()).or_insert(0) += 1;
}

fn average(total: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

fn text_or_unknown(value: &Value) -> &str {
    value.as_str().unwrap_or("unknown")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
