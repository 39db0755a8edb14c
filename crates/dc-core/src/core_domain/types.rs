use std::fmt;

// ---------------------------------------------------------------------------
// String-based identity newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Clone,
            Debug,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(DialogueId);
string_newtype!(ItemId);
string_newtype!(AnnotatorId);
string_newtype!(SessionId);

impl ItemId {
    /// Item id of a whole dialogue.
    pub fn for_dialogue(dialogue: &DialogueId) -> Self {
        Self(dialogue.as_str().to_owned())
    }

    /// Item id of a single message, `<dialogue_id>#<message_index>`.
    pub fn for_message(dialogue: &DialogueId, message_index: usize) -> Self {
        Self(format!("{dialogue}#{message_index}"))
    }

    /// Splits a message item id into its dialogue id and message index.
    ///
    /// Returns `None` for dialogue-level item ids. A dialogue id that itself
    /// contains `#` reads as a message target here; validation rejects such
    /// ids.
    pub fn message_target(&self) -> Option<(DialogueId, usize)> {
        let (dialogue, index) = self.0.rsplit_once('#')?;
        let index = index.parse().ok()?;
        Some((DialogueId::new(dialogue), index))
    }
}

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
            serde::Deserialize,
        )]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary! {
    /// Therapeutic intent of an assistant turn.
    Intent {
        Validate => "validate",
        ProbeStory => "probe_story",
        ProbeRoot => "probe_root",
        Reframe => "reframe",
        SuggestExperiment => "suggest_experiment",
        OfferMindfulness => "offer_mindfulness",
        SafetyCheck => "safety_check",
        Emergency => "emergency",
        Close => "close",
        Other => "other",
    }
}

vocabulary! {
    Sentiment {
        VeryNegative => "very_negative",
        Negative => "negative",
        Neutral => "neutral",
        Positive => "positive",
    }
}

vocabulary! {
    /// Self-harm / crisis severity. Declaration order is severity order.
    RiskLevel {
        None => "none",
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

vocabulary! {
    SessionType {
        CheckIn => "check-in",
        GentleDeep => "gentle_deep",
        MicroPractice => "micro_practice",
    }
}

vocabulary! {
    Role {
        User => "user",
        Assistant => "assistant",
    }
}

vocabulary! {
    AgeRange {
        From18To25 => "18-25",
        From26To30 => "26-30",
        From31To35 => "31-35",
        From36To40 => "36-40",
        From41To50 => "41-50",
        Over50 => "50+",
    }
}

vocabulary! {
    /// Clinician verdict on a dialogue.
    ReviewStatus {
        Approved => "approved",
        NeedsRevision => "needs_revision",
        Rejected => "rejected",
    }
}

/// Concern topics the synthetic generator draws from by default.
pub const DEFAULT_CONCERNS: &[&str] = &[
    "self-worth",
    "anxiety",
    "relationships",
    "grief",
    "stress",
    "depression",
    "anger",
    "loneliness",
];

/// Maps an intent to the therapeutic technique it exercises.
pub fn technique_for_intent(intent: Intent) -> &'static str {
    match intent {
        Intent::Validate => "validation",
        Intent::ProbeStory | Intent::ProbeRoot => "exploration",
        Intent::Reframe => "cognitive_reframing",
        Intent::SuggestExperiment => "behavioral_experiment",
        Intent::OfferMindfulness => "mindfulness",
        _ => "other",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
