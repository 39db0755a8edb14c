use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::core::{
    AgeRange, CorpusStatistics, Intent, RawCorpus, RiskLevel, Role, Sentiment, SessionType,
};

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Where a finding was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueLocation {
    Corpus,
    Dialogue(usize),
    Message { dialogue: usize, message: usize },
    Label(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub enum IssueKind {
    Missing,
    Invalid { value: String },
    Empty,
    NotAnObject,
    NotAnArray,
    TooFewMessages,
    MoodOutOfRange,
    NoEntries,
    LowShare { percent: f64 },
    HighShare { percent: f64 },
    RiskMismatch { declared: RiskLevel, derived: RiskLevel },
    TimestampDecreasing,
    Inconsistent { detail: String },
    ReservedCharacter { value: String, reserved: char },
    Duplicate { value: String, first: usize },
}

/// One validator finding. Errors and warnings share this shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationIssue {
    pub location: IssueLocation,
    pub field: String,
    pub kind: IssueKind,
}

impl ValidationIssue {
    pub fn new(location: IssueLocation, field: impl Into<String>, kind: IssueKind) -> Self {
        Self {
            location,
            field: field.into(),
            kind,
        }
    }

    pub fn dialogue_index(&self) -> Option<usize> {
        match self.location {
            IssueLocation::Dialogue(index) => Some(index),
            IssueLocation::Message { dialogue, .. } => Some(dialogue),
            IssueLocation::Corpus | IssueLocation::Label(_) => None,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            IssueLocation::Corpus => {}
            IssueLocation::Dialogue(d) => write!(f, "Dialogue {d}: ")?,
            IssueLocation::Message { dialogue, message } => {
                write!(f, "Dialogue {dialogue}, Message {message}: ")?
            }
            IssueLocation::Label(l) => write!(f, "Label {l}: ")?,
        }

        let field = &self.field;
        match &self.kind {
            IssueKind::Missing => write!(f, "Missing '{field}'"),
            IssueKind::Invalid { value } => write!(f, "Invalid {field} '{value}'"),
            IssueKind::Empty => write!(f, "Empty {field}"),
            IssueKind::NotAnObject => write!(f, "'{field}' must be an object"),
            IssueKind::NotAnArray => write!(f, "'{field}' must be an array"),
            IssueKind::TooFewMessages => write!(f, "Must have at least 2 messages"),
            IssueKind::MoodOutOfRange => write!(f, "Invalid {field} (must be 1-10)"),
            IssueKind::NoEntries => write!(f, "No {field} found"),
            IssueKind::LowShare { percent } => {
                write!(f, "Low representation of '{field}': {percent:.1}%")
            }
            IssueKind::HighShare { percent } => {
                write!(f, "High representation of '{field}': {percent:.1}%")
            }
            IssueKind::RiskMismatch { declared, derived } => write!(
                f,
                "{field} '{declared}' disagrees with message risk levels (expected '{derived}')"
            ),
            IssueKind::TimestampDecreasing => {
                write!(f, "{field} is earlier than the previous message")
            }
            IssueKind::Inconsistent { detail } => f.write_str(detail),
            IssueKind::ReservedCharacter { value, reserved } => {
                write!(f, "Invalid {field} '{value}' (must not contain '{reserved}')")
            }
            IssueKind::Duplicate { value, first } => {
                write!(f, "Duplicate {field} '{value}' (first used by dialogue {first})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DistributionThresholds
// ---------------------------------------------------------------------------

/// Session-type share bounds outside of which the corpus counts as skewed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistributionThresholds {
    pub min_share: f64,
    pub max_share: f64,
}

impl Default for DistributionThresholds {
    fn default() -> Self {
        Self {
            min_share: 0.10,
            max_share: 0.70,
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub stats: CorpusStatistics,
}

// ---------------------------------------------------------------------------
// DialogueValidator
// ---------------------------------------------------------------------------

/// Schema checks over a raw corpus. Findings are collected, never raised,
/// so one run reports every problem.
#[derive(Clone, Debug, Default)]
pub struct DialogueValidator {
    thresholds: DistributionThresholds,
}

struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Findings {
    fn error(&mut self, location: IssueLocation, field: &str, kind: IssueKind) {
        self.errors.push(ValidationIssue::new(location, field, kind));
    }

    fn warn(&mut self, location: IssueLocation, field: &str, kind: IssueKind) {
        self.warnings.push(ValidationIssue::new(location, field, kind));
    }
}

impl DialogueValidator {
    pub fn new(thresholds: DistributionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn validate(&self, corpus: &RawCorpus) -> ValidationReport {
        let mut findings = Findings {
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        let dialogues = &corpus.dialogues;

        if dialogues.is_empty() {
            findings.error(IssueLocation::Corpus, "dialogues", IssueKind::NoEntries);
            return ValidationReport {
                valid: false,
                errors: findings.errors,
                warnings: findings.warnings,
                stats: CorpusStatistics::default(),
            };
        }

        let mut first_seen = HashMap::new();
        for (index, dialogue) in dialogues.iter().enumerate() {
            validate_dialogue(dialogue, index, &mut first_seen, &mut findings);
        }

        let stats = CorpusStatistics::from_raw(dialogues);
        self.check_distribution(&stats, &mut findings);

        tracing::debug!(
            dialogues = dialogues.len(),
            errors = findings.errors.len(),
            warnings = findings.warnings.len(),
            "corpus validated"
        );

        ValidationReport {
            valid: findings.errors.is_empty(),
            errors: findings.errors,
            warnings: findings.warnings,
            stats,
        }
    }

    fn check_distribution(&self, stats: &CorpusStatistics, findings: &mut Findings) {
        for &session_type in SessionType::ALL {
            let share = stats.session_share(session_type);
            let percent = share * 100.0;
            if share < self.thresholds.min_share {
                findings.warn(
                    IssueLocation::Corpus,
                    session_type.as_str(),
                    IssueKind::LowShare { percent },
                );
            } else if share > self.thresholds.max_share {
                findings.warn(
                    IssueLocation::Corpus,
                    session_type.as_str(),
                    IssueKind::HighShare { percent },
                );
            }
        }
    }
}

/// Message item ids are `{dialogue_id}#{index}`, so a dialogue id may not
/// contain the separator itself.
const ITEM_SEPARATOR: char = '#';

fn validate_dialogue<'a>(
    value: &'a Value,
    index: usize,
    first_seen: &mut HashMap<&'a str, usize>,
    findings: &mut Findings,
) {
    let here = IssueLocation::Dialogue(index);
    let Some(dialogue) = value.as_object() else {
        findings.error(here, "dialogue", IssueKind::NotAnObject);
        return;
    };

    match field(dialogue, "dialogue_id") {
        None => findings.error(here, "dialogue_id", IssueKind::Missing),
        Some(Value::String(id)) if !id.trim().is_empty() => {
            if id.contains(ITEM_SEPARATOR) {
                findings.error(
                    here,
                    "dialogue_id",
                    IssueKind::ReservedCharacter {
                        value: id.clone(),
                        reserved: ITEM_SEPARATOR,
                    },
                );
            }
            if let Some(&first) = first_seen.get(id.as_str()) {
                findings.error(
                    here,
                    "dialogue_id",
                    IssueKind::Duplicate {
                        value: id.clone(),
                        first,
                    },
                );
            } else {
                first_seen.insert(id, index);
            }
        }
        Some(Value::String(_)) => findings.error(here, "dialogue_id", IssueKind::Empty),
        Some(other) => findings.error(here, "dialogue_id", invalid(other)),
    }

    check_vocabulary(dialogue, "session_type", "session_type", here, findings, true, |s| {
        SessionType::parse(s).is_some()
    });

    let mut valid_messages = None;
    match field(dialogue, "messages") {
        None => findings.error(here, "messages", IssueKind::Missing),
        Some(Value::Array(messages)) if messages.len() < 2 => {
            findings.error(here, "messages", IssueKind::TooFewMessages)
        }
        Some(Value::Array(messages)) => {
            validate_messages(messages, index, findings);
            valid_messages = Some(messages.as_slice());
        }
        Some(_) => findings.error(here, "messages", IssueKind::NotAnArray),
    }

    match field(dialogue, "user_profile") {
        None => findings.error(here, "user_profile", IssueKind::Missing),
        Some(Value::Object(profile)) => validate_profile(profile, here, findings),
        Some(_) => findings.error(here, "user_profile", IssueKind::NotAnObject),
    }

    match field(dialogue, "labels") {
        None => findings.warn(here, "labels", IssueKind::Missing),
        Some(Value::Object(labels)) => validate_labels(labels, valid_messages, here, findings),
        Some(_) => findings.error(here, "labels", IssueKind::NotAnObject),
    }
}

fn validate_profile(profile: &Map<String, Value>, here: IssueLocation, findings: &mut Findings) {
    if field(profile, "concern").is_none() {
        findings.error(here, "user_profile.concern", IssueKind::Missing);
    }

    match field(profile, "mood_score") {
        None => findings.warn(here, "user_profile.mood_score", IssueKind::Missing),
        Some(score) => {
            let in_range = score.as_i64().is_some_and(|s| (1..=10).contains(&s));
            if !in_range {
                findings.error(here, "mood_score", IssueKind::MoodOutOfRange);
            }
        }
    }

    check_vocabulary(profile, "age_range", "age_range", here, findings, false, |s| {
        AgeRange::parse(s).is_some()
    });
}

fn validate_labels(
    labels: &Map<String, Value>,
    messages: Option<&[Value]>,
    here: IssueLocation,
    findings: &mut Findings,
) {
    if field(labels, "primary_intent").is_none() {
        findings.warn(here, "labels.primary_intent", IssueKind::Missing);
    } else {
        check_vocabulary(labels, "primary_intent", "primary_intent", here, findings, false, |s| {
            Intent::parse(s).is_some()
        });
    }

    if field(labels, "overall_sentiment").is_none() {
        findings.warn(here, "labels.overall_sentiment", IssueKind::Missing);
    } else {
        check_vocabulary(
            labels,
            "overall_sentiment",
            "overall_sentiment",
            here,
            findings,
            false,
            |s| Sentiment::parse(s).is_some(),
        );
    }

    let declared = match field(labels, "max_risk_level") {
        None => None,
        Some(value) => match value.as_str().and_then(RiskLevel::parse) {
            Some(risk) => Some(risk),
            None => {
                findings.error(here, "max_risk_level", invalid(value));
                None
            }
        },
    };

    if let (Some(declared), Some(messages)) = (declared, messages) {
        let derived = messages
            .iter()
            .filter_map(|m| m.get("risk_level").and_then(Value::as_str))
            .filter_map(RiskLevel::parse)
            .max()
            .unwrap_or(RiskLevel::None);
        if declared != derived {
            findings.warn(
                here,
                "max_risk_level",
                IssueKind::RiskMismatch { declared, derived },
            );
        }
    }
}

fn validate_messages(messages: &[Value], dialogue: usize, findings: &mut Findings) {
    let mut previous: Option<DateTime<Utc>> = None;

    for (message_index, value) in messages.iter().enumerate() {
        let here = IssueLocation::Message {
            dialogue,
            message: message_index,
        };
        let Some(message) = value.as_object() else {
            findings.error(here, "message", IssueKind::NotAnObject);
            continue;
        };

        let role = match field(message, "role") {
            None => {
                findings.error(here, "role", IssueKind::Missing);
                None
            }
            Some(value) => {
                let role = value.as_str().and_then(Role::parse);
                if role.is_none() {
                    findings.error(here, "role", invalid(value));
                }
                role
            }
        };

        match field(message, "text") {
            None => findings.error(here, "text", IssueKind::Missing),
            Some(Value::String(text)) if !text.trim().is_empty() => {}
            Some(_) => findings.error(here, "text", IssueKind::Empty),
        }

        if role == Some(Role::Assistant) {
            check_vocabulary(message, "intent", "intent", here, findings, false, |s| {
                Intent::parse(s).is_some()
            });
            check_vocabulary(message, "sentiment", "sentiment", here, findings, false, |s| {
                Sentiment::parse(s).is_some()
            });
            check_vocabulary(message, "risk_level", "risk_level", here, findings, false, |s| {
                RiskLevel::parse(s).is_some()
            });
        }

        if let Some(timestamp) = message
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
        {
            if previous.is_some_and(|p| timestamp < p) {
                findings.warn(here, "timestamp", IssueKind::TimestampDecreasing);
            }
            previous = Some(timestamp);
        }
    }
}

/// Checks an enumerated field. Absent values are only reported when `required`.
fn check_vocabulary(
    object: &Map<String, Value>,
    key: &str,
    field_name: &str,
    here: IssueLocation,
    findings: &mut Findings,
    required: bool,
    accepts: impl Fn(&str) -> bool,
) {
    match field(object, key) {
        None if required => findings.error(here, field_name, IssueKind::Missing),
        None => {}
        Some(value) => {
            if !value.as_str().is_some_and(&accepts) {
                findings.error(here, field_name, invalid(value));
            }
        }
    }
}

/// Present, non-null field value.
fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|v| !v.is_null())
}

fn invalid(value: &Value) -> IssueKind {
    let value = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    IssueKind::Invalid { value }
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps (read as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
