use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Deserialize;

use crate::core::{
    max_risk_level, mode_sentiment, technique_for_intent, AgeRange, Clock, Dialogue, DialogueId,
    DialogueLabels, ExternalGenerator, GenerationError, GenerationPrompt, Intent, Message,
    RiskLevel, Role, Sentiment, SessionType, UserProfile, DEFAULT_CONCERNS,
};

// ---------------------------------------------------------------------------
// Template tables
// ---------------------------------------------------------------------------

const FALLBACK_CONCERN: &str = "anxiety";

fn opening_templates(concern: &str) -> &'static [&'static str] {
    match concern {
        "self-worth" => &[
            "I keep thinking I'm not good enough.",
            "I feel like I'm a failure.",
            "I can't stop thinking that I'm worthless.",
            "I always feel like I don't measure up.",
            "I have this belief that I'm fundamentally flawed.",
        ],
        "relationships" => &[
            "I'm struggling with my relationship with {person}.",
            "I feel disconnected from {person}.",
            "I'm worried about how {person} sees me.",
            "I don't know how to communicate with {person}.",
            "I feel like {person} doesn't understand me.",
        ],
        "grief" => &[
            "I'm still struggling with the loss of {person}.",
            "I can't seem to move on from {event}.",
            "I feel stuck in my grief.",
            "I don't know how to process this loss.",
            "I'm having a hard time accepting what happened.",
        ],
        "stress" => &[
            "I'm feeling overwhelmed by {situation}.",
            "I can't handle all this stress.",
            "I feel like I'm drowning in responsibilities.",
            "Everything feels like too much right now.",
            "I'm stressed about {topic}.",
        ],
        _ => &[
            "I've been feeling really anxious about {topic}.",
            "I'm worried that {worry}.",
            "I can't stop worrying about {topic}.",
            "I feel anxious whenever I think about {topic}.",
            "My anxiety about {topic} is overwhelming.",
        ],
    }
}

const TOPICS: &[&str] = &["work", "relationships", "the future", "my health", "family", "school"];
const WORRIES: &[&str] = &[
    "I won't be able to handle it",
    "something bad will happen",
    "I'll fail",
    "I'm not good enough",
];
const PEOPLE: &[&str] = &["my partner", "my friend", "my family", "my colleague", "my parent"];
const EVENTS: &[&str] = &["the breakup", "the loss", "what happened", "the argument"];
const SITUATIONS: &[&str] = &["work", "family", "everything", "my relationships"];
const DIFFICULTIES: &[&str] = &["difficult", "hard", "heavy", "painful", "challenging"];

fn assistant_patterns(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::ProbeStory => &[
            "Would you like to tell me more about that?",
            "What happened that made you feel that way?",
            "Can you share more about what that was like?",
            "I'd like to understand better. What was that experience like?",
            "Tell me more about when that happened.",
        ],
        Intent::ProbeRoot => &[
            "When did you first remember feeling this way?",
            "What do you think might be underneath that feeling?",
            "Where do you think this belief comes from?",
            "When did this pattern first start?",
            "What's the earliest memory you have of feeling this?",
        ],
        Intent::Reframe => &[
            "Let's look at that thought together. What evidence supports it? \
             And what contradicts it?",
            "I wonder if there's another way to see that.",
            "What if we looked at this from a different angle?",
            "Can we explore that thought together?",
            "Let's test that belief. What would someone who cares about you say?",
        ],
        Intent::SuggestExperiment => &[
            "Would you be open to a small experiment this week?",
            "What if you tried noticing that thought once a day and writing down \
             what happened next?",
            "Could you try one small step and see how it feels?",
            "How would it be to test that belief in a low-stakes situation?",
        ],
        Intent::OfferMindfulness => &[
            "Would you like to pause for a moment and take a slow breath with me?",
            "Let's try noticing where you feel this in your body right now.",
            "Can we take a few seconds to ground ourselves together?",
            "What do you notice if you just sit with that feeling for a moment?",
        ],
        _ => &[
            "That sounds {difficulty}. I'm sorry you're carrying that.",
            "That must be {difficulty}. I hear you.",
            "I understand. That's a lot to carry.",
            "That sounds really {difficulty}.",
            "I'm sorry you're going through that.",
        ],
    }
}

fn user_replies(after: Intent) -> &'static [&'static str] {
    match after {
        Intent::ProbeStory => &[
            "It happened last week.",
            "I'm not sure when it started.",
            "It's been going on for a while.",
            "Recently, I guess.",
            "I can't remember exactly.",
        ],
        Intent::ProbeRoot => &[
            "I think it started when I was younger.",
            "I'm not sure where it comes from.",
            "Maybe from my childhood?",
            "I don't know.",
            "It's hard to say.",
        ],
        Intent::Reframe => &[
            "I never thought about it that way.",
            "That's an interesting perspective.",
            "I'm not sure I see it that way.",
            "Maybe you're right.",
            "I'll think about that.",
        ],
        _ => &[
            "Yes, I think so.",
            "I'm not sure.",
            "Maybe.",
            "I guess I could try.",
            "That makes sense.",
        ],
    }
}

const ASSISTANT_SENTIMENTS: &[Sentiment] =
    &[Sentiment::Negative, Sentiment::VeryNegative, Sentiment::Neutral];

const SYSTEM_PROMPT: &str = "You write short therapeutic coaching dialogues used as training data. \
The user talks about {concern}. The assistant responds with compassion and validation, \
uses gentle non-judgmental language, and may probe, reframe, suggest a small experiment \
or offer a mindfulness pause. Keep each turn to 2-4 sentences. \
Reply with JSON only: {\"messages\": [{\"role\": \"user\"|\"assistant\", \"text\": \"...\", \
\"intent\": \"...\", \"sentiment\": \"...\"}]}. The first message must come from the user.";

// ---------------------------------------------------------------------------
// TextSource
// ---------------------------------------------------------------------------

/// Where dialogue text comes from. Sources are tried in order; `Template`
/// cannot fail and always ends the list.
#[derive(Clone)]
pub enum TextSource {
    External {
        generator: Arc<dyn ExternalGenerator>,
        /// Fraction of items routed to this source.
        share: f64,
    },
    Template,
}

impl std::fmt::Debug for TextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextSource::External { generator, share } => f
                .debug_struct("External")
                .field("generator", &generator.name())
                .field("share", share)
                .finish(),
            TextSource::Template => f.write_str("Template"),
        }
    }
}

// ---------------------------------------------------------------------------
// Seed expansion
// ---------------------------------------------------------------------------

/// Relative weights for drawing session types and concerns when a seed
/// corpus is grown. Weights need not sum to one.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpansionWeights {
    pub session_types: Vec<(SessionType, f64)>,
    pub concerns: Vec<(String, f64)>,
}

impl Default for ExpansionWeights {
    fn default() -> Self {
        Self {
            session_types: vec![
                (SessionType::GentleDeep, 0.5),
                (SessionType::CheckIn, 0.3),
                (SessionType::MicroPractice, 0.2),
            ],
            concerns: DEFAULT_CONCERNS.iter().map(|c| ((*c).to_owned(), 1.0)).collect(),
        }
    }
}

/// Seed dialogues, unchanged and in order, followed by generated ones.
#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
    pub dialogues: Vec<Dialogue>,
    pub seeds: usize,
    pub generated: usize,
}

fn weighted<R: Rng + ?Sized, T: Clone>(rng: &mut R, options: &[(T, f64)]) -> Option<T> {
    options
        .choose_weighted(rng, |option: &(T, f64)| option.1)
        .ok()
        .map(|(value, _)| value.clone())
}

// ---------------------------------------------------------------------------
// SyntheticGenerator
// ---------------------------------------------------------------------------

pub struct SyntheticGenerator<R> {
    rng: R,
    clock: Arc<dyn Clock>,
    sources: Vec<TextSource>,
}

impl<R: Rng + Send> SyntheticGenerator<R> {
    /// Template-only generator.
    pub fn new(rng: R, clock: Arc<dyn Clock>) -> Self {
        Self {
            rng,
            clock,
            sources: vec![TextSource::Template],
        }
    }

    /// Routes `share` of the items to `generator` before falling back to templates.
    pub fn with_external(mut self, generator: Arc<dyn ExternalGenerator>, share: f64) -> Self {
        let position = self
            .sources
            .iter()
            .position(|s| matches!(s, TextSource::Template))
            .unwrap_or(self.sources.len());
        self.sources.insert(
            position,
            TextSource::External {
                generator,
                share: share.clamp(0.0, 1.0),
            },
        );
        self
    }

    pub fn sources(&self) -> &[TextSource] {
        &self.sources
    }

    /// One dialogue of `num_turns` messages-worth of turns (at least 2).
    pub async fn generate(
        &mut self,
        concern: &str,
        session_type: SessionType,
        num_turns: usize,
    ) -> Dialogue {
        let num_turns = num_turns.max(2);
        let sources = self.sources.clone();

        for source in &sources {
            match source {
                TextSource::External { generator, share } => {
                    if !self.rng.random_bool(*share) {
                        continue;
                    }
                    match self
                        .try_external(generator.as_ref(), concern, session_type, num_turns)
                        .await
                    {
                        Ok(dialogue) => return dialogue,
                        Err(err) => {
                            tracing::warn!(
                                generator = generator.name(),
                                concern,
                                error = %err,
                                "external generation failed; falling back to templates"
                            );
                        }
                    }
                }
                TextSource::Template => break,
            }
        }

        self.generate_from_templates(concern, session_type, num_turns)
    }

    /// `count` dialogues with concern and session type drawn uniformly from
    /// the given lists (empty lists mean all known values). Never fails.
    pub async fn generate_batch(
        &mut self,
        count: usize,
        concerns: &[String],
        session_types: &[SessionType],
    ) -> Vec<Dialogue> {
        let concerns: Vec<String> = if concerns.is_empty() {
            DEFAULT_CONCERNS.iter().map(|c| (*c).to_owned()).collect()
        } else {
            concerns.to_vec()
        };
        let session_types = if session_types.is_empty() {
            SessionType::ALL
        } else {
            session_types
        };

        let mut seen = HashSet::new();
        let mut dialogues = Vec::with_capacity(count);

        for _ in 0..count {
            let concern = concerns
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or_else(|| FALLBACK_CONCERN.to_owned());
            let session_type = session_types
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(SessionType::CheckIn);
            let num_turns = self.turns_for(session_type);

            let mut dialogue = self.generate(&concern, session_type, num_turns).await;
            while !seen.insert(dialogue.id.clone()) {
                let now = self.clock.now();
                dialogue.id = self.fresh_id(now);
            }
            dialogues.push(dialogue);
        }

        tracing::info!(count = dialogues.len(), "synthetic batch generated");
        dialogues
    }

    /// Keeps `seeds` and appends generated dialogues until the corpus holds
    /// `target` dialogues. New ids continue the `seed_NNN` numbering and
    /// skip ids the seeds already use. Empty or invalid weight lists fall
    /// back to gentle_deep and the default concern.
    pub async fn expand(
        &mut self,
        seeds: Vec<Dialogue>,
        target: usize,
        weights: &ExpansionWeights,
    ) -> Expansion {
        let seed_count = seeds.len();
        let needed = target.saturating_sub(seed_count);
        let mut taken: HashSet<DialogueId> = seeds.iter().map(|d| d.id.clone()).collect();
        let mut next_number = seed_count + 1;
        let mut dialogues = seeds;
        dialogues.reserve(needed);

        for _ in 0..needed {
            let session_type = weighted(&mut self.rng, &weights.session_types)
                .unwrap_or(SessionType::GentleDeep);
            let concern = weighted(&mut self.rng, &weights.concerns)
                .unwrap_or_else(|| FALLBACK_CONCERN.to_owned());
            let num_turns = self.turns_for(session_type);

            let mut dialogue = self.generate(&concern, session_type, num_turns).await;
            dialogue.id = loop {
                let id = DialogueId::new(format!("seed_{next_number:03}"));
                next_number += 1;
                if taken.insert(id.clone()) {
                    break id;
                }
            };
            dialogues.push(dialogue);
        }

        tracing::info!(
            seeds = seed_count,
            generated = needed,
            total = dialogues.len(),
            "seed corpus expanded"
        );
        Expansion {
            dialogues,
            seeds: seed_count,
            generated: needed,
        }
    }

    /// Template dialogue; deterministic for a given rng state and clock.
    pub fn generate_from_templates(
        &mut self,
        concern: &str,
        session_type: SessionType,
        num_turns: usize,
    ) -> Dialogue {
        let num_turns = num_turns.max(2);
        let template = pick(&mut self.rng, opening_templates(concern));
        let opening = self.fill(template);
        let mut messages = vec![Message::user(opening)];

        for turn in 0..num_turns - 1 {
            let intent = self.intent_for_turn(turn);
            let pattern = pick(&mut self.rng, assistant_patterns(intent));
            let text = self.fill(pattern);
            let sentiment = ASSISTANT_SENTIMENTS
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(Sentiment::Neutral);
            messages.push(Message::assistant(text, intent, sentiment, RiskLevel::None));

            if turn < num_turns - 2 {
                let reply = pick(&mut self.rng, user_replies(intent));
                messages.push(Message::user(reply));
            }
        }

        self.assemble(concern, session_type, messages, "template".to_owned())
    }

    /// Turn count range per session type.
    pub fn turns_for(&mut self, session_type: SessionType) -> usize {
        match session_type {
            SessionType::CheckIn => self.rng.random_range(2..=4),
            SessionType::MicroPractice => self.rng.random_range(2..=3),
            SessionType::GentleDeep => self.rng.random_range(4..=8),
        }
    }

    async fn try_external(
        &mut self,
        generator: &dyn ExternalGenerator,
        concern: &str,
        session_type: SessionType,
        num_turns: usize,
    ) -> Result<Dialogue, GenerationError> {
        let prompt = GenerationPrompt {
            system: SYSTEM_PROMPT.replace("{concern}", concern),
            request: format!(
                "Generate a {session_type} session dialogue about {concern}. \
                 Include {num_turns} messages in total."
            ),
            concern: concern.to_owned(),
            session_type,
        };
        let content = generator.complete(&prompt).await?;
        let messages = parse_external_dialogue(&content)?;
        let method = format!("external:{}", generator.name());
        Ok(self.assemble(concern, session_type, messages, method))
    }

    fn intent_for_turn(&mut self, turn: usize) -> Intent {
        match turn {
            0 => Intent::Validate,
            1 => Intent::ProbeStory,
            2 => pick_copy(&mut self.rng, &[Intent::ProbeRoot, Intent::Reframe]),
            _ => pick_copy(
                &mut self.rng,
                &[
                    Intent::ProbeRoot,
                    Intent::Reframe,
                    Intent::SuggestExperiment,
                    Intent::OfferMindfulness,
                ],
            ),
        }
    }

    fn fill(&mut self, template: &str) -> String {
        let slots: [(&str, &[&str]); 6] = [
            ("{topic}", TOPICS),
            ("{worry}", WORRIES),
            ("{person}", PEOPLE),
            ("{event}", EVENTS),
            ("{situation}", SITUATIONS),
            ("{difficulty}", DIFFICULTIES),
        ];
        let mut text = template.to_owned();
        for (slot, values) in slots {
            if text.contains(slot) {
                text = text.replace(slot, pick(&mut self.rng, values));
            }
        }
        text
    }

    fn fresh_id(&mut self, now: DateTime<Utc>) -> DialogueId {
        DialogueId::new(format!(
            "synthetic_{}_{:08x}",
            now.format("%Y%m%d_%H%M%S"),
            self.rng.random::<u32>()
        ))
    }

    fn assemble(
        &mut self,
        concern: &str,
        session_type: SessionType,
        messages: Vec<Message>,
        generation_method: String,
    ) -> Dialogue {
        let now = self.clock.now();
        let base = now - Duration::days(self.rng.random_range(1..=30));
        let messages: Vec<Message> = messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| {
                message.with_timestamp(base + Duration::seconds(message_offset_secs(index)))
            })
            .collect();

        let primary_intent = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.intent)
            .unwrap_or(Intent::Validate);

        let labels = DialogueLabels {
            primary_intent: Some(primary_intent),
            overall_sentiment: Some(mode_sentiment(&messages).unwrap_or(Sentiment::Negative)),
            max_risk_level: Some(max_risk_level(&messages)),
            therapeutic_technique: Some(technique_for_intent(primary_intent).to_owned()),
            synthetic: true,
            generated_at: Some(now),
            generation_method: Some(generation_method),
            ..DialogueLabels::default()
        };

        let user_profile = UserProfile {
            age_range: AgeRange::ALL.choose(&mut self.rng).copied(),
            concern: concern.to_owned(),
            mood_score: Some(self.rng.random_range(3..=7)),
            extra: Default::default(),
        };

        Dialogue {
            id: self.fresh_id(now),
            session_type,
            user_profile,
            messages,
            labels: Some(labels),
            extra: Default::default(),
        }
    }
}

/// Seconds after the opening message. Assistant turn `k` lands at
/// `5 + 30k`, the user reply that follows it at `10 + 30k`.
fn message_offset_secs(index: usize) -> i64 {
    if index == 0 {
        return 0;
    }
    let turn = ((index - 1) / 2) as i64;
    if index % 2 == 1 {
        5 + 30 * turn
    } else {
        10 + 30 * turn
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, options: &[&'static str]) -> &'static str {
    options.choose(rng).copied().unwrap_or_default()
}

fn pick_copy<R: Rng + ?Sized, T: Copy>(rng: &mut R, options: &[T]) -> T {
    options[rng.random_range(0..options.len())]
}

// ---------------------------------------------------------------------------
// External response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ExternalPayload {
    Wrapped { messages: Vec<ExternalMessage> },
    Bare(Vec<ExternalMessage>),
}

#[derive(Deserialize)]
struct ExternalMessage {
    role: Role,
    #[serde(alias = "content")]
    text: String,
    #[serde(default)]
    intent: Option<Intent>,
    #[serde(default)]
    sentiment: Option<Sentiment>,
}

/// Turns generator output into messages. Accepts an object with a
/// `messages` array or a bare array, optionally inside a code fence.
/// Assistant risk is always `none`.
pub fn parse_external_dialogue(content: &str) -> Result<Vec<Message>, GenerationError> {
    let body = strip_code_fence(content);
    let payload: ExternalPayload =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    let raw = match payload {
        ExternalPayload::Wrapped { messages } | ExternalPayload::Bare(messages) => messages,
    };

    if raw.len() < 2 {
        return Err(GenerationError::Malformed(format!(
            "expected at least 2 messages, got {}",
            raw.len()
        )));
    }
    if raw[0].role != Role::User {
        return Err(GenerationError::Malformed(
            "first message must come from the user".to_owned(),
        ));
    }
    if let Some(index) = raw.iter().position(|m| m.text.trim().is_empty()) {
        return Err(GenerationError::Malformed(format!(
            "message {index} has empty text"
        )));
    }
    if raw.iter().all(|m| m.role != Role::Assistant) {
        return Err(GenerationError::Malformed(
            "no assistant message".to_owned(),
        ));
    }

    Ok(raw
        .into_iter()
        .map(|m| match m.role {
            Role::User => Message::user(m.text.trim()),
            Role::Assistant => Message::assistant(
                m.text.trim(),
                m.intent.unwrap_or(Intent::Other),
                m.sentiment.unwrap_or(Sentiment::Neutral),
                RiskLevel::None,
            ),
        })
        .collect())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
