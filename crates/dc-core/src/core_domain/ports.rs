use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::core::{GenerationError, SessionType};

// ---------------------------------------------------------------------------
// ExternalGenerator — remote text source for synthetic dialogues
// ---------------------------------------------------------------------------

/// Request handed to an external text generator.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationPrompt {
    pub system: String,
    pub request: String,
    pub concern: String,
    pub session_type: SessionType,
}

/// Produces raw dialogue text (JSON) for a prompt. Object-safe async via Pin<Box>.
pub trait ExternalGenerator: Send + Sync {
    /// Short name recorded as the generation method.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        prompt: &'a GenerationPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<String, GenerationError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Clock — injectable time source for deterministic testing
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
