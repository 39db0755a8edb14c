use crate::core::{DialogueId, ItemId};

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// A typed record could not be built from a raw corpus entry.
#[derive(Debug, thiserror::Error)]
#[error("dialogue {index}: {source}")]
pub struct SchemaError {
    pub index: usize,
    #[source]
    pub source: serde_json::Error,
}

/// A stage was invoked without the inputs it needs. Aborts the stage.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("need at least {required} label sets, got {actual}")]
    TooFewLabelSets { required: usize, actual: usize },
    #[error("no common items found across label sets")]
    NoCommonItems,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelingError {
    #[error("item {0} is not part of this labeling pass")]
    UnknownItem(ItemId),
    #[error("labeling pass already finished")]
    Finished,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("dialogue {0} is not part of this review pass")]
    UnknownDialogue(DialogueId),
}

/// Failure of the external text generator. Never surfaces from batch
/// generation; the template source takes over instead.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("external generator request failed: {0}")]
    Transport(String),
    #[error("external generator returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("malformed generator response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_precondition_errors() {
        let err = PreconditionError::TooFewLabelSets {
            required: 2,
            actual: 1,
        };
        assert_eq!(err.to_string(), "need at least 2 label sets, got 1");
        assert_eq!(
            PreconditionError::NoCommonItems.to_string(),
            "no common items found across label sets"
        );
    }

    #[test]
    fn test_display_labeling_unknown_item() {
        let err = LabelingError::UnknownItem(ItemId::new("seed_404"));
        assert_eq!(
            err.to_string(),
            "item seed_404 is not part of this labeling pass"
        );
    }

    #[test]
    fn test_display_generation_http_status() {
        let err = GenerationError::HttpStatus {
            status: 429,
            body: "slow down".into(),
        };
        assert_eq!(
            err.to_string(),
            "external generator returned HTTP 429: slow down"
        );
    }
}
