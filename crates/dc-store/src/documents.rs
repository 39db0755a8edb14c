use chrono::{DateTime, Utc};
use dc_core::core::{
    AdjudicationCounts, AnnotatorId, CorpusStatistics, Dialogue, DroppedItem, LabelRecord,
    LabelSet, MergeOutcome, MergeStrategy, MergedLabel, Review, SessionId, CORPUS_VERSION,
};
use serde::{Deserialize, Serialize};

fn default_version() -> String {
    CORPUS_VERSION.to_owned()
}

/// On-disk form of one labeling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSetDocument {
    #[serde(default = "default_version")]
    pub version: String,
    /// Older files carry no annotator; readers fall back to the file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator: Option<AnnotatorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub total_items: usize,
    #[serde(default)]
    pub total_labels: usize,
    #[serde(default)]
    pub labels: Vec<LabelRecord>,
}

impl LabelSetDocument {
    pub fn from_label_set(set: &LabelSet, total_items: usize) -> Self {
        Self {
            version: default_version(),
            annotator: Some(set.annotator.clone()),
            session_id: Some(set.session_id.clone()),
            source_file: set.source_file.clone(),
            total_items,
            total_labels: set.len(),
            labels: set.labels().to_vec(),
        }
    }

    /// `fallback_name` stands in for a missing annotator or session id.
    pub fn into_label_set(self, fallback_name: &str) -> LabelSet {
        let annotator = self
            .annotator
            .unwrap_or_else(|| AnnotatorId::new(fallback_name));
        let session_id = self
            .session_id
            .unwrap_or_else(|| SessionId::new(fallback_name));
        LabelSet::from_records(annotator, session_id, self.source_file, self.labels)
    }
}

/// On-disk form of one clinician review pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSetDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub total_reviews: usize,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

impl ReviewSetDocument {
    pub fn new(source_file: impl Into<String>, reviews: Vec<Review>) -> Self {
        Self {
            version: default_version(),
            source_file: source_file.into(),
            total_reviews: reviews.len(),
            reviews,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLabelDocument {
    #[serde(default = "default_version")]
    pub version: String,
    pub strategy: MergeStrategy,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub total_labels: usize,
    #[serde(default)]
    pub dropped: Vec<DroppedItem>,
    #[serde(default)]
    pub labels: Vec<MergedLabel>,
}

impl MergedLabelDocument {
    pub fn new(strategy: MergeStrategy, source_files: Vec<String>, outcome: MergeOutcome) -> Self {
        Self {
            version: default_version(),
            strategy,
            source_files,
            total_labels: outcome.records.len(),
            dropped: outcome.dropped,
            labels: outcome.records,
        }
    }
}

/// Training-eligible dialogues plus the size of every adjudication bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicatedCorpusDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub reviews_file: String,
    #[serde(default)]
    pub include_revision: bool,
    #[serde(default)]
    pub total_dialogues: usize,
    #[serde(flatten)]
    pub counts: AdjudicationCounts,
    pub dialogues: Vec<Dialogue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<CorpusStatistics>,
}

/// A corpus assembled from several sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCorpusDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub merged_at: DateTime<Utc>,
    #[serde(default)]
    pub source_files: Vec<String>,
    pub dialogues: Vec<Dialogue>,
    pub statistics: CorpusStatistics,
}
