use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dc_core::core::{
    Corpus, CorpusStatistics, DialogueMerger, LabelSet, MergedDialogues, RawCorpus, Review,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::documents::{
    LabelSetDocument, MergedCorpusDocument, MergedLabelDocument, ReviewSetDocument,
};
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Generic JSON IO
// ---------------------------------------------------------------------------

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(value)
}

/// Writes pretty JSON to `path` through [`write_atomic`].
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Writes `bytes` next to `path` under a temporary name, then renames it
/// into place. Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output");
    let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    {
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "document written");
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_owned())
}

// ---------------------------------------------------------------------------
// Corpora
// ---------------------------------------------------------------------------

/// Reads a corpus without any schema checks; input for the validator.
pub fn load_raw_corpus(path: &Path) -> Result<RawCorpus, StoreError> {
    read_json(path)
}

pub fn load_corpus(path: &Path) -> Result<Corpus, StoreError> {
    let raw = load_raw_corpus(path)?;
    let corpus = Corpus::from_raw(raw)?;
    tracing::debug!(path = %path.display(), dialogues = corpus.dialogues.len(), "corpus loaded");
    Ok(corpus)
}

/// Saves with statistics recomputed from the dialogues.
pub fn save_corpus(path: &Path, corpus: Corpus) -> Result<Corpus, StoreError> {
    let corpus = corpus.with_fresh_statistics();
    write_json_atomic(path, &corpus)?;
    Ok(corpus)
}

/// Loads every source in order into one merger. Any missing source aborts
/// the load.
pub fn load_dialogue_sources(paths: &[PathBuf]) -> Result<DialogueMerger, StoreError> {
    let mut merger = DialogueMerger::new();
    for path in paths {
        let corpus = load_corpus(path)?;
        merger.add_source(path.display().to_string(), corpus.dialogues);
    }
    Ok(merger)
}

pub fn save_merged_dialogues(
    path: &Path,
    merged: MergedDialogues,
    merged_at: DateTime<Utc>,
) -> Result<MergedCorpusDocument, StoreError> {
    let statistics = CorpusStatistics::from_dialogues(&merged.dialogues);
    let doc = MergedCorpusDocument {
        version: dc_core::core::CORPUS_VERSION.to_owned(),
        description: format!("Merged dialogues ({} examples)", merged.dialogues.len()),
        merged_at,
        source_files: merged.sources,
        dialogues: merged.dialogues,
        statistics,
    };
    write_json_atomic(path, &doc)?;
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Label sets, reviews, merged labels
// ---------------------------------------------------------------------------

/// Loads a label set; a missing annotator or session id falls back to the
/// file stem.
pub fn load_label_set(path: &Path) -> Result<LabelSet, StoreError> {
    let doc: LabelSetDocument = read_json(path)?;
    Ok(doc.into_label_set(&file_stem(path)))
}

pub fn save_label_set(path: &Path, set: &LabelSet, total_items: usize) -> Result<(), StoreError> {
    write_json_atomic(path, &LabelSetDocument::from_label_set(set, total_items))
}

pub fn load_reviews(path: &Path) -> Result<Vec<Review>, StoreError> {
    let doc: ReviewSetDocument = read_json(path)?;
    Ok(doc.reviews)
}

pub fn save_reviews(
    path: &Path,
    source_file: impl Into<String>,
    reviews: &[Review],
) -> Result<(), StoreError> {
    write_json_atomic(path, &ReviewSetDocument::new(source_file, reviews.to_vec()))
}

pub fn load_merged_labels(path: &Path) -> Result<MergedLabelDocument, StoreError> {
    read_json(path)
}

pub fn save_merged_labels(path: &Path, doc: &MergedLabelDocument) -> Result<(), StoreError> {
    write_json_atomic(path, doc)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use dc_core::core::{
        AnnotatorId, DialogueId, DuplicateWarning, Intent, ItemId, LabelRecord, ReviewStatus,
        SessionId,
    };
    use tempfile::tempdir;

    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn corpus_json(ids: &[&str]) -> String {
        let dialogues: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{
                        "dialogue_id": "{id}",
                        "session_type": "check-in",
                        "user_profile": {{"concern": "stress", "mood_score": 4}},
                        "messages": [
                            {{"role": "user", "text": "opening from {id}"}},
                            {{"role": "assistant", "text": "reply", "intent": "validate",
                              "sentiment": "neutral", "risk_level": "none"}}
                        ]
                    }}"#
                )
            })
            .collect();
        format!(
            r#"{{"version": "1.0", "description": "test", "dialogues": [{}]}}"#,
            dialogues.join(",")
        )
    }

    #[test]
    fn test_missing_file_is_missing_resource() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        let err = load_corpus(&path).expect_err("missing corpus");
        assert!(matches!(err, StoreError::MissingResource(ref p) if p == &path));
    }

    #[test]
    fn test_save_corpus_writes_statistics_and_reloads() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in.json");
        fs::write(&input, corpus_json(&["seed_001", "seed_002"])).expect("write input");

        let corpus = load_corpus(&input).expect("load corpus");
        let output = dir.path().join("nested/out.json");
        let saved = save_corpus(&output, corpus).expect("save corpus");

        let stats = saved.statistics.as_ref().expect("statistics computed");
        assert_eq!(stats.total_dialogues, 2);

        let reloaded = load_corpus(&output).expect("reload");
        assert_eq!(reloaded.dialogues, saved.dialogues);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_schema_error_carries_index() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("bad.json");
        fs::write(
            &input,
            r#"{"dialogues": [{"dialogue_id": "x", "session_type": "weekly"}]}"#,
        )
        .expect("write input");

        let err = load_corpus(&input).expect_err("schema error");
        assert!(matches!(err, StoreError::Schema(ref e) if e.index == 0));
        assert!(load_raw_corpus(&input).is_ok());
    }

    #[test]
    fn test_load_sources_keeps_first_duplicate() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fs::write(&a, corpus_json(&["seed_001"])).expect("write a");
        fs::write(&b, corpus_json(&["seed_001", "seed_002"])).expect("write b");

        let merger = load_dialogue_sources(&[a.clone(), b.clone()]).expect("load sources");
        assert_eq!(merger.dialogues().len(), 2);
        assert_eq!(
            merger.warnings(),
            &[DuplicateWarning::Identity {
                dialogue_id: DialogueId::new("seed_001"),
                source: b.display().to_string(),
            }]
        );

        let out = dir.path().join("merged.json");
        let doc = save_merged_dialogues(&out, merger.finish(false), ts("2026-03-04T12:00:00Z"))
            .expect("save merged");
        assert_eq!(doc.statistics.total_dialogues, 2);
        assert_eq!(doc.source_files.len(), 2);
        let reloaded = load_corpus(&out).expect("merged file is a corpus");
        assert_eq!(reloaded.dialogues.len(), 2);
    }

    #[test]
    fn test_load_sources_fails_on_missing_source() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.json");
        fs::write(&a, corpus_json(&["seed_001"])).expect("write a");
        let missing = dir.path().join("missing.json");

        let err = load_dialogue_sources(&[a, missing.clone()]).expect_err("missing source");
        assert!(matches!(err, StoreError::MissingResource(ref p) if p == &missing));
    }

    #[test]
    fn test_label_set_file_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("labels_ann_a.json");
        let set = LabelSet::from_records(
            AnnotatorId::new("ann-a"),
            SessionId::new("pass-1"),
            "seed.json",
            vec![LabelRecord {
                item_id: ItemId::new("seed_001"),
                intent: Some(Intent::Validate),
                sentiment: None,
                risk_level: None,
                notes: Some("short".into()),
                labeled_at: ts("2026-03-01T09:00:00Z"),
            }],
        );

        save_label_set(&path, &set, 5).expect("save label set");
        assert_eq!(load_label_set(&path).expect("load label set"), set);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["total_items"], 5);
        assert_eq!(raw["total_labels"], 1);
    }

    #[test]
    fn test_reviews_file_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("reviews.json");
        let reviews = vec![Review {
            dialogue_id: DialogueId::new("seed_001"),
            status: ReviewStatus::Approved,
            reviewed_at: ts("2026-03-03T09:05:00Z"),
            reviewer: "clinician".into(),
            feedback: None,
            notes: Vec::new(),
        }];

        save_reviews(&path, "seed.json", &reviews).expect("save reviews");
        assert_eq!(load_reviews(&path).expect("load reviews"), reviews);
    }
}
