use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dc_core::core::{
    AnnotatorId, DialogueId, Intent, ItemId, LabelRecord, LabelSet, Review, ReviewNote,
    ReviewStatus, RiskLevel, SchemaError, Sentiment, SessionId,
};
use rusqlite::{params, types::Type, Connection, OptionalExtension};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS label_passes (
    session_id TEXT PRIMARY KEY,
    annotator TEXT NOT NULL,
    source_file TEXT NOT NULL,
    started_at TEXT NOT NULL,
    sealed_at TEXT
);

CREATE TABLE IF NOT EXISTS label_records (
    session_id TEXT NOT NULL REFERENCES label_passes(session_id),
    item_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    intent TEXT,
    sentiment TEXT,
    risk_level TEXT,
    notes TEXT,
    labeled_at TEXT NOT NULL,
    PRIMARY KEY (session_id, item_id)
);

CREATE TABLE IF NOT EXISTS review_passes (
    session_id TEXT PRIMARY KEY,
    reviewer TEXT NOT NULL,
    source_file TEXT NOT NULL,
    started_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reviews (
    session_id TEXT NOT NULL REFERENCES review_passes(session_id),
    dialogue_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL,
    reviewed_at TEXT NOT NULL,
    reviewer TEXT NOT NULL,
    feedback TEXT,
    notes TEXT NOT NULL,
    PRIMARY KEY (session_id, dialogue_id)
);

CREATE INDEX IF NOT EXISTS idx_label_passes_annotator ON label_passes(annotator);
CREATE INDEX IF NOT EXISTS idx_reviews_dialogue ON reviews(dialogue_id);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("missing resource: {}", .0.display())]
    MissingResource(PathBuf),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("label pass {0} is sealed")]
    SealedLabelSet(SessionId),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            return Self::MissingResource(path.to_path_buf());
        }
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One annotator's labeling pass as tracked by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPass {
    pub session_id: SessionId,
    pub annotator: AnnotatorId,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPass {
    pub session_id: SessionId,
    pub reviewer: String,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
}

pub trait AnnotationStore: Send + Sync {
    fn init(&self) -> Result<(), StoreError>;
    fn open_label_pass(&self, pass: &LabelPass) -> Result<(), StoreError>;
    /// Replaces any earlier record for the same item in the pass.
    fn upsert_label(&self, session_id: &SessionId, record: &LabelRecord)
        -> Result<(), StoreError>;
    fn seal_label_pass(
        &self,
        session_id: &SessionId,
        sealed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    fn get_label_pass(&self, session_id: &SessionId) -> Result<Option<LabelPass>, StoreError>;
    fn list_label_passes(&self) -> Result<Vec<LabelPass>, StoreError>;
    fn load_label_set(&self, session_id: &SessionId) -> Result<LabelSet, StoreError>;
    fn open_review_pass(&self, pass: &ReviewPass) -> Result<(), StoreError>;
    fn upsert_review(&self, session_id: &SessionId, review: &Review) -> Result<(), StoreError>;
    fn list_reviews(&self, session_id: &SessionId) -> Result<Vec<Review>, StoreError>;
}

/// Records a finished label set as a new pass and seals it.
pub fn persist_label_set(
    store: &dyn AnnotationStore,
    set: &LabelSet,
    started_at: DateTime<Utc>,
    sealed_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    store.open_label_pass(&LabelPass {
        session_id: set.session_id.clone(),
        annotator: set.annotator.clone(),
        source_file: set.source_file.clone(),
        started_at,
        sealed_at: None,
    })?;
    for record in set.labels() {
        store.upsert_label(&set.session_id, record)?;
    }
    store.seal_label_pass(&set.session_id, sealed_at)?;
    tracing::info!(
        session = %set.session_id,
        annotator = %set.annotator,
        labels = set.len(),
        "label pass persisted"
    );
    Ok(())
}

pub struct SqliteAnnotationStore {
    conn: Mutex<Connection>,
}

impl SqliteAnnotationStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite mutex poisoned")
    }
}

impl AnnotationStore for SqliteAnnotationStore {
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }
        conn.execute_batch(SCHEMA_SQL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::debug!(version = SCHEMA_VERSION, "annotation store schema initialized");
        Ok(())
    }

    fn open_label_pass(&self, pass: &LabelPass) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO label_passes (session_id, annotator, source_file, started_at, sealed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pass.session_id.as_str(),
                pass.annotator.as_str(),
                pass.source_file,
                pass.started_at.to_rfc3339(),
                pass.sealed_at.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn upsert_label(
        &self,
        session_id: &SessionId,
        record: &LabelRecord,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let sealed_at: Option<Option<String>> = conn
            .query_row(
                "SELECT sealed_at FROM label_passes WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match sealed_at {
            None => return Err(StoreError::NotFound(format!("label pass {session_id}"))),
            Some(Some(_)) => return Err(StoreError::SealedLabelSet(session_id.clone())),
            Some(None) => {}
        }

        conn.execute(
            "INSERT INTO label_records
                 (session_id, item_id, position, intent, sentiment, risk_level, notes, labeled_at)
             VALUES (?1, ?2,
                 (SELECT COUNT(*) FROM label_records WHERE session_id = ?1),
                 ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id, item_id) DO UPDATE SET
                 intent = excluded.intent,
                 sentiment = excluded.sentiment,
                 risk_level = excluded.risk_level,
                 notes = excluded.notes,
                 labeled_at = excluded.labeled_at",
            params![
                session_id.as_str(),
                record.item_id.as_str(),
                record.intent.map(|v| v.as_str()),
                record.sentiment.map(|v| v.as_str()),
                record.risk_level.map(|v| v.as_str()),
                record.notes.as_deref(),
                record.labeled_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn seal_label_pass(
        &self,
        session_id: &SessionId,
        sealed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE label_passes SET sealed_at = ?2
             WHERE session_id = ?1 AND sealed_at IS NULL",
            params![session_id.as_str(), sealed_at.to_rfc3339()],
        )?;
        if updated == 0 {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM label_passes WHERE session_id = ?1",
                    params![session_id.as_str()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(format!("label pass {session_id}")));
            }
            return Err(StoreError::SealedLabelSet(session_id.clone()));
        }
        Ok(())
    }

    fn get_label_pass(&self, session_id: &SessionId) -> Result<Option<LabelPass>, StoreError> {
        let conn = self.lock_conn();
        let pass = conn
            .query_row(
                "SELECT session_id, annotator, source_file, started_at, sealed_at
                 FROM label_passes
                 WHERE session_id = ?1",
                params![session_id.as_str()],
                label_pass_from_row,
            )
            .optional()?;
        Ok(pass)
    }

    fn list_label_passes(&self) -> Result<Vec<LabelPass>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT session_id, annotator, source_file, started_at, sealed_at
             FROM label_passes
             ORDER BY started_at ASC, session_id ASC",
        )?;
        let rows = stmt.query_map([], label_pass_from_row)?;
        let passes = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(passes)
    }

    fn load_label_set(&self, session_id: &SessionId) -> Result<LabelSet, StoreError> {
        let pass = self
            .get_label_pass(session_id)?
            .ok_or_else(|| StoreError::NotFound(format!("label pass {session_id}")))?;

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT item_id, intent, sentiment, risk_level, notes, labeled_at
             FROM label_records
             WHERE session_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            let item_id: String = row.get(0)?;
            let intent: Option<String> = row.get(1)?;
            let sentiment: Option<String> = row.get(2)?;
            let risk_level: Option<String> = row.get(3)?;
            let notes: Option<String> = row.get(4)?;
            let labeled_at: String = row.get(5)?;

            Ok(LabelRecord {
                item_id: ItemId::new(item_id),
                intent: parse_optional(1, "intent", intent, Intent::parse)?,
                sentiment: parse_optional(2, "sentiment", sentiment, Sentiment::parse)?,
                risk_level: parse_optional(3, "risk level", risk_level, RiskLevel::parse)?,
                notes,
                labeled_at: parse_datetime_utc(5, &labeled_at)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(LabelSet::from_records(
            pass.annotator,
            pass.session_id,
            pass.source_file,
            records,
        ))
    }

    fn open_review_pass(&self, pass: &ReviewPass) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO review_passes (session_id, reviewer, source_file, started_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO NOTHING",
            params![
                pass.session_id.as_str(),
                pass.reviewer,
                pass.source_file,
                pass.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_review(&self, session_id: &SessionId, review: &Review) -> Result<(), StoreError> {
        let notes = serde_json::to_string(&review.notes)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO reviews
                 (session_id, dialogue_id, position, status, reviewed_at, reviewer, feedback, notes)
             VALUES (?1, ?2,
                 (SELECT COUNT(*) FROM reviews WHERE session_id = ?1),
                 ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id, dialogue_id) DO UPDATE SET
                 status = excluded.status,
                 reviewed_at = excluded.reviewed_at,
                 reviewer = excluded.reviewer,
                 feedback = excluded.feedback,
                 notes = excluded.notes",
            params![
                session_id.as_str(),
                review.dialogue_id.as_str(),
                review.status.as_str(),
                review.reviewed_at.to_rfc3339(),
                review.reviewer,
                review.feedback.as_deref(),
                notes,
            ],
        )?;
        Ok(())
    }

    fn list_reviews(&self, session_id: &SessionId) -> Result<Vec<Review>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT dialogue_id, status, reviewed_at, reviewer, feedback, notes
             FROM reviews
             WHERE session_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            let dialogue_id: String = row.get(0)?;
            let status: String = row.get(1)?;
            let reviewed_at: String = row.get(2)?;
            let reviewer: String = row.get(3)?;
            let feedback: Option<String> = row.get(4)?;
            let notes: String = row.get(5)?;

            Ok(Review {
                dialogue_id: DialogueId::new(dialogue_id),
                status: ReviewStatus::parse(&status)
                    .ok_or_else(|| sql_text_parse_error(1, "review status", &status))?,
                reviewed_at: parse_datetime_utc(2, &reviewed_at)?,
                reviewer,
                feedback,
                notes: parse_notes(5, &notes)?,
            })
        })?;
        let reviews = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(reviews)
    }
}

fn label_pass_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LabelPass> {
    let session_id: String = row.get(0)?;
    let annotator: String = row.get(1)?;
    let source_file: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let sealed_at: Option<String> = row.get(4)?;

    Ok(LabelPass {
        session_id: SessionId::new(session_id),
        annotator: AnnotatorId::new(annotator),
        source_file,
        started_at: parse_datetime_utc(3, &started_at)?,
        sealed_at: sealed_at
            .map(|value| parse_datetime_utc(4, &value))
            .transpose()?,
    })
}

fn parse_optional<T>(
    column: usize,
    field: &'static str,
    value: Option<String>,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    value
        .map(|value| parse(&value).ok_or_else(|| sql_text_parse_error(column, field, &value)))
        .transpose()
}

fn parse_notes(column: usize, value: &str) -> rusqlite::Result<Vec<ReviewNote>> {
    serde_json::from_str(value).map_err(|_| sql_text_parse_error(column, "review notes", value))
}

fn parse_datetime_utc(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| sql_text_parse_error(column, "datetime", value))
}

fn sql_text_parse_error(column: usize, field: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid {field}: {value}"),
        )),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use dc_core::core::{
        AnnotatorId, DialogueId, Intent, ItemId, LabelRecord, LabelSet, Review, ReviewNote,
        ReviewStatus, RiskLevel, Sentiment, SessionId,
    };

    use super::{
        persist_label_set, AnnotationStore, LabelPass, ReviewPass, SqliteAnnotationStore,
        StoreError,
    };

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn setup_store() -> SqliteAnnotationStore {
        let store = SqliteAnnotationStore::new_in_memory().expect("in-memory store");
        store.init().expect("init schema");
        store
    }

    fn open_pass(store: &SqliteAnnotationStore, session: &str, annotator: &str) -> SessionId {
        let session_id = SessionId::new(session);
        store
            .open_label_pass(&LabelPass {
                session_id: session_id.clone(),
                annotator: AnnotatorId::new(annotator),
                source_file: "seed.json".to_string(),
                started_at: ts("2026-03-01T09:00:00Z"),
                sealed_at: None,
            })
            .expect("open label pass");
        session_id
    }

    fn record(item: &str, intent: Intent, at: &str) -> LabelRecord {
        LabelRecord {
            item_id: ItemId::new(item),
            intent: Some(intent),
            sentiment: Some(Sentiment::Negative),
            risk_level: Some(RiskLevel::Low),
            notes: None,
            labeled_at: ts(at),
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let store = setup_store();
        store.init().expect("second init");
        assert!(store.list_label_passes().expect("list passes").is_empty());
    }

    #[test]
    fn test_relabel_replaces_record_and_keeps_position() {
        let store = setup_store();
        let session = open_pass(&store, "pass-1", "ann-a");

        store
            .upsert_label(&session, &record("seed_001", Intent::Validate, "2026-03-01T09:01:00Z"))
            .expect("label seed_001");
        store
            .upsert_label(&session, &record("seed_002", Intent::Reframe, "2026-03-01T09:02:00Z"))
            .expect("label seed_002");
        store
            .upsert_label(&session, &record("seed_001", Intent::ProbeRoot, "2026-03-01T09:03:00Z"))
            .expect("relabel seed_001");

        let set = store.load_label_set(&session).expect("load label set");
        assert_eq!(set.len(), 2);
        assert_eq!(set.labels()[0].item_id.as_str(), "seed_001");
        assert_eq!(set.labels()[0].intent, Some(Intent::ProbeRoot));
        assert_eq!(set.labels()[0].labeled_at, ts("2026-03-01T09:03:00Z"));
        assert_eq!(set.labels()[1].item_id.as_str(), "seed_002");
        assert_eq!(set.annotator.as_str(), "ann-a");
    }

    #[test]
    fn test_sealed_pass_rejects_inserts() {
        let store = setup_store();
        let session = open_pass(&store, "pass-1", "ann-a");
        store
            .upsert_label(&session, &record("seed_001", Intent::Validate, "2026-03-01T09:01:00Z"))
            .expect("label before sealing");
        store
            .seal_label_pass(&session, ts("2026-03-01T10:00:00Z"))
            .expect("seal pass");

        let err = store
            .upsert_label(&session, &record("seed_002", Intent::Validate, "2026-03-01T10:01:00Z"))
            .expect_err("sealed pass must reject labels");
        assert!(matches!(err, StoreError::SealedLabelSet(ref id) if id.as_str() == "pass-1"));

        let err = store
            .seal_label_pass(&session, ts("2026-03-01T11:00:00Z"))
            .expect_err("pass cannot be sealed twice");
        assert!(matches!(err, StoreError::SealedLabelSet(_)));

        let pass = store
            .get_label_pass(&session)
            .expect("get pass")
            .expect("pass exists");
        assert_eq!(pass.sealed_at, Some(ts("2026-03-01T10:00:00Z")));
    }

    #[test]
    fn test_unknown_pass_is_not_found() {
        let store = setup_store();
        let missing = SessionId::new("nope");
        let err = store
            .upsert_label(&missing, &record("seed_001", Intent::Validate, "2026-03-01T09:01:00Z"))
            .expect_err("unknown pass");
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(matches!(
            store.load_label_set(&missing),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_persist_label_set_round_trip() {
        let store = setup_store();
        let set = LabelSet::from_records(
            AnnotatorId::new("ann-b"),
            SessionId::new("pass-2"),
            "seed.json",
            vec![
                record("seed_001", Intent::Validate, "2026-03-02T09:00:00Z"),
                record("seed_001#1", Intent::Emergency, "2026-03-02T09:01:00Z"),
            ],
        );

        persist_label_set(
            &store,
            &set,
            ts("2026-03-02T08:59:00Z"),
            ts("2026-03-02T09:30:00Z"),
        )
        .expect("persist label set");

        let loaded = store.load_label_set(&set.session_id).expect("load");
        assert_eq!(loaded, set);

        let passes = store.list_label_passes().expect("list passes");
        assert_eq!(passes.len(), 1);
        assert!(passes[0].sealed_at.is_some());
    }

    #[test]
    fn test_review_upsert_replaces_and_keeps_notes() {
        let store = setup_store();
        let session = SessionId::new("review-1");
        store
            .open_review_pass(&ReviewPass {
                session_id: session.clone(),
                reviewer: "dr-lee".to_string(),
                source_file: "seed.json".to_string(),
                started_at: ts("2026-03-03T09:00:00Z"),
            })
            .expect("open review pass");

        let first = Review {
            dialogue_id: DialogueId::new("seed_001"),
            status: ReviewStatus::NeedsRevision,
            reviewed_at: ts("2026-03-03T09:05:00Z"),
            reviewer: "dr-lee".to_string(),
            feedback: Some("soften the reframe".to_string()),
            notes: vec![ReviewNote {
                note: "tone too directive".to_string(),
                timestamp: ts("2026-03-03T09:04:00Z"),
            }],
        };
        let other = Review {
            dialogue_id: DialogueId::new("seed_002"),
            status: ReviewStatus::Rejected,
            reviewed_at: ts("2026-03-03T09:06:00Z"),
            reviewer: "dr-lee".to_string(),
            feedback: None,
            notes: Vec::new(),
        };
        let revised = Review {
            status: ReviewStatus::Approved,
            reviewed_at: ts("2026-03-03T09:10:00Z"),
            ..first.clone()
        };

        store.upsert_review(&session, &first).expect("first review");
        store.upsert_review(&session, &other).expect("other review");
        store.upsert_review(&session, &revised).expect("re-review");

        let reviews = store.list_reviews(&session).expect("list reviews");
        assert_eq!(reviews, vec![revised, other]);
    }
}
