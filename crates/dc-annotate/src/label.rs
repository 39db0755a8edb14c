use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use colored::Colorize;
use dc_cli::bootstrap::RuntimeConfig;
use dc_core::core::{
    labelable_items, AnnotatorId, Intent, LabelDraft, LabelItem, LabelSet, LabelingSession,
    RiskLevel, Sentiment, SessionId,
};
use dc_store::{
    load_corpus, load_label_set, save_label_set, AnnotationStore, LabelPass,
    SqliteAnnotationStore, StoreError,
};
use uuid::Uuid;

use crate::console::{Answer, Console};

#[derive(Debug, Clone, clap::Args)]
pub struct LabelArgs {
    /// Corpus to label.
    #[arg(long)]
    pub corpus: PathBuf,

    #[arg(long)]
    pub annotator: String,

    /// Label-set file; also used for checkpoints.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Label individual assistant messages as well as whole dialogues.
    #[arg(long)]
    pub messages: bool,

    /// Continue from the checkpoint in `--output`.
    #[arg(long)]
    pub resume: bool,

    /// Pass identifier. Defaults to the checkpoint's, else a fresh UUID.
    #[arg(long)]
    pub session: Option<String>,

    /// Annotation store. Defaults to `[store] database`.
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Defaults to `[labeling] autosave_every`.
    #[arg(long)]
    pub autosave_every: Option<usize>,
}

/// How an interactive pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelingEnd {
    /// Every item has a record; the pass is sealed.
    Completed(LabelSet),
    /// Quit or skipped items remain; the checkpoint holds the progress.
    Paused { labeled: usize, total: usize },
}

enum Step {
    Submit(LabelDraft),
    Skip,
    Quit,
}

pub fn run(args: &LabelArgs, runtime: &RuntimeConfig) -> Result<(), anyhow::Error> {
    let corpus = load_corpus(&args.corpus)
        .with_context(|| format!("reading corpus {}", args.corpus.display()))?;
    let items = labelable_items(&corpus, args.messages);

    let checkpoint = if args.resume {
        match load_label_set(&args.output) {
            Ok(set) => Some(set),
            Err(StoreError::MissingResource(_)) => None,
            Err(e) => return Err(e).context("reading checkpoint"),
        }
    } else {
        None
    };

    let session_id = checkpoint
        .as_ref()
        .map(|set| set.session_id.clone())
        .or_else(|| args.session.clone().map(SessionId::new))
        .unwrap_or_else(|| SessionId::new(Uuid::new_v4().to_string()));
    let annotator = AnnotatorId::new(args.annotator.as_str());

    let mut session = LabelingSession::new(
        annotator.clone(),
        session_id.clone(),
        args.corpus.display().to_string(),
        items,
        args.autosave_every.unwrap_or(runtime.autosave_every),
    );
    if let Some(checkpoint) = &checkpoint {
        session = session.resume(checkpoint);
    }

    let database = args.database.as_deref().unwrap_or(&runtime.database);
    let store = SqliteAnnotationStore::new(database)
        .with_context(|| format!("opening annotation store {}", database.display()))?;
    store.init()?;
    open_pass(&store, &session, &session_id, &annotator)?;

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());
    match label_items(&mut console, &mut session, &session_id, &store, &args.output)? {
        LabelingEnd::Completed(set) => console.say(
            format!("Pass complete: {} labels -> {}", set.len(), args.output.display())
                .bright_green(),
        )?,
        LabelingEnd::Paused { labeled, total } => console.say(format!(
            "Saved {labeled}/{total} labels to {}. Continue with --resume.",
            args.output.display()
        ))?,
    }
    Ok(())
}

fn open_pass(
    store: &dyn AnnotationStore,
    session: &LabelingSession,
    session_id: &SessionId,
    annotator: &AnnotatorId,
) -> Result<(), anyhow::Error> {
    match store.get_label_pass(session_id)? {
        Some(pass) if pass.sealed_at.is_some() => {
            bail!("label pass {session_id} is already sealed")
        }
        Some(_) => tracing::debug!(session = %session_id, "continuing label pass"),
        None => store.open_label_pass(&LabelPass {
            session_id: session_id.clone(),
            annotator: annotator.clone(),
            source_file: session.snapshot().source_file,
            started_at: Utc::now(),
            sealed_at: None,
        })?,
    }
    // Checkpointed records may predate the pass row.
    for record in session.snapshot().labels() {
        store.upsert_label(session_id, record)?;
    }
    Ok(())
}

/// Walks the unlabeled items in order. Every submission goes to the store;
/// the checkpoint file is rewritten when the session asks for it and on exit.
pub fn label_items<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    session: &mut LabelingSession,
    session_id: &SessionId,
    store: &dyn AnnotationStore,
    checkpoint: &Path,
) -> Result<LabelingEnd, anyhow::Error> {
    let items: Vec<LabelItem> = session.items().to_vec();
    let total = items.len();

    for item in &items {
        if session.record_for(&item.item_id).is_some() {
            continue;
        }
        let (labeled, _) = session.progress();
        show_item(console, item, labeled, total)?;

        let draft = match ask_draft(console)? {
            Step::Submit(draft) => draft,
            Step::Skip => continue,
            Step::Quit => break,
        };
        let outcome = session.submit_label(&item.item_id, draft, Utc::now())?;
        if let Some(record) = session.record_for(&item.item_id) {
            store.upsert_label(session_id, record)?;
        }
        if outcome.checkpoint_due {
            save_label_set(checkpoint, &session.snapshot(), total)?;
            console.say("Checkpoint saved.".dimmed())?;
        }
    }

    if session.next_unlabeled().is_some() {
        save_label_set(checkpoint, &session.snapshot(), total)?;
        let (labeled, total) = session.progress();
        tracing::info!(session = %session_id, labeled, total, "label pass paused");
        return Ok(LabelingEnd::Paused { labeled, total });
    }

    let set = session.finish();
    save_label_set(checkpoint, &set, total)?;
    store.seal_label_pass(session_id, Utc::now())?;
    tracing::info!(session = %session_id, labels = set.len(), "label pass sealed");
    Ok(LabelingEnd::Completed(set))
}

fn show_item<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    item: &LabelItem,
    labeled: usize,
    total: usize,
) -> io::Result<()> {
    let scope = match item.message_index {
        Some(index) => format!("message {index}"),
        None => "dialogue".to_owned(),
    };
    console.say("")?;
    console.say(
        format!("[{}/{total}] {} ({scope})", labeled + 1, item.dialogue_id).bright_cyan(),
    )?;
    console.say(format!("  {}", item.text))
}

fn ask_draft<R: BufRead, W: Write>(console: &mut Console<R, W>) -> io::Result<Step> {
    let intent = match console.choose("intent", Intent::ALL, Intent::parse)? {
        Answer::Value(intent) => Some(intent),
        Answer::Blank => None,
        Answer::Skip => return Ok(Step::Skip),
        Answer::Quit => return Ok(Step::Quit),
    };
    let sentiment = match console.choose("sentiment", Sentiment::ALL, Sentiment::parse)? {
        Answer::Value(sentiment) => Some(sentiment),
        Answer::Blank => None,
        Answer::Skip => return Ok(Step::Skip),
        Answer::Quit => return Ok(Step::Quit),
    };
    let risk_level = match console.choose("risk_level", RiskLevel::ALL, RiskLevel::parse)? {
        Answer::Value(risk) => Some(risk),
        Answer::Blank => None,
        Answer::Skip => return Ok(Step::Skip),
        Answer::Quit => return Ok(Step::Quit),
    };

    if risk_level == Some(RiskLevel::High) && intent != Some(Intent::Emergency) {
        console.warn("High risk is usually labeled with the emergency intent.")?;
    }

    let notes = console.optional_text("notes (Enter to skip): ")?;
    Ok(Step::Submit(LabelDraft {
        intent,
        sentiment,
        risk_level,
        notes,
    }))
}

#[cfg(test)]
mod tests {
    use dc_core::core::{Corpus, Dialogue, DialogueId, ItemId, Message, SessionType, UserProfile};
    use dc_store::SqliteAnnotationStore;

    use super::*;

    fn corpus() -> Corpus {
        let dialogue = |id: &str, opening: &str| Dialogue {
            id: DialogueId::new(id),
            session_type: SessionType::CheckIn,
            user_profile: UserProfile {
                age_range: None,
                concern: "stress".to_owned(),
                mood_score: Some(5),
                extra: Default::default(),
            },
            messages: vec![
                Message::user(opening),
                Message::assistant(
                    "That sounds hard.",
                    Intent::Validate,
                    Sentiment::Negative,
                    RiskLevel::None,
                ),
            ],
            labels: None,
            extra: Default::default(),
        };
        Corpus::new(
            "fixture",
            vec![dialogue("d1", "Work is too much."), dialogue("d2", "I can't sleep.")],
        )
    }

    fn setup(autosave_every: usize) -> (LabelingSession, SqliteAnnotationStore, SessionId) {
        let session_id = SessionId::new("pass-1");
        let session = LabelingSession::new(
            AnnotatorId::new("ann-a"),
            session_id.clone(),
            "seed.json",
            labelable_items(&corpus(), false),
            autosave_every,
        );
        let store = SqliteAnnotationStore::new_in_memory().unwrap();
        store.init().unwrap();
        open_pass(&store, &session, &session_id, &AnnotatorId::new("ann-a")).unwrap();
        (session, store, session_id)
    }

    #[test]
    fn test_complete_pass_seals_store() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("ann_a.json");
        let (mut session, store, session_id) = setup(10);
        // d1: validate / negative / none, with a note; d2: by name, no note.
        let script = "1\n2\n1\nfirst pass\nclose\nneutral\nnone\n\n";
        let mut console = Console::new(script.as_bytes(), Vec::new());

        let end = label_items(&mut console, &mut session, &session_id, &store, &checkpoint)
            .unwrap();

        let LabelingEnd::Completed(set) = end else {
            panic!("expected a completed pass");
        };
        assert_eq!(set.len(), 2);
        let first = set.get(&ItemId::new("d1")).unwrap();
        assert_eq!(first.intent, Some(Intent::Validate));
        assert_eq!(first.sentiment, Some(Sentiment::Negative));
        assert_eq!(first.notes.as_deref(), Some("first pass"));
        assert_eq!(set.get(&ItemId::new("d2")).unwrap().intent, Some(Intent::Close));

        let pass = store.get_label_pass(&session_id).unwrap().unwrap();
        assert!(pass.sealed_at.is_some());
        assert_eq!(store.load_label_set(&session_id).unwrap().len(), 2);
        assert_eq!(load_label_set(&checkpoint).unwrap().len(), 2);
    }

    #[test]
    fn test_quit_keeps_checkpoint_and_resume_continues() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("ann_a.json");
        let (mut session, store, session_id) = setup(10);
        let mut console = Console::new("1\n2\n1\n\nq\n".as_bytes(), Vec::new());

        let end = label_items(&mut console, &mut session, &session_id, &store, &checkpoint)
            .unwrap();
        assert_eq!(end, LabelingEnd::Paused { labeled: 1, total: 2 });
        assert!(store.get_label_pass(&session_id).unwrap().unwrap().sealed_at.is_none());

        let saved = load_label_set(&checkpoint).unwrap();
        assert_eq!(saved.len(), 1);
        let mut resumed = LabelingSession::new(
            AnnotatorId::new("ann-a"),
            session_id.clone(),
            "seed.json",
            labelable_items(&corpus(), false),
            10,
        )
        .resume(&saved);
        assert_eq!(
            resumed.next_unlabeled().map(|item| item.item_id.as_str()),
            Some("d2")
        );

        let mut console = Console::new("4\n3\n1\n\n".as_bytes(), Vec::new());
        let end = label_items(&mut console, &mut resumed, &session_id, &store, &checkpoint)
            .unwrap();
        assert!(matches!(end, LabelingEnd::Completed(ref set) if set.len() == 2));
    }

    #[test]
    fn test_skip_leaves_pass_open() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("ann_a.json");
        let (mut session, store, session_id) = setup(1);
        let mut console = Console::new("s\n1\n3\n1\n\n".as_bytes(), Vec::new());

        let end = label_items(&mut console, &mut session, &session_id, &store, &checkpoint)
            .unwrap();

        assert_eq!(end, LabelingEnd::Paused { labeled: 1, total: 2 });
        let saved = load_label_set(&checkpoint).unwrap();
        assert!(saved.get(&ItemId::new("d1")).is_none());
        assert!(saved.get(&ItemId::new("d2")).is_some());
    }

    #[test]
    fn test_sealed_pass_cannot_reopen() {
        let (session, store, session_id) = setup(10);
        store.seal_label_pass(&session_id, Utc::now()).unwrap();
        let err = open_pass(&store, &session, &session_id, &AnnotatorId::new("ann-a"))
            .unwrap_err();
        assert!(err.to_string().contains("already sealed"));
    }
}
