use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use colored::Colorize;
use dc_cli::bootstrap::RuntimeConfig;
use dc_core::core::{
    Corpus, Dialogue, DialogueId, ReviewDraft, ReviewSession, ReviewStatus, ReviewSummary, Role,
    SessionId,
};
use dc_store::{
    load_corpus, load_reviews, save_reviews, AnnotationStore, ReviewPass, SqliteAnnotationStore,
    StoreError,
};
use uuid::Uuid;

use crate::console::Console;

#[derive(Debug, Clone, clap::Args)]
pub struct ReviewArgs {
    /// Corpus to review.
    #[arg(long)]
    pub corpus: PathBuf,

    #[arg(long)]
    pub reviewer: String,

    /// Review file; also used for checkpoints.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Continue from the reviews already in `--output`.
    #[arg(long)]
    pub resume: bool,

    /// Pass identifier. Defaults to a fresh UUID.
    #[arg(long)]
    pub session: Option<String>,

    /// Annotation store. Defaults to `[store] database`.
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Defaults to `[labeling] autosave_every`.
    #[arg(long)]
    pub autosave_every: Option<usize>,
}

/// Where submitted reviews go.
pub struct ReviewOutput<'a> {
    pub store: &'a dyn AnnotationStore,
    pub pass_id: &'a SessionId,
    pub checkpoint: &'a Path,
    pub source_file: &'a str,
}

enum Verdict {
    Status(ReviewStatus),
    Skip,
    Quit,
}

pub fn run(args: &ReviewArgs, runtime: &RuntimeConfig) -> Result<(), anyhow::Error> {
    let corpus = load_corpus(&args.corpus)
        .with_context(|| format!("reading corpus {}", args.corpus.display()))?;

    let mut session = ReviewSession::new(
        corpus.dialogues.iter().map(|d| d.id.clone()).collect(),
        args.autosave_every.unwrap_or(runtime.autosave_every),
    );
    if args.resume {
        match load_reviews(&args.output) {
            Ok(previous) => session = session.resume(&previous),
            Err(StoreError::MissingResource(_)) => {}
            Err(e) => return Err(e).context("reading checkpoint"),
        }
    }

    let pass_id = args
        .session
        .clone()
        .map(SessionId::new)
        .unwrap_or_else(|| SessionId::new(Uuid::new_v4().to_string()));
    let database = args.database.as_deref().unwrap_or(&runtime.database);
    let store = SqliteAnnotationStore::new(database)
        .with_context(|| format!("opening annotation store {}", database.display()))?;
    store.init()?;
    store.open_review_pass(&ReviewPass {
        session_id: pass_id.clone(),
        reviewer: args.reviewer.clone(),
        source_file: args.corpus.display().to_string(),
        started_at: Utc::now(),
    })?;

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());
    let source_file = args.corpus.display().to_string();
    let output = ReviewOutput {
        store: &store,
        pass_id: &pass_id,
        checkpoint: &args.output,
        source_file: &source_file,
    };
    let summary = review_dialogues(&mut console, &mut session, &corpus, &args.reviewer, &output)?;
    console.say(
        format!(
            "Reviewed {}: {} approved, {} needs revision, {} rejected -> {}",
            summary.total,
            summary.approved,
            summary.needs_revision,
            summary.rejected,
            args.output.display()
        )
        .bright_green(),
    )?;
    Ok(())
}

/// Walks the unreviewed dialogues in corpus order and writes the review
/// file on checkpoints and on exit.
pub fn review_dialogues<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    session: &mut ReviewSession,
    corpus: &Corpus,
    reviewer: &str,
    output: &ReviewOutput<'_>,
) -> Result<ReviewSummary, anyhow::Error> {
    let total = corpus.dialogues.len();

    for (index, dialogue) in corpus.dialogues.iter().enumerate() {
        if session.review_for(&dialogue.id).is_some() {
            continue;
        }
        show_dialogue(console, dialogue, index, total)?;

        let status = match ask_verdict(console, session, &dialogue.id)? {
            Verdict::Status(status) => status,
            Verdict::Skip => continue,
            Verdict::Quit => break,
        };
        let feedback = if status == ReviewStatus::Approved {
            None
        } else {
            console.optional_text("feedback (Enter to skip): ")?
        };

        let outcome = session.submit_review(
            &dialogue.id,
            ReviewDraft {
                status,
                reviewer: Some(reviewer.to_owned()),
                feedback,
            },
            Utc::now(),
        )?;
        if let Some(review) = session.review_for(&dialogue.id) {
            output.store.upsert_review(output.pass_id, review)?;
        }
        if outcome.checkpoint_due {
            save_reviews(output.checkpoint, output.source_file, session.reviews())?;
            console.say("Checkpoint saved.".dimmed())?;
        }
    }

    save_reviews(output.checkpoint, output.source_file, session.reviews())?;
    let summary = session.summary();
    tracing::info!(
        pass = %output.pass_id,
        reviewed = summary.total,
        approved = summary.approved,
        "review file written"
    );
    Ok(summary)
}

fn show_dialogue<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    dialogue: &Dialogue,
    index: usize,
    total: usize,
) -> io::Result<()> {
    console.say("")?;
    console.say(
        format!(
            "[{}/{total}] {} ({}, {})",
            index + 1,
            dialogue.id,
            dialogue.session_type,
            dialogue.user_profile.concern
        )
        .bright_cyan(),
    )?;
    for message in &dialogue.messages {
        match message.role {
            Role::User => console.say(format!("  User: {}", message.text))?,
            Role::Assistant => {
                let tags: Vec<&str> = [
                    message.intent.map(|v| v.as_str()),
                    message.sentiment.map(|v| v.as_str()),
                    message.risk_level.map(|v| v.as_str()),
                ]
                .into_iter()
                .flatten()
                .collect();
                console.say(
                    format!("  Assistant: {} [{}]", message.text, tags.join(", ")).bright_green(),
                )?
            }
        }
    }
    Ok(())
}

fn ask_verdict<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    session: &mut ReviewSession,
    dialogue_id: &DialogueId,
) -> Result<Verdict, anyhow::Error> {
    loop {
        let Some(input) = console.prompt_line(
            "[a]pprove / [n]eeds revision / [r]eject / [c]omment / [s]kip / [q]uit: ",
        )?
        else {
            return Ok(Verdict::Quit);
        };
        match input.to_ascii_lowercase().as_str() {
            "a" => return Ok(Verdict::Status(ReviewStatus::Approved)),
            "n" => return Ok(Verdict::Status(ReviewStatus::NeedsRevision)),
            "r" => return Ok(Verdict::Status(ReviewStatus::Rejected)),
            "s" => return Ok(Verdict::Skip),
            "q" => return Ok(Verdict::Quit),
            "c" => {
                if let Some(note) = console.optional_text("note: ")? {
                    session.add_note(dialogue_id, &note, Utc::now())?;
                }
            }
            _ => console.warn("Please enter a, n, r, c, s or q.")?,
        }
    }
}
