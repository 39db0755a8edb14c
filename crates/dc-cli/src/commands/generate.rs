use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dc_core::core::{
    Corpus, ExpansionWeights, ExternalGenerator, SessionType, SyntheticGenerator, SystemClock,
    TextSource,
};
use dc_store::{load_corpus, save_corpus};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{distribution, ensure_distinct_output, heading};
use crate::bootstrap::RuntimeConfig;

#[derive(Debug, Clone, clap::Args)]
pub struct GenerateArgs {
    /// Number of dialogues to generate.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,

    /// Output corpus file.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Restrict concerns (repeatable). Defaults to the built-in list.
    #[arg(long = "concern")]
    pub concerns: Vec<String>,

    /// Restrict session types (repeatable).
    #[arg(long = "session-type", value_parser = parse_session_type)]
    pub session_types: Vec<SessionType>,

    /// Seed for reproducible output. Overrides `generator.seed`.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Use templates only, even when an external generator is configured.
    #[arg(long)]
    pub no_external: bool,
}

fn parse_session_type(value: &str) -> Result<SessionType, String> {
    SessionType::parse(value).ok_or_else(|| {
        let known: Vec<&str> = SessionType::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown session type '{value}' (expected one of {})", known.join(", "))
    })
}

/// Generates a synthetic corpus and writes it to `args.output`.
///
/// `external` is consulted for `runtime.external_share` of the dialogues;
/// failures there fall back to templates.
pub async fn generate(
    runtime: &RuntimeConfig,
    args: &GenerateArgs,
    external: Option<Arc<dyn ExternalGenerator>>,
) -> Result<Corpus, anyhow::Error> {
    let mut generator = build_generator(runtime, args.seed, args.no_external, external);
    tracing::info!(
        count = args.count,
        sources = %describe_sources(generator.sources()),
        "generating synthetic dialogues"
    );

    let dialogues = generator
        .generate_batch(args.count, &args.concerns, &args.session_types)
        .await;
    let corpus = Corpus::new(
        format!("Synthetic dialogues ({} examples)", dialogues.len()),
        dialogues,
    );
    let corpus = save_corpus(&args.output, corpus)
        .with_context(|| format!("writing corpus {}", args.output.display()))?;
    Ok(corpus)
}

fn build_generator(
    runtime: &RuntimeConfig,
    seed: Option<u64>,
    no_external: bool,
    external: Option<Arc<dyn ExternalGenerator>>,
) -> SyntheticGenerator<StdRng> {
    let rng = match seed.or(runtime.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let generator = SyntheticGenerator::new(rng, Arc::new(SystemClock));
    match external.filter(|_| !no_external) {
        Some(external) => generator.with_external(external, runtime.external_share),
        None => generator,
    }
}

fn describe_sources(sources: &[TextSource]) -> String {
    let names: Vec<String> = sources
        .iter()
        .map(|source| match source {
            TextSource::External { generator, share } => {
                format!("external:{}@{share}", generator.name())
            }
            TextSource::Template => "template".to_owned(),
        })
        .collect();
    names.join(",")
}

pub fn render_generation(args: &GenerateArgs, corpus: &Corpus) -> String {
    let mut out = String::new();
    heading(&mut out, "SYNTHETIC GENERATION");
    let _ = writeln!(
        out,
        "\nGenerated {} dialogues -> {}",
        corpus.dialogues.len(),
        args.output.display()
    );
    if let Some(stats) = &corpus.statistics {
        distribution(&mut out, "Session Type Distribution", &stats.session_types);
        distribution(&mut out, "Concern Distribution", &stats.concerns);
    }
    out
}

// ---------------------------------------------------------------------------
// expand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, clap::Args)]
pub struct ExpandArgs {
    /// Seed corpus; its dialogues are kept unchanged.
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Total number of dialogues wanted, seeds included.
    #[arg(short, long, default_value_t = 500)]
    pub target: usize,

    /// Session type weight as `type=weight` (repeatable). Defaults to
    /// gentle_deep=0.5, check-in=0.3, micro_practice=0.2.
    #[arg(long = "session-weight", value_parser = parse_session_weight)]
    pub session_weights: Vec<(SessionType, f64)>,

    /// Concern weight as `concern=weight` (repeatable). Defaults to equal
    /// weights over the built-in concerns.
    #[arg(long = "concern-weight", value_parser = parse_concern_weight)]
    pub concern_weights: Vec<(String, f64)>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub no_external: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandSummary {
    pub seeds: usize,
    pub generated: usize,
    pub corpus: Corpus,
}

fn parse_weight(value: &str) -> Result<(&str, f64), String> {
    let (name, weight) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=weight, got '{value}'"))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("invalid weight in '{value}'"))?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(format!("weight must be a non-negative number, got '{value}'"));
    }
    Ok((name.trim(), weight))
}

fn parse_session_weight(value: &str) -> Result<(SessionType, f64), String> {
    let (name, weight) = parse_weight(value)?;
    Ok((parse_session_type(name)?, weight))
}

fn parse_concern_weight(value: &str) -> Result<(String, f64), String> {
    let (name, weight) = parse_weight(value)?;
    if name.is_empty() {
        return Err(format!("missing concern in '{value}'"));
    }
    Ok((name.to_owned(), weight))
}

/// Grows the seed corpus in `args.input` to `args.target` dialogues.
pub async fn expand(
    runtime: &RuntimeConfig,
    args: &ExpandArgs,
    external: Option<Arc<dyn ExternalGenerator>>,
) -> Result<ExpandSummary, anyhow::Error> {
    ensure_distinct_output(&args.output, [args.input.as_path()])?;
    let seeds = load_corpus(&args.input)
        .with_context(|| format!("reading seed corpus {}", args.input.display()))?;

    let defaults = ExpansionWeights::default();
    let weights = ExpansionWeights {
        session_types: if args.session_weights.is_empty() {
            defaults.session_types
        } else {
            args.session_weights.clone()
        },
        concerns: if args.concern_weights.is_empty() {
            defaults.concerns
        } else {
            args.concern_weights.clone()
        },
    };

    let mut generator = build_generator(runtime, args.seed, args.no_external, external);
    tracing::info!(
        seeds = seeds.dialogues.len(),
        target = args.target,
        sources = %describe_sources(generator.sources()),
        "expanding seed corpus"
    );
    let expansion = generator.expand(seeds.dialogues, args.target, &weights).await;

    let corpus = Corpus::new(
        format!("Expanded seed dialogues ({} examples)", expansion.dialogues.len()),
        expansion.dialogues,
    );
    let corpus = save_corpus(&args.output, corpus)
        .with_context(|| format!("writing corpus {}", args.output.display()))?;
    Ok(ExpandSummary {
        seeds: expansion.seeds,
        generated: expansion.generated,
        corpus,
    })
}

pub fn render_expansion(args: &ExpandArgs, summary: &ExpandSummary) -> String {
    let mut out = String::new();
    heading(&mut out, "SEED EXPANSION");
    if summary.generated == 0 {
        let _ = writeln!(
            out,
            "\nAlready have {} dialogues, target is {}",
            summary.seeds, args.target
        );
    }
    let _ = writeln!(
        out,
        "\nSeeds: {}  Generated: {}  Total: {} -> {}",
        summary.seeds,
        summary.generated,
        summary.corpus.dialogues.len(),
        args.output.display()
    );
    if let Some(stats) = &summary.corpus.statistics {
        distribution(&mut out, "Session Type Distribution", &stats.session_types);
        distribution(&mut out, "Concern Distribution", &stats.concerns);
    }
    out
}
