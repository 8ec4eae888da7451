//! CLI binary for edgequake-study.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`, runs
//! one session through a `SessionRegistry`, and writes the results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_study::{
    progress_stream, ExtractionStrategy, FallbackScope, MemoryStore, PdfDocument, PipelineConfig,
    ProgressCallback, ProgressStep, SessionInput, SessionProgressCallback, SessionRegistry,
    SourceDocument, StudyResults,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress ─────────────────────────────────────────────────────────

/// Prints one line per finished batch above the bar. The bar itself is
/// driven by the progress stream in `main`.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl SessionProgressCallback for CliProgressCallback {
    fn on_session_start(&self, total_batches: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_batches} batch(es)…"))
        ));
    }

    fn on_batch_complete(&self, batch: usize, total_batches: usize, question_count: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            green("✓"),
            batch,
            total_batches,
            dim(&format!("{question_count:>3} question(s)")),
        ));
    }

    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            red("✗"),
            batch,
            total_batches,
            red(&msg),
        ));
    }

    fn on_session_complete(&self, total_batches: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total_batches.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} batch(es) processed", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} batches processed  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_batches,
                red(&self.errors.load(Ordering::SeqCst).to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Questions, mnemonics and mock tests from lecture slides
  study-gen slides.pdf -o results.json

  # Several documents in one session, compiled note as Markdown
  study-gen week1.pdf week2.pdf --name "Cardiology" --note cardiology.md

  # Scanned past paper: skip the vision model, OCR straight away
  study-gen --strategy ocr --ocr-lang eng past-paper.pdf

  # No document at all, just a topic
  study-gen --topic "Renal physiology: nephron transport" -o renal.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (default: system library)
  RUST_LOG                Log filter, e.g. edgequake_study=debug
"#;

/// Generate study material from PDFs or a topic using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "study-gen",
    version,
    about = "Generate questions, mnemonics, cheat sheets and mock tests from PDFs or a topic",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file paths or HTTP/HTTPS URLs, processed in order.
    #[arg(required_unless_present = "topic", conflicts_with = "topic")]
    inputs: Vec<String>,

    /// Generate from a topic or pasted notes instead of documents.
    #[arg(long)]
    topic: Option<String>,

    /// Session name; mock tests are named after it.
    #[arg(long)]
    name: Option<String>,

    /// Owner recorded on the session.
    #[arg(long, env = "STUDY_GEN_OWNER", default_value = "cli")]
    owner: String,

    /// Extraction strategy: direct, ocr, vision.
    #[arg(long, env = "STUDY_GEN_STRATEGY", default_value = "vision")]
    strategy: ExtractionStrategy,

    /// Fallback scope: batch or session.
    #[arg(long, env = "STUDY_GEN_FALLBACK_SCOPE", default_value = "batch")]
    fallback_scope: FallbackScope,

    /// Number of batches processed concurrently.
    #[arg(short, long, env = "STUDY_GEN_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Retries per external call after the first attempt.
    #[arg(long, env = "STUDY_GEN_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call timeout in seconds.
    #[arg(long, env = "STUDY_GEN_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Target number of questions per batch.
    #[arg(long, env = "STUDY_GEN_QUESTIONS_PER_BATCH", default_value_t = 10)]
    questions_per_batch: usize,

    /// Tesseract language code(s), e.g. eng or eng+fra.
    #[arg(long, env = "STUDY_GEN_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "STUDY_GEN_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "STUDY_GEN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Write the full results as JSON to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the compiled note as Markdown to this file.
    #[arg(long)]
    note: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "STUDY_GEN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STUDY_GEN_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let show_progress = !cli.no_progress && !cli.verbose;
    let progress_cb = show_progress.then(CliProgressCallback::new);

    let config = build_config(
        &cli,
        progress_cb
            .as_ref()
            .map(|cb| Arc::clone(cb) as ProgressCallback),
    )?;
    let registry = SessionRegistry::new(config, Arc::new(MemoryStore::new()))
        .context("Failed to initialise the LLM provider")?;

    // ── Resolve input ────────────────────────────────────────────────────
    let input = if let Some(ref topic) = cli.topic {
        SessionInput::Text {
            name: cli.name.clone().unwrap_or_else(|| topic_name(topic)),
            text: topic.clone(),
        }
    } else {
        let mut documents: Vec<Arc<dyn SourceDocument>> = Vec::with_capacity(cli.inputs.len());
        for input in &cli.inputs {
            if let Some(ref cb) = progress_cb {
                cb.bar.set_message(format!("opening {input}"));
            }
            let doc = PdfDocument::open(input, cli.password.clone(), cli.download_timeout)
                .await
                .with_context(|| format!("Failed to open '{input}'"))?;
            documents.push(Arc::new(doc));
        }
        let name = cli
            .name
            .clone()
            .unwrap_or_else(|| document_name(&cli.inputs[0]));
        SessionInput::Files { name, documents }
    };

    // ── Run session ──────────────────────────────────────────────────────
    let id = registry
        .start_session(&cli.owner, input)
        .await
        .context("Failed to start session")?;

    let mut states = progress_stream(&registry, id).await?;
    let mut last = None;
    while let Some(state) = states.next().await {
        if let Some(ref cb) = progress_cb {
            cb.bar.set_prefix(state.step.to_string());
            cb.bar.set_position(u64::from(state.percent));
            cb.bar.set_message(state.message.clone());
        }
        last = Some(state);
    }
    let last = match last {
        Some(state) => state,
        None => registry.progress(id).await?,
    };

    if last.step == ProgressStep::Failed {
        eprintln!(
            "{} {}",
            red("✘"),
            bold(&last.message)
        );
        if let Some(ref detail) = last.error {
            eprintln!("{}", dim(detail));
        }
        std::process::exit(1);
    }

    let results = registry.results(id).await.context("Failed to read results")?;
    write_results(&cli, &results).await?;
    print_summary(&results, last.step);
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .strategy(cli.strategy)
        .fallback_scope(cli.fallback_scope)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.timeout)
        .questions_per_batch(cli.questions_per_batch)
        .ocr_language(cli.ocr_lang.clone())
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn write_results(cli: &Cli, results: &StudyResults) -> Result<()> {
    let json = serde_json::to_string_pretty(results).context("Failed to serialise results")?;
    match cli.output {
        Some(ref path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let mut out = io::stdout().lock();
            writeln!(out, "{json}").context("Failed to write to stdout")?;
        }
    }

    if let Some(ref path) = cli.note {
        match results.note {
            Some(ref note) => tokio::fs::write(path, note.to_markdown())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => eprintln!("{} no note was compiled; {} not written", cyan("⚠"), path.display()),
        }
    }
    Ok(())
}

fn print_summary(results: &StudyResults, step: ProgressStep) {
    let marker = match (step, results.partial) {
        (ProgressStep::Completed, false) => green("✔"),
        _ => cyan("⚠"),
    };
    eprintln!(
        "{}  {} question(s)  {} mnemonic(s)  {} cheat-sheet entr{}  {} mock test(s){}",
        marker,
        results.questions.len(),
        results.mnemonics.len(),
        results.cheat_sheet.len(),
        if results.cheat_sheet.len() == 1 { "y" } else { "ies" },
        results.mock_tests.len(),
        if step == ProgressStep::Cancelled {
            " (cancelled)".to_string()
        } else if results.partial {
            format!(
                " (partial: {}/{} batches)",
                results.stats.succeeded, results.stats.total
            )
        } else {
            String::new()
        }
    );
    for notice in &results.notices {
        eprintln!("   {}", dim(notice));
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&results.input_tokens.to_string()),
        dim(&results.output_tokens.to_string()),
    );
}

/// Session name from a path or URL: the file stem.
fn document_name(input: &str) -> String {
    let last = input.trim_end_matches('/').rsplit('/').next().unwrap_or(input);
    Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Study session")
        .to_string()
}

/// Session name from a topic: its first line, at most 60 characters.
fn topic_name(topic: &str) -> String {
    let first = topic.lines().next().unwrap_or("").trim();
    if first.chars().count() > 60 {
        format!("{}…", first.chars().take(59).collect::<String>())
    } else if first.is_empty() {
        "Study session".to_string()
    } else {
        first.to_string()
    }
}
