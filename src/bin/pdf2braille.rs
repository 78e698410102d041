//! CLI binary for pdf2braille.
//!
//! A thin shim over the library crate: maps flags to `ConversionConfig`,
//! stores local inputs in an `FsBlobStore` under the output directory, runs
//! every input through one orchestrator and follows the live updates.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pdf2braille::pipeline::input::is_url;
use pdf2braille::{
    BlobStore, ConversionConfig, ConversionJob, FsBlobStore, JobStatus, JobStore,
    LiveBroadcaster, LiveUpdate, MemoryJobStore, NewJob, Orchestrator,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a local PDF; artifacts land in ./pdf2braille-out/<job-id>/
  pdf2braille document.pdf

  # Several inputs at once, three in parallel
  pdf2braille -j 3 a.pdf b.pdf https://example.com/notes.txt

  # Narrow embosser lines, no AI
  OPENAI_API_KEY= pdf2braille --line-width 32 handout.pdf

  # Machine-readable job records
  pdf2braille --json report.pdf > jobs.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium (otherwise the system library)

Without an API key, AI cleanup is skipped and every line is marked for
manual review. Without pdfium, text is extracted with lopdf only.
"#;

/// Convert PDF files and URLs to Grade 1 Braille.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2braille",
    version,
    about = "Convert PDF files and URLs to Grade 1 Unicode Braille",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory for uploads and artifacts.
    #[arg(short, long, env = "PDF2BRAILLE_OUTPUT_DIR", default_value = "pdf2braille-out")]
    output_dir: PathBuf,

    /// LLM model ID used for cleanup and validation.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "PDF2BRAILLE_PROVIDER")]
    provider: Option<String>,

    /// Jobs converted at the same time.
    #[arg(short = 'j', long, env = "PDF2BRAILLE_MAX_JOBS", default_value_t = 2)]
    max_jobs: usize,

    /// Braille cells per line.
    #[arg(long, env = "PDF2BRAILLE_LINE_WIDTH", default_value_t = 40)]
    line_width: usize,

    /// Braille lines per page.
    #[arg(long, env = "PDF2BRAILLE_LINES_PER_PAGE", default_value_t = 25)]
    lines_per_page: usize,

    /// Target characters per AI cleanup request.
    #[arg(long, env = "PDF2BRAILLE_CHUNK_SIZE", default_value_t = 4000)]
    chunk_size: usize,

    /// Lines sampled for quality validation.
    #[arg(long, env = "PDF2BRAILLE_VALIDATION_LINES", default_value_t = 200)]
    validation_lines: usize,

    /// Pages OCR'd when a PDF has no text layer.
    #[arg(long, env = "PDF2BRAILLE_OCR_PAGES", default_value_t = 5)]
    ocr_pages: usize,

    /// Skip the quota probe before AI cleanup.
    #[arg(long, env = "PDF2BRAILLE_NO_PROBE")]
    no_probe: bool,

    /// Max LLM output tokens per request.
    #[arg(long, env = "PDF2BRAILLE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature for cleanup (0.0–2.0).
    #[arg(long, env = "PDF2BRAILLE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2BRAILLE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-request LLM timeout in seconds.
    #[arg(long, env = "PDF2BRAILLE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the final job records as JSON.
    #[arg(long, env = "PDF2BRAILLE_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "PDF2BRAILLE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2BRAILLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2BRAILLE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars carry the feedback; library logs stay at error level
    // unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Wiring ───────────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;

    let blobs = Arc::new(FsBlobStore::new(cli.output_dir.clone()));
    let jobs = Arc::new(MemoryJobStore::new());
    let live = Arc::new(LiveBroadcaster::new(256));
    let orchestrator = Orchestrator::new(config, jobs, blobs.clone(), live.clone());

    // ── Intake ───────────────────────────────────────────────────────────
    let mut submitted: Vec<ConversionJob> = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let request = intake(input, blobs.as_ref()).await?;
        let job = orchestrator
            .jobs()
            .create(request)
            .await
            .with_context(|| format!("Failed to create job for {input}"))?;
        submitted.push(job);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let bars = MultiProgress::new();
    let runs = submitted.iter().map(|job| {
        let follower = show_progress.then(|| {
            follow(
                bars.add(new_bar(&job.file_name)),
                live.subscribe(&job.id),
            )
        });
        let orchestrator = orchestrator.clone();
        let live = live.clone();
        async move {
            let result = orchestrator.process_job(&job.id).await;
            if result.is_err() {
                // The orchestrator only closes channels of jobs it ran.
                live.close(&job.id);
            }
            if let Some(handle) = follower {
                let _ = handle.await;
            }
            result.with_context(|| format!("Job {} for {} aborted", job.id, job.file_name))
        }
    });

    let mut finished = Vec::with_capacity(submitted.len());
    for result in join_all(runs).await {
        finished.push(result?);
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&finished).context("Failed to serialise jobs")?
        );
    } else if !cli.quiet {
        for job in &finished {
            print_summary(job, blobs.root());
        }
    }

    let failed = finished
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} of {} conversions failed", failed, finished.len());
    }
    Ok(())
}

/// Turn a CLI input into an intake request, storing local files first.
async fn intake(input: &str, blobs: &FsBlobStore) -> Result<NewJob> {
    if is_url(input) {
        return Ok(NewJob::url(input));
    }

    let path = Path::new(input);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {input}"))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let locator = blobs.upload_locator(&file_name).await?;
    blobs
        .put(&locator, &bytes)
        .await
        .with_context(|| format!("Failed to store {input}"))?;
    Ok(NewJob::file(locator, file_name, bytes.len() as u64))
}

fn new_bar(name: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix(name.to_string());
    bar.set_message("Pending");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Mirror one job's live updates onto its progress bar until the channel
/// closes.
fn follow(bar: ProgressBar, mut rx: broadcast::Receiver<LiveUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if let Some(p) = update.progress {
                        bar.set_position(p as u64);
                    }
                    if update.message != "Progress" {
                        bar.set_message(update.message.clone());
                    }
                    if update.stage == JobStatus::Completed.as_str() {
                        bar.finish_with_message(green("✔ done"));
                    } else if update.stage == JobStatus::Failed.as_str() {
                        let why = update.detail.unwrap_or(update.message);
                        bar.abandon_with_message(red(&format!("✘ {why}")));
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        if !bar.is_finished() {
            bar.finish();
        }
    })
}

fn print_summary(job: &ConversionJob, output_dir: &Path) {
    let artifact = |locator: &Option<String>| {
        locator
            .as_ref()
            .map(|l| output_dir.join(l).display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    match job.status {
        JobStatus::Completed => {
            eprintln!(
                "{}  {}  {} source page(s) → {} Braille page(s), accuracy {}%",
                green("✔"),
                bold(&job.file_name),
                job.total_pages.unwrap_or(0),
                job.braille_pages.unwrap_or(0),
                job.accuracy_score.unwrap_or(0),
            );
            eprintln!("   braille  {}", dim(&artifact(&job.braille_text_path)));
            eprintln!("   cleaned  {}", dim(&artifact(&job.cleaned_text_path)));
            eprintln!("   report   {}", dim(&artifact(&job.report_path)));
        }
        _ => {
            eprintln!(
                "{}  {}  {}",
                red("✘"),
                bold(&job.file_name),
                job.error.as_deref().unwrap_or("unknown error"),
            );
        }
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .max_concurrent_jobs(cli.max_jobs)
        .line_width(cli.line_width)
        .lines_per_page(cli.lines_per_page)
        .chunk_size(cli.chunk_size)
        .validation_max_lines(cli.validation_lines)
        .ocr_max_pages(cli.ocr_pages)
        .probe_quota(!cli.no_probe)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }

    builder.build().context("Invalid configuration")
}
