//! CLI binary for edgequake-pdfvalidate.
//!
//! Submits every source as a task, runs the worker pool until the queue is
//! drained, then prints one report per task.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_pdfvalidate::{
    BlockSummary, DocumentProcessor, FsObjectStore, MemoryRepository, PdfiumReader,
    ProcessorConfig, ProgressCallback, Repository, SnapshotStatistics, TaskManager,
    TaskProgressCallback, TaskStatus, ValidationLevel, ValidationResult, ValidationTask,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over all submitted tasks; attempts and failures are logged above it.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} tasks  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Validating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let total = self.bar.length().unwrap_or(0) as usize;
        let failed = self.failed.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} tasks completed", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} tasks completed  ({} failed)",
                red("✘"),
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string())
            );
        }
    }
}

fn short_id(task_id: &str) -> &str {
    task_id.get(..8).unwrap_or(task_id)
}

impl TaskProgressCallback for CliProgressCallback {
    fn on_task_start(&self, task_id: &str, attempt: u32) {
        self.bar
            .set_message(format!("{} attempt {}", short_id(task_id), attempt));
    }

    fn on_attempt_failed(&self, task_id: &str, attempt: u32, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  attempt {}  {}",
            red("✗"),
            short_id(task_id),
            attempt,
            red(&msg)
        ));
    }

    fn on_task_complete(&self, task_id: &str, page_count: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            short_id(task_id),
            dim(&format!("{page_count} pages"))
        ));
        self.bar.inc(1);
    }

    fn on_task_failed(&self, task_id: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  gave up", red("✘"), short_id(task_id)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Standard validation with page snapshots
  pdfvalidate catalogue.pdf

  # Strict validation, JSON report including block summary
  pdfvalidate --level strict --json --blocks catalogue.pdf > report.json

  # Several sources at once (paths, URLs, or keys under the store dir)
  pdfvalidate a.pdf https://example.com/b.pdf uploads/c.pdf

  # Validation only, no rendering
  pdfvalidate --no-snapshots --level enhanced report.pdf

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise ./ then the system path)
  PDFVALIDATE_*           Every flag can also be set from the environment
  RUST_LOG                Overrides the log filter
"#;

/// Validate PDFs, classify their outline and snapshot every page.
#[derive(Parser, Debug)]
#[command(
    name = "pdfvalidate",
    version,
    about = "Validate PDF documents, reconstruct their outline and snapshot every page",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF paths, HTTP/HTTPS URLs, or object keys under --store-dir.
    #[arg(required = true, num_args = 1..)]
    sources: Vec<String>,

    /// Validation depth.
    #[arg(long, env = "PDFVALIDATE_LEVEL", value_enum, default_value = "standard")]
    level: LevelArg,

    /// Snapshot rendering DPI (72–400).
    #[arg(long, env = "PDFVALIDATE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Skip page snapshots.
    #[arg(long, env = "PDFVALIDATE_NO_SNAPSHOTS")]
    no_snapshots: bool,

    /// Skip snapshot thumbnails.
    #[arg(long, env = "PDFVALIDATE_NO_THUMBNAILS")]
    no_thumbnails: bool,

    /// Skip the image inventory in enhanced reports.
    #[arg(long, env = "PDFVALIDATE_NO_IMAGES")]
    no_images: bool,

    /// Skip the table heuristic in enhanced reports.
    #[arg(long, env = "PDFVALIDATE_NO_TABLES")]
    no_tables: bool,

    /// Directory backing the object store (snapshots, uploaded sources).
    #[arg(long, env = "PDFVALIDATE_STORE_DIR", default_value = "pdfvalidate-store")]
    store_dir: PathBuf,

    /// Concurrent tasks.
    #[arg(short, long, env = "PDFVALIDATE_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Retries after a failed attempt.
    #[arg(long, env = "PDFVALIDATE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay before a failed task is retried, in milliseconds.
    #[arg(long, env = "PDFVALIDATE_RETRY_BACKOFF_MS", default_value_t = 60_000)]
    retry_backoff_ms: u64,

    /// Wall-clock limit per attempt in seconds.
    #[arg(long, env = "PDFVALIDATE_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFVALIDATE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Largest accepted source in bytes.
    #[arg(long, env = "PDFVALIDATE_MAX_FILE_SIZE", default_value_t = 50 * 1024 * 1024)]
    max_file_size: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFVALIDATE_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the full reports as JSON.
    #[arg(long, env = "PDFVALIDATE_JSON")]
    json: bool,

    /// Include a block summary per task.
    #[arg(long, env = "PDFVALIDATE_BLOCKS")]
    blocks: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFVALIDATE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFVALIDATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFVALIDATE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LevelArg {
    Standard,
    Enhanced,
    Strict,
}

impl From<LevelArg> for ValidationLevel {
    fn from(v: LevelArg) -> Self {
        match v {
            LevelArg::Standard => ValidationLevel::Standard,
            LevelArg::Enhanced => ValidationLevel::Enhanced,
            LevelArg::Strict => ValidationLevel::Strict,
        }
    }
}

/// Everything printed for one task.
#[derive(Serialize)]
struct TaskReport {
    task: ValidationTask,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshots: Option<SnapshotStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<BlockSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
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

    // ── Collaborators ────────────────────────────────────────────────────
    let reader = PdfiumReader::bind(cli.pdfium_lib.as_deref()).context("Failed to load pdfium")?;
    let store = Arc::new(FsObjectStore::new(&cli.store_dir));
    let repo = Arc::new(MemoryRepository::new());

    let progress = show_progress.then(|| CliProgressCallback::new(cli.sources.len()));
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;
    let config = Arc::new(config);

    let processor = Arc::new(DocumentProcessor::new(
        Arc::new(reader),
        store,
        repo.clone(),
        Arc::clone(&config),
    ));
    let manager = Arc::new(TaskManager::new(repo.clone(), processor.clone(), &config));

    // ── Submit and drain ─────────────────────────────────────────────────
    let ids = manager
        .submit_batch(cli.sources.iter().cloned(), Some(cli.level.into()))
        .await
        .context("Failed to submit tasks")?;
    manager
        .run_until_idle()
        .await
        .context("Worker pool failed")?;
    if let Some(p) = &progress {
        p.finish();
    }

    // ── Collect reports ──────────────────────────────────────────────────
    let mut reports = Vec::with_capacity(ids.len());
    for id in &ids {
        let task = manager
            .task(id)
            .await?
            .with_context(|| format!("Task {id} disappeared"))?;
        let done = task.status == TaskStatus::Completed;
        let result = repo.results(id).await?.pop();
        let snapshots = if done && config.extract_snapshots {
            Some(processor.snapshots().statistics(id).await?)
        } else {
            None
        };
        let blocks = if done && cli.blocks {
            Some(processor.block_summary(id).await?)
        } else {
            None
        };
        reports.push(TaskReport {
            task,
            result,
            snapshots,
            blocks,
        });
    }

    let failed = reports
        .iter()
        .filter(|r| r.task.status != TaskStatus::Completed)
        .count();

    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?;
        println!("{json}");
    } else if !cli.quiet {
        for r in &reports {
            print_summary(r);
        }
    }

    if failed > 0 {
        bail!("{failed} of {} tasks failed", reports.len());
    }
    Ok(())
}

fn print_summary(r: &TaskReport) {
    let t = &r.task;
    let status = match t.status {
        TaskStatus::Completed => green("completed"),
        other => red(&other.to_string()),
    };
    println!("{}  {}  {}", bold(&t.source), status, dim(&t.task_id));
    if let Some(msg) = &t.error_message {
        println!("  error: {msg}");
    }
    if let Some(res) = &r.result {
        let report = &res.report;
        println!(
            "  {} level, {} pages, {} chars, valid={}, {:.2}s",
            report.validation_level,
            report.page_count,
            report.extracted_text.chars().count(),
            report.is_valid,
            res.processing_time
        );
        for e in &report.errors {
            println!("  {} {e}", red("error:"));
        }
        for w in &report.warnings {
            println!("  {} {w}", dim("warning:"));
        }
    }
    if let Some(summary) = &t.result_summary {
        let s = &summary.structure;
        println!(
            "  blocks: {} ({} coded, {} distinct codes)",
            s.total_blocks,
            s.with_occupation_code,
            s.unique_occupation_codes.len()
        );
    }
    if let Some(stats) = &r.snapshots {
        println!(
            "  snapshots: {} pages, {} bytes",
            stats.total_pages, stats.storage.total_size_bytes
        );
    }
}

/// Map CLI args to `ProcessorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessorConfig> {
    let mut builder = ProcessorConfig::builder()
        .validation_level(cli.level.into())
        .max_file_size(cli.max_file_size)
        .extract_images(!cli.no_images)
        .extract_tables(!cli.no_tables)
        .extract_snapshots(!cli.no_snapshots)
        .snapshot_dpi(cli.dpi)
        .generate_thumbnails(!cli.no_thumbnails)
        .workers(cli.workers)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .attempt_timeout_secs(cli.timeout)
        .download_timeout_secs(cli.download_timeout);
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}
