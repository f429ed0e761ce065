//! CLI binary for edgequake-scan2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_scan2md::{
    run_pipeline, Backoff, MergeOrder, PipelineConfig, PipelineProgressCallback, ProgressCallback,
    RunReport, Stage, StageReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar, re-armed at the start of every stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len}  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(format!("{}/5 {:<9}", stage.number(), stage.as_str()));
        self.bar.set_message("");
        self.bar.reset_elapsed();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Step {}: {}", stage.number(), stage.description()))
        ));
    }

    fn on_unit_complete(&self, _stage: Stage, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.inc(1);
    }

    fn on_unit_error(&self, _stage: Stage, name: &str, error: &str) {
        let msg = if error.chars().count() > 100 {
            let cut: String = error.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), name, red(&msg)));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, report: &StageReport) {
        let mark = if report.failed() == 0 {
            green("✓")
        } else {
            cyan("⚠")
        };
        self.bar.println(format!(
            "  {} {}/{} ok  {}",
            mark,
            report.succeeded,
            report.total,
            dim(&format!("{:.1}s", report.duration_ms as f64 / 1000.0)),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full run over input/book, writing output/book/final_result.md
  scan2md book --layout-url http://localhost:8866/layout

  # Keep strict top-to-bottom order instead of lifting titles
  scan2md book --natural-order

  # Re-run recognition and merge only, with a different model
  scan2md book --from recognize --provider openai --model gpt-4.1-mini

  # Rebuild the document from existing fragments (no API key needed)
  scan2md book --from merge

RUN LAYOUT:
  input/<name>/                       source page images (png, jpg, jpeg, bmp, tiff)
  output/<name>/step1_rotated/        deskewed pages
  output/<name>/step2_crops/          crop_{SSS}_{RRR}_{category}.png
  output/<name>/step2_padded/         crops padded to the minimum size
  output/<name>/step3_md_fragments/   one .md fragment per crop
  output/<name>/processing_log.txt    per-page segmentation log
  output/<name>/manifest.json         units created by segmentation
  output/<name>/final_result.md       the merged document

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  SCAN2MD_LAYOUT_URL      Layout detection service endpoint
"#;

/// Rebuild Markdown documents from scanned page images.
#[derive(Parser, Debug)]
#[command(
    name = "scan2md",
    version,
    about = "Rebuild Markdown documents from scanned page images using Vision LLMs",
    long_about = "Deskew scanned pages, split them into typed regions with a layout engine, \
recognize each region with a Vision Language Model and merge the fragments into one Markdown \
document. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible \
endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder name under the input root (e.g. `book` for `input/book`).
    folder_name: String,

    /// Directory holding input folders.
    #[arg(long, env = "SCAN2MD_INPUT_ROOT", default_value = "input")]
    input_root: PathBuf,

    /// Directory receiving run outputs.
    #[arg(long, env = "SCAN2MD_OUTPUT_ROOT", default_value = "output")]
    output_root: PathBuf,

    /// Merge in visual order (page, region) instead of title → text → figure/table.
    #[arg(long, env = "SCAN2MD_NATURAL_ORDER")]
    natural_order: bool,

    /// Start from this stage, reusing the outputs of earlier ones.
    #[arg(long = "from", env = "SCAN2MD_FROM", value_enum, default_value = "deskew")]
    from: StageArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Layout detection service endpoint.
    #[arg(long, env = "SCAN2MD_LAYOUT_URL")]
    layout_url: Option<String>,

    /// Layout request timeout in seconds.
    #[arg(long, env = "SCAN2MD_LAYOUT_TIMEOUT", default_value_t = 120)]
    layout_timeout: u64,

    /// Minimum crop edge length in pixels; smaller crops are padded.
    #[arg(long, env = "SCAN2MD_MIN_SIZE", default_value_t = 56,
          value_parser = clap::value_parser!(u32).range(1..))]
    min_size: u32,

    /// Recognition attempts per crop, first one included.
    #[arg(long, env = "SCAN2MD_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Delay between recognition attempts in milliseconds.
    #[arg(long, env = "SCAN2MD_RETRY_DELAY_MS", default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Double the retry delay after every failed attempt.
    #[arg(long, env = "SCAN2MD_EXPONENTIAL_BACKOFF")]
    exponential_backoff: bool,

    /// Max LLM output tokens per crop.
    #[arg(long, env = "SCAN2MD_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SCAN2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "SCAN2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file replacing the base recognition instruction.
    #[arg(long, env = "SCAN2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "SCAN2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCAN2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCAN2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    Deskew,
    Segment,
    Normalize,
    Recognize,
    Merge,
}

impl From<StageArg> for Stage {
    fn from(v: StageArg) -> Self {
        match v {
            StageArg::Deskew => Stage::Deskew,
            StageArg::Segment => Stage::Segment,
            StageArg::Normalize => Stage::Normalize,
            StageArg::Recognize => Stage::Recognize,
            StageArg::Merge => Stage::Merge,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
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

    let progress_cb = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress_cb
            .clone()
            .map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )
    .await?;

    let result = run_pipeline(&config).await;
    if let Some(cb) = &progress_cb {
        cb.bar.finish_and_clear();
    }
    let report = result.with_context(|| format!("Run '{}' failed", cli.folder_name))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&report);
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    let failures = report.total_failures();
    let mark = if failures == 0 { green("✔") } else { cyan("⚠") };
    match &report.document {
        Some(path) => eprintln!(
            "{}  {} units merged ({} placeholders)  {}ms  →  {}",
            mark,
            report.merged_units,
            report.placeholders,
            report.total_duration_ms,
            bold(&path.display().to_string()),
        ),
        None => eprintln!("{}  nothing to merge  {}ms", mark, report.total_duration_ms),
    }
    if let Some(recognize) = report.stage(Stage::Recognize) {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&recognize.input_tokens.to_string()),
            dim(&recognize.output_tokens.to_string()),
        );
    }
    for stage in &report.stages {
        for failure in &stage.failures {
            eprintln!("   {} [{}] {}", red("✗"), stage.stage, failure);
        }
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = PipelineConfig::builder(&cli.folder_name)
        .input_root(&cli.input_root)
        .output_root(&cli.output_root)
        .start_stage(cli.from.into())
        .merge_order(if cli.natural_order {
            MergeOrder::Natural
        } else {
            MergeOrder::TypePriority
        })
        .min_dimension(cli.min_size)
        .layout_timeout_secs(cli.layout_timeout)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_attempts(cli.max_attempts)
        .retry_delay_ms(cli.retry_delay_ms)
        .backoff(if cli.exponential_backoff {
            Backoff::Exponential
        } else {
            Backoff::Fixed
        })
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref url) = cli.layout_url {
        builder = builder.layout_url(url);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
