//! CLI binary for monogram.
//!
//! A thin shim over the library crate: `convert` runs the pipeline on a
//! local PDF, `files` prints the project manifest of a `.tex` file and
//! `export` renders a `.tex` file to tex, html or pdf.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use monogram::config::DEFAULT_MAX_PAGES;
use monogram::progress::ProgressCallback;
use monogram::{
    convert_file, infer_project_files, ContextHint, ConversionConfig, ConversionProgressCallback,
    ExportConfig, ExportFormat, Exporter,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────

/// Progress bar over pages. Pages may finish out of order with `--concurrency`.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Rendering");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn page_elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Transcribing");
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, latex_len: usize) {
        let secs = self.page_elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{latex_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.page_elapsed(page_num);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_conversion_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

// ── Arguments ────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Transcribe lecture notes to stdout
  monogram convert week3.pdf

  # Maths notes, written to a file
  monogram convert --context math week3.pdf -o week3.tex

  # Which files does a document pull in?
  monogram files week3.tex --json

  # Compile to PDF
  monogram export week3.tex --format pdf -o week3.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  GEMINI_MODEL            Gemini model (default gemini-2.5-flash)
  EDGEQUAKE_LLM_PROVIDER  Use another provider (openai, anthropic, ollama, ...)
  EDGEQUAKE_MODEL         Model for that provider
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips the download
"#;

/// Convert handwritten PDF notes to LaTeX with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "monogram",
    version,
    about = "Convert handwritten PDF notes to LaTeX with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MONOGRAM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MONOGRAM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe a handwritten PDF into a LaTeX document.
    Convert(ConvertArgs),
    /// List the files a LaTeX document refers to.
    Files(FilesArgs),
    /// Render a LaTeX document as tex, html or pdf.
    Export(ExportArgs),
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// PDF file to convert.
    input: PathBuf,

    /// Write LaTeX to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Subject of the notes: math, chemistry, physics, general.
    #[arg(long, value_enum, default_value = "general")]
    context: ContextArg,

    /// Vision model ID (e.g. gemini-2.5-flash).
    #[arg(long, env = "MONOGRAM_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "MONOGRAM_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Number of leading pages to convert.
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Concurrent vision-model calls. Page order is kept.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Per-page model call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,

    /// Print the full conversion result as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(clap::Args, Debug)]
struct FilesArgs {
    /// LaTeX source to scan.
    input: PathBuf,

    /// Name of the main file in the manifest. Default: the input's file name.
    #[arg(long)]
    name: Option<String>,

    /// Print the manifest as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// LaTeX source to export.
    input: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum)]
    format: FormatArg,

    /// Output file. Default: input stem plus the format's extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tool timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContextArg {
    Math,
    Chemistry,
    Physics,
    General,
}

impl From<ContextArg> for ContextHint {
    fn from(v: ContextArg) -> Self {
        match v {
            ContextArg::Math => ContextHint::Math,
            ContextArg::Chemistry => ContextHint::Chemistry,
            ContextArg::Physics => ContextHint::Physics,
            ContextArg::General => ContextHint::General,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Tex,
    Html,
    Pdf,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Tex => ExportFormat::Tex,
            FormatArg::Html => ExportFormat::Html,
            FormatArg::Pdf => ExportFormat::Pdf,
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────────

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(ref args) => run_convert(args, cli.quiet).await,
        Command::Files(ref args) => run_files(args).await,
        Command::Export(ref args) => run_export(args, cli.quiet).await,
    }
}

async fn run_convert(args: &ConvertArgs, quiet: bool) -> Result<()> {
    ensure_pdfium(quiet)?;

    let show_progress = !quiet && !args.no_progress && !args.json;
    let mut builder = ConversionConfig::builder()
        .dpi(args.dpi)
        .max_pages(args.max_pages)
        .concurrency(args.concurrency)
        .api_timeout_secs(args.api_timeout)
        .context(args.context.into());
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid options")?;

    let output = convert_file(&args.input, &config)
        .await
        .with_context(|| format!("Conversion of {} failed", args.input.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if let Some(ref path) = args.output {
        write_atomic(path, output.latex.as_bytes()).await?;
    } else {
        let mut out = io::stdout().lock();
        out.write_all(output.latex.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.latex.ends_with('\n') {
            out.write_all(b"\n").ok();
        }
    }

    if !quiet {
        eprintln!(
            "{} {} pages  {}ms  {} tokens in / {} out{}",
            green("✔"),
            bold(&output.stats.total_pages.to_string()),
            output.stats.total_duration_ms,
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            args.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn run_files(args: &FilesArgs) -> Result<()> {
    let source = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let name = args
        .name
        .clone()
        .or_else(|| file_name(&args.input))
        .unwrap_or_else(|| monogram::project::DEFAULT_MAIN_FILENAME.to_string());

    let files = infer_project_files(&name, &source);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&files).context("Failed to serialise manifest")?
        );
        return Ok(());
    }

    for entry in files {
        let kind = serde_json::to_value(entry.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let marker = if entry.stored { "*" } else { " " };
        println!("{marker} {kind:<6} {}", entry.path);
    }
    Ok(())
}

async fn run_export(args: &ExportArgs, quiet: bool) -> Result<()> {
    let source = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let stem = file_name(&args.input).unwrap_or_default();

    let exporter = Exporter::new(ExportConfig {
        tool_timeout_secs: args.timeout,
        ..ExportConfig::default()
    });
    let artifact = exporter
        .export(&source, args.format.into(), &stem)
        .await
        .context("Export failed")?;

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_file_name(&artifact.filename));
    write_atomic(&path, &artifact.content).await?;

    if !quiet {
        eprintln!(
            "{} {} ({} bytes)",
            green("✔"),
            bold(&path.display().to_string()),
            artifact.content.len()
        );
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Write through a temporary sibling so a failed run leaves no partial file.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("monogram.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Make sure a pdfium library is available, downloading it on first use.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix("PDF engine");
    bar.enable_steady_tick(Duration::from_millis(80));

    let progress = bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                progress.set_length(t);
            }
            progress.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    bar.finish_and_clear();
    Ok(())
}
