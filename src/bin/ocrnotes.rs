//! CLI binary for edgequake-ocr-notes.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractorConfig`, drives one run and prints the summary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edgequake_ocr_notes::backend::command;
use edgequake_ocr_notes::{
    BackendKind, ExtractionProgressCallback, Extractor, ExtractorConfig, FsVault, RunOutcome,
    SkippedReference,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the notes of the run, with the
/// final outcome printed once the bar is cleared.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} notes  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_progress(&self, current: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        // `current` is the note being started, so the bar counts finished ones.
        self.bar.set_position(current.saturating_sub(1) as u64);
    }

    fn on_complete(&self, extracted: usize, skipped: &[SkippedReference]) {
        self.bar.finish_and_clear();
        if skipped.is_empty() {
            eprintln!(
                "{} {} attachment(s) extracted",
                green("✔"),
                bold(&extracted.to_string())
            );
            return;
        }
        eprintln!(
            "{} {} extracted  ({} skipped)",
            cyan("⚠"),
            bold(&extracted.to_string()),
            skipped.len()
        );
        for s in skipped {
            eprintln!(
                "  {} {}  {}  {}",
                dim("–"),
                s.document.display(),
                s.markup,
                dim(&s.reason.to_string())
            );
        }
    }

    fn on_cancelled(&self) {
        self.bar.finish_and_clear();
        eprintln!("{} Text extraction cancelled", cyan("⚠"));
    }

    fn on_error(&self, message: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(message));
    }
}

/// Used with `--quiet` and `--json`: errors still reach stderr.
struct QuietProgressCallback;

impl ExtractionProgressCallback for QuietProgressCallback {
    fn on_error(&self, message: &str) {
        eprintln!("{message}");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract text for the attachments of one note (local tesseract)
  ocrnotes --vault ~/notes extract Inbox/receipts.md

  # Every note in the vault, using Mistral OCR
  ocrnotes --vault ~/notes --backend mistral extract-all

  # A custom command (placeholders are replaced with quoted temp paths)
  ocrnotes --backend command --command 'my-ocr {input} > {output}' extract scan.md

  # Check a custom command before a run
  ocrnotes --backend command --command 'my-ocr {input} > {output}' test-command

  # JSON summary for scripting
  ocrnotes --json --vault ~/notes extract-all --yes > run.json

BACKENDS:
  tesseract   Local engine, needs `tesseract` on PATH (default)
  mistral     Mistral OCR API, needs MISTRAL_API_KEY
  vision      Vision LLM via edgequake-llm (OPENAI_API_KEY, ANTHROPIC_API_KEY, ...)
  command     Any program that reads {input} and writes {output}

ENVIRONMENT VARIABLES:
  OCRNOTES_VAULT          Vault root directory
  OCRNOTES_BACKEND        Backend name
  MISTRAL_API_KEY         Mistral API key
  EDGEQUAKE_LLM_PROVIDER  Vision provider override (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Vision model override
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
"#;

/// Extract text from attachments embedded in Markdown notes.
#[derive(Parser, Debug)]
#[command(
    name = "ocrnotes",
    version,
    about = "Extract text from attachments embedded in Markdown notes",
    long_about = "Run OCR on the images and PDFs embedded in Markdown notes and write the \
text back under each embed as a collapsed callout. Notes that already carry a callout \
are left alone, and a note edited during OCR is never overwritten.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Vault root directory.
    #[arg(long, global = true, env = "OCRNOTES_VAULT", default_value = ".")]
    vault: PathBuf,

    /// OCR backend: tesseract, mistral, vision, command.
    #[arg(long, global = true, env = "OCRNOTES_BACKEND", default_value = "tesseract")]
    backend: String,

    /// Mistral API key.
    #[arg(long, global = true, env = "MISTRAL_API_KEY", hide_env_values = true)]
    mistral_api_key: Option<String>,

    /// Mistral OCR model.
    #[arg(long, global = true, env = "OCRNOTES_MISTRAL_MODEL")]
    mistral_model: Option<String>,

    /// Shell command template with {input} and {output} placeholders.
    #[arg(long = "command", global = true, env = "OCRNOTES_COMMAND")]
    custom_command: Option<String>,

    /// Rasterise PDFs and run the command once per page.
    #[arg(long, global = true, env = "OCRNOTES_CONVERT_PDFS")]
    convert_pdfs: bool,

    /// Custom command timeout in seconds.
    #[arg(long, global = true, env = "OCRNOTES_COMMAND_TIMEOUT", default_value_t = 300)]
    command_timeout: u64,

    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, global = true, env = "OCRNOTES_LANGUAGE")]
    language: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    vision_provider: Option<String>,

    /// Vision model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    vision_model: Option<String>,

    /// Use the PDF text layer when it has text, before running OCR.
    #[arg(long, global = true, env = "OCRNOTES_EMBEDDED_PDF_TEXT")]
    embedded_pdf_text: bool,

    /// OCR calls in flight per wave.
    #[arg(long, global = true, env = "OCRNOTES_WAVE_SIZE", default_value_t = 5)]
    wave_size: usize,

    /// Retries per attachment on transient failures.
    #[arg(long, global = true, env = "OCRNOTES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Callout title.
    #[arg(long, global = true, env = "OCRNOTES_TITLE")]
    title: Option<String>,

    /// Output the run summary as JSON.
    #[arg(long, global = true, env = "OCRNOTES_JSON")]
    json: bool,

    /// Trace every step of the run (implies --verbose).
    #[arg(long, global = true, env = "OCRNOTES_DEBUG")]
    debug: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCRNOTES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCRNOTES_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Extract text for the attachments of one note.
    Extract {
        /// Note path, absolute or relative to the vault root.
        note: PathBuf,
    },
    /// Extract text for the attachments of every note in the vault.
    ExtractAll {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Run the custom command once against a blank image.
    TestCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let verbose = cli.verbose || cli.debug;
    let show_progress = !cli.quiet && !cli.json;
    let filter = if verbose {
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

    let config = build_config(&cli)?;

    let (vault, docs) = match &cli.command {
        Cmd::TestCommand => return run_test_command(&config, cli.quiet).await,
        Cmd::Extract { note } => {
            let vault = open_vault(&cli)?;
            let doc = vault
                .note_id(note)
                .with_context(|| format!("Failed to find note {}", note.display()))?;
            (vault, vec![doc])
        }
        Cmd::ExtractAll { yes } => {
            let vault = open_vault(&cli)?;
            let notes = vault.notes();
            if notes.is_empty() {
                if !cli.quiet {
                    eprintln!("No notes found in {}", vault.root().display());
                }
                return Ok(());
            }
            if !yes && !confirm(notes.len(), &config)? {
                return Ok(());
            }
            (vault, notes)
        }
    };

    if needs_pdfium(&config) {
        ensure_pdfium(cli.quiet)?;
    }

    let extractor = Extractor::new(config);
    let progress: Box<dyn ExtractionProgressCallback> = if show_progress {
        Box::new(CliProgressCallback::new())
    } else {
        Box::new(QuietProgressCallback)
    };

    // ── Run, cancelling on Ctrl-C ────────────────────────────────────────
    let outcome = extractor
        .start_all_interruptible(&vault, &docs, progress.as_ref(), move || async move {
            tokio::signal::ctrl_c().await?;
            if show_progress {
                eprintln!("{} Cancelling…", cyan("◆"));
            }
            Ok(())
        })
        .await
        .context("Text extraction failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        let summary = outcome.summary();
        eprintln!(
            "   {} note(s)  /  {} skipped  /  {}ms total",
            dim(&summary.documents.to_string()),
            dim(&summary.skipped.len().to_string()),
            summary.duration_ms,
        );
    }

    if let RunOutcome::Failed { message, .. } = outcome {
        bail!(message);
    }
    Ok(())
}

fn open_vault(cli: &Cli) -> Result<FsVault> {
    FsVault::open(&cli.vault)
        .with_context(|| format!("Failed to open vault {}", cli.vault.display()))
}

/// Run the custom command once and report whether it produced output.
async fn run_test_command(config: &ExtractorConfig, quiet: bool) -> Result<()> {
    let template = config.custom_command.trim();
    if template.is_empty() {
        bail!("No custom command configured (use --command)");
    }
    if !quiet {
        eprintln!("{} {}", cyan("◆"), dim(&command::describe(template)));
    }
    command::test_command(config)
        .await
        .context("Custom command test failed")?;
    if !quiet {
        eprintln!("{} Custom command works", green("✔"));
    }
    Ok(())
}

/// Map CLI args to `ExtractorConfig`.
fn build_config(cli: &Cli) -> Result<ExtractorConfig> {
    let backend = BackendKind::parse(&cli.backend).with_context(|| {
        format!(
            "Unknown backend '{}' (expected tesseract, mistral, vision or command)",
            cli.backend
        )
    })?;

    let mut builder = ExtractorConfig::builder()
        .backend(backend)
        .wave_size(cli.wave_size)
        .max_retries(cli.max_retries)
        .command_timeout(Duration::from_secs(cli.command_timeout))
        .custom_command_convert_pdfs(cli.convert_pdfs)
        .use_embedded_pdf_text(cli.embedded_pdf_text)
        .debug_logging(cli.debug);

    if let Some(ref key) = cli.mistral_api_key {
        builder = builder.mistral_api_key(key.clone());
    }
    if let Some(ref model) = cli.mistral_model {
        builder = builder.mistral_model(model.clone());
    }
    if let Some(ref command) = cli.custom_command {
        builder = builder.custom_command(command.clone());
    }
    if let Some(ref lang) = cli.language {
        builder = builder.tesseract_language(lang.clone());
    }
    if let Some(ref provider) = cli.vision_provider {
        builder = builder.vision_provider(provider.clone());
    }
    if let Some(ref model) = cli.vision_model {
        builder = builder.vision_model(model.clone());
    }
    if let Some(ref title) = cli.title {
        builder = builder.callout_title(title.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Backends that rasterise PDFs locally, or read their text layer.
fn needs_pdfium(config: &ExtractorConfig) -> bool {
    config.use_embedded_pdf_text
        || match config.backend {
            BackendKind::Tesseract | BackendKind::Vision => true,
            BackendKind::Command => config.custom_command_convert_pdfs,
            BackendKind::Mistral => false,
        }
}

/// Download the PDFium engine on first use, with a progress bar unless quiet.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }

    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Ask before touching every note in the vault.
fn confirm(notes: usize, config: &ExtractorConfig) -> Result<bool> {
    eprint!(
        "Extract text from the attachments of {} note(s) with {}? [y/N] ",
        bold(&notes.to_string()),
        config.backend.label()
    );
    io::stderr().flush().ok();

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
