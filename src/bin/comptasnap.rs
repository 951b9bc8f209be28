//! CLI binary for comptasnap.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one extraction and writes the spreadsheet.

use anyhow::{Context, Result};
use clap::Parser;
use comptasnap::{
    extract_from, extract_to_file, ExtractionConfig, InvoiceError, InvoiceRecord, ModelCandidate,
    ModelClient, ParseMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and write Facture_<supplier>.xlsx in the current directory
  comptasnap receipt.jpg

  # Choose the output file
  comptasnap receipt.jpg -o march/taxi.xlsx

  # Try Groq first, fall back to OpenAI if it cannot be set up
  comptasnap --model groq:llama-3.2-90b-vision-preview --model openai:gpt-4.1-mini receipt.png

  # Print the record as JSON, no spreadsheet
  comptasnap --json --no-export https://example.com/invoice.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  COMPTASNAP_MODELS       Comma-separated provider:model fallback list
"#;

/// Extract invoice totals from a photo into an Excel sheet using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "comptasnap",
    version,
    about = "Extract invoice totals from a photo into an Excel sheet using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local JPEG/PNG path or HTTP/HTTPS URL.
    input: String,

    /// Spreadsheet path, or a directory to place Facture_<supplier>.xlsx in.
    #[arg(short, long, env = "COMPTASNAP_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Model candidate as provider:model. Repeat to build a fallback list.
    #[arg(
        long = "model",
        env = "COMPTASNAP_MODELS",
        value_delimiter = ',',
        long_help = "Vision model to use, as provider:model (e.g. openai:gpt-4.1-nano).\n\
          Repeat the flag to give fallbacks; the first one that can be set up is used.\n\
          Auto-detected from API key env vars if not set."
    )]
    models: Vec<String>,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "COMPTASNAP_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Retries after a failed model call.
    #[arg(long, env = "COMPTASNAP_MAX_RETRIES", default_value_t = 1)]
    max_retries: u32,

    /// Largest image side sent to the model, in pixels (0 = no limit).
    #[arg(long, env = "COMPTASNAP_MAX_DIMENSION", default_value_t = 2000)]
    max_dimension: u32,

    /// Require the model to answer with a bare JSON object.
    #[arg(long, env = "COMPTASNAP_STRICT")]
    strict: bool,

    /// Print the record as JSON instead of a table.
    #[arg(long, env = "COMPTASNAP_JSON")]
    json: bool,

    /// Do not write a spreadsheet.
    #[arg(long)]
    no_export: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "COMPTASNAP_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "COMPTASNAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, env = "COMPTASNAP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_spinner = !cli.quiet && !cli.verbose && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_spinner {
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
    let client = ModelClient::shared(&config).map_err(report)?;

    let spinner = show_spinner.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Analysing");
        bar.set_message(format!("{} with {}", cli.input, client.label()));
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let result = if cli.no_export {
        extract_from(&cli.input, client, &config)
            .await
            .map(|output| (output, None))
    } else {
        extract_to_file(&cli.input, &cli.output, client, &config)
            .await
            .map(|(output, path)| (output, Some(path)))
    };
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    let (output, written) = result.map_err(report)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output.record).context("Failed to serialise record")?
        );
    } else {
        print_record(&output.record);
    }

    if let Some(path) = written {
        if !cli.quiet {
            eprintln!("{} {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    if !cli.quiet && !cli.json {
        if !output.record.totals_consistent() {
            eprintln!(
                "{} HT + TVA does not match TTC, double-check the amounts",
                yellow("⚠")
            );
        }
        eprintln!(
            "   {}  {} tokens in  /  {} tokens out  —  {}ms",
            dim(&output.stats.model),
            dim(&output.stats.input_tokens.to_string()),
            dim(&output.stats.output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let candidates = cli
        .models
        .iter()
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.parse::<ModelCandidate>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --model value")?;

    ExtractionConfig::builder()
        .candidates(candidates)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .max_image_dimension((cli.max_dimension > 0).then_some(cli.max_dimension))
        .parse_mode(if cli.strict {
            ParseMode::Strict
        } else {
            ParseMode::Lenient
        })
        .download_timeout_secs(cli.download_timeout)
        .build()
        .context("Invalid configuration")
}

fn print_record(record: &InvoiceRecord) {
    println!("{:<12} {}", bold("Fournisseur"), record.supplier);
    println!("{:<12} {}", bold("Date"), record.date);
    println!("{:<12} {:.2} {}", bold("HT"), record.net_amount, record.currency);
    println!("{:<12} {:.2} {}", bold("TVA"), record.tax_amount, record.currency);
    println!("{:<12} {:.2} {}", bold("TTC"), record.gross_amount, record.currency);
}

/// Print the user-facing hint (and the raw answer when there is one), then
/// hand the error to anyhow for the exit status.
fn report(err: InvoiceError) -> anyhow::Error {
    eprintln!("{} {}", red("✘"), err.user_hint());
    if let Some(raw) = err.raw_response() {
        eprintln!("{}", dim("── model answer ──"));
        eprintln!("{raw}");
    }
    anyhow::Error::new(err)
}
