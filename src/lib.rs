//! # comptasnap
//!
//! Read the totals off a photographed invoice or receipt with a Vision
//! Language Model and hand them back as a one-row Excel sheet.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo (JPEG/PNG)
//!  │
//!  ├─ 1. Normalise  sniff format, decode, cap size, base64
//!  ├─ 2. VLM        one multimodal request to the committed model
//!  ├─ 3. Parse      recover the JSON object, validate six fields
//!  └─ 4. Export     fournisseur | date | HT | TVA | TTC | devise  → .xlsx
//! ```
//!
//! Each step fails with its own [`InvoiceError`] variant so a host can tell
//! "take a clearer photo" apart from "the model is down".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use comptasnap::{extract_invoice, ExtractionConfig, ModelClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let client = ModelClient::shared(&config)?;
//!
//!     let photo = std::fs::read("receipt.jpg")?;
//!     let output = extract_invoice(&photo, client, &config).await?;
//!     println!("{} — {} {}", output.record.supplier, output.record.gross_amount, output.record.currency);
//!
//!     let sheet = output.spreadsheet()?;
//!     std::fs::write(&sheet.file_name, &sheet.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `comptasnap` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ModelCandidate, ParseMode};
pub use error::{ErrorKind, InvoiceError};
pub use extract::{extract_from, extract_invoice, extract_sync, extract_to_file};
pub use output::{ExtractionOutput, ExtractionStats, InvoiceRecord, UNKNOWN};
pub use pipeline::export::{export_record, Spreadsheet, XLSX_MIME};
pub use pipeline::llm::{
    ClientCell, LlmVisionModel, ModelCallError, ModelClient, ModelReply, RawModelResponse,
    VisionModel,
};
pub use pipeline::normalize::{normalize, EncodedImage};
pub use pipeline::parse::{parse_response, parse_response_with};
