//! Extraction entry points.
//!
//! [`extract_invoice`] is the core: one image in, one [`ExtractionOutput`] or
//! one [`InvoiceError`] out. The other functions are conveniences around it
//! for hosts that start from a path or URL, want a file on disk, or are not
//! async.
//!
//! The [`ModelClient`] is passed in explicitly. Build it once with
//! [`ModelClient::connect`] or take the process-wide one from
//! [`ModelClient::shared`], then reuse it for every image.

use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::llm::ModelClient;
use crate::pipeline::{input, normalize, parse};
use crate::prompts::EXTRACTION_PROMPT;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract the accounting fields from one invoice photo.
///
/// # Arguments
/// * `image` — raw JPEG or PNG bytes
/// * `client` — the committed vision model
/// * `config` — extraction configuration
///
/// # Errors
/// * [`InvoiceError::InvalidImage`] — the bytes are not a readable JPEG/PNG
/// * [`InvoiceError::ModelInvocation`] — the model call failed or timed out
/// * [`InvoiceError::MalformedResponse`] — no valid record in the answer
pub async fn extract_invoice(
    image: &[u8],
    client: &ModelClient,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    let total_start = Instant::now();
    info!("Starting extraction with {} ({} bytes)", client.label(), image.len());

    // ── Step 1: Normalise image ──────────────────────────────────────────
    let encoded = normalize::normalize(image, config.max_image_dimension)?;
    debug!(
        "Image {}x{} {} ready for the model",
        encoded.width, encoded.height, encoded.mime_type
    );

    // ── Step 2: Ask the model ────────────────────────────────────────────
    let response = client.extract(&encoded, EXTRACTION_PROMPT, config).await?;

    // ── Step 3: Parse and validate ───────────────────────────────────────
    let record = parse::parse_response_with(&response.text, config.parse_mode)?;
    if !record.totals_consistent() {
        warn!(
            "Totals do not add up: HT {} + TVA {} != TTC {}",
            record.net_amount, record.tax_amount, record.gross_amount
        );
    }

    let stats = ExtractionStats {
        model: response.model,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        retries: response.retries,
        image_width: encoded.width,
        image_height: encoded.height,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        llm_duration_ms: response.duration_ms,
    };

    info!(
        "Extraction complete: {} — {} {} TTC, {}ms total",
        record.supplier, record.gross_amount, record.currency, stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        record,
        stats,
        raw_response: response.text,
    })
}

/// Extract from a local file path or HTTP/HTTPS URL.
pub async fn extract_from(
    input_str: impl AsRef<str>,
    client: &ModelClient,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    let bytes = input::load_image(input_str.as_ref(), config.download_timeout_secs).await?;
    extract_invoice(&bytes, client, config).await
}

/// Extract and write the spreadsheet to disk.
///
/// `output` may be a file path or an existing directory; in the latter case
/// the suggested `Facture_<supplier>.xlsx` name is used inside it. Uses an
/// atomic write (temp file + rename) so a failed run never leaves a partial
/// workbook behind. Returns the extraction result and the path written.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output: impl AsRef<Path>,
    client: &ModelClient,
    config: &ExtractionConfig,
) -> Result<(ExtractionOutput, PathBuf), InvoiceError> {
    let extracted = extract_from(input_str, client, config).await?;
    let sheet = extracted.spreadsheet()?;

    let output = output.as_ref();
    let path = if output.is_dir() {
        output.join(&sheet.file_name)
    } else {
        output.to_path_buf()
    };

    write_atomically(&path, &sheet.bytes).await?;
    info!("Wrote {}", path.display());
    Ok((extracted, path))
}

/// Write `bytes` to `path` through a sibling `.tmp` file and a rename. The
/// temp file is removed when the rename fails.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), InvoiceError> {
    let write_failed = |source: std::io::Error| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("xlsx.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(write_failed)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_failed(e));
    }
    Ok(())
}

/// Synchronous wrapper around [`extract_invoice`].
///
/// Creates a temporary tokio runtime internally; do not call it from inside
/// an async context.
pub fn extract_sync(
    image: &[u8],
    client: &ModelClient,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_invoice(image, client, config))
}
