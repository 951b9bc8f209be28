//! Result types produced by an extraction run.

use crate::error::InvoiceError;
use crate::pipeline::export::{self, Spreadsheet};
use serde::{Deserialize, Serialize};

/// Placeholder stored in text fields the model left out or left blank.
pub const UNKNOWN: &str = "Inconnu";

/// The accounting fields read from one invoice or receipt.
///
/// [`crate::pipeline::parse`] is the validating constructor: records it
/// returns have all six fields populated and non-negative amounts. The fields
/// are public and the type deserialises, so records built by hand carry no
/// such guarantee. The JSON form uses the French keys the model is asked to
/// produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(rename = "fournisseur")]
    pub supplier: String,
    /// Kept exactly as the model wrote it (usually `DD/MM/YYYY`).
    pub date: String,
    #[serde(rename = "HT")]
    pub net_amount: f64,
    #[serde(rename = "TVA")]
    pub tax_amount: f64,
    #[serde(rename = "TTC")]
    pub gross_amount: f64,
    #[serde(rename = "devise")]
    pub currency: String,
}

impl InvoiceRecord {
    /// Whether the supplier name was actually read from the document.
    pub fn has_known_supplier(&self) -> bool {
        !self.supplier.trim().is_empty() && self.supplier != UNKNOWN
    }

    /// Whether `net + tax` matches `gross` within half a percent (minimum one
    /// cent). Receipts with rounding or discounts may legitimately fail this;
    /// it is a hint for the reader, never a reason to reject the record.
    pub fn totals_consistent(&self) -> bool {
        let expected = self.net_amount + self.tax_amount;
        let tolerance = (self.gross_amount.abs() * 0.005).max(0.01);
        (expected - self.gross_amount).abs() <= tolerance
    }

    /// Render the record as a one-row `.xlsx` workbook.
    pub fn to_spreadsheet(&self) -> Result<Spreadsheet, InvoiceError> {
        export::export_record(self)
    }
}

/// Per-run statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Label of the model that answered, e.g. `openai:gpt-4.1-nano`.
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Retries spent on the model call (0 when the first attempt succeeded).
    pub retries: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub total_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Everything an extraction produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub record: InvoiceRecord,
    pub stats: ExtractionStats,
    /// The model's text exactly as received.
    pub raw_response: String,
}

impl ExtractionOutput {
    /// Shorthand for [`InvoiceRecord::to_spreadsheet`].
    pub fn spreadsheet(&self) -> Result<Spreadsheet, InvoiceError> {
        self.record.to_spreadsheet()
    }
}
