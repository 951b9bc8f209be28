//! Spreadsheet export: one [`InvoiceRecord`] → a one-row `.xlsx` workbook.
//!
//! The layout is fixed so accountants can paste rows from several exports
//! into one ledger: a bold header row with [`FIELD_KEYS`] and one data row in
//! the same column order, amounts as real numeric cells.

use crate::error::InvoiceError;
use crate::output::InvoiceRecord;
use crate::prompts::FIELD_KEYS;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::debug;

/// MIME type of an OOXML workbook.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Sheet name used when the supplier is unknown or unusable.
pub const DEFAULT_SHEET_NAME: &str = "ComptaSnap_Extract";

/// Excel rejects longer sheet names.
const MAX_SHEET_NAME_LEN: usize = 31;

/// A serialised workbook and the metadata a host needs to offer it.
#[derive(Debug, Clone)]
pub struct Spreadsheet {
    pub file_name: String,
    pub sheet_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Serialise `record` into a single-sheet workbook.
pub fn export_record(record: &InvoiceRecord) -> Result<Spreadsheet, InvoiceError> {
    let sheet_name = sheet_name(record);
    let bytes = write_workbook(record, &sheet_name).map_err(|e| InvoiceError::Export(e.to_string()))?;
    debug!("Exported sheet '{}' ({} bytes)", sheet_name, bytes.len());

    Ok(Spreadsheet {
        file_name: file_name(record),
        sheet_name,
        mime_type: XLSX_MIME,
        bytes,
    })
}

fn write_workbook(record: &InvoiceRecord, sheet_name: &str) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let amount = Format::new().set_num_format("#,##0.00");

    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    for (col, key) in FIELD_KEYS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *key, &header)?;
    }

    sheet.write_string(1, 0, record.supplier.as_str())?;
    sheet.write_string(1, 1, record.date.as_str())?;
    sheet.write_number_with_format(1, 2, record.net_amount, &amount)?;
    sheet.write_number_with_format(1, 3, record.tax_amount, &amount)?;
    sheet.write_number_with_format(1, 4, record.gross_amount, &amount)?;
    sheet.write_string(1, 5, record.currency.as_str())?;

    sheet.set_column_width(0, 30)?;
    sheet.set_column_width(1, 12)?;
    for col in 2..=4 {
        sheet.set_column_width(col, 14)?;
    }

    workbook.save_to_buffer()
}

/// Worksheet name: the supplier, cleaned for Excel, or [`DEFAULT_SHEET_NAME`].
pub fn sheet_name(record: &InvoiceRecord) -> String {
    if !record.has_known_supplier() {
        return DEFAULT_SHEET_NAME.to_string();
    }
    let cleaned: String = record
        .supplier
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    // "History" is reserved by Excel.
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("history") {
        DEFAULT_SHEET_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Suggested download name: `Facture_<supplier>.xlsx`.
pub fn file_name(record: &InvoiceRecord) -> String {
    let stem = if record.has_known_supplier() {
        let safe: String = record
            .supplier
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = safe.trim_matches(|c| c == '_' || c == '.').to_string();
        if safe.is_empty() {
            "ComptaSnap".to_string()
        } else {
            safe
        }
    } else {
        "ComptaSnap".to_string()
    };
    format!("Facture_{stem}.xlsx")
}
