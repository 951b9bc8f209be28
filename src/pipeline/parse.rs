//! Response parsing: free-form model text → validated [`InvoiceRecord`].
//!
//! ## Locating the object
//!
//! Models regularly ignore "reply with JSON only" and wrap the object in a
//! sentence or a ```` ```json ```` fence. In [`ParseMode::Lenient`] the
//! candidate document is the span from the first `{` to the last `}`. This is
//! a heuristic, not a parser: braces inside surrounding prose, or two JSON
//! objects in one answer, produce a span that fails to parse and the whole
//! answer is reported as malformed. [`ParseMode::Strict`] refuses anything but
//! a bare object.
//!
//! ## Validation
//!
//! * Keys are matched case-insensitively against French and English aliases.
//! * Text fields that are missing or blank become [`UNKNOWN`]; a record
//!   with a known total but no supplier name is still useful.
//! * Amounts must be present and non-negative. Strings such as `"12.50"`,
//!   `"1 250,50"` or `"15.000 FCFA"` (fifteen thousand) are normalised by
//!   [`parse_amount`].
//!
//! Every function here is pure.

use crate::config::ParseMode;
use crate::error::InvoiceError;
use crate::output::{InvoiceRecord, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const SUPPLIER_KEYS: &[&str] = &["fournisseur", "supplier", "vendor", "merchant", "vendeur"];
const DATE_KEYS: &[&str] = &["date", "invoice_date", "date_facture"];
const NET_KEYS: &[&str] = &["ht", "net", "net_amount", "montant_ht", "subtotal"];
const TAX_KEYS: &[&str] = &["tva", "tax", "tax_amount", "vat", "montant_tva"];
const GROSS_KEYS: &[&str] = &["ttc", "gross", "gross_amount", "total", "montant_ttc"];
const CURRENCY_KEYS: &[&str] = &["devise", "currency", "monnaie"];

/// Parse a model answer with the default, lenient object lookup.
pub fn parse_response(raw: &str) -> Result<InvoiceRecord, InvoiceError> {
    parse_response_with(raw, ParseMode::Lenient)
}

/// Parse a model answer using the given object lookup mode.
pub fn parse_response_with(raw: &str, mode: ParseMode) -> Result<InvoiceRecord, InvoiceError> {
    let candidate = match mode {
        ParseMode::Lenient => brace_span(raw),
        ParseMode::Strict => {
            let trimmed = raw.trim();
            (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed)
        }
    }
    .ok_or_else(|| malformed("no JSON object found in the model answer", raw))?;

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| malformed(&format!("invalid JSON: {e}"), raw))?;
    let Value::Object(fields) = value else {
        return Err(malformed("the JSON document is not an object", raw));
    };

    let currency = text_field(&fields, CURRENCY_KEYS);
    Ok(InvoiceRecord {
        supplier: text_field(&fields, SUPPLIER_KEYS),
        date: text_field(&fields, DATE_KEYS),
        net_amount: amount_field(&fields, NET_KEYS, "HT", raw)?,
        tax_amount: amount_field(&fields, TAX_KEYS, "TVA", raw)?,
        gross_amount: amount_field(&fields, GROSS_KEYS, "TTC", raw)?,
        currency: if currency == UNKNOWN {
            currency
        } else {
            currency.to_uppercase()
        },
    })
}

/// Slice from the first `{` to the last `}` inclusive.
fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn lookup<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(alias))
            .map(|(_, v)| v)
    })
}

fn text_field(fields: &Map<String, Value>, aliases: &[&str]) -> String {
    let text = match lookup(fields, aliases) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if text.is_empty() {
        UNKNOWN.to_string()
    } else {
        text
    }
}

fn amount_field(
    fields: &Map<String, Value>,
    aliases: &[&str],
    name: &str,
    raw: &str,
) -> Result<f64, InvoiceError> {
    let value = match lookup(fields, aliases) {
        None | Some(Value::Null) => {
            return Err(malformed(&format!("missing amount field '{name}'"), raw))
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_amount(s),
        Some(_) => None,
    }
    .ok_or_else(|| malformed(&format!("amount field '{name}' is not a number"), raw))?;

    if !value.is_finite() || value < 0.0 {
        return Err(malformed(
            &format!("amount field '{name}' must be a non-negative number, got {value}"),
            raw,
        ));
    }
    Ok(value)
}

static RE_PLAIN_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());
static RE_THOUSANDS_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[1-9]\d{0,2}(,\d{3})+$").unwrap());
static RE_THOUSANDS_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[1-9]\d{0,2}(\.\d{3})+$").unwrap());

/// Normalise a human-formatted amount to `f64`.
///
/// Currency symbols, codes and whitespace (including the narrow no-break
/// space French locales print) are dropped. Separator rules:
///
/// * both `.` and `,` present → the later one is the decimal point;
/// * only `,` → thousands when it matches `1,234,567`, decimal otherwise;
/// * only `.` → the same rule: `15.000` and `1.250.000` group thousands,
///   `12.50` and `9.999999` are decimals.
///
/// Dot grouping is how XOF and other zero-decimal currencies are printed, so
/// `"1.250"` reads as 1250, never 1.25.
pub fn parse_amount(input: &str) -> Option<f64> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let normalised = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) if RE_THOUSANDS_COMMA.is_match(&cleaned) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replacen(',', ".", 1),
        (Some(_), None) if RE_THOUSANDS_DOT.is_match(&cleaned) => cleaned.replace('.', ""),
        _ => cleaned,
    };

    if !RE_PLAIN_NUMBER.is_match(&normalised) {
        return None;
    }
    normalised.parse().ok()
}

fn malformed(reason: &str, raw: &str) -> InvoiceError {
    InvoiceError::MalformedResponse {
        reason: reason.to_string(),
        raw: raw.to_string(),
    }
}
