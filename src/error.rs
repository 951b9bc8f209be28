//! Error types for the comptasnap library.
//!
//! Every failure is scoped to a single extraction: nothing here is fatal to
//! the process, and no partial [`crate::output::InvoiceRecord`] is ever
//! returned alongside an error.
//!
//! The four pipeline failures are kept as distinct variants so a host can
//! show differentiated guidance:
//!
//! * [`InvoiceError::InvalidImage`]: the photo could not be decoded.
//! * [`InvoiceError::ModelUnavailable`]: no configured model could be built.
//! * [`InvoiceError::ModelInvocation`]: the model call failed or timed out.
//! * [`InvoiceError::MalformedResponse`]: the model answered, but no record
//!   could be recovered. The raw text is attached for manual inspection.
//!
//! [`InvoiceError::kind`] collapses the variants into an [`ErrorKind`] tag and
//! [`InvoiceError::user_hint`] gives the matching end-user message.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the comptasnap library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The bytes are not a readable JPEG or PNG image.
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// None of the configured model candidates could be constructed.
    #[error("No vision model is available (tried: {}).\n{detail}", .tried.join(", "))]
    ModelUnavailable { tried: Vec<String>, detail: String },

    /// The committed model errored or did not answer in time.
    #[error("Model '{model}' failed after {attempts} attempt(s): {detail}")]
    ModelInvocation {
        model: String,
        attempts: u32,
        timed_out: bool,
        detail: String,
    },

    /// The model replied but no valid invoice record could be recovered.
    #[error("Malformed model response: {reason}")]
    MalformedResponse { reason: String, raw: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The spreadsheet writer rejected the record.
    #[error("Spreadsheet export failed: {0}")]
    Export(String),

    /// Could not create or write the output spreadsheet.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`InvoiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidImage,
    ModelUnavailable,
    ModelInvocation,
    MalformedResponse,
    Input,
    Output,
    Config,
    Internal,
}

impl InvoiceError {
    /// Tag used by hosts to branch on the failure without matching every field.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::InvalidImage { .. } => ErrorKind::InvalidImage,
            InvoiceError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            InvoiceError::ModelInvocation { .. } => ErrorKind::ModelInvocation,
            InvoiceError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            InvoiceError::FileNotFound { .. }
            | InvoiceError::PermissionDenied { .. }
            | InvoiceError::DownloadFailed { .. }
            | InvoiceError::DownloadTimeout { .. } => ErrorKind::Input,
            InvoiceError::Export(_) | InvoiceError::OutputWriteFailed { .. } => ErrorKind::Output,
            InvoiceError::InvalidConfig(_) => ErrorKind::Config,
            InvoiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when trying the same action again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ModelUnavailable | ErrorKind::ModelInvocation
        ) || matches!(self, InvoiceError::DownloadTimeout { .. })
    }

    /// Raw model text, when the failure happened after the model answered.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            InvoiceError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// End-user guidance for the presentation layer.
    pub fn user_hint(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidImage => {
                "The image could not be read. Use a clearer JPEG or PNG photo of the invoice."
            }
            ErrorKind::ModelUnavailable => {
                "No vision model is reachable right now. Check your API key and try again later."
            }
            ErrorKind::ModelInvocation => {
                "The model did not answer. This is usually temporary, please retry."
            }
            ErrorKind::MalformedResponse => {
                "The model could not read this invoice reliably. Check its raw answer below or retry with a sharper photo."
            }
            ErrorKind::Input => "The input image could not be loaded.",
            ErrorKind::Output => "The spreadsheet could not be written.",
            ErrorKind::Config => "The configuration is invalid.",
            ErrorKind::Internal => "An unexpected error occurred.",
        }
    }
}
