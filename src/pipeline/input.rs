//! Input resolution: load the invoice photo from a local path or a URL.
//!
//! Hosts that already hold the upload in memory skip this stage and call
//! [`crate::extract::extract_invoice`] with the bytes directly. Format
//! validation is left to [`crate::pipeline::normalize`], which sniffs magic
//! bytes instead of trusting extensions or `Content-Type` headers.

use crate::error::InvoiceError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Upper bound on a downloaded photo. Provider upload limits sit around 20 MB.
const MAX_DOWNLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the image at `input`, downloading it first when it is a URL.
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, InvoiceError> {
    let path = PathBuf::from(path_str);

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(InvoiceError::PermissionDenied { path })
        }
        Err(_) => Err(InvoiceError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| InvoiceError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    if let Some(len) = response.content_length() {
        if len as usize > MAX_DOWNLOAD_BYTES {
            return Err(failed(format!("image is {len} bytes, limit is {MAX_DOWNLOAD_BYTES}")));
        }
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;
    if bytes.len() > MAX_DOWNLOAD_BYTES {
        return Err(failed(format!(
            "image is {} bytes, limit is {MAX_DOWNLOAD_BYTES}",
            bytes.len()
        )));
    }

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
