//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own; only [`llm`] touches the network.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ llm ──▶ parse ──▶ export
//! (path/URL)  (base64)    (VLM)   (JSON)    (xlsx)
//! ```
//!
//! 1. [`input`]: load the photo from a local path or HTTP(S) URL
//! 2. [`normalize`]: validate JPEG/PNG, cap the size, base64-encode
//! 3. [`llm`]: send instruction + image to the committed model
//! 4. [`parse`]: recover and validate the JSON record
//! 5. [`export`]: write the one-row spreadsheet

pub mod export;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
