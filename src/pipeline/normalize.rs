//! Image normalisation: raw upload bytes → base64 payload for the VLM.
//!
//! Only JPEG and PNG are accepted. The format is sniffed from the magic bytes
//! (the file extension or declared MIME type of an upload is not trusted) and
//! the image is fully decoded once, so a truncated or corrupt photo fails here
//! with [`InvoiceError::InvalidImage`] instead of as an opaque provider error.
//!
//! Phone cameras store pixels in sensor order and record the rotation in the
//! EXIF `Orientation` tag. That tag is applied here, so the model always sees
//! the receipt upright whichever path the image takes.
//!
//! Upright photos within the size cap are forwarded byte-for-byte. Rotated or
//! oversized photos are re-encoded as PNG: lossless keeps printed digits
//! crisp, which matters more for amounts than file size.

use crate::error::InvoiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// A validated image ready to embed in a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 (standard alphabet, padded) of the image bytes.
    pub data: String,
    /// `image/jpeg` or `image/png`.
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// `data:<mime>;base64,<data>` form accepted by OpenAI-style chat APIs.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Provider payload. `detail: "high"` keeps fine print readable on
    /// GPT-4-class models, which otherwise see a single 512 px tile.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.mime_type).with_detail("high")
    }
}

/// Validate and encode an invoice photo.
///
/// `max_dimension` caps the longer side in pixels; `None` disables resizing.
pub fn normalize(bytes: &[u8], max_dimension: Option<u32>) -> Result<EncodedImage, InvoiceError> {
    if bytes.is_empty() {
        return Err(invalid("empty input"));
    }

    let format = image::guess_format(bytes)
        .map_err(|_| invalid("unrecognised file signature (expected JPEG or PNG)"))?;
    let mime_type = match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        other => {
            return Err(invalid(&format!(
                "unsupported format {other:?} (expected JPEG or PNG)"
            )))
        }
    };

    let (img, orientation) = decode(bytes, format)
        .map_err(|e| invalid(&format!("cannot decode {mime_type}: {e}")))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(invalid("image has no pixels"));
    }

    let upright = orientation == Orientation::NoTransforms;
    let oversized = max_dimension.filter(|max| img.width().max(img.height()) > *max);
    if upright && oversized.is_none() {
        let (width, height) = img.dimensions();
        return Ok(wrap(bytes, mime_type, width, height));
    }

    let mut img = img;
    if !upright {
        img.apply_orientation(orientation);
        debug!("Applied EXIF orientation {:?}", orientation);
    }
    if let Some(max) = oversized {
        let (width, height) = img.dimensions();
        img = img.resize(max, max, FilterType::Triangle);
        debug!("Downscaled image {}x{} → {}x{}", width, height, img.width(), img.height());
    }
    let (w, h) = img.dimensions();
    let png = encode_png(&img)?;
    Ok(wrap(&png, "image/png", w, h))
}

/// Decode the pixels and read the EXIF orientation in one pass.
fn decode(
    bytes: &[u8],
    format: ImageFormat,
) -> image::ImageResult<(DynamicImage, Orientation)> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format).into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let img = DynamicImage::from_decoder(decoder)?;
    Ok((img, orientation))
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, InvoiceError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| InvoiceError::Internal(format!("PNG re-encoding failed: {e}")))?;
    Ok(buf)
}

fn wrap(bytes: &[u8], mime_type: &'static str, width: u32, height: u32) -> EncodedImage {
    let data = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", mime_type, data.len());
    EncodedImage {
        data,
        mime_type,
        width,
        height,
    }
}

fn invalid(reason: &str) -> InvoiceError {
    InvoiceError::InvalidImage {
        reason: reason.to_string(),
    }
}
