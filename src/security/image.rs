//! Validation of base64 image attachments.
//!
//! The declared MIME type, file name and size are client-controlled, so the
//! checks here look at the bytes themselves: the leading signature must
//! match the declared type, and a prefix of the payload is screened for
//! markup that would make the file a script polyglot.
//!
//! Two heuristics are deliberate and documented limitations:
//! - size is estimated as `len * 3 / 4` without padding correction;
//! - only the first `SCAN_PREFIX_CHARS` of the encoded data are screened.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::{Rejection, ValidationResult};

pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_IMAGES_PER_MESSAGE: usize = 5;
/// Longest `data` string whose estimated size still fits `MAX_IMAGE_SIZE`.
pub const MAX_ENCODED_IMAGE_LEN: usize = (MAX_IMAGE_SIZE * 4).div_ceil(3);

/// Encoded characters decoded for the signature check.
const SIGNATURE_PREFIX_CHARS: usize = 100;
/// Encoded characters decoded for payload screening.
const SCAN_PREFIX_CHARS: usize = 1000;

/// Lenient decoder for prefixes: padding optional, trailing bits ignored.
const PREFIX_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static BASE64_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").expect("base64 pattern is valid"));

static EMBEDDED_PAYLOAD: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)<iframe",
        r"(?i)onerror=",
        r"(?i)onload=",
        r"(?i)<object",
        r"(?i)<embed",
    ])
    .expect("payload blocklist is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageMimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    Webp,
}

impl ImageMimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMimeType::Jpeg => "image/jpeg",
            ImageMimeType::Png => "image/png",
            ImageMimeType::Gif => "image/gif",
            ImageMimeType::Webp => "image/webp",
        }
    }

    pub fn all() -> [ImageMimeType; 4] {
        [
            ImageMimeType::Jpeg,
            ImageMimeType::Png,
            ImageMimeType::Gif,
            ImageMimeType::Webp,
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all().into_iter().find(|m| m.as_str() == value)
    }

    /// Leading bytes every file of this type starts with.
    pub fn signature(&self) -> &'static [u8] {
        match self {
            ImageMimeType::Jpeg => &[0xFF, 0xD8, 0xFF],
            ImageMimeType::Png => &[0x89, 0x50, 0x4E, 0x47],
            ImageMimeType::Gif => &[0x47, 0x49, 0x46],
            ImageMimeType::Webp => &[0x52, 0x49, 0x46, 0x46],
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image as received on the wire. `mime_type` stays a raw string so an
/// unsupported type reaches the allow-list check instead of failing
/// deserialization; `size` is advisory only. `file_name` is sanitized for
/// logging and never persisted or forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
}

/// Estimated decoded size of a base64 string. Ignores padding.
pub fn estimated_decoded_size(data: &str) -> usize {
    data.len() * 3 / 4
}

fn decode_prefix(data: &str, max_chars: usize) -> Result<Vec<u8>, base64::DecodeError> {
    let prefix = if data.len() > max_chars {
        // Keep whole 4-character quanta so the cut never splits a group.
        &data[..max_chars - max_chars % 4]
    } else {
        data
    };
    PREFIX_DECODER.decode(prefix)
}

fn has_valid_signature(data: &str, mime_type: ImageMimeType) -> bool {
    match decode_prefix(data, SIGNATURE_PREFIX_CHARS) {
        Ok(bytes) => bytes.starts_with(mime_type.signature()),
        Err(_) => false,
    }
}

/// True when the screened prefix carries markup, or cannot be decoded.
fn has_embedded_payload(data: &str) -> bool {
    match decode_prefix(data, SCAN_PREFIX_CHARS) {
        Ok(bytes) => {
            // 7-bit view, so high bytes cannot hide an ASCII marker.
            let text: String = bytes.iter().map(|b| (b & 0x7F) as char).collect();
            EMBEDDED_PAYLOAD.is_match(&text)
        }
        Err(_) => true,
    }
}

/// Validate one attachment. Checks run in order and the first failure wins:
/// allow-listed type, base64 alphabet, size bound, signature, payload scan.
pub fn validate_image(image: &ImageAttachment) -> ValidationResult {
    let Some(mime_type) = ImageMimeType::parse(&image.mime_type) else {
        let allowed = ImageMimeType::all().map(|m| m.as_str()).join(", ");
        return Err(Rejection::invalid(format!(
            "Invalid image type: {}. Allowed types: {}",
            image.mime_type, allowed
        )));
    };

    if !BASE64_FORMAT.is_match(&image.data) {
        return Err(Rejection::invalid("Invalid image data format"));
    }

    if estimated_decoded_size(&image.data) > MAX_IMAGE_SIZE {
        return Err(Rejection::invalid(format!(
            "Image size exceeds {}MB limit",
            MAX_IMAGE_SIZE / (1024 * 1024)
        )));
    }

    if !has_valid_signature(&image.data, mime_type) {
        return Err(Rejection::security(
            "Image file type does not match its content",
        ));
    }

    if has_embedded_payload(&image.data) {
        return Err(Rejection::security("Suspicious content detected in image"));
    }

    Ok(())
}

/// Validate the attachments of one message. Count limits are checked before
/// any image is inspected; per-image failures carry the 1-based position.
pub fn validate_image_batch(images: &[ImageAttachment]) -> ValidationResult {
    if images.is_empty() {
        return Err(Rejection::invalid("No images provided"));
    }

    if images.len() > MAX_IMAGES_PER_MESSAGE {
        return Err(Rejection::invalid(format!(
            "Too many images. Maximum {} images allowed per message",
            MAX_IMAGES_PER_MESSAGE
        )));
    }

    for (index, image) in images.iter().enumerate() {
        validate_image(image).map_err(|e| e.annotate(&format!("Image {}", index + 1)))?;
    }

    Ok(())
}
