//! Message bodies and their storage encoding.
//!
//! A stored body is either legacy plain text or a JSON array of content
//! blocks. Decoding tries the block array first and falls back to the raw
//! string on any failure; this fallback is how rows written before blocks
//! existed stay readable, so it must never become an error.

use serde::{Deserialize, Serialize};

use crate::security::image::{ImageAttachment, ImageMimeType};

const SUMMARY_LENGTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    Base64 {
        media_type: ImageMimeType,
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(media_type: ImageMimeType, data: impl Into<String>) -> Self {
        ContentBlock::Image {
            source: ImageSource::Base64 {
                media_type,
                data: data.into(),
            },
        }
    }
}

/// A message body. Serializes untagged: a JSON string or a block array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Plain text that is guaranteed to decode back as itself. Text that
    /// happens to be a valid block array is wrapped in a single text block.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match deserialize(&text) {
            MessageContent::Text(_) => MessageContent::Text(text),
            MessageContent::Blocks(_) => MessageContent::Blocks(vec![ContentBlock::text(text)]),
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            MessageContent::Text(_) => 0,
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| matches!(b, ContentBlock::Image { .. }))
                .count(),
        }
    }

    pub fn to_storage(&self) -> Result<String, serde_json::Error> {
        serialize(self)
    }
}

/// Build blocks from an optional message and attachments: at most one text
/// block (only for non-blank text, trimmed) followed by one image block per
/// attachment, in order. Attachments are expected to have passed
/// validation; any with an unsupported type are skipped.
pub fn encode(text: Option<&str>, images: &[ImageAttachment]) -> Vec<ContentBlock> {
    let mut blocks = Vec::with_capacity(images.len() + 1);

    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text));
    }

    blocks.extend(images.iter().filter_map(|image| {
        ImageMimeType::parse(&image.mime_type).map(|m| ContentBlock::image(m, image.data.clone()))
    }));

    blocks
}

/// Storage form: plain text unchanged, blocks as their JSON array.
pub fn serialize(content: &MessageContent) -> Result<String, serde_json::Error> {
    match content {
        MessageContent::Text(text) => Ok(text.clone()),
        MessageContent::Blocks(blocks) => serde_json::to_string(blocks),
    }
}

/// Inverse of `serialize`. Never fails: anything that is not a well-formed
/// block array comes back as plain text, verbatim.
pub fn deserialize(stored: &str) -> MessageContent {
    match serde_json::from_str::<Vec<ContentBlock>>(stored) {
        Ok(blocks) => MessageContent::Blocks(blocks),
        Err(_) => MessageContent::Text(stored.to_string()),
    }
}

/// Short text preview for logs.
pub fn extract_text_summary(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.chars().take(SUMMARY_LENGTH).collect(),
        MessageContent::Blocks(blocks) => {
            let joined = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" ");

            if joined.is_empty() {
                "[images only]".to_string()
            } else {
                joined.chars().take(SUMMARY_LENGTH).collect()
            }
        }
    }
}
