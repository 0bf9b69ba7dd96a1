//! Variant renditions derived from a source upload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobId;

/// The three logical renditions produced for every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    /// Small rendition for lists and previews in-conversation
    Thumbnail,
    /// Mid-size rendition for inline display
    Preview,
    /// Full-quality rendition
    High,
}

impl VariantType {
    /// All variant types in generation order.
    pub const ALL: [VariantType; 3] = [
        VariantType::Thumbnail,
        VariantType::Preview,
        VariantType::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Thumbnail => "thumbnail",
            VariantType::Preview => "preview",
            VariantType::High => "high",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Container/encoding format of a stored variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantFormat {
    Jpeg,
    Png,
    Mp4,
}

impl VariantFormat {
    /// File extension used in storage keys.
    pub fn extension(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "jpeg",
            VariantFormat::Png => "png",
            VariantFormat::Mp4 => "mp4",
        }
    }

    /// MIME type set on the stored object.
    pub fn content_type(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "image/jpeg",
            VariantFormat::Png => "image/png",
            VariantFormat::Mp4 => "video/mp4",
        }
    }
}

impl fmt::Display for VariantFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Deterministic storage key for a variant. Re-uploads overwrite the
/// same key, which makes retries idempotent.
pub fn storage_key(job_id: &JobId, variant_type: VariantType, format: VariantFormat) -> String {
    format!("{}/{}.{}", job_id, variant_type.as_str(), format.extension())
}

/// One stored rendition of a source media file.
///
/// Immutable once written; regenerating a job overwrites the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Which logical rendition this is
    pub variant_type: VariantType,
    /// Object storage key (`{job_id}/{type}.{format}`)
    pub storage_key: String,
    /// Encoding format
    pub format: VariantFormat,
    /// Pixel width (omitted for video preview/high)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height (omitted for video preview/high)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Stored object size in bytes
    pub size_bytes: u64,
}
