//! File classification
//!
//! Decides which [`Category`] an uploaded file belongs to. Storage routes
//! classify by filename extension; predict routes classify by the declared
//! media type, falling back to magic-byte sniffing when the client sent no
//! usable type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Classification bucket driving routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Image,
    Audio,
    MapperText,
    Unclassified,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Image,
        Category::Audio,
        Category::MapperText,
        Category::Unclassified,
    ];

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Audio => "audio",
            Category::MapperText => "mapper_text",
            Category::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension table, lowercase without the dot
const EXTENSIONS: &[(&str, Category)] = &[
    ("jpg", Category::Image),
    ("jpeg", Category::Image),
    ("png", Category::Image),
    ("txt", Category::MapperText),
    ("json", Category::MapperText),
    ("wav", Category::Audio),
    ("mp3", Category::Audio),
    ("m4a", Category::Audio),
    ("mid", Category::Audio),
];

/// Normalize an untrusted client filename for storage.
///
/// Drops any directory components (both `/` and `\` separators), trims
/// surrounding whitespace and collapses each internal whitespace run to a
/// single underscore. Returns an empty string when nothing usable remains.
///
/// ```
/// use kagami_uploadr::classify::sanitize_filename;
///
/// assert_eq!(sanitize_filename("my   song .wav"), "my_song_.wav");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    // Unicode whitespace, so no-break and ideographic spaces collapse too
    let collapsed = base
        .split(char::is_whitespace)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    match collapsed.as_str() {
        "." | ".." => String::new(),
        other => other.to_string(),
    }
}

/// Lowercase extension of a filename, without the dot
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Classify a filename by its extension (case-insensitive)
pub fn classify_filename(name: &str) -> Category {
    extension(name)
        .and_then(|ext| {
            EXTENSIONS
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, category)| *category)
        })
        .unwrap_or(Category::Unclassified)
}

/// Trimmed, lowercased media type
pub fn normalize_media_type(media_type: &str) -> String {
    media_type.trim().to_ascii_lowercase()
}

/// Declared type names an image or audio format
pub fn is_specific_media_type(media_type: &str) -> bool {
    media_type.starts_with("image/") || media_type.starts_with("audio/")
}

/// Media types that carry no information about the content
fn is_generic_media_type(media_type: &str) -> bool {
    media_type.is_empty() || media_type == "application/octet-stream"
}

/// Classify a file for the predictor.
///
/// An `image/*` or `audio/*` declared type wins. A missing or generic declared
/// type falls back to [`sniff`]. Anything else is unsupported and yields `None`.
pub fn classify_for_prediction(declared: Option<&str>, bytes: &[u8]) -> Option<Category> {
    let declared = declared.map(normalize_media_type).unwrap_or_default();

    if declared.starts_with("image/") {
        Some(Category::Image)
    } else if declared.starts_with("audio/") {
        Some(Category::Audio)
    } else if is_generic_media_type(&declared) {
        sniff(bytes).map(|(category, _)| category)
    } else {
        None
    }
}

/// Detect image and audio formats from leading magic bytes.
///
/// Returns the category and a media type suitable for the outbound request.
pub fn sniff(bytes: &[u8]) -> Option<(Category, &'static str)> {
    const SIGNATURES: &[(&[u8], Category, &str)] = &[
        (b"\x89PNG\r\n\x1a\n", Category::Image, "image/png"),
        (b"\xff\xd8\xff", Category::Image, "image/jpeg"),
        (b"GIF87a", Category::Image, "image/gif"),
        (b"GIF89a", Category::Image, "image/gif"),
        (b"ID3", Category::Audio, "audio/mpeg"),
        (b"MThd", Category::Audio, "audio/midi"),
        (b"fLaC", Category::Audio, "audio/flac"),
        (b"OggS", Category::Audio, "audio/ogg"),
    ];

    if let Some((_, category, media_type)) = SIGNATURES
        .iter()
        .find(|(magic, _, _)| bytes.starts_with(magic))
    {
        return Some((*category, *media_type));
    }

    // RIFF containers: WAVE audio or WEBP image
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" {
        return match &bytes[8..12] {
            b"WAVE" => Some((Category::Audio, "audio/wav")),
            b"WEBP" => Some((Category::Image, "image/webp")),
            _ => None,
        };
    }

    // ISO base media: M4A audio
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && &bytes[8..11] == b"M4A" {
        return Some((Category::Audio, "audio/mp4"));
    }

    // Bare MPEG audio frame sync
    if bytes.len() >= 2 && bytes[0] == 0xff && (bytes[1] & 0xe0) == 0xe0 {
        return Some((Category::Audio, "audio/mpeg"));
    }

    None
}
