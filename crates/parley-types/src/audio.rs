//! Audio container formats accepted for upload and produced by synthesis.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseLabelError;

/// Audio container format, identified by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
    M4a,
    Webm,
    Mp4,
    Ogg,
}

impl AudioFormat {
    /// Every supported format.
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Wav,
        AudioFormat::Mp3,
        AudioFormat::M4a,
        AudioFormat::Webm,
        AudioFormat::Mp4,
        AudioFormat::Ogg,
    ];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
            Self::Ogg => "ogg",
        }
    }

    /// MIME type used for `Content-Type` headers and multipart uploads.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Webm => "audio/webm",
            Self::Mp4 => "video/mp4",
            Self::Ogg => "audio/ogg",
        }
    }

    /// Resolves the format from an uploaded file name.
    ///
    /// A name without an extension is treated as WAV, matching what browser
    /// recorders send when no name is set. Returns `None` for an extension
    /// that is present but unknown.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase().parse().ok(),
            _ => Some(Self::Wav),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wav" => Ok(Self::Wav),
            "mp3" | "mpeg" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "webm" => Ok(Self::Webm),
            "mp4" => Ok(Self::Mp4),
            "ogg" => Ok(Self::Ogg),
            other => Err(ParseLabelError::new("audio format", other)),
        }
    }
}
