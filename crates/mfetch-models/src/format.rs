//! Output formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Output kind produced by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Audio only, transcoded to MP3
    Mp3,
    /// Best video + audio merged into MP4
    #[default]
    Mp4,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Mp4 => "mp4",
        }
    }

    /// File extension of the produced artifact.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// MIME type sent with the artifact.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Mp4 => "video/mp4",
        }
    }

    /// ASCII-only attachment name offered to the client.
    pub fn download_name(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "download.mp3",
            OutputFormat::Mp4 => "download.mp4",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, OutputFormat::Mp3)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "mp4" => Ok(OutputFormat::Mp4),
            "" => Err(ValidationError::MissingFormat),
            other => Err(ValidationError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("MP3".parse::<OutputFormat>(), Ok(OutputFormat::Mp3));
        assert_eq!(" mp4 ".parse::<OutputFormat>(), Ok(OutputFormat::Mp4));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(
            "webm".parse::<OutputFormat>(),
            Err(ValidationError::UnsupportedFormat("webm".to_string()))
        );
        assert_eq!("".parse::<OutputFormat>(), Err(ValidationError::MissingFormat));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(OutputFormat::Mp3.content_type(), "audio/mpeg");
        assert_eq!(OutputFormat::Mp4.content_type(), "video/mp4");
        assert_eq!(OutputFormat::Mp4.download_name(), "download.mp4");
    }
}
