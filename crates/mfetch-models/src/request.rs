//! Validated job requests.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::OutputFormat;

/// Maximum locator length to prevent oversized argument vectors.
pub const MAX_LOCATOR_LENGTH: usize = 2048;

/// Input rejected before any job resources are allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing url")]
    MissingLocator,

    #[error("Url is too long (max {MAX_LOCATOR_LENGTH} characters)")]
    LocatorTooLong,

    #[error("Bad url: {0}")]
    InvalidLocator(String),

    #[error("Missing format")]
    MissingFormat,

    #[error("Format must be mp3 or mp4, got '{0}'")]
    UnsupportedFormat(String),
}

/// A validated request to fetch `locator` as `format`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobRequest {
    locator: String,
    format: OutputFormat,
    /// Maximum video height in pixels (video formats only).
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<u32>,
}

impl JobRequest {
    /// Validate raw inputs.
    ///
    /// The locator must be an absolute `http`/`https` URL with a host. The
    /// quality hint is lenient: anything that is not a positive integer is
    /// ignored rather than rejected.
    pub fn parse(
        locator: &str,
        format: &str,
        quality: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ValidationError::MissingLocator);
        }
        if locator.len() > MAX_LOCATOR_LENGTH {
            return Err(ValidationError::LocatorTooLong);
        }

        let url = Url::parse(locator).map_err(|e| ValidationError::InvalidLocator(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidLocator(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::InvalidLocator("missing host".to_string()));
        }

        let format: OutputFormat = format.parse()?;

        Ok(Self {
            locator: locator.to_string(),
            format,
            quality: quality.and_then(parse_quality),
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Height cap; always `None` for audio-only formats.
    pub fn quality(&self) -> Option<u32> {
        if self.format.is_audio_only() {
            None
        } else {
            self.quality
        }
    }
}

fn parse_quality(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|h| *h > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let req = JobRequest::parse("http://example.test/video", "mp3", None).unwrap();
        assert_eq!(req.locator(), "http://example.test/video");
        assert_eq!(req.format(), OutputFormat::Mp3);
        assert_eq!(req.quality(), None);
    }

    #[test]
    fn test_quality_is_lenient() {
        let req = JobRequest::parse("https://example.test/v", "mp4", Some("720")).unwrap();
        assert_eq!(req.quality(), Some(720));

        let req = JobRequest::parse("https://example.test/v", "mp4", Some("tall")).unwrap();
        assert_eq!(req.quality(), None);

        let req = JobRequest::parse("https://example.test/v", "mp4", Some("0")).unwrap();
        assert_eq!(req.quality(), None);

        // Audio ignores the height cap entirely
        let req = JobRequest::parse("https://example.test/v", "mp3", Some("720")).unwrap();
        assert_eq!(req.quality(), None);
    }

    #[test]
    fn test_invalid_locators() {
        assert_eq!(
            JobRequest::parse("", "mp3", None),
            Err(ValidationError::MissingLocator)
        );
        assert!(matches!(
            JobRequest::parse("not a url", "mp3", None),
            Err(ValidationError::InvalidLocator(_))
        ));
        assert!(matches!(
            JobRequest::parse("ftp://example.test/file", "mp3", None),
            Err(ValidationError::InvalidLocator(_))
        ));
        let long = format!("https://example.test/{}", "a".repeat(MAX_LOCATOR_LENGTH));
        assert_eq!(
            JobRequest::parse(&long, "mp3", None),
            Err(ValidationError::LocatorTooLong)
        );
    }

    #[test]
    fn test_scheme_and_format_are_case_insensitive() {
        let req = tokio_test::assert_ok!(JobRequest::parse("HTTPS://Example.test/v", "Mp4", None));
        assert_eq!(req.format(), OutputFormat::Mp4);
        tokio_test::assert_err!(JobRequest::parse("https://", "mp4", None));
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            JobRequest::parse("https://example.test/v", "flac", None),
            Err(ValidationError::UnsupportedFormat("flac".to_string()))
        );
    }
}
