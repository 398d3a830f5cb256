//! yt-dlp argument building.

use std::path::{Path, PathBuf};

use mfetch_models::{JobRequest, OutputFormat};

/// File stem of the artifact inside a job workspace.
pub const ARTIFACT_STEM: &str = "output";

/// Where the artifact for `format` is expected inside `workspace`.
pub fn artifact_path(workspace: &Path, format: OutputFormat) -> PathBuf {
    workspace.join(format!("{}.{}", ARTIFACT_STEM, format.extension()))
}

/// Program plus argument vector for one extractor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Turns a validated request into the command that produces its artifact.
///
/// Implementations must direct all output into `workspace` and name the
/// artifact as [`artifact_path`] does.
pub trait FormatSelector: Send + Sync + 'static {
    fn command(&self, request: &JobRequest, workspace: &Path) -> CommandLine;
}

/// Production selector invoking `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpSelector {
    program: String,
}

impl Default for YtDlpSelector {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpSelector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `-f` selector for video downloads.
    ///
    /// With a height cap, prefer the best video up to that height merged with
    /// the best audio, then a pre-merged stream up to that height, then
    /// anything.
    fn video_format(quality: Option<u32>) -> String {
        match quality {
            Some(h) => format!("bv*[height<={h}]+ba/b[height<={h}]/best"),
            None => "bv*+ba/best".to_string(),
        }
    }
}

impl FormatSelector for YtDlpSelector {
    fn command(&self, request: &JobRequest, workspace: &Path) -> CommandLine {
        let template = workspace.join(format!("{}.%(ext)s", ARTIFACT_STEM));
        let template = template.to_string_lossy().to_string();

        let mut args: Vec<String> = vec!["--no-playlist".into(), "--newline".into()];

        match request.format() {
            OutputFormat::Mp3 => {
                args.extend(
                    ["-x", "--audio-format", "mp3", "--audio-quality", "0"]
                        .into_iter()
                        .map(String::from),
                );
            }
            OutputFormat::Mp4 => {
                args.push("-f".into());
                args.push(Self::video_format(request.quality()));
                args.push("--merge-output-format".into());
                args.push("mp4".into());
            }
        }

        args.push("-o".into());
        args.push(template);
        args.push(request.locator().to_string());

        CommandLine {
            program: self.program.clone(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_command() {
        let req = JobRequest::parse("https://example.test/v", "mp3", None).unwrap();
        let cmd = YtDlpSelector::default().command(&req, Path::new("/work/j1"));

        assert_eq!(cmd.program, "yt-dlp");
        assert!(cmd.args.contains(&"-x".to_string()));
        assert!(cmd.args.contains(&"--newline".to_string()));
        assert!(!cmd.args.contains(&"-f".to_string()));
        assert_eq!(cmd.args.last().map(String::as_str), Some("https://example.test/v"));

        let o = cmd.args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(cmd.args[o + 1], "/work/j1/output.%(ext)s");
    }

    #[test]
    fn test_video_command_with_quality() {
        let req = JobRequest::parse("https://example.test/v", "mp4", Some("720")).unwrap();
        let cmd = YtDlpSelector::new("/usr/local/bin/yt-dlp").command(&req, Path::new("/w"));

        assert_eq!(cmd.program, "/usr/local/bin/yt-dlp");
        let f = cmd.args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(cmd.args[f + 1], "bv*[height<=720]+ba/b[height<=720]/best");
        assert!(cmd.args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_video_command_default_quality() {
        let req = JobRequest::parse("https://example.test/v", "mp4", None).unwrap();
        let cmd = YtDlpSelector::default().command(&req, Path::new("/w"));
        let f = cmd.args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(cmd.args[f + 1], "bv*+ba/best");
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(Path::new("/w"), OutputFormat::Mp3),
            PathBuf::from("/w/output.mp3")
        );
    }
}
