//! Transcription backend.
//!
//! Shells out to a local speech-to-text binary (whisper.cpp, openai-whisper,
//! or any wrapper script). The pipeline only sees pass/fail and the text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

/// Placeholder replaced with the absolute audio path
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced with a scratch directory for output files
pub const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

/// Errors from the transcription collaborator
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Transcription command is empty")]
    EmptyCommand,

    #[error("Failed to run transcriber '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcriber timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transcriber exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Failed to read transcriber output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse transcriber JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Transcriber produced no text")]
    Empty,

    #[error("Transcription interrupted by shutdown")]
    Interrupted,
}

/// Result of transcription
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            duration_seconds: None,
        }
    }
}

/// The transcription collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Transcribe one audio file; never returns partial text on failure
    async fn transcribe(&self, audio_path: &Path, timeout: Duration)
        -> Result<Transcript, TranscriptionError>;
}

/// How the transcriber hands back its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Plain text on stdout
    #[default]
    Text,

    /// openai-whisper style `<output_dir>/<stem>.json` with a `text` field
    WhisperJson,
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Transcriber backed by an external command
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    argv: Vec<String>,
    format: OutputFormat,
}

impl CommandTranscriber {
    /// `argv[0]` is the program; `{input}` and `{output_dir}` are substituted.
    /// Without an `{input}` placeholder the audio path is appended.
    pub fn new(argv: Vec<String>, format: OutputFormat) -> Self {
        Self { argv, format }
    }

    fn render_args(&self, audio_path: &Path, output_dir: &Path) -> Vec<String> {
        let input = audio_path.to_string_lossy();
        let out = output_dir.to_string_lossy();
        let mut args: Vec<String> = self.argv[1..]
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &input).replace(OUTPUT_DIR_PLACEHOLDER, &out))
            .collect();

        if !self.argv.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(input.into_owned());
        }
        args
    }

    async fn read_whisper_json(
        &self,
        audio_path: &Path,
        output_dir: &Path,
    ) -> Result<Transcript, TranscriptionError> {
        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = output_dir.join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|source| TranscriptionError::Output {
                path: json_path.clone(),
                source,
            })?;

        let whisper: WhisperOutput = serde_json::from_str(&json_content)?;
        let duration = whisper.segments.last().map(|s| s.end);

        Ok(Transcript {
            text: whisper.text.trim().to_string(),
            language: (!whisper.language.is_empty()).then_some(whisper.language),
            duration_seconds: duration,
        })
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("command")
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        timeout: Duration,
    ) -> Result<Transcript, TranscriptionError> {
        let program = self.argv.first().ok_or(TranscriptionError::EmptyCommand)?;

        // Scratch dir for output files, removed on drop
        let temp_dir = tempfile::tempdir().map_err(|source| TranscriptionError::Output {
            path: std::env::temp_dir(),
            source,
        })?;

        let child = Command::new(program)
            .args(self.render_args(audio_path, temp_dir.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscriptionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| TranscriptionError::Timeout(timeout))?
            .map_err(|source| TranscriptionError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let transcript = match self.format {
            OutputFormat::Text => {
                Transcript::new(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            OutputFormat::WhisperJson => self.read_whisper_json(audio_path, temp_dir.path()).await?,
        };

        if transcript.text.is_empty() {
            return Err(TranscriptionError::Empty);
        }
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandTranscriber {
        CommandTranscriber::new(
            vec!["sh".into(), "-c".into(), script.into(), "transcribe".into()],
            OutputFormat::Text,
        )
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let t = CommandTranscriber::new(
            vec![
                "whisper".into(),
                "{input}".into(),
                "--output_dir".into(),
                "{output_dir}".into(),
            ],
            OutputFormat::WhisperJson,
        );
        let args = t.render_args(Path::new("/in/a.m4a"), Path::new("/tmp/x"));
        assert_eq!(args, vec!["/in/a.m4a", "--output_dir", "/tmp/x"]);
    }

    #[test]
    fn test_render_args_appends_input_without_placeholder() {
        let t = CommandTranscriber::new(vec!["stt".into(), "--fast".into()], OutputFormat::Text);
        let args = t.render_args(Path::new("/in/a.m4a"), Path::new("/tmp/x"));
        assert_eq!(args, vec!["--fast", "/in/a.m4a"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_transcript() {
        let t = sh("echo '  Test transcript.  '");
        let out = t
            .transcribe(Path::new("/tmp/a.m4a"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.text, "Test transcript.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let t = sh("echo partial; echo boom >&2; exit 3");
        let err = t
            .transcribe(Path::new("/tmp/a.m4a"), Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            TranscriptionError::Failed { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_failure() {
        let t = sh("sleep 5");
        let err = t
            .transcribe(Path::new("/tmp/a.m4a"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_is_failure() {
        let t = sh("true");
        let err = t
            .transcribe(Path::new("/tmp/a.m4a"), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Empty));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_whisper_json_output() {
        let t = CommandTranscriber::new(
            vec![
                "sh".into(),
                "-c".into(),
                r#"printf '{"text":" Hello there. ","language":"en","segments":[{"end":1.5},{"end":3.25}]}' > "$1/memo.json""#.into(),
                "whisper".into(),
                "{output_dir}".into(),
                "{input}".into(),
            ],
            OutputFormat::WhisperJson,
        );
        let out = t
            .transcribe(Path::new("/in/memo.m4a"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.text, "Hello there.");
        assert_eq!(out.language.as_deref(), Some("en"));
        assert_eq!(out.duration_seconds, Some(3.25));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let t = CommandTranscriber::new(
            vec!["/definitely/not/a/transcriber".into()],
            OutputFormat::Text,
        );
        let err = t
            .transcribe(Path::new("/tmp/a.m4a"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Spawn { .. }));
    }
}
