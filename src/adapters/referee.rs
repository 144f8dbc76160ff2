//! Command-backed referee.
//!
//! Spawns the configured command, pipes the prompt to stdin and collects
//! stdout as commentary markdown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::Referee;

/// Errors from the commentary collaborator
#[derive(Debug, Error)]
pub enum RefereeError {
    #[error("Referee command is empty")]
    EmptyCommand,

    #[error("Prompt file not found: {path}: {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run referee '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Referee timed out after {0:?}")]
    Timeout(Duration),

    #[error("Referee failed with exit code {code}: {detail}")]
    Failed { code: i32, detail: String },

    #[error("Referee produced no output")]
    Empty,

    #[error("Commentary interrupted by shutdown")]
    Interrupted,
}

/// Instructions used when no prompt file is configured
pub const DEFAULT_TEMPLATE: &str = "\
You are a rigorous but friendly referee reading a personal voice notebook.
The latest entry was dictated in {{mode}} mode and filed under \"{{topic}}\".

Respond in Markdown with:
- The strongest idea in the dump, restated in one sentence
- Claims that need evidence, and what evidence would settle them
- Hidden assumptions or missing variables
- One concrete next step

Be brief. Do not repeat the transcript back.";

/// Values substituted into the referee template
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub today: &'a str,
    pub topic: &'a str,
    pub mode: &'a str,
    /// Recent notebook sections, may be empty
    pub context: &'a str,
    /// The voice dump to critique, as it appears in the notebook
    pub latest_dump: &'a str,
}

/// Read the prompt template, or the built-in one when unset
pub fn load_template(prompt_file: Option<&Path>) -> Result<String, RefereeError> {
    match prompt_file {
        None => Ok(DEFAULT_TEMPLATE.to_string()),
        Some(path) => std::fs::read_to_string(path)
            .map(|t| t.trim().to_string())
            .map_err(|source| RefereeError::PromptFile {
                path: path.to_path_buf(),
                source,
            }),
    }
}

/// Assemble the stdin prompt.
///
/// Context and latest-dump blocks are appended unless the template already
/// placed them through `{{context}}` / `{{transcript}}`.
pub fn build_referee_input(template: &str, inputs: &PromptInputs<'_>) -> String {
    let uses_context = template.contains("{{context}}");
    let uses_transcript = template.contains("{{transcript}}");

    let rendered = template
        .replace("{{today}}", inputs.today)
        .replace("{{topic}}", inputs.topic)
        .replace("{{mode}}", inputs.mode)
        .replace("{{context}}", inputs.context.trim())
        .replace("{{transcript}}", inputs.latest_dump.trim());

    let mut parts: Vec<String> = vec![format!("Today is {}.", inputs.today), String::new(), rendered];

    if !uses_context && !inputs.context.trim().is_empty() {
        parts.push(String::new());
        parts.push("---".to_string());
        parts.push("## Context From Notebook (most recent sections)".to_string());
        parts.push(inputs.context.trim().to_string());
    }

    if !uses_transcript {
        parts.push(String::new());
        parts.push("---".to_string());
        parts.push("## Latest Voice Dump (critique this)".to_string());
        parts.push(inputs.latest_dump.trim().to_string());
    }

    parts.push(String::new());
    parts.join("\n")
}

/// Referee backed by an external command reading the prompt on stdin
#[derive(Debug, Clone)]
pub struct CommandReferee {
    argv: Vec<String>,
}

impl CommandReferee {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Inject `--model <model>` before a trailing `-` (or at the end) unless
    /// the command already names a model.
    pub fn with_model(mut self, model: Option<&str>) -> Self {
        let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) else {
            return self;
        };
        if self.argv.is_empty() || self.argv.iter().any(|a| a == "-m" || a == "--model") {
            return self;
        }
        let idx = self
            .argv
            .iter()
            .position(|a| a == "-")
            .unwrap_or(self.argv.len())
            .max(1);
        self.argv
            .splice(idx..idx, ["--model".to_string(), model.to_string()]);
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl Referee for CommandReferee {
    fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("command")
    }

    async fn review(&self, prompt: &str, step_timeout: Duration) -> Result<String, RefereeError> {
        let (program, args) = self.argv.split_first().ok_or(RefereeError::EmptyCommand)?;

        tracing::info!("Running referee: {}", self.argv.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RefereeError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                // A referee that exits without reading stdin is judged by its exit code
                match stdin.write_all(prompt.as_bytes()).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
                // Drop stdin to signal EOF
            }
            child.wait_with_output().await
        };

        let output = timeout(step_timeout, run)
            .await
            .map_err(|_| RefereeError::Timeout(step_timeout))?
            .map_err(|source| RefereeError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                format!("exit {}", code)
            };
            return Err(RefereeError::Failed { code, detail });
        }

        let commentary = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commentary.is_empty() {
            return Err(RefereeError::Empty);
        }
        Ok(commentary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(context: &'a str) -> PromptInputs<'a> {
        PromptInputs {
            today: "2025-12-29",
            topic: "Spin",
            mode: "claims",
            context,
            latest_dump: "## Voice Dump — 2025-12-29 09:30\n\nTest transcript.\n",
        }
    }

    fn sh(script: &str) -> CommandReferee {
        CommandReferee::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_referee_input("Critique {{topic}} ({{mode}}).", &inputs("older section"));
        assert_eq!(
            prompt,
            "Today is 2025-12-29.\n\
             \n\
             Critique Spin (claims).\n\
             \n\
             ---\n\
             ## Context From Notebook (most recent sections)\n\
             older section\n\
             \n\
             ---\n\
             ## Latest Voice Dump (critique this)\n\
             ## Voice Dump — 2025-12-29 09:30\n\
             \n\
             Test transcript.\n"
        );
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = build_referee_input("Go.", &inputs("  "));
        assert!(!prompt.contains("Context From Notebook"));
        assert!(prompt.contains("## Latest Voice Dump (critique this)"));
    }

    #[test]
    fn test_template_placeholders_consume_blocks() {
        let prompt = build_referee_input(
            "On {{today}}:\n{{context}}\n>>> {{transcript}}",
            &inputs("older section"),
        );
        assert!(prompt.contains("On 2025-12-29:\nolder section\n>>> ## Voice Dump"));
        assert!(!prompt.contains("Context From Notebook"));
        assert!(!prompt.contains("Latest Voice Dump (critique this)"));
    }

    #[test]
    fn test_load_template() {
        assert_eq!(load_template(None).unwrap(), DEFAULT_TEMPLATE);

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("prompt.md");
        std::fs::write(&path, "\n  Be terse.  \n").unwrap();
        assert_eq!(load_template(Some(&path)).unwrap(), "Be terse.");

        let err = load_template(Some(&temp.path().join("missing.md"))).unwrap_err();
        assert!(matches!(err, RefereeError::PromptFile { .. }));
    }

    #[test]
    fn test_model_injection() {
        let r = CommandReferee::new(vec!["codex".into(), "exec".into(), "-".into()])
            .with_model(Some("o3"));
        assert_eq!(r.argv(), ["codex", "exec", "--model", "o3", "-"]);

        let r = CommandReferee::new(vec!["llm".into()]).with_model(Some("x"));
        assert_eq!(r.argv(), ["llm", "--model", "x"]);

        let r = CommandReferee::new(vec!["llm".into(), "-m".into(), "a".into()]).with_model(Some("b"));
        assert_eq!(r.argv(), ["llm", "-m", "a"]);

        let r = CommandReferee::new(vec!["llm".into()]).with_model(Some("  "));
        assert_eq!(r.argv(), ["llm"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_roundtrip() {
        let r = sh("read line; echo \"Saw: $line\"");
        let out = r.review("hello\n", Duration::from_secs(10)).await.unwrap();
        assert_eq!(out, "Saw: hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_modes() {
        let err = sh("echo nope >&2; exit 2")
            .review("x", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RefereeError::Failed { code: 2, ref detail } if detail == "nope"));

        let err = sh("cat > /dev/null")
            .review("x", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RefereeError::Empty));

        let err = sh("sleep 5")
            .review("x", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RefereeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = CommandReferee::new(vec![])
            .review("x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RefereeError::EmptyCommand));
    }
}
