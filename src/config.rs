//! Configuration for voxnote.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>` on the command line
//! 2. `VOXNOTE_CONFIG` environment variable
//! 3. `./voxnote.yaml` in the current directory
//! 4. `~/.config/voxnote/config.yaml`
//! 5. Built-in defaults
//!
//! Every section is optional. Relative paths in a config file are resolved
//! against the file's parent directory; `~` expands to the home directory.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::notebook::ContextLimits;
use crate::core::router::RoutingLimits;
use crate::ingest::watcher::{default_extensions, default_ignore_patterns};
use crate::ingest::{is_valid_subdir_format, ArchiveConfig, OutputFormat, WatcherConfig};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "VOXNOTE_CONFIG";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub paths: PathsConfig,
    pub watch: WatchConfig,
    pub transcription: TranscriptionConfig,
    pub routing: RoutingConfig,
    pub commentary: CommentaryConfig,
    pub archive: ArchiveSection,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Watched inbox directory
    pub inbox: Option<String>,
    /// Directory holding `<topic>.md` notebooks
    pub topics: Option<String>,
    /// SQLite ledger file
    pub ledger: Option<String>,
    /// Persistent log file (stderr only when unset)
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub stable_seconds: u64,
    pub poll_interval_seconds: u64,
    pub extensions: Vec<String>,
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stable_seconds: 10,
            poll_interval_seconds: 5,
            extensions: default_extensions(),
            ignore: default_ignore_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// argv with `{input}` / `{output_dir}` placeholders
    pub command: Vec<String>,
    pub format: OutputFormat,
    pub timeout_seconds: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            command: [
                "whisper",
                "{input}",
                "--model",
                "base",
                "--output_format",
                "json",
                "--output_dir",
                "{output_dir}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            format: OutputFormat::WhisperJson,
            timeout_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub infer_topic_max_words: usize,
    pub infer_topic_max_chars: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let limits = RoutingLimits::default();
        Self {
            infer_topic_max_words: limits.max_words,
            infer_topic_max_chars: limits.max_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommentaryConfig {
    pub enabled: bool,
    /// argv of the referee; the prompt arrives on stdin
    pub command: Vec<String>,
    /// Injected as `--model <m>` when set and not already present
    pub model: Option<String>,
    pub timeout_seconds: u64,
    pub prompt_file: Option<String>,
    pub context_voice_dumps: usize,
    pub context_ai_commentaries: usize,
    pub context_max_chars: usize,
}

impl Default for CommentaryConfig {
    fn default() -> Self {
        let context = ContextLimits::default();
        Self {
            enabled: true,
            command: ["codex", "exec", "--skip-git-repo-check", "--sandbox", "read-only", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            model: None,
            timeout_seconds: 180,
            prompt_file: None,
            context_voice_dumps: context.voice_dumps,
            context_ai_commentaries: context.commentaries,
            context_max_chars: context.max_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub enabled: bool,
    pub dir: Option<String>,
    pub subdir_format: String,
    pub delete_original: bool,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            subdir_format: "%Y/%m".to_string(),
            delete_original: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Write `transcription_failed` ledger rows for diagnostics
    pub record_failures: bool,
}

/// Resolved transcription settings
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSettings {
    pub command: Vec<String>,
    pub format: OutputFormat,
    pub timeout_seconds: u64,
}

impl TranscriptionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Resolved commentary settings
#[derive(Debug, Clone, Serialize)]
pub struct CommentarySettings {
    pub enabled: bool,
    pub command: Vec<String>,
    pub model: Option<String>,
    pub timeout_seconds: u64,
    pub prompt_file: Option<PathBuf>,
    pub context: ContextLimits,
}

impl CommentarySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub topics_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub watcher: WatcherConfig,
    pub transcription: TranscriptionSettings,
    pub routing: RoutingLimits,
    pub commentary: CommentarySettings,
    /// `None` when archiving is disabled
    pub archive: Option<ArchiveConfig>,
    pub record_failures: bool,
}

impl ResolvedConfig {
    /// Resolve a parsed config file; `base` anchors relative paths
    pub fn from_file(config: ConfigFile, base: &Path, config_file: Option<PathBuf>) -> Self {
        let resolve = |value: &Option<String>, default: PathBuf| {
            value
                .as_deref()
                .map(|v| resolve_path(base, v))
                .unwrap_or(default)
        };

        let watch_path = resolve(&config.paths.inbox, paths::default_inbox());
        let topics_dir = resolve(&config.paths.topics, paths::default_topics());
        let ledger_path = resolve(&config.paths.ledger, paths::default_ledger());
        let log_file = config.paths.log_file.as_deref().map(|v| resolve_path(base, v));

        let archive = config.archive.enabled.then(|| ArchiveConfig {
            dir: resolve(&config.archive.dir, topics_dir.join("_attachments").join("audio")),
            subdir_format: config.archive.subdir_format.clone(),
            delete_original: config.archive.delete_original,
        });

        Self {
            config_file,
            watcher: WatcherConfig {
                watch_path,
                stable_seconds: config.watch.stable_seconds,
                poll_interval_secs: config.watch.poll_interval_seconds,
                extensions: config.watch.extensions,
                ignore_patterns: config.watch.ignore,
            },
            topics_dir,
            ledger_path,
            log_file,
            transcription: TranscriptionSettings {
                command: config.transcription.command,
                format: config.transcription.format,
                timeout_seconds: config.transcription.timeout_seconds,
            },
            routing: RoutingLimits {
                max_words: config.routing.infer_topic_max_words,
                max_chars: config.routing.infer_topic_max_chars,
            },
            commentary: CommentarySettings {
                enabled: config.commentary.enabled,
                command: config.commentary.command,
                model: config.commentary.model.filter(|m| !m.trim().is_empty()),
                timeout_seconds: config.commentary.timeout_seconds,
                prompt_file: config
                    .commentary
                    .prompt_file
                    .as_deref()
                    .map(|v| resolve_path(base, v)),
                context: ContextLimits {
                    voice_dumps: config.commentary.context_voice_dumps,
                    commentaries: config.commentary.context_ai_commentaries,
                    max_chars: config.commentary.context_max_chars,
                },
            },
            archive,
            record_failures: config.processing.record_failures,
        }
    }

    /// Built-in defaults, no file
    pub fn defaults() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_file(ConfigFile::default(), &cwd, None)
    }
}

/// Find the config file when none was given explicitly
fn find_config_file() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.trim().is_empty() {
            return Some(expand_tilde(&env_path));
        }
    }

    let local = std::env::current_dir().ok()?.join("voxnote.yaml");
    if local.exists() {
        return Some(local);
    }

    paths::default_config_path().filter(|p| p.exists())
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid "all defaults" config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    let config: ConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    validate(&config).with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Reject values that would only fail once files are being processed
fn validate(config: &ConfigFile) -> Result<()> {
    let subdir_format = &config.archive.subdir_format;
    if !is_valid_subdir_format(subdir_format) {
        anyhow::bail!("archive.subdir_format {:?} is not a valid strftime format", subdir_format);
    }
    Ok(())
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path_str: &str) -> PathBuf {
    if path_str == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path_str));
    }
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path_str)
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = expand_tilde(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path))
    }
}

/// Load configuration from all sources.
///
/// An explicit path must exist; discovered files are optional.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(expand_tilde(&path.to_string_lossy())),
        None => find_config_file(),
    };

    let Some(config_path) = config_file else {
        tracing::debug!("No config file found, using defaults");
        return Ok(ResolvedConfig::defaults());
    };

    let parsed = load_config_file(&config_path)?;
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    tracing::debug!("Loaded config from {}", config_path.display());
    Ok(ResolvedConfig::from_file(parsed, &base, Some(config_path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = ResolvedConfig::defaults();

        assert_eq!(config.watcher.stable_seconds, 10);
        assert_eq!(config.watcher.poll_interval_secs, 5);
        assert_eq!(config.watcher.extensions, vec!["m4a", "mp3", "wav", "aac"]);
        assert_eq!(config.routing.max_words, 6);
        assert_eq!(config.routing.max_chars, 80);
        assert!(config.commentary.enabled);
        assert_eq!(config.commentary.timeout_seconds, 180);
        assert_eq!(config.commentary.context.voice_dumps, 3);
        assert_eq!(config.commentary.context.commentaries, 1);
        assert_eq!(config.commentary.context.max_chars, 20_000);
        assert!(config.archive.is_none());
        assert!(!config.record_failures);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("voxnote.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
paths:
  inbox: ./inbox
  topics: /abs/topics
  ledger: state/ledger.sqlite3
watch:
  stable_seconds: 5
transcription:
  command: ["stt", "{{input}}"]
  format: text
  timeout_seconds: 60
commentary:
  enabled: false
  model: "  "
archive:
  enabled: true
  delete_original: true
processing:
  record_failures: true
"#
        )
        .unwrap();

        let config = load_config(Some(&config_path)).unwrap();
        assert_eq!(config.config_file.as_deref(), Some(config_path.as_path()));
        assert_eq!(config.watcher.watch_path, temp.path().join("inbox"));
        assert_eq!(config.watcher.stable_seconds, 5);
        // Unset keys in a present section keep their defaults
        assert_eq!(config.watcher.poll_interval_secs, 5);
        assert_eq!(config.topics_dir, PathBuf::from("/abs/topics"));
        assert_eq!(config.ledger_path, temp.path().join("state/ledger.sqlite3"));
        assert_eq!(config.transcription.command, vec!["stt", "{input}"]);
        assert_eq!(config.transcription.format, OutputFormat::Text);
        assert_eq!(config.transcription.timeout(), Duration::from_secs(60));
        assert!(!config.commentary.enabled);
        assert!(config.commentary.model.is_none());
        assert!(config.record_failures);

        let archive = config.archive.unwrap();
        assert_eq!(archive.dir, PathBuf::from("/abs/topics/_attachments/audio"));
        assert_eq!(archive.subdir_format, "%Y/%m");
        assert!(archive.delete_original);
    }

    #[test]
    fn test_invalid_archive_format_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("voxnote.yaml");
        std::fs::write(&config_path, "archive:\n  enabled: true\n  subdir_format: \"%Q\"\n").unwrap();

        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(format!("{:#}", err).contains("subdir_format"));
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("voxnote.yaml");
        std::fs::write(&config_path, "").unwrap();

        let config = load_config(Some(&config_path)).unwrap();
        assert_eq!(config.watcher.stable_seconds, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = load_config(Some(&temp.path().join("nope.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("voxnote.yaml");
        std::fs::write(&config_path, "watch:\n  stable_seconds: [nope\n").unwrap();

        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/VoiceInbox"), home.join("VoiceInbox"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
        assert_eq!(expand_tilde("rel/~x"), PathBuf::from("rel/~x"));
    }
}
