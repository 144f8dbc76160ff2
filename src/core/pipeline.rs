//! Per-item processing: one audio file from fingerprint to ledger commit.
//!
//! ```text
//! Detected → Fingerprinted → Skipped
//!                          → Transcribing → Routed → DumpAppended
//!                            → CommentaryAttempted → LedgerCommitted → Archived | Done
//! ```
//!
//! The ledger commit comes last, after everything the notebook needs is on
//! disk. A crash between the dump append and the commit can therefore leave
//! one duplicate dump on the next run, never a lost one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{build_referee_input, load_template, PromptInputs, Referee, RefereeError};
use crate::config::ResolvedConfig;
use crate::domain::{
    CommentaryStatus, CompletedItem, Fingerprint, ItemState, LedgerEntry, Mode, ProcessOutcome,
    RerunOutcome,
};
use crate::ingest::{archive_audio, fingerprint_file, ArchiveConfig, Transcriber, TranscriptionError};

use super::ledger::{Ledger, LedgerError};
use super::notebook::{ContextLimits, DumpSection, Notebook, NotebookError, NotebookWriter, SectionKind};
use super::router::{route, sanitize_topic, RoutingLimits};

/// Errors that stop an item
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcription failed for {path}: {source}")]
    Transcription {
        path: PathBuf,
        #[source]
        source: TranscriptionError,
    },

    #[error(transparent)]
    Notebook(#[from] NotebookError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Commentary failed: {0}")]
    Referee(#[from] RefereeError),
}

impl PipelineError {
    /// True when the item was abandoned because of shutdown
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Transcription {
                source: TranscriptionError::Interrupted,
                ..
            } | Self::Referee(RefereeError::Interrupted)
        )
    }
}

/// Options for a single `process_file` call
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Process even if the fingerprint is already committed
    pub force: bool,
}

/// Knobs the pipeline needs from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub transcription_timeout: Duration,
    pub routing: RoutingLimits,
    pub commentary_enabled: bool,
    pub commentary_timeout: Duration,
    pub prompt_file: Option<PathBuf>,
    pub context: ContextLimits,
    pub archive: Option<ArchiveConfig>,
    pub record_failures: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            transcription_timeout: Duration::from_secs(1800),
            routing: RoutingLimits::default(),
            commentary_enabled: true,
            commentary_timeout: Duration::from_secs(180),
            prompt_file: None,
            context: ContextLimits::default(),
            archive: None,
            record_failures: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            transcription_timeout: config.transcription.timeout(),
            routing: config.routing,
            commentary_enabled: config.commentary.enabled,
            commentary_timeout: config.commentary.timeout(),
            prompt_file: config.commentary.prompt_file.clone(),
            context: config.commentary.context,
            archive: config.archive.clone(),
            record_failures: config.record_failures,
        }
    }
}

/// Resolves once shutdown is requested; never, without a channel
async fn shutdown_requested(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without signalling
            return std::future::pending().await;
        }
    }
}

fn advance(state: &mut ItemState, next: ItemState, fingerprint: &Fingerprint) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {} -> {}",
        state,
        next
    );
    debug!(fingerprint = %fingerprint.short(), from = %state, to = %next, "Item state transition");
    *state = next;
}

fn mode_label(section_markdown: &str) -> Option<String> {
    section_markdown
        .lines()
        .find_map(|l| l.strip_prefix("**Mode:**"))
        .map(|m| m.trim().to_string())
}

/// Drives audio files through transcription, routing and notebook writes
pub struct Pipeline {
    ledger: Arc<dyn Ledger>,
    transcriber: Arc<dyn Transcriber>,
    referee: Arc<dyn Referee>,
    notebooks: NotebookWriter,
    settings: PipelineSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        transcriber: Arc<dyn Transcriber>,
        referee: Arc<dyn Referee>,
        notebooks: NotebookWriter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            transcriber,
            referee,
            notebooks,
            settings,
            shutdown: None,
        }
    }

    /// Observe a shutdown flag while waiting on collaborators
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn notebooks(&self) -> &NotebookWriter {
        &self.notebooks
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Process one audio file
    #[instrument(skip(self, options), fields(file = %path.display()))]
    pub async fn process_file(
        &self,
        path: &Path,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome, PipelineError> {
        let mut state = ItemState::Detected;
        let io_err = |source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };

        let fingerprint = fingerprint_file(path).await.map_err(io_err)?;
        let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
        advance(&mut state, ItemState::Fingerprinted, &fingerprint);

        if !options.force && self.ledger.is_committed(&fingerprint)? {
            advance(&mut state, ItemState::Skipped, &fingerprint);
            info!(fingerprint = %fingerprint.short(), "Already processed, skipping");
            return Ok(ProcessOutcome::Skipped { fingerprint });
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        advance(&mut state, ItemState::Transcribing, &fingerprint);
        let transcribed = tokio::select! {
            result = self.transcriber.transcribe(path, self.settings.transcription_timeout) => result,
            _ = shutdown_requested(self.shutdown.clone()) => Err(TranscriptionError::Interrupted),
        };
        let transcript = match transcribed {
            Ok(t) => t,
            Err(source) => {
                warn!(fingerprint = %fingerprint.short(), error = %source, "Transcription failed");
                if self.settings.record_failures && !matches!(source, TranscriptionError::Interrupted) {
                    let entry = LedgerEntry::transcription_failed(
                        fingerprint.clone(),
                        file_name.clone(),
                        source.to_string(),
                    );
                    if let Err(e) = self.ledger.record(&entry) {
                        warn!("Could not record transcription failure: {}", e);
                    }
                }
                return Err(PipelineError::Transcription {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let decision = route(&file_name, &transcript.text, &self.settings.routing);
        let topic = sanitize_topic(&decision.topic);
        advance(&mut state, ItemState::Routed, &fingerprint);
        info!(
            topic = %topic,
            source = ?decision.topic_source,
            mode = %decision.mode,
            "Routed transcript"
        );

        let dumped_at: DateTime<Local> = metadata
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());
        let dump = DumpSection {
            dumped_at,
            source_audio: file_name.clone(),
            mode: decision.mode,
            transcript: transcript.text,
        };

        let notebook = self.notebooks.notebook(&topic);
        notebook.append_dump(&dump)?;
        advance(&mut state, ItemState::DumpAppended, &fingerprint);

        let (commentary, detail) = self
            .attempt_commentary(&notebook, &topic, decision.mode, &dump.render())
            .await?;
        advance(&mut state, ItemState::CommentaryAttempted, &fingerprint);

        let mut entry = LedgerEntry::committed(
            fingerprint.clone(),
            file_name,
            topic.clone(),
            notebook.path().to_path_buf(),
            commentary.entry_status(),
        );
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }

        let ledger_committed = match self.ledger.record(&entry) {
            Ok(()) => true,
            Err(LedgerError::AlreadyRecorded(_)) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    "Fingerprint committed by another run; treating as processed"
                );
                false
            }
            Err(e) => return Err(e.into()),
        };
        advance(&mut state, ItemState::LedgerCommitted, &fingerprint);

        let archived_to = match &self.settings.archive {
            Some(archive) => match archive_audio(path, archive, Local::now()).await {
                Ok(dest) => {
                    advance(&mut state, ItemState::Archived, &fingerprint);
                    Some(dest)
                }
                Err(e) => {
                    warn!("Archive failed for {}: {}", path.display(), e);
                    advance(&mut state, ItemState::Done, &fingerprint);
                    None
                }
            },
            None => {
                advance(&mut state, ItemState::Done, &fingerprint);
                None
            }
        };

        info!(
            fingerprint = %fingerprint.short(),
            notebook = %notebook.path().display(),
            commentary = %commentary,
            "Processed voice memo"
        );

        Ok(ProcessOutcome::Completed(CompletedItem {
            fingerprint,
            topic,
            mode: decision.mode,
            notebook_path: notebook.path().to_path_buf(),
            commentary,
            ledger_committed,
            archived_to,
        }))
    }

    async fn ask_referee(
        &self,
        notebook: &Notebook,
        topic: &str,
        mode: &str,
        latest_dump: &str,
        today: NaiveDate,
    ) -> Result<String, PipelineError> {
        let template = load_template(self.settings.prompt_file.as_deref())?;
        let context = notebook.extract_context(&self.settings.context, true)?;
        let today = today.format("%Y-%m-%d").to_string();
        let prompt = build_referee_input(
            &template,
            &PromptInputs {
                today: &today,
                topic,
                mode,
                context: &context,
                latest_dump,
            },
        );

        let review = tokio::select! {
            result = self.referee.review(&prompt, self.settings.commentary_timeout) => result,
            _ = shutdown_requested(self.shutdown.clone()) => Err(RefereeError::Interrupted),
        };
        Ok(review?)
    }

    /// Best-effort commentary; failures become the placeholder
    async fn attempt_commentary(
        &self,
        notebook: &Notebook,
        topic: &str,
        mode: Mode,
        latest_dump: &str,
    ) -> Result<(CommentaryStatus, Option<String>), PipelineError> {
        if !self.settings.commentary_enabled {
            return Ok((CommentaryStatus::Disabled, None));
        }

        let today = Local::now().date_naive();
        match self
            .ask_referee(notebook, topic, mode.as_str(), latest_dump, today)
            .await
        {
            Ok(body) => {
                notebook.append_commentary(today, &body)?;
                Ok((CommentaryStatus::Ok, None))
            }
            Err(e) => {
                warn!(referee = self.referee.name(), error = %e, "Commentary unavailable, appending placeholder");
                let detail = match &e {
                    PipelineError::Referee(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                notebook.append_placeholder(today, &detail)?;
                Ok((CommentaryStatus::Unavailable, Some(detail)))
            }
        }
    }

    /// Append fresh commentary for the latest dump of an existing notebook.
    ///
    /// Independent of the ledger. Nothing is appended on failure; the
    /// placeholder from the original run stays the latest section.
    #[instrument(skip(self), fields(notebook = %notebook_path.display()))]
    pub async fn rerun_commentary(
        &self,
        notebook_path: &Path,
        force: bool,
    ) -> Result<RerunOutcome, PipelineError> {
        let notebook = Notebook::at(notebook_path);
        let latest = notebook.latest_sections()?;

        let Some(dump) = latest.latest_dump else {
            return Ok(RerunOutcome::NoDumps);
        };

        let has_real_commentary = latest.last_kind == Some(SectionKind::Commentary)
            && !latest
                .latest_commentary
                .as_ref()
                .map(|c| c.is_placeholder())
                .unwrap_or(false);
        if has_real_commentary && !force {
            return Ok(RerunOutcome::AlreadyHasCommentary);
        }

        let mode = mode_label(&dump.markdown).unwrap_or_else(|| Mode::Brainstorming.to_string());
        let today = Local::now().date_naive();
        let body = self
            .ask_referee(&notebook, notebook.title(), &mode, &dump.markdown, today)
            .await?;
        notebook.append_commentary(today, &body)?;

        info!("Appended commentary");
        Ok(RerunOutcome::Appended)
    }
}
