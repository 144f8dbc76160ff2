//! Command-line interface for voxnote.
//!
//! Provides commands for watching the inbox, processing single files,
//! re-running commentary, and inspecting the ledger and configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use crate::adapters::CommandReferee;
use crate::config::{ResolvedConfig, CONFIG_ENV};
use crate::core::{
    Ledger, NotebookWriter, Orchestrator, Pipeline, PipelineSettings, ProcessOptions, SqliteLedger,
};
use crate::domain::{ProcessOutcome, RerunOutcome};
use crate::ingest::CommandTranscriber;

/// voxnote - Voice memos into append-only topic notebooks
#[derive(Parser, Debug)]
#[command(name = "voxnote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ./voxnote.yaml, then ~/.config/voxnote/config.yaml)
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the inbox and process stable audio files
    Watch {
        /// Run a single cycle (two polls one stability window apart) and exit
        #[arg(long)]
        once: bool,
    },

    /// Process one audio file now
    Process {
        /// Audio file
        file: PathBuf,

        /// Reprocess even if already in the ledger
        #[arg(long)]
        force: bool,
    },

    /// Append commentary for the latest voice dump of a notebook
    RerunCommentary {
        /// Notebook (.md) file
        notebook: PathBuf,

        /// Append even if the latest dump already has commentary
        #[arg(long)]
        force: bool,
    },

    /// Show ledger counts and recent entries
    Status {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, config: ResolvedConfig) -> Result<()> {
        match self.command {
            Commands::Watch { once } => watch_inbox(&config, once).await,
            Commands::Process { file, force } => process_file(&config, &file, force).await,
            Commands::RerunCommentary { notebook, force } => {
                rerun_commentary(&config, &notebook, force).await
            }
            Commands::Status { limit } => show_status(&config, limit),
            Commands::Config => show_config(&config),
        }
    }
}

fn open_ledger(config: &ResolvedConfig) -> Result<SqliteLedger> {
    SqliteLedger::open(&config.ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", config.ledger_path.display()))
}

/// Wire configured collaborators into a pipeline
fn build_pipeline(config: &ResolvedConfig) -> Result<Pipeline> {
    let ledger = open_ledger(config)?;
    let transcriber = CommandTranscriber::new(
        config.transcription.command.clone(),
        config.transcription.format,
    );
    let referee = CommandReferee::new(config.commentary.command.clone())
        .with_model(config.commentary.model.as_deref());

    Ok(Pipeline::new(
        Arc::new(ledger),
        Arc::new(transcriber),
        Arc::new(referee),
        NotebookWriter::new(&config.topics_dir),
        PipelineSettings::from_config(config),
    ))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Flag flipped to `true` on Ctrl+C or SIGTERM
fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

async fn watch_inbox(config: &ResolvedConfig, once: bool) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let mut orchestrator = Orchestrator::new(pipeline, &config.watcher)
        .context("Invalid watch configuration")?
        .with_shutdown(shutdown_on_signal());

    if config.watcher.validate().is_err() {
        println!(
            "⚠️  Inbox does not exist yet: {}",
            config.watcher.watch_path.display()
        );
    }

    let report = if once {
        println!("📂 Single pass: {}", config.watcher.watch_path.display());
        orchestrator.run_single_pass().await
    } else {
        println!("👁️  Watching: {}", config.watcher.watch_path.display());
        println!("    Notebooks: {}", config.topics_dir.display());
        println!("    Press Ctrl+C to stop");
        println!();
        orchestrator.run_forever().await
    };

    println!();
    println!("Summary:");
    println!("  Ready:     {}", report.ready);
    println!("  Processed: {}", report.processed);
    println!("  Skipped:   {}", report.skipped);
    println!("  Failed:    {}", report.failed);

    Ok(())
}

async fn process_file(config: &ResolvedConfig, file: &Path, force: bool) -> Result<()> {
    let file = std::fs::canonicalize(file)
        .with_context(|| format!("Audio file not found: {}", file.display()))?;

    let pipeline = build_pipeline(config)?.with_shutdown(shutdown_on_signal());
    let outcome = pipeline
        .process_file(&file, ProcessOptions { force })
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    match outcome {
        ProcessOutcome::Skipped { fingerprint } => {
            println!(
                "ℹ️  Already processed ({}): {}",
                fingerprint.short(),
                file.display()
            );
            println!("    Use --force to process again");
        }
        ProcessOutcome::Completed(item) => {
            println!("✅ {}", item.notebook_path.display());
            println!("    Topic:      {}", item.topic);
            println!("    Mode:       {}", item.mode);
            println!("    Commentary: {}", item.commentary);
            if let Some(archived) = item.archived_to {
                println!("    Archived:   {}", archived.display());
            }
        }
    }

    Ok(())
}

async fn rerun_commentary(config: &ResolvedConfig, notebook: &Path, force: bool) -> Result<()> {
    let notebook = std::fs::canonicalize(notebook)
        .with_context(|| format!("Notebook not found: {}", notebook.display()))?;

    let pipeline = build_pipeline(config)?.with_shutdown(shutdown_on_signal());
    match pipeline.rerun_commentary(&notebook, force).await? {
        RerunOutcome::Appended => {
            println!("✅ Commentary appended: {}", notebook.display());
        }
        RerunOutcome::AlreadyHasCommentary => {
            println!("ℹ️  Latest voice dump already has commentary. Use --force to append another.");
        }
        RerunOutcome::NoDumps => {
            anyhow::bail!("No voice dumps found in {}", notebook.display());
        }
    }

    Ok(())
}

fn show_status(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let ledger = open_ledger(config)?;
    let stats = ledger.stats()?;

    println!();
    println!("Voice Ledger Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Ledger:  {}", config.ledger_path.display());
    println!("Inbox:   {}", config.watcher.watch_path.display());
    println!();
    println!("Entries:");
    println!("  Success:              {}", stats.success);
    println!("  Partial:              {}", stats.partial);
    println!("  Transcription failed: {}", stats.transcription_failed);
    println!("  Total:                {}", stats.total());
    println!();

    let recent = ledger.recent(limit)?;
    if recent.is_empty() {
        println!("No entries yet");
        return Ok(());
    }

    println!(
        "{:<14} {:<17} {:<21} {:<24} {}",
        "FINGERPRINT", "PROCESSED", "STATUS", "TOPIC", "FILE"
    );
    println!("{}", "-".repeat(100));
    for entry in recent {
        println!(
            "{:<14} {:<17} {:<21} {:<24} {}",
            entry.fingerprint.short(),
            entry
                .processed_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M"),
            entry.status,
            entry.topic.as_deref().unwrap_or("-"),
            entry.file_name
        );
    }

    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  voxnote Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();

    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);

    Ok(())
}
