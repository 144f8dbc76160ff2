//! voxnote - Restart-safe voice memo ingestion
//!
//! Watches an inbox of audio files, transcribes each one exactly once,
//! and appends the transcript plus optional AI commentary to a per-topic
//! Markdown notebook.
//!
//! # Architecture
//!
//! Processing is driven by content, not file names:
//! - A file is only picked up once its size and mtime have been stable
//!   for a full window
//! - Each file is keyed by the SHA-256 of its bytes in a durable ledger,
//!   so renamed copies and restarts never produce duplicate entries
//! - Notebooks are only ever appended to; commentary failures degrade to
//!   a placeholder instead of blocking the transcript
//!
//! # Modules
//!
//! - `ingest`: Inbox scanning, stability detection, fingerprints, transcription
//! - `core`: Ledger, router, notebook writer, pipeline, orchestrator
//! - `adapters`: Commentary (referee) backends
//! - `domain`: Data structures (LedgerEntry, RouteDecision, ProcessOutcome)
//! - `config`: YAML configuration and default paths
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Watch the inbox until Ctrl+C
//! voxnote watch
//!
//! # Process one file now
//! voxnote process "~/VoiceInbox/2025-12-29 Spin.m4a"
//!
//! # Show ledger counts
//! voxnote status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use core::{Ledger, Notebook, NotebookWriter, Orchestrator, Pipeline, SqliteLedger};
pub use domain::{EntryStatus, Fingerprint, LedgerEntry, Mode, ProcessOutcome, RouteDecision};
pub use ingest::{StabilityTracker, WatcherConfig};
