//! Core processing logic.
//!
//! This module contains:
//! - Ledger: Fingerprint-keyed idempotency store
//! - Router: Topic and mode inference
//! - Notebook: Append-only Markdown notebooks
//! - Pipeline: Per-item state machine
//! - Orchestrator: Polling loop

pub mod ledger;
pub mod notebook;
pub mod orchestrator;
pub mod pipeline;
pub mod router;

// Re-export commonly used types
pub use ledger::{Ledger, LedgerError, LedgerStats, MemoryLedger, SqliteLedger};
pub use notebook::{ContextLimits, DumpSection, Notebook, NotebookError, NotebookWriter, Section, SectionKind};
pub use orchestrator::{CycleReport, Orchestrator};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, ProcessOptions};
pub use router::{route, sanitize_topic, RoutingLimits};
