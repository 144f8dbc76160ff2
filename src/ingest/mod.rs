//! Audio ingestion: the inbox side of the pipeline.
//!
//! 1. **Watcher**: Polls the inbox and emits files once they stop changing
//! 2. **Fingerprint**: SHA256 of the bytes, the idempotency key
//! 3. **Transcriber**: External speech-to-text command
//! 4. **Archive**: Optional copy/move of processed audio
//!
//! # Architecture
//!
//! ```text
//! Inbox (synced folder) → Watcher → Fingerprint → Transcriber → core::Pipeline
//!                                                                 ↓
//!                                                              Archive
//! ```

pub mod archive;
pub mod fingerprint;
pub mod transcriber;
pub mod watcher;

// Re-export key types
pub use archive::{archive_audio, is_valid_subdir_format, plan_archive_path, ArchiveConfig};
pub use fingerprint::{fingerprint_bytes, fingerprint_file};
pub use transcriber::{CommandTranscriber, OutputFormat, Transcriber, Transcript, TranscriptionError};
pub use watcher::{list_candidates, Candidate, CandidateFilter, StabilityTracker, WatcherConfig, WatcherError};
