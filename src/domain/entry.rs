//! Ledger entries: the persistent record of a processed audio file.
//!
//! An entry is keyed by the content fingerprint of the audio bytes, so the
//! same recording is recognised no matter what it is called or where it lives.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SHA-256 of a file's bytes, as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines and tables
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome recorded for a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Dump and real commentary (or commentary disabled)
    Success,

    /// Dump appended, commentary fell back to the placeholder
    Partial,

    /// Transcription failed; never blocks a later attempt
    TranscriptionFailed,
}

impl EntryStatus {
    /// Committed entries are immutable and make reprocessing a no-op
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::TranscriptionFailed => "transcription_failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "transcription_failed" => Ok(Self::TranscriptionFailed),
            other => Err(format!("unknown ledger status: {}", other)),
        }
    }
}

/// A single row in the idempotency ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Content fingerprint (primary key)
    pub fingerprint: Fingerprint,

    /// Original file name at processing time
    pub file_name: String,

    /// Topic the dump was routed to
    pub topic: Option<String>,

    /// Notebook that received the dump
    pub notebook_path: Option<PathBuf>,

    /// When the entry was written
    pub processed_at: DateTime<Utc>,

    /// Processing outcome
    pub status: EntryStatus,

    /// Error text for partial or failed outcomes
    pub detail: Option<String>,
}

impl LedgerEntry {
    /// Entry for an item whose dump reached a notebook
    pub fn committed(
        fingerprint: Fingerprint,
        file_name: impl Into<String>,
        topic: impl Into<String>,
        notebook_path: PathBuf,
        status: EntryStatus,
    ) -> Self {
        Self {
            fingerprint,
            file_name: file_name.into(),
            topic: Some(topic.into()),
            notebook_path: Some(notebook_path),
            processed_at: Utc::now(),
            status,
            detail: None,
        }
    }

    /// Entry for an item whose transcription failed
    pub fn transcription_failed(
        fingerprint: Fingerprint,
        file_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint,
            file_name: file_name.into(),
            topic: None,
            notebook_path: None,
            processed_at: Utc::now(),
            status: EntryStatus::TranscriptionFailed,
            detail: Some(error.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_short() {
        let fp = Fingerprint::from_hex("ABCDEF0123456789abcdef");
        assert_eq!(fp.short(), "abcdef012345");
        assert_eq!(fp.as_str(), "abcdef0123456789abcdef");
    }

    #[test]
    fn test_status_round_trip_and_commit() {
        for status in [
            EntryStatus::Success,
            EntryStatus::Partial,
            EntryStatus::TranscriptionFailed,
        ] {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        assert!(EntryStatus::Success.is_committed());
        assert!(EntryStatus::Partial.is_committed());
        assert!(!EntryStatus::TranscriptionFailed.is_committed());
        assert!("done".parse::<EntryStatus>().is_err());
    }
}
