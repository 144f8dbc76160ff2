//! Per-item processing state and outcomes.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::entry::{EntryStatus, Fingerprint};
use super::route::Mode;

/// States an audio file moves through inside the pipeline
///
/// ```text
/// Detected → Fingerprinted → Skipped
///                          → Transcribing → Routed → DumpAppended
///                            → CommentaryAttempted → LedgerCommitted → Archived | Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Detected,
    Fingerprinted,
    Skipped,
    Transcribing,
    Routed,
    DumpAppended,
    CommentaryAttempted,
    LedgerCommitted,
    Archived,
    Done,
}

impl ItemState {
    /// Terminal states end the item's run
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Archived | Self::Done)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Detected, Fingerprinted)
                | (Fingerprinted, Skipped)
                | (Fingerprinted, Transcribing)
                | (Transcribing, Routed)
                | (Routed, DumpAppended)
                | (DumpAppended, CommentaryAttempted)
                | (CommentaryAttempted, LedgerCommitted)
                | (LedgerCommitted, Archived)
                | (LedgerCommitted, Done)
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detected => "detected",
            Self::Fingerprinted => "fingerprinted",
            Self::Skipped => "skipped",
            Self::Transcribing => "transcribing",
            Self::Routed => "routed",
            Self::DumpAppended => "dump_appended",
            Self::CommentaryAttempted => "commentary_attempted",
            Self::LedgerCommitted => "ledger_committed",
            Self::Archived => "archived",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// What happened to the commentary step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentaryStatus {
    /// Referee output appended
    Ok,

    /// Referee failed; placeholder appended
    Unavailable,

    /// Commentary turned off in config
    Disabled,
}

impl CommentaryStatus {
    /// Ledger status implied by this commentary outcome
    pub fn entry_status(self) -> EntryStatus {
        match self {
            Self::Ok | Self::Disabled => EntryStatus::Success,
            Self::Unavailable => EntryStatus::Partial,
        }
    }
}

impl fmt::Display for CommentaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Unavailable => "unavailable",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Result of driving one audio file through the pipeline
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Fingerprint already committed in the ledger
    Skipped { fingerprint: Fingerprint },

    /// Dump appended and ledger committed
    Completed(CompletedItem),
}

impl ProcessOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Skipped { fingerprint } => fingerprint,
            Self::Completed(item) => &item.fingerprint,
        }
    }
}

/// Details of a fully processed audio file
#[derive(Debug, Clone)]
pub struct CompletedItem {
    pub fingerprint: Fingerprint,
    pub topic: String,
    pub mode: Mode,
    pub notebook_path: PathBuf,
    pub commentary: CommentaryStatus,
    /// False when another run committed the fingerprint first
    pub ledger_committed: bool,
    pub archived_to: Option<PathBuf>,
}

/// Result of a manual commentary rerun
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunOutcome {
    /// New commentary section appended
    Appended,

    /// The latest dump already has real commentary
    AlreadyHasCommentary,

    /// The notebook holds no voice dumps
    NoDumps,
}
