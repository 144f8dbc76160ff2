//! Domain types for the voice notebook pipeline.
//!
//! This module contains the core data structures:
//! - Entry: Ledger records keyed by content fingerprint
//! - Route: Topic and mode decisions
//! - Item: Per-file processing state and outcomes

pub mod entry;
pub mod item;
pub mod route;

// Re-export commonly used types
pub use entry::{EntryStatus, Fingerprint, LedgerEntry};
pub use item::{CommentaryStatus, CompletedItem, ItemState, ProcessOutcome, RerunOutcome};
pub use route::{Mode, RouteDecision, TopicSource};
