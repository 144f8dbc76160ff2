//! Adapter interfaces for external systems.
//!
//! Adapters give the pipeline a single seam for the commentary collaborator
//! (the "referee"), so tests can script it and production can shell out.

pub mod referee;

use std::time::Duration;

use async_trait::async_trait;

// Re-export the command-backed referee
pub use referee::{build_referee_input, load_template, CommandReferee, PromptInputs, RefereeError};

/// Trait for commentary generators
#[async_trait]
pub trait Referee: Send + Sync {
    /// Human-readable referee name
    fn name(&self) -> &str;

    /// Produce commentary for a fully built prompt.
    ///
    /// Empty output is an error; callers never see blank commentary.
    async fn review(&self, prompt: &str, timeout: Duration) -> Result<String, RefereeError>;
}
