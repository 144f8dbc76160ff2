//! Routing decisions produced by the topic router.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which matcher produced the topic, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicSource {
    /// `YYYY-MM-DD <topic>` in the file name
    Filename,

    /// A `TOPIC: ...` line in the transcript
    Explicit,

    /// An introductory phrase ("this is about ...")
    Phrase,

    /// Most frequent content words
    Keywords,

    /// Nothing matched; the fallback bucket
    Default,
}

/// Epistemic mode of a dump, surfaced to the referee as a hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "claims")]
    Claims,
    #[serde(rename = "model-forming")]
    ModelForming,
    #[serde(rename = "brainstorming")]
    Brainstorming,
    #[serde(rename = "prep-for-sharing")]
    PrepForSharing,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claims => "claims",
            Self::ModelForming => "model-forming",
            Self::Brainstorming => "brainstorming",
            Self::PrepForSharing => "prep-for-sharing",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transcript goes and how it reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Human-readable topic (not yet sanitized for the filesystem)
    pub topic: String,

    pub topic_source: TopicSource,

    pub mode: Mode,
}
