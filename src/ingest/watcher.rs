//! Inbox polling and stability detection.
//!
//! Polls the inbox directory and emits audio files once their size and mtime
//! have stayed unchanged for the stability window (sync or recording
//! complete). Polling is deliberate: all tracking state is a cache that can be
//! rebuilt from the directory after a restart.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Configuration for the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Inbox directory to poll (searched recursively)
    pub watch_path: PathBuf,

    /// How long a file must be unchanged before processing (seconds)
    pub stable_seconds: u64,

    /// Delay between polls (seconds)
    pub poll_interval_secs: u64,

    /// File extensions to accept (without dot, case-insensitive)
    pub extensions: Vec<String>,

    /// File name globs to skip (partial downloads, sync temp files)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_path: crate::config::paths::default_inbox(),
            stable_seconds: 10,
            poll_interval_secs: 5,
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

pub fn default_extensions() -> Vec<String> {
    ["m4a", "mp3", "wav", "aac"].iter().map(|s| s.to_string()).collect()
}

pub fn default_ignore_patterns() -> Vec<String> {
    [".*", "*.tmp", "*.part", "*.partial", ".syncthing.*"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl WatcherConfig {
    /// Check if the watch path exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.watch_path.exists() {
            return Err(WatcherError::DirectoryNotFound(self.watch_path.clone()));
        }
        Ok(())
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stable_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Compiled candidate filter (extensions + ignore globs)
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    extensions: Vec<String>,
    ignore: Vec<Pattern>,
}

impl CandidateFilter {
    pub fn new(extensions: &[String], ignore_patterns: &[String]) -> Result<Self, WatcherError> {
        let ignore = ignore_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| WatcherError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore,
        })
    }

    pub fn from_config(config: &WatcherConfig) -> Result<Self, WatcherError> {
        Self::new(&config.extensions, &config.ignore_patterns)
    }

    /// Check if a path is an audio file we care about
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.ignore.iter().any(|p| p.matches(name)) {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// List every accepted regular file under `dir`. A missing directory yields
/// nothing; unreadable entries are skipped.
pub fn list_candidates(dir: &Path, filter: &CandidateFilter) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::debug!("Skipping unreadable inbox entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| filter.accepts(p))
        .collect()
}

/// A file judged stable and ready for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    size: u64,
    mtime: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    signature: Signature,
    unchanged_since: Instant,
}

/// In-memory stability tracking (never persisted)
#[derive(Debug)]
pub struct StabilityTracker {
    window: Duration,
    pending: HashMap<PathBuf, Observation>,
    emitted: HashMap<PathBuf, Signature>,
}

impl StabilityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Observe the current candidate set and return newly stable files
    pub fn observe(&mut self, paths: &[PathBuf]) -> Vec<Candidate> {
        self.observe_at(paths, Instant::now())
    }

    /// Same as [`observe`](Self::observe) with an explicit clock reading
    pub fn observe_at(&mut self, paths: &[PathBuf], now: Instant) -> Vec<Candidate> {
        let mut seen: HashSet<&Path> = HashSet::with_capacity(paths.len());
        let mut ready = Vec::new();

        for path in paths {
            let metadata = match std::fs::metadata(path) {
                Ok(m) if m.is_file() => m,
                // Vanished or replaced mid-wait
                _ => continue,
            };
            seen.insert(path.as_path());

            let signature = Signature {
                size: metadata.len(),
                mtime: metadata.modified().ok(),
            };

            if let Some(previous) = self.emitted.get(path) {
                if *previous == signature {
                    continue;
                }
                self.emitted.remove(path);
            }

            let stable = match self.pending.entry(path.clone()) {
                Entry::Occupied(mut e) => {
                    if e.get().signature == signature {
                        now.saturating_duration_since(e.get().unchanged_since) >= self.window
                    } else {
                        e.insert(Observation {
                            signature,
                            unchanged_since: now,
                        });
                        false
                    }
                }
                Entry::Vacant(e) => {
                    e.insert(Observation {
                        signature,
                        unchanged_since: now,
                    });
                    false
                }
            };

            if stable {
                self.pending.remove(path);
                self.emitted.insert(path.clone(), signature);
                ready.push(Candidate {
                    path: path.clone(),
                    size: signature.size,
                    mtime: signature.mtime,
                });
            }
        }

        self.pending.retain(|p, _| seen.contains(p.as_path()));
        self.emitted.retain(|p, _| seen.contains(p.as_path()));

        ready.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));
        ready
    }

    /// Re-arm a path so it is emitted again once stable (after a failed attempt)
    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
        self.emitted.remove(path);
    }

    /// Number of files waiting to become stable
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
