//! Polling loop around the pipeline.
//!
//! Lists the inbox, feeds the stability tracker, and processes ready files
//! one at a time in detection order. Files whose processing failed are
//! forgotten by the tracker so a later poll retries them.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::ingest::{list_candidates, CandidateFilter, StabilityTracker, WatcherConfig, WatcherError};

use super::pipeline::{Pipeline, ProcessOptions};

/// Counts for one or more polling cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Files that became stable
    pub ready: usize,
    /// Files processed into a notebook
    pub processed: usize,
    /// Files already in the ledger
    pub skipped: usize,
    /// Files that failed and will be retried
    pub failed: usize,
}

impl CycleReport {
    pub fn absorb(&mut self, other: CycleReport) {
        self.ready += other.ready;
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Main watch loop
pub struct Orchestrator {
    pipeline: Pipeline,
    tracker: StabilityTracker,
    filter: CandidateFilter,
    watch_path: PathBuf,
    poll_interval: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, watcher: &WatcherConfig) -> Result<Self, WatcherError> {
        Ok(Self {
            pipeline,
            tracker: StabilityTracker::new(watcher.stability_window()),
            filter: CandidateFilter::from_config(watcher)?,
            watch_path: watcher.watch_path.clone(),
            poll_interval: watcher.poll_interval(),
            shutdown: None,
        })
    }

    /// Stop between items (and abandon in-flight collaborator calls) once the
    /// flag flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.pipeline = self.pipeline.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Sleep, returning early (true) on shutdown
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        let Some(mut rx) = self.shutdown.clone() else {
            tokio::time::sleep(duration).await;
            return false;
        };
        if *rx.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = rx.changed() => changed.is_ok() && *rx.borrow(),
        }
    }

    /// One poll: list, observe, process whatever is ready
    pub async fn run_once(&mut self) -> CycleReport {
        self.run_once_at(Instant::now()).await
    }

    /// [`run_once`](Self::run_once) with an explicit clock reading
    pub async fn run_once_at(&mut self, now: Instant) -> CycleReport {
        let paths = list_candidates(&self.watch_path, &self.filter);
        let ready = self.tracker.observe_at(&paths, now);
        let mut report = CycleReport {
            ready: ready.len(),
            ..CycleReport::default()
        };

        for candidate in ready {
            if self.is_shutdown() {
                info!("Shutdown requested; stopping between items");
                // Not attempted; emit again after restart or next poll
                self.tracker.forget(&candidate.path);
                continue;
            }

            match self
                .pipeline
                .process_file(&candidate.path, ProcessOptions::default())
                .await
            {
                Ok(outcome) if outcome.is_skipped() => report.skipped += 1,
                Ok(_) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_interrupted() {
                        warn!("Abandoned {}: {}", candidate.path.display(), e);
                    } else {
                        error!("Failed to process {}: {}", candidate.path.display(), e);
                    }
                    self.tracker.forget(&candidate.path);
                }
            }
        }

        report
    }

    /// Observe, wait out the stability window, then run one cycle.
    ///
    /// A file is only processed if it was unchanged across both polls.
    pub async fn run_single_pass(&mut self) -> CycleReport {
        let paths = list_candidates(&self.watch_path, &self.filter);
        self.tracker.observe(&paths);
        info!(
            pending = self.tracker.pending_len(),
            "Waiting {:?} for files to settle",
            self.tracker.window()
        );

        if self.sleep_or_shutdown(self.tracker.window()).await {
            return CycleReport::default();
        }
        self.run_once().await
    }

    /// Poll until shutdown; returns the accumulated report
    #[instrument(skip(self), fields(inbox = %self.watch_path.display()))]
    pub async fn run_forever(&mut self) -> CycleReport {
        info!(
            "Watching {} (stable {:?}, poll {:?})",
            self.watch_path.display(),
            self.tracker.window(),
            self.poll_interval
        );

        let mut total = CycleReport::default();
        loop {
            if self.is_shutdown() {
                break;
            }

            let report = self.run_once().await;
            if report.ready > 0 {
                info!(
                    ready = report.ready,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Cycle complete"
                );
            }
            total.absorb(report);

            if self.sleep_or_shutdown(self.poll_interval).await {
                break;
            }
        }

        info!("Watcher stopped");
        total
    }
}
