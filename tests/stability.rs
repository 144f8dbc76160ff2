//! Stability detection against a real directory
//!
//! Files are only emitted once size and mtime have held for a full window.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use filetime::FileTime;
use tempfile::TempDir;
use voxnote::ingest::{list_candidates, CandidateFilter, StabilityTracker, WatcherConfig};

const WINDOW: Duration = Duration::from_secs(10);

fn setup() -> (TempDir, CandidateFilter) {
    let temp = TempDir::new().unwrap();
    let filter = CandidateFilter::from_config(&WatcherConfig::default()).unwrap();
    (temp, filter)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn names(ready: &[voxnote::ingest::Candidate]) -> Vec<String> {
    ready
        .iter()
        .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_growing_file_waits_for_last_change() {
    let (temp, filter) = setup();
    let path = temp.path().join("memo.m4a");
    let mut tracker = StabilityTracker::new(WINDOW);
    let t0 = Instant::now();

    std::fs::write(&path, vec![0u8; 100]).unwrap();
    let found = list_candidates(temp.path(), &filter);
    assert!(tracker.observe_at(&found, t0).is_empty());

    // Still being written at t=2
    std::fs::write(&path, vec![0u8; 200]).unwrap();
    assert!(tracker.observe_at(&found, t0 + secs(2)).is_empty());

    // A window after the first write, but not after the last
    assert!(tracker.observe_at(&found, t0 + secs(10)).is_empty());
    assert!(tracker.observe_at(&found, t0 + secs(11)).is_empty());

    let ready = tracker.observe_at(&found, t0 + secs(12));
    assert_eq!(names(&ready), vec!["memo.m4a"]);
    assert_eq!(ready[0].size, 200);

    // Emitted once only
    assert!(tracker.observe_at(&found, t0 + secs(30)).is_empty());
}

#[test]
fn test_mtime_touch_restarts_window() {
    let (temp, filter) = setup();
    let path = temp.path().join("memo.wav");
    std::fs::write(&path, b"same size").unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    let mut tracker = StabilityTracker::new(WINDOW);
    let t0 = Instant::now();
    let found = list_candidates(temp.path(), &filter);
    tracker.observe_at(&found, t0);

    // Same size, newer mtime
    filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_060, 0)).unwrap();
    assert!(tracker.observe_at(&found, t0 + secs(5)).is_empty());
    assert!(tracker.observe_at(&found, t0 + secs(10)).is_empty());
    assert_eq!(tracker.observe_at(&found, t0 + secs(15)).len(), 1);
}

#[test]
fn test_changed_after_emit_is_emitted_again() {
    let (temp, filter) = setup();
    let path = temp.path().join("memo.mp3");
    std::fs::write(&path, b"take one").unwrap();

    let mut tracker = StabilityTracker::new(WINDOW);
    let t0 = Instant::now();
    let found = list_candidates(temp.path(), &filter);
    tracker.observe_at(&found, t0);
    assert_eq!(tracker.observe_at(&found, t0 + WINDOW).len(), 1);

    std::fs::write(&path, b"take two, longer").unwrap();
    assert!(tracker.observe_at(&found, t0 + secs(11)).is_empty());
    assert_eq!(tracker.observe_at(&found, t0 + secs(21)).len(), 1);
}

#[test]
fn test_vanished_file_is_dropped() {
    let (temp, filter) = setup();
    let path = temp.path().join("memo.m4a");
    std::fs::write(&path, b"short lived").unwrap();

    let mut tracker = StabilityTracker::new(WINDOW);
    let t0 = Instant::now();
    tracker.observe_at(&list_candidates(temp.path(), &filter), t0);
    assert_eq!(tracker.pending_len(), 1);

    std::fs::remove_file(&path).unwrap();
    let found = list_candidates(temp.path(), &filter);
    assert!(found.is_empty());
    assert!(tracker.observe_at(&found, t0 + WINDOW).is_empty());
    assert_eq!(tracker.pending_len(), 0);
}

#[test]
fn test_listing_filters_and_missing_dir() {
    let (temp, filter) = setup();
    for name in ["a.m4a", "b.WAV", "notes.txt", ".hidden.m4a", "partial.m4a.part"] {
        std::fs::write(temp.path().join(name), b"x").unwrap();
    }
    std::fs::create_dir_all(temp.path().join("nested")).unwrap();
    std::fs::write(temp.path().join("nested/c.m4a"), b"x").unwrap();

    let mut found: Vec<String> = list_candidates(temp.path(), &filter)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    found.sort();
    // Subdirectories are scanned too
    assert_eq!(found, vec!["a.m4a", "b.WAV", "c.m4a"]);

    let missing: PathBuf = temp.path().join("does-not-exist");
    assert!(list_candidates(&missing, &filter).is_empty());
}
