//! Idempotency ledger keyed by content fingerprint.
//!
//! The ledger is the sole arbiter of "already handled". A committed entry
//! (`success` / `partial`) is never overwritten; a second `record` for the
//! same fingerprint fails with [`LedgerError::AlreadyRecorded`], which callers
//! treat as success-by-skip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::domain::{EntryStatus, Fingerprint, LedgerEntry};

/// Errors that can occur with the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fingerprint already recorded: {0}")]
    AlreadyRecorded(Fingerprint),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger lock poisoned")]
    Poisoned,
}

/// Per-status counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub success: usize,
    pub partial: usize,
    pub transcription_failed: usize,
}

impl LedgerStats {
    /// Entries that block reprocessing
    pub fn committed(&self) -> usize {
        self.success + self.partial
    }

    pub fn total(&self) -> usize {
        self.success + self.partial + self.transcription_failed
    }

    fn bump(&mut self, status: EntryStatus, n: usize) {
        match status {
            EntryStatus::Success => self.success += n,
            EntryStatus::Partial => self.partial += n,
            EntryStatus::TranscriptionFailed => self.transcription_failed += n,
        }
    }
}

/// Persistent mapping from fingerprint to processing outcome
pub trait Ledger: Send + Sync {
    /// Look up the entry for a fingerprint
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Insert if absent. Uncommitted entries are superseded; committed ones
    /// make this fail with `AlreadyRecorded`.
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Counts per status
    fn stats(&self) -> Result<LedgerStats, LedgerError>;

    /// Most recent entries first
    fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Whether a committed entry exists
    fn is_committed(&self, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        Ok(self
            .lookup(fingerprint)?
            .map(|e| e.status.is_committed())
            .unwrap_or(false))
    }
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS ledger (
  fingerprint   TEXT PRIMARY KEY,
  file_name     TEXT NOT NULL,
  topic         TEXT,
  notebook_path TEXT,
  processed_at  TEXT NOT NULL,
  status        TEXT NOT NULL,
  detail        TEXT
);

CREATE INDEX IF NOT EXISTS idx_ledger_processed_at ON ledger(processed_at);
"#;

/// SQLite-backed ledger; the primary key enforces uniqueness across processes
pub struct SqliteLedger {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open or create the ledger database, creating parent directories
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
        let processed_at: String = row.get("processed_at")?;
        let processed_at = DateTime::parse_from_rfc3339(&processed_at)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc);

        let status: String = row.get("status")?;
        let status = status.parse::<EntryStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(LedgerEntry {
            fingerprint: Fingerprint::from_hex(row.get::<_, String>("fingerprint")?),
            file_name: row.get("file_name")?,
            topic: row.get("topic")?,
            notebook_path: row.get::<_, Option<String>>("notebook_path")?.map(PathBuf::from),
            processed_at,
            status,
            detail: row.get("detail")?,
        })
    }
}

impl Ledger for SqliteLedger {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT * FROM ledger WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                Self::entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        // Single statement: the conflict check and write are atomic even
        // against another process holding the same database.
        let changed = conn.execute(
            r#"
            INSERT INTO ledger (fingerprint, file_name, topic, notebook_path, processed_at, status, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(fingerprint) DO UPDATE SET
              file_name     = excluded.file_name,
              topic         = excluded.topic,
              notebook_path = excluded.notebook_path,
              processed_at  = excluded.processed_at,
              status        = excluded.status,
              detail        = excluded.detail
            WHERE ledger.status = 'transcription_failed'
            "#,
            params![
                entry.fingerprint.as_str(),
                entry.file_name,
                entry.topic,
                entry.notebook_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                entry.processed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                entry.status.as_str(),
                entry.detail,
            ],
        )?;

        if changed == 0 {
            return Err(LedgerError::AlreadyRecorded(entry.fingerprint.clone()));
        }
        Ok(())
    }

    fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM ledger GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let (status, n) = row?;
            match status.parse::<EntryStatus>() {
                Ok(status) => stats.bump(status, n.max(0) as usize),
                Err(e) => tracing::warn!("Ignoring ledger rows with {}", e),
            }
        }
        Ok(stats)
    }

    fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM ledger ORDER BY processed_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], Self::entry_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// In-process ledger for tests and dry runs
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<Fingerprint, LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ledger for MemoryLedger {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(entries.get(fingerprint).cloned())
    }

    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        if let Some(existing) = entries.get(&entry.fingerprint) {
            if existing.status.is_committed() {
                return Err(LedgerError::AlreadyRecorded(entry.fingerprint.clone()));
            }
        }
        entries.insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut stats = LedgerStats::default();
        for entry in entries.values() {
            stats.bump(entry.status, 1);
        }
        Ok(stats)
    }

    fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut all: Vec<LedgerEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        all.truncate(limit);
        Ok(all)
    }
}
