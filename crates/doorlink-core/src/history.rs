//! Local history of analytics pushes.
//!
//! Visitor-intent and package-alert events pushed by the lock are stored
//! locally so the history can be browsed while offline. The session only
//! depends on the [`HistoryStore`] trait; two implementations are provided:
//!
//! - [`MemoryStore`]: process-lifetime storage, used by tests and the CLI
//!   when no history file is configured.
//! - [`JsonFileStore`]: the same store persisted to a JSON file after every
//!   mutation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default number of records kept per kind.
pub const DEFAULT_MAX_RECORDS: usize = 200;

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors raised by history stores.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Reading or writing the backing file failed.
    #[error("history file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing file does not contain valid history JSON.
    #[error("invalid history data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Kind of pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    VisitorIntent,
    PackageAlert,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisitorIntent => "visitor_intent",
            Self::PackageAlert => "package_alert",
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visitor_intent" | "visitor_intents" | "visitor" => Ok(Self::VisitorIntent),
            "package_alert" | "package_alerts" | "package" => Ok(Self::PackageAlert),
            other => Err(format!("unknown history kind: {other}")),
        }
    }
}

/// A stored push record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Store-assigned id, unique per store.
    pub id: u64,
    pub kind: HistoryKind,
    pub received_at: DateTime<Utc>,
    /// The message body as pushed by the device.
    pub data: Value,
}

/// Storage for pushed analytics records.
///
/// Implementations must be safe to share between the session's reader task
/// and UI code.
pub trait HistoryStore: Send + Sync {
    /// Stores a record and returns it with its assigned id.
    fn save(&self, kind: HistoryKind, data: Value) -> HistoryResult<HistoryRecord>;

    /// Returns up to `limit` records of `kind`, newest first.
    fn list(&self, kind: HistoryKind, limit: usize) -> HistoryResult<Vec<HistoryRecord>>;

    /// Deletes a record. Returns `false` if it did not exist.
    fn delete(&self, kind: HistoryKind, id: u64) -> HistoryResult<bool>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Records {
    next_id: u64,
    records: Vec<HistoryRecord>,
}

impl Records {
    fn insert(&mut self, kind: HistoryKind, data: Value, max_records: usize) -> HistoryRecord {
        self.next_id += 1;
        let record = HistoryRecord {
            id: self.next_id,
            kind,
            received_at: Utc::now(),
            data,
        };
        self.records.push(record.clone());

        let count = self.records.iter().filter(|r| r.kind == kind).count();
        if count > max_records {
            let mut excess = count - max_records;
            self.records.retain(|r| {
                if excess > 0 && r.kind == kind {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        record
    }

    fn list(&self, kind: HistoryKind, limit: usize) -> Vec<HistoryRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.kind == kind)
            .take(limit)
            .cloned()
            .collect()
    }

    fn delete(&mut self, kind: HistoryKind, id: u64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| !(r.kind == kind && r.id == id));
        self.records.len() != before
    }
}

fn lock(records: &Mutex<Records>) -> MutexGuard<'_, Records> {
    records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory history store.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<Records>,
    max_records: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl MemoryStore {
    /// Creates a store keeping at most `max_records` records per kind.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(Records::default()),
            max_records,
        }
    }
}

impl HistoryStore for MemoryStore {
    fn save(&self, kind: HistoryKind, data: Value) -> HistoryResult<HistoryRecord> {
        Ok(lock(&self.records).insert(kind, data, self.max_records))
    }

    fn list(&self, kind: HistoryKind, limit: usize) -> HistoryResult<Vec<HistoryRecord>> {
        Ok(lock(&self.records).list(kind, limit))
    }

    fn delete(&self, kind: HistoryKind, id: u64) -> HistoryResult<bool> {
        Ok(lock(&self.records).delete(kind, id))
    }
}

/// History store persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
    max_records: usize,
}

impl JsonFileStore {
    /// Opens the store, loading existing records if the file exists.
    pub fn open(path: impl Into<PathBuf>, max_records: usize) -> HistoryResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            serde_json::from_str(&content)?
        } else {
            Records::default()
        };

        debug!(path = %path.display(), records = records.records.len(), "opened history store");

        Ok(Self {
            path,
            records: Mutex::new(records),
            max_records,
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> HistoryResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, json).map_err(|e| io_error(&self.path, e))
    }
}

impl HistoryStore for JsonFileStore {
    fn save(&self, kind: HistoryKind, data: Value) -> HistoryResult<HistoryRecord> {
        let mut records = lock(&self.records);
        let mut updated = records.clone();
        let record = updated.insert(kind, data, self.max_records);
        self.persist(&updated)?;
        *records = updated;
        Ok(record)
    }

    fn list(&self, kind: HistoryKind, limit: usize) -> HistoryResult<Vec<HistoryRecord>> {
        Ok(lock(&self.records).list(kind, limit))
    }

    fn delete(&self, kind: HistoryKind, id: u64) -> HistoryResult<bool> {
        let mut records = lock(&self.records);
        let mut updated = records.clone();
        if !updated.delete(kind, id) {
            return Ok(false);
        }
        self.persist(&updated)?;
        *records = updated;
        Ok(true)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> HistoryError {
    HistoryError::Io {
        path: path.display().to_string(),
        source,
    }
}
