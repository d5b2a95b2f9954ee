//! Local push history commands.

use std::path::Path;
use std::sync::Arc;

use doorlink_core::{HistoryKind, HistoryStore, JsonFileStore, MemoryStore};
use serde_json::Value;
use tracing::warn;

use crate::commands::device::print_json;
use crate::error::{ClientError, ClientResult};

/// Opens the history file for a live session.
///
/// A corrupt or unreadable file must not keep the session from starting, so
/// pushes are kept in memory instead.
pub fn open_for_session(path: &Path, max_records: usize) -> Arc<dyn HistoryStore> {
    match JsonFileStore::open(path, max_records) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "history file unusable, keeping pushes in memory");
            Arc::new(MemoryStore::new(max_records))
        }
    }
}

/// Prints the newest `limit` records of `kind`.
pub fn list(
    store: &dyn HistoryStore,
    kind: HistoryKind,
    limit: usize,
    compact: bool,
) -> ClientResult<()> {
    let records = store.list(kind, limit)?;
    let value = serde_json::to_value(&records)
        .map_err(|e| ClientError::History(format!("failed to render records: {}", e)))?;
    match value {
        Value::Array(items) if compact => {
            for item in items {
                print_json(&item, true);
            }
        }
        other => print_json(&other, compact),
    }
    Ok(())
}

/// Deletes one record.
pub fn delete(store: &dyn HistoryStore, kind: HistoryKind, id: u64) -> ClientResult<()> {
    if store.delete(kind, id)? {
        println!("deleted {kind} {id}");
        Ok(())
    } else {
        Err(ClientError::History(format!("no {kind} record with id {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_reports_missing() {
        let store = MemoryStore::new(5);
        let record = store
            .save(HistoryKind::PackageAlert, json!({"count": 1}))
            .unwrap();

        assert!(delete(&store, HistoryKind::PackageAlert, record.id).is_ok());
        assert!(matches!(
            delete(&store, HistoryKind::PackageAlert, record.id),
            Err(ClientError::History(_))
        ));
    }

    #[test]
    fn corrupt_history_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let store = open_for_session(&path, 5);
        let record = store.save(HistoryKind::VisitorIntent, json!({"intent": "visit"})).unwrap();
        assert_eq!(store.list(HistoryKind::VisitorIntent, 10).unwrap(), vec![record]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ truncated");
    }

    #[test]
    fn readable_history_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let store = open_for_session(&path, 5);
        store.save(HistoryKind::PackageAlert, json!({"count": 2})).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn list_empty_store() {
        let store = MemoryStore::new(5);
        assert!(list(&store, HistoryKind::VisitorIntent, 10, true).is_ok());
    }
}
