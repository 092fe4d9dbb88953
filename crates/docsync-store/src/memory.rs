use std::collections::BTreeMap;

use docsync::Operation;
use thiserror::Error;

use crate::traits::{AppendOutcome, OpLogBackend, Row, SnapshotBackend};

/// In-memory storage backend.
///
/// All data is stored in `BTreeMap`s; nothing touches disk. Cloning a store
/// copies its contents, which makes a clone usable as a poll replica in
/// tests.
///
/// # Example
///
/// ```
/// use docsync_store::{MemoryStore, Row, SnapshotBackend};
/// use serde_json::json;
///
/// let mut store = MemoryStore::new();
/// let row: Row = serde_json::from_value(json!({"_id": "t1", "title": "x"})).unwrap();
/// store.put_row("todos", "t1", &row).unwrap();
///
/// assert_eq!(store.get_row("todos", "t1").unwrap(), Some(row));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// (collection, id) -> snapshot row
    rows: BTreeMap<(String, String), Row>,
    /// (log, id, version) -> operation
    ops: BTreeMap<(String, String, u64), Operation>,
}

/// Error type for the in-memory backend.
///
/// This backend never actually fails, but the trait requires an error type.
#[derive(Debug, Clone, Error)]
#[error("memory store error: {0}")]
pub struct MemoryError(String);

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of snapshot rows across all collections.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Total number of logged operations across all logs.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    fn key(collection: &str, id: &str) -> (String, String) {
        (collection.to_string(), id.to_string())
    }

    fn doc_ops<'a>(
        &'a self,
        log: &str,
        id: &str,
    ) -> impl DoubleEndedIterator<Item = (u64, &'a Operation)> + 'a {
        let start = (log.to_string(), id.to_string(), 0);
        let end = (log.to_string(), id.to_string(), u64::MAX);
        self.ops
            .range(start..=end)
            .map(|((_, _, version), op)| (*version, op))
    }
}

impl SnapshotBackend for MemoryStore {
    type Error = MemoryError;

    fn put_row(&mut self, collection: &str, id: &str, row: &Row) -> Result<(), Self::Error> {
        self.rows.insert(Self::key(collection, id), row.clone());
        Ok(())
    }

    fn get_row(&self, collection: &str, id: &str) -> Result<Option<Row>, Self::Error> {
        Ok(self.rows.get(&Self::key(collection, id)).cloned())
    }

    fn scan_rows(&self, collection: &str) -> Result<Vec<Row>, Self::Error> {
        let rows = self
            .rows
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, row)| row.clone())
            .collect();
        Ok(rows)
    }
}

impl OpLogBackend for MemoryStore {
    fn ensure_op_index(&self, _log: &str) -> Result<(), Self::Error> {
        // The BTreeMap key already is the (id, version) index.
        Ok(())
    }

    fn put_op(
        &mut self,
        log: &str,
        id: &str,
        version: u64,
        op: &Operation,
    ) -> Result<AppendOutcome, Self::Error> {
        let key = (log.to_string(), id.to_string(), version);
        match self.ops.get(&key) {
            Some(existing) if existing == op => Ok(AppendOutcome::Unchanged),
            Some(existing) => Ok(AppendOutcome::Occupied(existing.clone())),
            None => {
                self.ops.insert(key, op.clone());
                Ok(AppendOutcome::Written)
            }
        }
    }

    fn max_op_version(&self, log: &str, id: &str) -> Result<Option<u64>, Self::Error> {
        Ok(self.doc_ops(log, id).next_back().map(|(version, _)| version))
    }

    fn ops_in_range(
        &self,
        log: &str,
        id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<(u64, Operation)>, Self::Error> {
        let ops = self
            .doc_ops(log, id)
            .filter(|(version, _)| *version >= start && end.map_or(true, |end| *version < end))
            .map(|(version, op)| (version, op.clone()))
            .collect();
        Ok(ops)
    }

    fn truncate_ops_before(&mut self, log: &str, id: &str, version: u64) -> Result<usize, Self::Error> {
        let doomed: Vec<_> = self
            .doc_ops(log, id)
            .take_while(|(v, _)| *v < version)
            .map(|(v, _)| (log.to_string(), id.to_string(), v))
            .collect();
        for key in &doomed {
            self.ops.remove(key);
        }
        Ok(doomed.len())
    }
}
