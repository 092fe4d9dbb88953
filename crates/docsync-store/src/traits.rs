use core::fmt;

use docsync::Operation;
use serde_json::{Map, Value};

/// A persisted snapshot row: reserved envelope fields plus either the
/// promoted body fields or a boxed body (see [`codec`](crate::codec)).
pub type Row = Map<String, Value>;

/// What happened when an operation was appended at a version.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The version was free and the operation was stored.
    Written,
    /// The same operation was already stored at this version.
    Unchanged,
    /// A different operation already occupies this version.
    Occupied(Operation),
}

/// Core trait for snapshot persistence.
///
/// Rows are scoped by collection (analogous to a table) and keyed by
/// document id. The backend does not interpret row contents.
pub trait SnapshotBackend {
    /// Error type for this backend.
    type Error: fmt::Debug + fmt::Display;

    /// Insert or replace the row for `(collection, id)`.
    fn put_row(&mut self, collection: &str, id: &str, row: &Row) -> Result<(), Self::Error>;

    /// Retrieve the row for `(collection, id)`.
    fn get_row(&self, collection: &str, id: &str) -> Result<Option<Row>, Self::Error>;

    /// Retrieve several rows of one collection. Missing ids are skipped.
    fn get_rows(&self, collection: &str, ids: &[&str]) -> Result<Vec<Row>, Self::Error> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.get_row(collection, id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Every row of a collection, in id order.
    fn scan_rows(&self, collection: &str) -> Result<Vec<Row>, Self::Error>;
}

/// Extension trait for backends that keep per-document op logs.
///
/// Op logs live in their own collections (named by the caller), keyed
/// uniquely by `(id, version)`. That uniqueness is what linearizes
/// concurrent writers: two appends at the same version cannot both win.
pub trait OpLogBackend: SnapshotBackend {
    /// Make sure the `(id, version)` index of `log` exists. Idempotent.
    fn ensure_op_index(&self, log: &str) -> Result<(), Self::Error>;

    /// Store `op` at `version` unless that version is already taken.
    fn put_op(
        &mut self,
        log: &str,
        id: &str,
        version: u64,
        op: &Operation,
    ) -> Result<AppendOutcome, Self::Error>;

    /// Highest logged version of a document, if any.
    fn max_op_version(&self, log: &str, id: &str) -> Result<Option<u64>, Self::Error>;

    /// Operations with `start <= version < end` (unbounded if `end` is
    /// `None`), ascending.
    fn ops_in_range(
        &self,
        log: &str,
        id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<(u64, Operation)>, Self::Error>;

    /// Drop operations below `version`. Returns how many were removed.
    fn truncate_ops_before(&mut self, log: &str, id: &str, version: u64) -> Result<usize, Self::Error>;
}
