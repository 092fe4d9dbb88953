//! High-level document store.
//!
//! `DocStore` wraps a backend with the rules every caller relies on:
//! collection naming, closed state, lazy op-log indexes, version
//! linearization through the backend's `(id, version)` uniqueness, and
//! poll-mode query execution.
//!
//! # Example
//!
//! ```
//! use docsync::{DocMutator, Path, RemoteDoc};
//! use docsync_store::{DocStore, MemoryStore};
//! use serde_json::json;
//!
//! let mut store = DocStore::new(MemoryStore::new());
//! let mut doc = RemoteDoc::new("todos", "t1");
//! doc.set(&Path::parse("title"), json!("write docs")).unwrap();
//! doc.push(&Path::parse("tags"), vec![json!("urgent")]).unwrap();
//!
//! assert_eq!(store.commit(&mut doc).unwrap(), 2);
//! let loaded = store.get("todos", "t1").unwrap().unwrap();
//! assert_eq!(loaded.snapshot, json!({"title": "write docs", "tags": ["urgent"]}));
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docsync::{DocError, DocEvent, Document, OpLogEntry, Operation, RemoteDoc};
use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::query::{CanonicalQuery, QueryError, QueryOutcome, WhereEvaluator};
use crate::traits::{AppendOutcome, OpLogBackend, SnapshotBackend};

/// The collection name reserved by the backing database.
const SYSTEM_COLLECTION: &str = "system";

/// Error type for `DocStore` operations.
#[derive(Debug, Error)]
pub enum StoreError<E: fmt::Debug + fmt::Display> {
    /// Invalid collection name, missing id or unsupported request.
    #[error("validation error: {0}")]
    Validation(String),
    /// Another writer already committed a different operation at this
    /// version. Fetch the missing range, rebase and retry.
    #[error("version {version} of {collection}/{id} is already taken (latest is {latest})")]
    VersionConflict {
        /// Collection of the document.
        collection: String,
        /// Document id.
        id: String,
        /// The version that was attempted.
        version: u64,
        /// The store's latest version at the time of the conflict.
        latest: u64,
    },
    /// The store has been closed.
    #[error("db already closed")]
    Closed,
    /// Error from the underlying storage backend.
    #[error("store error: {0}")]
    Backend(E),
    /// A stored row could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The query is malformed or not allowed.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// An operation could not be applied.
    #[error(transparent)]
    Doc(#[from] DocError),
}

/// Result alias for `DocStore` operations over backend `B`.
pub type StoreResult<T, B> = Result<T, StoreError<<B as SnapshotBackend>::Error>>;

/// Configuration for `DocStore`.
#[derive(Debug, Clone)]
pub struct DocStoreConfig {
    /// Allow `$where` predicates. They also need an evaluator.
    pub allow_where_query: bool,
    /// How long poll-mode queries wait before reading from the replica.
    pub poll_settle_delay: Duration,
    /// Suffix appended to a collection name to name its op log.
    pub op_log_suffix: String,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            allow_where_query: false,
            poll_settle_delay: Duration::from_millis(300),
            op_log_suffix: "_ops".to_string(),
        }
    }
}

/// Result of a query: decoded documents, or an empty list and the count in
/// `extra` for `$count` queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matching documents.
    pub results: Vec<Document>,
    /// Aggregate output, such as the `$count` result.
    pub extra: Option<Value>,
}

/// Builder for constructing a `DocStore` with custom configuration.
pub struct DocStoreBuilder<B: OpLogBackend> {
    backend: B,
    poll: Option<B>,
    config: DocStoreConfig,
    where_evaluator: Option<Arc<dyn WhereEvaluator>>,
}

impl<B: OpLogBackend> DocStoreBuilder<B> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: DocStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Allow or reject `$where` predicates.
    pub fn allow_where_query(mut self, allow: bool) -> Self {
        self.config.allow_where_query = allow;
        self
    }

    /// Set the settle delay of poll-mode queries.
    pub fn poll_settle_delay(mut self, delay: Duration) -> Self {
        self.config.poll_settle_delay = delay;
        self
    }

    /// Set the op-log suffix.
    pub fn op_log_suffix(mut self, suffix: &str) -> Self {
        self.config.op_log_suffix = suffix.to_string();
        self
    }

    /// Read poll-mode queries from a lag-tolerant replica.
    pub fn poll_replica(mut self, replica: B) -> Self {
        self.poll = Some(replica);
        self
    }

    /// Register the evaluator used for `$where` predicates.
    pub fn where_evaluator(mut self, evaluator: impl WhereEvaluator + 'static) -> Self {
        self.where_evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Build the `DocStore`.
    pub fn build(self) -> DocStore<B> {
        DocStore {
            backend: self.backend,
            poll: self.poll,
            config: self.config,
            where_evaluator: self.where_evaluator,
            op_indexes: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }
}

/// Document store over any [`OpLogBackend`].
///
/// Snapshots live in the collection itself; operations live in a sibling
/// collection named with [`DocStoreConfig::op_log_suffix`].
pub struct DocStore<B: OpLogBackend> {
    backend: B,
    poll: Option<B>,
    config: DocStoreConfig,
    where_evaluator: Option<Arc<dyn WhereEvaluator>>,
    /// Op logs whose index has been requested.
    op_indexes: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl<B: OpLogBackend> DocStore<B> {
    /// Create a `DocStore` wrapping the given backend with default config.
    pub fn new(backend: B) -> Self {
        Self::builder(backend).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder(backend: B) -> DocStoreBuilder<B> {
        DocStoreBuilder {
            backend,
            poll: None,
            config: DocStoreConfig::default(),
            where_evaluator: None,
        }
    }

    /// Get a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get a mutable reference to the underlying backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Get the poll replica, if one is configured.
    pub fn replica(&self) -> Option<&B> {
        self.poll.as_ref()
    }

    /// Get the configuration.
    pub fn config(&self) -> &DocStoreConfig {
        &self.config
    }

    /// Name of the op log of `collection`.
    pub fn op_log_name(&self, collection: &str) -> String {
        format!("{collection}{}", self.config.op_log_suffix)
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the store. Every later call fails with [`StoreError::Closed`],
    /// including a second `close`.
    pub fn close(&self) -> StoreResult<(), B> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        debug!("document store closed");
        Ok(())
    }

    fn check_open(&self) -> StoreResult<(), B> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_collection(&self, collection: &str) -> StoreResult<(), B> {
        self.check_open()?;
        if collection.is_empty() {
            return Err(StoreError::Validation("collection name is empty".into()));
        }
        if collection.ends_with(&self.config.op_log_suffix) || collection == SYSTEM_COLLECTION {
            return Err(StoreError::Validation(format!(
                "invalid collection name {collection}"
            )));
        }
        Ok(())
    }

    fn check(&self, collection: &str, id: &str) -> StoreResult<(), B> {
        self.check_collection(collection)?;
        if id.is_empty() {
            return Err(StoreError::Validation(format!(
                "missing document id in {collection}"
            )));
        }
        Ok(())
    }

    /// Ask the backend for the op-log index once per log. Failures are
    /// logged and not retried.
    fn ensure_op_index(&self, log: &str) {
        let mut requested = self.op_indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if !requested.insert(log.to_string()) {
            return;
        }
        if let Err(e) = self.backend.ensure_op_index(log) {
            warn!("could not create (id, v) index on {log}: {e}");
        }
    }

    fn evaluator(&self) -> Option<&dyn WhereEvaluator> {
        if self.config.allow_where_query {
            self.where_evaluator.as_deref()
        } else {
            None
        }
    }

    // --- Snapshots --------------------------------------------------------

    /// Load a document snapshot. Deleted documents come back as tombstones.
    pub fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>, B> {
        self.check(collection, id)?;
        let row = self
            .backend
            .get_row(collection, id)
            .map_err(StoreError::Backend)?;
        Ok(row.map(|row| codec::decode(collection, row)).transpose()?)
    }

    /// Load many documents at once. Every collection name is validated
    /// before anything is read.
    pub fn bulk_get(
        &self,
        requests: &BTreeMap<String, BTreeSet<String>>,
    ) -> StoreResult<BTreeMap<String, BTreeMap<String, Document>>, B> {
        for collection in requests.keys() {
            self.check_collection(collection)?;
        }
        let mut found = BTreeMap::new();
        for (collection, ids) in requests {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let rows = self
                .backend
                .get_rows(collection, &ids)
                .map_err(StoreError::Backend)?;
            let mut docs = BTreeMap::new();
            for row in rows {
                let doc = codec::decode(collection, row)?;
                docs.insert(doc.id.clone(), doc);
            }
            found.insert(collection.clone(), docs);
        }
        Ok(found)
    }

    /// Upsert a snapshot.
    pub fn write(&mut self, collection: &str, id: &str, doc: &Document) -> StoreResult<(), B> {
        self.check(collection, id)?;
        if doc.id != id {
            return Err(StoreError::Validation(format!(
                "document {} written under id {id}",
                doc.id
            )));
        }
        self.backend
            .put_row(collection, id, &codec::encode(doc))
            .map_err(StoreError::Backend)
    }

    /// Load a document keeping only `fields` of its body. The snapshot must
    /// be a mapping.
    pub fn projected_get(
        &self,
        collection: &str,
        id: &str,
        fields: &[&str],
    ) -> StoreResult<Option<Document>, B> {
        self.check(collection, id)?;
        let Some(row) = self
            .backend
            .get_row(collection, id)
            .map_err(StoreError::Backend)?
        else {
            return Ok(None);
        };
        if codec::is_boxed(&row) {
            return Err(StoreError::Validation(format!(
                "cannot project {collection}/{id}: snapshot is not a mapping"
            )));
        }
        Ok(Some(codec::decode(collection, codec::project(&row, fields))?))
    }

    // --- Op log -----------------------------------------------------------

    /// Append one operation at `version`.
    ///
    /// Re-appending the operation already stored at `version` succeeds, so
    /// a write with an unknown outcome can be retried. A different
    /// operation there fails with [`StoreError::VersionConflict`].
    pub fn append(
        &mut self,
        collection: &str,
        id: &str,
        version: u64,
        op: &Operation,
    ) -> StoreResult<(), B> {
        self.check(collection, id)?;
        let log = self.op_log_name(collection);
        self.ensure_op_index(&log);
        match self
            .backend
            .put_op(&log, id, version, op)
            .map_err(StoreError::Backend)?
        {
            AppendOutcome::Written | AppendOutcome::Unchanged => Ok(()),
            AppendOutcome::Occupied(_) => Err(StoreError::VersionConflict {
                collection: collection.to_string(),
                id: id.to_string(),
                version,
                latest: self.latest_version(collection, id)?,
            }),
        }
    }

    /// The version the next operation on a document must carry: one past
    /// the highest logged version, else the snapshot version, else 0.
    pub fn latest_version(&self, collection: &str, id: &str) -> StoreResult<u64, B> {
        self.check(collection, id)?;
        let log = self.op_log_name(collection);
        self.ensure_op_index(&log);
        if let Some(max) = self
            .backend
            .max_op_version(&log, id)
            .map_err(StoreError::Backend)?
        {
            return Ok(max + 1);
        }
        Ok(self.get(collection, id)?.map_or(0, |doc| doc.version))
    }

    /// Logged operations with `start <= version < end`, ascending.
    pub fn range(
        &self,
        collection: &str,
        id: &str,
        start: u64,
        end: Option<u64>,
    ) -> StoreResult<Vec<OpLogEntry>, B> {
        self.check(collection, id)?;
        let log = self.op_log_name(collection);
        self.ensure_op_index(&log);
        let ops = self
            .backend
            .ops_in_range(&log, id, start, end)
            .map_err(StoreError::Backend)?;
        Ok(ops
            .into_iter()
            .map(|(version, op)| OpLogEntry {
                collection: collection.to_string(),
                id: id.to_string(),
                version,
                op,
            })
            .collect())
    }

    /// Drop log entries already folded into the persisted snapshot. Returns
    /// how many were removed.
    pub fn compact(&mut self, collection: &str, id: &str) -> StoreResult<usize, B> {
        let Some(doc) = self.get(collection, id)? else {
            return Ok(0);
        };
        let log = self.op_log_name(collection);
        let removed = self
            .backend
            .truncate_ops_before(&log, id, doc.version)
            .map_err(StoreError::Backend)?;
        debug!("compacted {removed} operations of {collection}/{id} below v{}", doc.version);
        Ok(removed)
    }

    // --- Replicated documents ---------------------------------------------

    /// Open a document for editing: its snapshot plus any operations logged
    /// after it.
    pub fn open_doc(&self, collection: &str, id: &str) -> StoreResult<RemoteDoc, B> {
        let doc = self
            .get(collection, id)?
            .unwrap_or_else(|| Document::new(collection, id));
        let mut doc = RemoteDoc::from_document(doc);
        self.catch_up(&mut doc)?;
        Ok(doc)
    }

    /// Apply every operation logged since the document's version and return
    /// the resulting events.
    pub fn catch_up(&self, doc: &mut RemoteDoc) -> StoreResult<Vec<DocEvent>, B> {
        let entries = self.range(doc.collection(), doc.id(), doc.version(), None)?;
        if !entries.is_empty() {
            debug!(
                "catching up {}/{} from v{} with {} operations",
                doc.collection(),
                doc.id(),
                doc.version(),
                entries.len()
            );
        }
        let mut events = Vec::new();
        for entry in &entries {
            events.extend(doc.apply_remote(entry)?);
        }
        Ok(events)
    }

    /// Commit the document's pending operations at consecutive versions,
    /// then persist its snapshot. Returns the new version.
    ///
    /// On failure the operations not yet committed stay pending.
    pub fn commit(&mut self, doc: &mut RemoteDoc) -> StoreResult<u64, B> {
        let (collection, id) = (doc.collection().to_string(), doc.id().to_string());
        self.check(&collection, &id)?;
        if !doc.has_pending() {
            return Ok(doc.version());
        }

        let latest = self.latest_version(&collection, &id)?;
        if latest < doc.version() {
            return Err(StoreError::Validation(format!(
                "{collection}/{id} is at v{} but the store only has v{latest}",
                doc.version()
            )));
        }

        while let Some(op) = doc.next_pending() {
            self.append(&collection, &id, doc.version(), op)?;
            doc.acknowledge();
        }
        self.write(&collection, &id, doc.document())?;
        debug!("committed {collection}/{id} at v{}", doc.version());
        Ok(doc.version())
    }

    // --- Queries ----------------------------------------------------------

    /// Whether a query has to be re-run in full on every write.
    pub fn needs_poll_mode(&self, query: &Value) -> StoreResult<bool, B> {
        Ok(CanonicalQuery::parse(query)?.needs_poll_mode())
    }

    /// Run a flat or `$query`-boxed query. Deleted documents are excluded
    /// unless the query constrains `_type`.
    pub fn query(&self, collection: &str, query: &Value) -> StoreResult<QueryResult, B> {
        let query = CanonicalQuery::parse(query)?.normalize();
        self.execute(collection, &query, None)
    }

    /// Like [`query`](Self::query), keeping only `fields` of every body.
    pub fn query_projected(
        &self,
        collection: &str,
        query: &Value,
        fields: &[&str],
    ) -> StoreResult<QueryResult, B> {
        let query = CanonicalQuery::parse(query)?.normalize();
        self.execute(collection, &query, Some(fields))
    }

    /// Run an already canonical query against the primary backend.
    pub fn execute(
        &self,
        collection: &str,
        query: &CanonicalQuery,
        fields: Option<&[&str]>,
    ) -> StoreResult<QueryResult, B> {
        self.execute_on(&self.backend, collection, query, fields)
    }

    /// Run a query in poll mode.
    ///
    /// With a replica configured, waits for the settle delay and reads from
    /// the replica; otherwise reads the primary at once.
    pub async fn poll_query(
        &self,
        collection: &str,
        query: &Value,
        fields: Option<&[&str]>,
    ) -> StoreResult<QueryResult, B> {
        self.check_collection(collection)?;
        let query = CanonicalQuery::parse(query)?.normalize();
        let source = self.settle().await?;
        self.execute_on(source, collection, &query, fields)
    }

    /// Evaluate a query against a single document. Returns the document if
    /// it matches.
    pub async fn query_doc(
        &self,
        collection: &str,
        id: &str,
        query: &Value,
    ) -> StoreResult<Option<Document>, B> {
        self.check(collection, id)?;
        let parsed = CanonicalQuery::parse(query)?;
        let query = CanonicalQuery {
            filter: parsed.filter,
            ..CanonicalQuery::default()
        }
        .for_id(id)
        .normalize();
        let source = self.settle().await?;
        let result = self.execute_on(source, collection, &query, None)?;
        Ok(result.results.into_iter().next())
    }

    /// Wait for the replica to catch up and pick it, or pick the primary.
    async fn settle(&self) -> StoreResult<&B, B> {
        let Some(replica) = &self.poll else {
            return Ok(&self.backend);
        };
        debug!("waiting {:?} before reading the poll replica", self.config.poll_settle_delay);
        tokio::time::sleep(self.config.poll_settle_delay).await;
        self.check_open()?;
        Ok(replica)
    }

    fn execute_on(
        &self,
        source: &B,
        collection: &str,
        query: &CanonicalQuery,
        fields: Option<&[&str]>,
    ) -> StoreResult<QueryResult, B> {
        self.check_collection(collection)?;
        let evaluator = self.evaluator();
        if query.uses_where() && evaluator.is_none() {
            return Err(QueryError::WhereNotAllowed.into());
        }
        let rows = source.scan_rows(collection).map_err(StoreError::Backend)?;
        match query.execute(rows, evaluator)? {
            QueryOutcome::Count(count) => Ok(QueryResult {
                results: Vec::new(),
                extra: Some(Value::from(count)),
            }),
            QueryOutcome::Rows(rows) => {
                let mut results = Vec::with_capacity(rows.len());
                for row in rows {
                    let row = match fields {
                        Some(_) if codec::is_boxed(&row) => {
                            return Err(StoreError::Validation(format!(
                                "cannot project {collection}/{}: snapshot is not a mapping",
                                row.get(codec::ID_FIELD).unwrap_or(&Value::Null)
                            )));
                        }
                        Some(fields) => codec::project(&row, fields),
                        None => row,
                    };
                    results.push(codec::decode(collection, row)?);
                }
                Ok(QueryResult {
                    results,
                    extra: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, Row};
    use docsync::{DocMutator, Path};
    use serde_json::json;

    fn store() -> DocStore<MemoryStore> {
        DocStore::new(MemoryStore::new())
    }

    fn set_op(key: &str, value: Value) -> Operation {
        Operation::ObjectInsert {
            path: Path::parse(key),
            value,
        }
    }

    fn seeded() -> DocStore<MemoryStore> {
        let mut store = store();
        for (id, status, rank) in [("a", "open", 3), ("b", "done", 1), ("c", "open", 2)] {
            let mut doc = RemoteDoc::new("todos", id);
            doc.set(&Path::parse("status"), json!(status)).unwrap();
            doc.set(&Path::parse("rank"), json!(rank)).unwrap();
            store.commit(&mut doc).unwrap();
        }
        store
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result.results.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn reserved_collection_names_fail_fast() {
        let store = store();
        for name in ["todos_ops", "system", ""] {
            assert!(matches!(store.get(name, "x"), Err(StoreError::Validation(_))));
        }
        assert!(matches!(store.get("todos", ""), Err(StoreError::Validation(_))));
        assert_eq!(store.backend().row_count(), 0);

        let mut requests = BTreeMap::new();
        requests.insert("todos".to_string(), BTreeSet::from(["a".to_string()]));
        requests.insert("system".to_string(), BTreeSet::new());
        assert!(matches!(store.bulk_get(&requests), Err(StoreError::Validation(_))));
    }

    #[test]
    fn custom_suffix_is_honoured() {
        let store = DocStore::builder(MemoryStore::new())
            .op_log_suffix("__log")
            .build();
        assert_eq!(store.op_log_name("todos"), "todos__log");
        assert!(store.get("todos_ops", "x").is_ok());
        assert!(store.get("todos__log", "x").is_err());
    }

    #[test]
    fn closed_store_rejects_everything() {
        let mut store = store();
        store.close().unwrap();
        assert!(matches!(store.close(), Err(StoreError::Closed)));
        assert!(matches!(store.get("todos", "a"), Err(StoreError::Closed)));
        assert!(matches!(
            store.append("todos", "a", 0, &set_op("x", json!(1))),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.query("todos", &json!({})), Err(StoreError::Closed)));
    }

    #[test]
    fn append_is_idempotent_and_conflicts_on_different_ops() {
        let mut store = store();
        let op = set_op("x", json!(1));
        store.append("todos", "a", 0, &op).unwrap();
        store.append("todos", "a", 0, &op).unwrap();
        assert_eq!(store.latest_version("todos", "a").unwrap(), 1);

        let err = store.append("todos", "a", 0, &set_op("x", json!(2))).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { version: 0, latest: 1, .. }
        ));
    }

    #[test]
    fn latest_version_falls_back_to_snapshot() {
        let mut store = store();
        assert_eq!(store.latest_version("todos", "a").unwrap(), 0);
        let doc = Document {
            version: 4,
            doc_type: Some(docsync::JSON0.into()),
            snapshot: json!({}),
            ..Document::new("todos", "a")
        };
        store.write("todos", "a", &doc).unwrap();
        assert_eq!(store.latest_version("todos", "a").unwrap(), 4);
    }

    #[test]
    fn write_rejects_mismatched_id() {
        let mut store = store();
        let doc = Document::new("todos", "a");
        assert!(matches!(
            store.write("todos", "b", &doc),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn commit_then_reopen() {
        let mut store = store();
        let mut doc = RemoteDoc::new("todos", "t1");
        doc.set(&Path::parse("title"), json!("x")).unwrap();
        doc.increment(&Path::parse("views"), 2.into()).unwrap();
        assert_eq!(store.commit(&mut doc).unwrap(), 2);
        assert!(!doc.has_pending());

        let reopened = store.open_doc("todos", "t1").unwrap();
        assert_eq!(reopened.document(), doc.document());
        assert_eq!(store.range("todos", "t1", 0, None).unwrap().len(), 2);
    }

    #[test]
    fn losing_writer_keeps_pending_ops() {
        let mut store = store();
        let mut first = RemoteDoc::new("todos", "t1");
        let mut second = RemoteDoc::new("todos", "t1");
        first.set(&Path::parse("by"), json!("first")).unwrap();
        second.set(&Path::parse("by"), json!("second")).unwrap();

        store.commit(&mut first).unwrap();
        let err = store.commit(&mut second).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { latest: 1, .. }));
        assert_eq!(second.pending().len(), 1);
        assert_eq!(second.version(), 0);
    }

    #[test]
    fn commit_refuses_a_doc_ahead_of_the_store() {
        let mut store = store();
        let mut doc = RemoteDoc::from_document(Document {
            version: 5,
            doc_type: Some(docsync::JSON0.into()),
            snapshot: json!({}),
            ..Document::new("todos", "t1")
        });
        doc.set(&Path::parse("a"), json!(1)).unwrap();
        assert!(matches!(store.commit(&mut doc), Err(StoreError::Validation(_))));
    }

    #[test]
    fn catch_up_applies_and_reports() {
        let mut store = store();
        let mut writer = RemoteDoc::new("todos", "t1");
        writer.set(&Path::parse("title"), json!("x")).unwrap();
        store.commit(&mut writer).unwrap();

        let mut reader = RemoteDoc::new("todos", "t1");
        writer.set(&Path::parse("title"), json!("y")).unwrap();
        store.commit(&mut writer).unwrap();

        let events = store.catch_up(&mut reader).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(reader.snapshot(), &json!({"title": "y"}));
        assert_eq!(reader.version(), 2);
        assert!(store.catch_up(&mut reader).unwrap().is_empty());
    }

    #[test]
    fn compaction_keeps_versions_resumable() {
        let mut store = store();
        let mut doc = RemoteDoc::new("todos", "t1");
        for n in 0..4 {
            doc.set(&Path::parse("n"), json!(n)).unwrap();
        }
        store.commit(&mut doc).unwrap();
        assert_eq!(store.compact("todos", "t1").unwrap(), 4);
        assert_eq!(store.latest_version("todos", "t1").unwrap(), 4);
        assert_eq!(store.compact("todos", "missing").unwrap(), 0);

        let mut reopened = store.open_doc("todos", "t1").unwrap();
        reopened.set(&Path::parse("n"), json!(9)).unwrap();
        assert_eq!(store.commit(&mut reopened).unwrap(), 5);
    }

    #[test]
    fn projections() {
        let mut store = store();
        let mut doc = RemoteDoc::new("todos", "t1");
        doc.set(&Path::parse("title"), json!("x")).unwrap();
        doc.set(&Path::parse("secret"), json!(true)).unwrap();
        store.commit(&mut doc).unwrap();
        let projected = store.projected_get("todos", "t1", &["title"]).unwrap().unwrap();
        assert_eq!(projected.snapshot, json!({"title": "x"}));
        assert_eq!(projected.version, 2);

        let mut list = RemoteDoc::new("lists", "l1");
        list.set(&Path::root(), json!([1, 2])).unwrap();
        store.commit(&mut list).unwrap();
        assert!(matches!(
            store.projected_get("lists", "l1", &["x"]),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.query_projected("lists", &json!({}), &["x"]),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn queries_filter_sort_and_count() {
        let store = seeded();
        let open = store.query("todos", &json!({"status": "open"})).unwrap();
        assert_eq!(ids(&open), vec!["a", "c"]);

        let ranked = store
            .query("todos", &json!({"$orderby": {"rank": 1}, "$limit": 2}))
            .unwrap();
        assert_eq!(ids(&ranked), vec!["b", "c"]);

        let counted = store
            .query("todos", &json!({"$query": {"status": "open"}, "$count": true}))
            .unwrap();
        assert!(counted.results.is_empty());
        assert_eq!(counted.extra, Some(json!(2)));
    }

    #[test]
    fn tombstones_are_hidden_from_queries() {
        let mut store = seeded();
        let mut doc = store.open_doc("todos", "a").unwrap();
        doc.del(&Path::root()).unwrap();
        store.commit(&mut doc).unwrap();

        let all = store.query("todos", &json!({})).unwrap();
        assert_eq!(ids(&all), vec!["b", "c"]);
        let tombstones = store.query("todos", &json!({"_type": {"$eq": null}})).unwrap();
        assert_eq!(ids(&tombstones), vec!["a"]);
        assert_eq!(tombstones.results[0].snapshot, Value::Null);
        let typed = store.query("todos", &json!({"_type": "json0"})).unwrap();
        assert_eq!(typed.results.len(), 2);
    }

    #[test]
    fn where_is_gated() {
        let store = seeded();
        let query = json!({"$where": "rank > 1"});
        assert!(matches!(
            store.query("todos", &query),
            Err(StoreError::Query(QueryError::WhereNotAllowed))
        ));

        let rank_above_one = |_: &Value, row: &Row| -> Result<bool, String> {
            Ok(row.get("rank").and_then(Value::as_i64).unwrap_or(0) > 1)
        };
        let store_without_flag = DocStore::builder(seeded().backend().clone())
            .where_evaluator(rank_above_one)
            .build();
        assert!(store_without_flag.query("todos", &query).is_err());

        let allowed = DocStore::builder(seeded().backend().clone())
            .allow_where_query(true)
            .where_evaluator(rank_above_one)
            .build();
        assert_eq!(ids(&allowed.query("todos", &query).unwrap()), vec!["a", "c"]);
    }

    struct NoIndexes(MemoryStore);

    impl SnapshotBackend for NoIndexes {
        type Error = String;

        fn put_row(&mut self, collection: &str, id: &str, row: &Row) -> Result<(), String> {
            self.0.put_row(collection, id, row).map_err(|e| e.to_string())
        }

        fn get_row(&self, collection: &str, id: &str) -> Result<Option<Row>, String> {
            self.0.get_row(collection, id).map_err(|e| e.to_string())
        }

        fn scan_rows(&self, collection: &str) -> Result<Vec<Row>, String> {
            self.0.scan_rows(collection).map_err(|e| e.to_string())
        }
    }

    impl OpLogBackend for NoIndexes {
        fn ensure_op_index(&self, _log: &str) -> Result<(), String> {
            Err("index creation not permitted".into())
        }

        fn put_op(
            &mut self,
            log: &str,
            id: &str,
            version: u64,
            op: &Operation,
        ) -> Result<AppendOutcome, String> {
            self.0.put_op(log, id, version, op).map_err(|e| e.to_string())
        }

        fn max_op_version(&self, log: &str, id: &str) -> Result<Option<u64>, String> {
            self.0.max_op_version(log, id).map_err(|e| e.to_string())
        }

        fn ops_in_range(
            &self,
            log: &str,
            id: &str,
            start: u64,
            end: Option<u64>,
        ) -> Result<Vec<(u64, Operation)>, String> {
            self.0.ops_in_range(log, id, start, end).map_err(|e| e.to_string())
        }

        fn truncate_ops_before(&mut self, log: &str, id: &str, version: u64) -> Result<usize, String> {
            self.0.truncate_ops_before(log, id, version).map_err(|e| e.to_string())
        }
    }

    #[test]
    fn index_failures_are_swallowed() {
        let mut store = DocStore::new(NoIndexes(MemoryStore::new()));
        let mut doc = RemoteDoc::new("todos", "t1");
        doc.set(&Path::parse("a"), json!(1)).unwrap();
        assert_eq!(store.commit(&mut doc).unwrap(), 1);
        assert_eq!(store.range("todos", "t1", 0, None).unwrap().len(), 1);
        assert_eq!(store.op_indexes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_query_reads_replica_after_settling() {
        let primary = seeded().backend().clone();
        let replica = primary.clone();
        let mut store = DocStore::builder(primary).poll_replica(replica).build();

        let mut doc = RemoteDoc::new("todos", "d");
        doc.set(&Path::parse("status"), json!("open")).unwrap();
        store.commit(&mut doc).unwrap();

        let started = tokio::time::Instant::now();
        let result = store
            .poll_query("todos", &json!({"status": "open", "$limit": 10}), None)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        // The replica has not seen "d".
        assert_eq!(ids(&result), vec!["a", "c"]);
        assert_eq!(store.query("todos", &json!({"status": "open"})).unwrap().results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_query_fails_if_closed_while_settling() {
        let primary = seeded().backend().clone();
        let store = DocStore::builder(primary.clone()).poll_replica(primary).build();
        let filter = json!({"$orderby": {"rank": 1}});
        let (result, closed) = tokio::join!(
            store.poll_query("todos", &filter, None),
            async { store.close() }
        );
        closed.unwrap();
        assert!(matches!(result, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn query_doc_checks_one_document() {
        let store = seeded();
        let hit = store.query_doc("todos", "a", &json!({"status": "open"})).await.unwrap();
        assert_eq!(hit.map(|d| d.id), Some("a".to_string()));
        let miss = store.query_doc("todos", "b", &json!({"status": "open"})).await.unwrap();
        assert!(miss.is_none());
        let pinned = store
            .query_doc("todos", "a", &json!({"_id": {"$in": ["b", "c"]}}))
            .await
            .unwrap();
        assert!(pinned.is_none());
    }
}
