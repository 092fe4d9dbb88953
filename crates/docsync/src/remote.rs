use std::collections::VecDeque;

use serde_json::Value;

use crate::document::type_after;
use crate::translate::sealed::Body;
use crate::{derive_event, DocError, DocEvent, Document, OpLogEntry, Operation, Path};

/// A replicated document.
///
/// Local mutations (through [`DocMutator`](crate::DocMutator)) apply to the
/// snapshot at once and queue their operations as pending until a store
/// acknowledges them. Remote operations arrive through
/// [`apply_remote`](Self::apply_remote) in strict version order.
///
/// The version only moves when an operation is committed: acknowledged
/// local ones or applied remote ones.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDoc {
    doc: Document,
    pending: VecDeque<Operation>,
}

impl RemoteDoc {
    /// A document that does not exist yet.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::from_document(Document::new(collection, id))
    }

    /// Wrap a document loaded from a store.
    pub fn from_document(doc: Document) -> Self {
        Self {
            doc,
            pending: VecDeque::new(),
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.doc.collection
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.doc.id
    }

    /// Committed version.
    pub fn version(&self) -> u64 {
        self.doc.version
    }

    /// The document including unacknowledged local changes.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The current body.
    pub fn snapshot(&self) -> &Value {
        &self.doc.snapshot
    }

    /// Operations waiting to be committed, oldest first.
    pub fn pending(&self) -> impl ExactSizeIterator<Item = &Operation> {
        self.pending.iter()
    }

    /// Returns `true` while local operations await acknowledgement.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The oldest pending operation.
    pub fn next_pending(&self) -> Option<&Operation> {
        self.pending.front()
    }

    /// Mark the oldest pending operation as committed at the current version
    /// and advance the version.
    pub fn acknowledge(&mut self) -> Option<Operation> {
        let op = self.pending.pop_front()?;
        self.doc.version += 1;
        Some(op)
    }

    /// Apply an operation committed elsewhere and derive its event.
    ///
    /// `entry.version` must equal [`version`](Self::version): anything else
    /// means operations were missed (or already seen) and the caller must
    /// fetch the gap first.
    pub fn apply_remote(&mut self, entry: &OpLogEntry) -> Result<Option<DocEvent>, DocError> {
        if entry.collection != self.doc.collection || entry.id != self.doc.id {
            return Err(DocError::Validation(format!(
                "operation for {}/{} applied to {}/{}",
                entry.collection, entry.id, self.doc.collection, self.doc.id
            )));
        }
        if entry.version != self.doc.version {
            return Err(DocError::OutOfOrder {
                expected: self.doc.version,
                got: entry.version,
            });
        }
        if !self.pending.is_empty() {
            return Err(DocError::Validation(format!(
                "{} local operations are still pending on {}/{}",
                self.pending.len(),
                self.doc.collection,
                self.doc.id
            )));
        }

        let was_typed = self.doc.is_typed();
        self.doc.apply(&entry.op)?;
        if !was_typed && self.doc.is_typed() {
            return Ok(Some(DocEvent::Change {
                path: Path::root(),
                value: Some(self.doc.snapshot.clone()),
                previous: None,
                text: None,
            }));
        }
        derive_event(&self.doc.snapshot, &entry.op, false)
    }
}

impl Body for RemoteDoc {
    fn body(&self) -> &Value {
        &self.doc.snapshot
    }

    fn body_mut(&mut self) -> &mut Value {
        &mut self.doc.snapshot
    }

    fn is_created(&self) -> bool {
        self.doc.is_typed()
    }

    fn record(&mut self, ops: Vec<Operation>) {
        for op in ops {
            self.doc.doc_type = type_after(&op);
            self.pending.push_back(op);
        }
    }
}
