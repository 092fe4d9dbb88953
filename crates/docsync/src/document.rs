use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{apply, DocError, Operation};

/// Type identifier of documents edited with this crate's operations.
pub const JSON0: &str = "json0";

/// A versioned document.
///
/// `doc_type == None` marks a document that was never created or has been
/// deleted. A deleted document keeps its version so that recreating it
/// continues the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Collection the document belongs to.
    pub collection: String,
    /// Document id, unique within the collection.
    pub id: String,
    /// Number of operations committed so far.
    pub version: u64,
    /// Type identifier, `None` when untyped or deleted.
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    /// Current body.
    pub snapshot: Value,
    /// Free-form metadata carried alongside the body.
    #[serde(default)]
    pub metadata: Value,
}

impl Document {
    /// A fresh, untyped document at version 0.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            version: 0,
            doc_type: None,
            snapshot: Value::Null,
            metadata: Value::Null,
        }
    }

    /// Returns `true` if the document exists (has a type).
    pub fn is_typed(&self) -> bool {
        self.doc_type.is_some()
    }

    /// Apply one committed operation and advance the version.
    ///
    /// The first operation on an untyped document creates it. An
    /// `ObjectDelete` at the root deletes it.
    pub fn apply(&mut self, op: &Operation) -> Result<(), DocError> {
        apply(&mut self.snapshot, op)?;
        self.doc_type = type_after(op);
        self.version += 1;
        Ok(())
    }

    /// Rebuild a document by applying `ops` in order to a fresh one.
    pub fn replay<'a>(
        collection: impl Into<String>,
        id: impl Into<String>,
        ops: impl IntoIterator<Item = &'a Operation>,
    ) -> Result<Self, DocError> {
        let mut doc = Self::new(collection, id);
        for op in ops {
            doc.apply(op)?;
        }
        Ok(doc)
    }
}

/// The type a document has after `op` has been applied to it.
pub(crate) fn type_after(op: &Operation) -> Option<String> {
    if op.is_document_delete() {
        None
    } else {
        Some(JSON0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Path;
    use serde_json::json;

    #[test]
    fn first_op_creates_and_delete_tombstones() {
        let mut doc = Document::new("todos", "t1");
        assert!(!doc.is_typed());
        doc.apply(&Operation::ObjectInsert {
            path: Path::parse("title"),
            value: json!("write docs"),
        })
        .unwrap();
        assert_eq!(doc.doc_type.as_deref(), Some(JSON0));
        assert_eq!(doc.version, 1);

        doc.apply(&Operation::ObjectDelete {
            path: Path::root(),
            before: doc.snapshot.clone(),
        })
        .unwrap();
        assert!(!doc.is_typed());
        assert!(doc.snapshot.is_null());
        assert_eq!(doc.version, 2);
    }

    #[test]
    fn failed_apply_keeps_version() {
        let mut doc = Document::new("todos", "t1");
        let err = doc.apply(&Operation::Increment {
            path: Path::parse("count"),
            delta: 1.into(),
        });
        assert!(err.is_err());
        assert_eq!(doc.version, 0);
        assert!(!doc.is_typed());
    }

    #[test]
    fn serde_uses_type_field() {
        let doc = Document::new("c", "d");
        let wire = serde_json::to_value(&doc).unwrap();
        assert_eq!(wire["type"], Value::Null);
        assert_eq!(wire["version"], json!(0));
    }
}
