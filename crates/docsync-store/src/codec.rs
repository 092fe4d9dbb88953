//! Row encoding for documents.
//!
//! A mapping snapshot has its fields promoted to the top level of the row,
//! next to the reserved envelope fields:
//!
//! ```text
//! { "_id": "t1", "_type": "json0", "_v": 3, "_m": {...}, "title": "x", "done": false }
//! ```
//!
//! Any other snapshot (scalars, sequences, a tombstone's `null`) is boxed
//! under `_data`. So is a mapping that itself uses a reserved field name,
//! which keeps decoding lossless.

use docsync::{Document, Path};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::traits::Row;

/// Document id.
pub const ID_FIELD: &str = "_id";
/// Type identifier, `null` for tombstones.
pub const TYPE_FIELD: &str = "_type";
/// Version.
pub const VERSION_FIELD: &str = "_v";
/// Metadata.
pub const META_FIELD: &str = "_m";
/// Boxed non-mapping snapshot.
pub const DATA_FIELD: &str = "_data";

const RESERVED: [&str; 5] = [ID_FIELD, TYPE_FIELD, VERSION_FIELD, META_FIELD, DATA_FIELD];

/// A row that cannot be decoded into a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed row: {0}")]
pub struct CodecError(String);

/// Encode a document as a row.
pub fn encode(doc: &Document) -> Row {
    let mut row = Row::new();
    row.insert(ID_FIELD.into(), Value::String(doc.id.clone()));
    row.insert(
        TYPE_FIELD.into(),
        doc.doc_type.clone().map_or(Value::Null, Value::String),
    );
    row.insert(VERSION_FIELD.into(), Value::from(doc.version));
    if !doc.metadata.is_null() {
        row.insert(META_FIELD.into(), doc.metadata.clone());
    }
    match &doc.snapshot {
        Value::Object(fields) if !fields.keys().any(|k| is_reserved(k)) => {
            row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        other => {
            row.insert(DATA_FIELD.into(), other.clone());
        }
    }
    row
}

/// Decode a row produced by [`encode`].
pub fn decode(collection: &str, mut row: Row) -> Result<Document, CodecError> {
    let id = match row.shift_remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        other => return Err(CodecError(format!("`{ID_FIELD}` must be a string, got {other:?}"))),
    };
    let doc_type = match row.shift_remove(TYPE_FIELD) {
        Some(Value::String(t)) => Some(t),
        None | Some(Value::Null) => None,
        Some(other) => return Err(CodecError(format!("`{TYPE_FIELD}` of {id} is {other}"))),
    };
    let version = match row.shift_remove(VERSION_FIELD) {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| CodecError(format!("`{VERSION_FIELD}` of {id} is {v}")))?,
        None => 0,
    };
    let metadata = row.shift_remove(META_FIELD).unwrap_or(Value::Null);
    let snapshot = match row.shift_remove(DATA_FIELD) {
        Some(data) => data,
        None => Value::Object(row),
    };
    Ok(Document {
        collection: collection.to_string(),
        id,
        version,
        doc_type,
        snapshot,
        metadata,
    })
}

/// Returns `true` if the row holds a boxed (non-mapping) snapshot.
pub fn is_boxed(row: &Row) -> bool {
    row.contains_key(DATA_FIELD)
}

/// Keep only the envelope fields and the requested (possibly dotted)
/// fields of a promoted row.
pub fn project(row: &Row, fields: &[&str]) -> Row {
    let mut out = Row::new();
    for key in [ID_FIELD, TYPE_FIELD, VERSION_FIELD, META_FIELD] {
        if let Some(value) = row.get(key) {
            out.insert(key.into(), value.clone());
        }
    }
    for field in fields {
        let path = Path::parse(field);
        let Some((first, rest)) = path.segments().split_first() else {
            continue;
        };
        let Some(value) = row.get(&first.to_key()) else {
            continue;
        };
        if rest.is_empty() {
            out.insert(first.to_key(), value.clone());
        } else if let Some(picked) = pick(value, rest) {
            merge(out.entry(first.to_key()).or_insert(Value::Null), picked);
        }
    }
    out
}

fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// The sub-tree of `value` containing only `path`.
fn pick(value: &Value, path: &[docsync::Segment]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(value.clone());
    };
    let key = first.to_key();
    let child = value.as_object()?.get(&key)?;
    let mut out = Map::new();
    out.insert(key, pick(child, rest)?);
    Some(Value::Object(out))
}

fn merge(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                merge(existing.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}
