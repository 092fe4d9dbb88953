//! The closed set of document operations and their wire encoding.
//!
//! Every operation is a single component addressed by a [`Path`]. On the wire
//! it is a record with a `p` field plus the fields that identify its kind:
//!
//! | Variant          | Wire fields   |
//! |------------------|---------------|
//! | `ObjectInsert`   | `oi`          |
//! | `ObjectReplace`  | `oi` + `od`   |
//! | `ObjectDelete`   | `od`          |
//! | `ListInsert`     | `li`          |
//! | `ListReplace`    | `li` + `ld`   |
//! | `ListRemove`     | `ld`          |
//! | `ListMove`       | `lm`          |
//! | `StringInsert`   | `si`          |
//! | `StringRemove`   | `sd`          |
//! | `Increment`      | `na`          |
//!
//! List and string operations carry their position as the final path
//! segment.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::{DocError, Path, Segment};

/// An atomic, path-addressed edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert `value` under a mapping key (or the whole document for the
    /// root path).
    ObjectInsert {
        /// Target key.
        path: Path,
        /// Inserted value.
        value: Value,
    },
    /// Replace the value under a mapping key.
    ObjectReplace {
        /// Target key.
        path: Path,
        /// Value being replaced.
        before: Value,
        /// New value.
        after: Value,
    },
    /// Delete the value under a mapping key. At the root path this
    /// tombstones the document.
    ObjectDelete {
        /// Target key.
        path: Path,
        /// Value being deleted.
        before: Value,
    },
    /// Insert `value` into a sequence at the index in the final segment.
    ListInsert {
        /// Sequence path plus index.
        path: Path,
        /// Inserted element.
        value: Value,
    },
    /// Replace the element at the index in the final segment.
    ListReplace {
        /// Sequence path plus index.
        path: Path,
        /// Element being replaced.
        before: Value,
        /// New element.
        after: Value,
    },
    /// Remove the element at the index in the final segment.
    ListRemove {
        /// Sequence path plus index.
        path: Path,
        /// Element being removed.
        before: Value,
    },
    /// Move one element from the index in the final segment to `to`.
    ListMove {
        /// Sequence path plus source index.
        path: Path,
        /// Destination index, counted after the element is taken out.
        to: usize,
    },
    /// Insert `text` at the character offset in the final segment.
    StringInsert {
        /// String path plus offset.
        path: Path,
        /// Inserted text.
        text: String,
    },
    /// Remove `text` at the character offset in the final segment.
    StringRemove {
        /// String path plus offset.
        path: Path,
        /// Removed text.
        text: String,
    },
    /// Add `delta` to a number.
    Increment {
        /// Target number.
        path: Path,
        /// Amount added.
        delta: Number,
    },
}

impl Operation {
    /// The path carried by this operation.
    pub fn path(&self) -> &Path {
        match self {
            Self::ObjectInsert { path, .. }
            | Self::ObjectReplace { path, .. }
            | Self::ObjectDelete { path, .. }
            | Self::ListInsert { path, .. }
            | Self::ListReplace { path, .. }
            | Self::ListRemove { path, .. }
            | Self::ListMove { path, .. }
            | Self::StringInsert { path, .. }
            | Self::StringRemove { path, .. }
            | Self::Increment { path, .. } => path,
        }
    }

    /// Variant name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectInsert { .. } => "ObjectInsert",
            Self::ObjectReplace { .. } => "ObjectReplace",
            Self::ObjectDelete { .. } => "ObjectDelete",
            Self::ListInsert { .. } => "ListInsert",
            Self::ListReplace { .. } => "ListReplace",
            Self::ListRemove { .. } => "ListRemove",
            Self::ListMove { .. } => "ListMove",
            Self::StringInsert { .. } => "StringInsert",
            Self::StringRemove { .. } => "StringRemove",
            Self::Increment { .. } => "Increment",
        }
    }

    /// Returns `true` if this operation deletes the whole document.
    pub fn is_document_delete(&self) -> bool {
        matches!(self, Self::ObjectDelete { path, .. } if path.is_empty())
    }

    /// Encode as a wire record.
    pub fn to_wire(&self) -> Value {
        let mut record = Map::new();
        record.insert("p".into(), self.path().to_value());
        match self {
            Self::ObjectInsert { value, .. } => {
                record.insert("oi".into(), value.clone());
            }
            Self::ObjectReplace { before, after, .. } => {
                record.insert("od".into(), before.clone());
                record.insert("oi".into(), after.clone());
            }
            Self::ObjectDelete { before, .. } => {
                record.insert("od".into(), before.clone());
            }
            Self::ListInsert { value, .. } => {
                record.insert("li".into(), value.clone());
            }
            Self::ListReplace { before, after, .. } => {
                record.insert("ld".into(), before.clone());
                record.insert("li".into(), after.clone());
            }
            Self::ListRemove { before, .. } => {
                record.insert("ld".into(), before.clone());
            }
            Self::ListMove { to, .. } => {
                record.insert("lm".into(), Value::from(*to as u64));
            }
            Self::StringInsert { text, .. } => {
                record.insert("si".into(), Value::String(text.clone()));
            }
            Self::StringRemove { text, .. } => {
                record.insert("sd".into(), Value::String(text.clone()));
            }
            Self::Increment { delta, .. } => {
                record.insert("na".into(), Value::Number(delta.clone()));
            }
        }
        Value::Object(record)
    }

    /// Decode a wire record. Fields other than the operation fields are
    /// ignored; any combination of operation fields that does not name
    /// exactly one variant is rejected.
    pub fn from_wire(wire: &Value) -> Result<Self, DocError> {
        let record = wire
            .as_object()
            .ok_or_else(|| DocError::Decode(format!("operation must be an object, got {wire}")))?;
        let path = record
            .get("p")
            .ok_or_else(|| DocError::Decode(format!("operation has no path: {wire}")))
            .and_then(Path::from_value)?;
        let field = |name: &str| record.get(name);

        let op = match (
            field("oi"),
            field("od"),
            field("li"),
            field("ld"),
            field("lm"),
            field("si"),
            field("sd"),
            field("na"),
        ) {
            (Some(value), None, None, None, None, None, None, None) => Self::ObjectInsert {
                path,
                value: value.clone(),
            },
            (Some(after), Some(before), None, None, None, None, None, None) => {
                Self::ObjectReplace {
                    path,
                    before: before.clone(),
                    after: after.clone(),
                }
            }
            (None, Some(before), None, None, None, None, None, None) => Self::ObjectDelete {
                path,
                before: before.clone(),
            },
            (None, None, Some(value), None, None, None, None, None) => Self::ListInsert {
                path: positioned(path, wire)?,
                value: value.clone(),
            },
            (None, None, Some(after), Some(before), None, None, None, None) => Self::ListReplace {
                path: positioned(path, wire)?,
                before: before.clone(),
                after: after.clone(),
            },
            (None, None, None, Some(before), None, None, None, None) => Self::ListRemove {
                path: positioned(path, wire)?,
                before: before.clone(),
            },
            (None, None, None, None, Some(to), None, None, None) => {
                let to = to
                    .as_u64()
                    .and_then(|to| usize::try_from(to).ok())
                    .ok_or_else(|| DocError::Decode(format!("invalid move target in {wire}")))?;
                Self::ListMove {
                    path: positioned(path, wire)?,
                    to,
                }
            }
            (None, None, None, None, None, Some(Value::String(text)), None, None) => {
                Self::StringInsert {
                    path: positioned(path, wire)?,
                    text: text.clone(),
                }
            }
            (None, None, None, None, None, None, Some(Value::String(text)), None) => {
                Self::StringRemove {
                    path: positioned(path, wire)?,
                    text: text.clone(),
                }
            }
            (None, None, None, None, None, None, None, Some(Value::Number(delta))) => {
                Self::Increment {
                    path,
                    delta: delta.clone(),
                }
            }
            _ => {
                return Err(DocError::Decode(format!(
                    "unrecognised operation shape: {wire}"
                )))
            }
        };
        Ok(op)
    }
}

/// List and string operations must end in an index segment.
fn positioned(path: Path, wire: &Value) -> Result<Path, DocError> {
    match path.last() {
        Some(Segment::Index(_)) => Ok(path),
        _ => Err(DocError::Decode(format!(
            "operation needs an index as its final path segment: {wire}"
        ))),
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Value::deserialize(deserializer)?;
        Self::from_wire(&wire).map_err(serde::de::Error::custom)
    }
}

/// A committed operation, uniquely keyed by `(collection, id, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpLogEntry {
    /// Collection of the document.
    pub collection: String,
    /// Document id.
    pub id: String,
    /// Version the operation was committed at.
    #[serde(rename = "v")]
    pub version: u64,
    /// The operation.
    pub op: Operation,
}
