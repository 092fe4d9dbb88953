use serde_json::Value;
use thiserror::Error;

use crate::Path;

/// Errors raised while translating, applying or decoding operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocError {
    /// The request is malformed: an index out of range, a missing target,
    /// or a value that cannot be represented.
    #[error("invalid input: {0}")]
    Validation(String),
    /// An array, string or numeric operation hit a value of the wrong kind.
    #[error("{op} expects {expected} at `{path}`, found {found}")]
    TypeConflict {
        /// Name of the mutator or operation.
        op: &'static str,
        /// Where the conflicting value lives.
        path: Path,
        /// The kind the operation needs.
        expected: &'static str,
        /// The kind actually present.
        found: &'static str,
    },
    /// A remote operation arrived for a version other than the current one.
    #[error("operation for version {got} received while document is at version {expected}")]
    OutOfOrder {
        /// The document's current version.
        expected: u64,
        /// The version carried by the operation.
        got: u64,
    },
    /// A wire record does not match any known operation shape.
    #[error("cannot decode operation: {0}")]
    Decode(String),
}

/// Short name of a value's kind, used in error messages.
pub(crate) fn kind_of(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Number(_)) => "a number",
        Some(Value::String(_)) => "a string",
        Some(Value::Array(_)) => "an array",
        Some(Value::Object(_)) => "an object",
    }
}
