//! Change notifications derived from applied operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{byte_offset, lookup, sub_numbers};
use crate::{DocError, Operation, Path};

/// A text splice carried by string changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextDelta {
    /// `text` was inserted at character `index`.
    Insert {
        /// Character offset.
        index: usize,
        /// Inserted text.
        text: String,
    },
    /// `text` was removed at character `index`.
    Remove {
        /// Character offset.
        index: usize,
        /// Removed text.
        text: String,
    },
}

/// A change observed on a document after a remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocEvent {
    /// The value at `path` changed. `None` means absent.
    Change {
        /// Changed location.
        path: Path,
        /// New value.
        value: Option<Value>,
        /// Value before the change.
        previous: Option<Value>,
        /// Set when the change was a text splice.
        text: Option<TextDelta>,
    },
    /// Elements were inserted into the array at `path`.
    Insert {
        /// The array.
        path: Path,
        /// Position of the first inserted element.
        index: usize,
        /// Inserted elements.
        values: Vec<Value>,
    },
    /// Elements were removed from the array at `path`.
    Remove {
        /// The array.
        path: Path,
        /// Position of the first removed element.
        index: usize,
        /// Removed elements.
        values: Vec<Value>,
    },
    /// `count` elements of the array at `path` moved from `from` to `to`.
    Move {
        /// The array.
        path: Path,
        /// Source index.
        from: usize,
        /// Destination index.
        to: usize,
        /// Number of elements moved.
        count: usize,
    },
}

impl DocEvent {
    /// The location the event is reported at.
    pub fn path(&self) -> &Path {
        match self {
            Self::Change { path, .. }
            | Self::Insert { path, .. }
            | Self::Remove { path, .. }
            | Self::Move { path, .. } => path,
        }
    }
}

/// Derive the event for `op`, which has already been applied and produced
/// `snapshot`. Local operations produce no event: the mutator that made
/// them reports its own result.
pub fn derive_event(
    snapshot: &Value,
    op: &Operation,
    is_local: bool,
) -> Result<Option<DocEvent>, DocError> {
    if is_local {
        return Ok(None);
    }
    let path = op.path();
    let (parent, index) = split(path);

    let event = match op {
        Operation::ObjectInsert { value, .. } => DocEvent::Change {
            path: path.clone(),
            value: Some(value.clone()),
            previous: None,
            text: None,
        },
        Operation::ObjectReplace { before, after, .. }
        | Operation::ListReplace { before, after, .. } => DocEvent::Change {
            path: path.clone(),
            value: Some(after.clone()),
            previous: Some(before.clone()),
            text: None,
        },
        Operation::ObjectDelete { before, .. } => DocEvent::Change {
            path: path.clone(),
            value: None,
            previous: Some(before.clone()),
            text: None,
        },
        Operation::ListInsert { value, .. } => DocEvent::Insert {
            path: parent,
            index: index.unwrap_or_default(),
            values: vec![value.clone()],
        },
        Operation::ListRemove { before, .. } => DocEvent::Remove {
            path: parent,
            index: index.unwrap_or_default(),
            values: vec![before.clone()],
        },
        Operation::ListMove { to, .. } => DocEvent::Move {
            path: parent,
            from: index.unwrap_or_default(),
            to: *to,
            count: 1,
        },
        Operation::StringInsert { text, .. } => {
            let index = index.unwrap_or_default();
            let current = current_string(snapshot, &parent, op)?;
            let at = byte_offset(current, index);
            let end = at + text.len();
            let previous = format!("{}{}", &current[..at], current.get(end..).unwrap_or_default());
            DocEvent::Change {
                value: Some(Value::String(current.to_string())),
                previous: Some(Value::String(previous)),
                text: Some(TextDelta::Insert {
                    index,
                    text: text.clone(),
                }),
                path: parent,
            }
        }
        Operation::StringRemove { text, .. } => {
            let index = index.unwrap_or_default();
            let current = current_string(snapshot, &parent, op)?;
            let mut previous = current.to_string();
            previous.insert_str(byte_offset(current, index), text);
            DocEvent::Change {
                value: Some(Value::String(current.to_string())),
                previous: Some(Value::String(previous)),
                text: Some(TextDelta::Remove {
                    index,
                    text: text.clone(),
                }),
                path: parent,
            }
        }
        Operation::Increment { delta, .. } => {
            let value = match lookup(snapshot, path.segments()) {
                Some(Value::Number(n)) => n.clone(),
                _ => return Err(missing(op, "a number")),
            };
            let previous = sub_numbers(&value, delta)?;
            DocEvent::Change {
                path: path.clone(),
                value: Some(Value::Number(value)),
                previous: Some(Value::Number(previous)),
                text: None,
            }
        }
    };
    Ok(Some(event))
}

/// Split a positioned path into the container path and the final index.
fn split(path: &Path) -> (Path, Option<usize>) {
    let index = path.last().and_then(|segment| segment.as_index());
    (path.parent().unwrap_or_default(), index)
}

fn current_string<'a>(snapshot: &'a Value, path: &Path, op: &Operation) -> Result<&'a str, DocError> {
    match lookup(snapshot, path.segments()) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(missing(op, "a string")),
    }
}

fn missing(op: &Operation, expected: &str) -> DocError {
    DocError::Validation(format!(
        "{} at `{}` was applied but {expected} is not there",
        op.name(),
        op.path()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply;
    use serde_json::json;

    fn applied(mut body: Value, wire: Value) -> (Value, Operation) {
        let op = Operation::from_wire(&wire).unwrap();
        apply(&mut body, &op).unwrap();
        (body, op)
    }

    #[test]
    fn local_ops_raise_nothing() {
        let (body, op) = applied(json!({}), json!({"p": ["a"], "oi": 1}));
        assert_eq!(derive_event(&body, &op, true).unwrap(), None);
    }

    #[test]
    fn object_replace_is_a_change() {
        let (body, op) = applied(json!({"a": 1}), json!({"p": ["a"], "od": 1, "oi": 2}));
        assert_eq!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Change {
                path: Path::parse("a"),
                value: Some(json!(2)),
                previous: Some(json!(1)),
                text: None,
            })
        );
    }

    #[test]
    fn list_ops_report_at_parent() {
        let (body, op) = applied(json!({"l": [1]}), json!({"p": ["l", 1], "li": 2}));
        assert_eq!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Insert {
                path: Path::parse("l"),
                index: 1,
                values: vec![json!(2)],
            })
        );
        let (body, op) = applied(body, json!({"p": ["l", 0], "lm": 1}));
        assert_eq!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Move {
                path: Path::parse("l"),
                from: 0,
                to: 1,
                count: 1,
            })
        );
        let (body, op) = applied(body, json!({"p": ["l", 0], "ld": 2}));
        assert!(matches!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Remove { index: 0, .. })
        ));
    }

    #[test]
    fn list_replace_reports_at_element() {
        let (body, op) = applied(json!({"l": [1]}), json!({"p": ["l", 0], "ld": 1, "li": 5}));
        let event = derive_event(&body, &op, false).unwrap().unwrap();
        assert_eq!(event.path(), &Path::parse("l.0"));
    }

    #[test]
    fn text_changes_reconstruct_previous() {
        let (body, op) = applied(json!({"s": "hllo"}), json!({"p": ["s", 1], "si": "e"}));
        assert_eq!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Change {
                path: Path::parse("s"),
                value: Some(json!("hello")),
                previous: Some(json!("hllo")),
                text: Some(TextDelta::Insert {
                    index: 1,
                    text: "e".into()
                }),
            })
        );
        let (body, op) = applied(body, json!({"p": ["s", 0], "sd": "he"}));
        let Some(DocEvent::Change {
            value, previous, ..
        }) = derive_event(&body, &op, false).unwrap()
        else {
            panic!("expected a change");
        };
        assert_eq!(value, Some(json!("llo")));
        assert_eq!(previous, Some(json!("hello")));
    }

    #[test]
    fn increment_reports_previous_number() {
        let (body, op) = applied(json!({"n": 3}), json!({"p": ["n"], "na": 4}));
        let Some(DocEvent::Change {
            value, previous, ..
        }) = derive_event(&body, &op, false).unwrap()
        else {
            panic!("expected a change");
        };
        assert_eq!(value, Some(json!(7)));
        assert_eq!(previous, Some(json!(3)));
    }

    #[test]
    fn root_delete_reports_previous_snapshot() {
        let (body, op) = applied(json!({"a": 1}), json!({"p": [], "od": {"a": 1}}));
        assert_eq!(
            derive_event(&body, &op, false).unwrap(),
            Some(DocEvent::Change {
                path: Path::root(),
                value: None,
                previous: Some(json!({"a": 1})),
                text: None,
            })
        );
    }
}
