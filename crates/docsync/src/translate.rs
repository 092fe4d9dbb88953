//! Translating high-level mutations into operations.
//!
//! [`DocMutator`] carries the rules shared by [`LocalDoc`](crate::LocalDoc)
//! and [`RemoteDoc`](crate::RemoteDoc): each mutator call applies its
//! effect to the in-memory body at once and returns the previous value.
//! Missing containers on the way to the target are created, never on
//! delete.

use serde_json::{Number, Value};

use crate::apply::{add_numbers, lookup};
use crate::error::kind_of;
use crate::{apply, text, DocError, Operation, Path};

pub(crate) mod sealed {
    use serde_json::Value;

    use crate::Operation;

    /// Storage hooks behind [`DocMutator`](super::DocMutator).
    pub trait Body {
        fn body(&self) -> &Value;
        fn body_mut(&mut self) -> &mut Value;
        /// Whether the document exists yet.
        fn is_created(&self) -> bool;
        /// Called with the operations a mutator call produced, already
        /// applied to the body.
        fn record(&mut self, ops: Vec<Operation>);
    }
}

use sealed::Body;

/// The mutation capability set shared by local and remote documents.
///
/// ```
/// use docsync::{DocMutator, LocalDoc, Path};
/// use serde_json::json;
///
/// let mut doc = LocalDoc::new("_page", "p1");
/// doc.push(&Path::parse("items"), vec![json!("a"), json!("b")]).unwrap();
/// doc.move_items(&Path::parse("items"), 0, 1, 1).unwrap();
/// assert_eq!(doc.get(&Path::parse("items")), Some(&json!(["b", "a"])));
/// ```
pub trait DocMutator: Body {
    /// The value at `path`, if the document exists and has one there.
    fn get(&self, path: &Path) -> Option<&Value> {
        if !self.is_created() {
            return None;
        }
        lookup(self.body(), path.segments())
    }

    /// Set the value at `path`, returning the previous value.
    ///
    /// Setting the root of a document that does not exist yet creates it;
    /// an `id` field on the new body is dropped.
    fn set(&mut self, path: &Path, value: Value) -> Result<Option<Value>, DocError> {
        if path.is_empty() && !self.is_created() {
            let mut value = value;
            if let Value::Object(map) = &mut value {
                map.shift_remove("id");
            }
            let op = Operation::ObjectInsert {
                path: Path::root(),
                value,
            };
            return translate(self, |t| t.emit(op)).map(|()| None);
        }
        translate(self, |t| t.set(path, value))
    }

    /// Delete the value at `path`, returning it. The root path deletes the
    /// whole document.
    fn del(&mut self, path: &Path) -> Result<Option<Value>, DocError> {
        if path.is_empty() && !self.is_created() {
            return Ok(None);
        }
        translate(self, |t| t.del(path))
    }

    /// Add `delta` to the number at `path` and return the new value. A
    /// missing number is written as `delta`.
    fn increment(&mut self, path: &Path, delta: Number) -> Result<Number, DocError> {
        translate(self, |t| t.increment(path, delta))
    }

    /// Append `values` to the array at `path`, returning its new length.
    fn push(&mut self, path: &Path, values: Vec<Value>) -> Result<usize, DocError> {
        translate(self, |t| {
            let len = t.array_len("push", path)?.unwrap_or(0);
            t.insert(path, len, values)
        })
    }

    /// Prepend `values` to the array at `path`, returning its new length.
    fn unshift(&mut self, path: &Path, values: Vec<Value>) -> Result<usize, DocError> {
        translate(self, |t| t.insert(path, 0, values))
    }

    /// Insert `values` at `index`, returning the array's new length.
    fn insert(&mut self, path: &Path, index: usize, values: Vec<Value>) -> Result<usize, DocError> {
        translate(self, |t| t.insert(path, index, values))
    }

    /// Remove and return the last element.
    fn pop(&mut self, path: &Path) -> Result<Option<Value>, DocError> {
        translate(self, |t| {
            let len = t.ensure_array("pop", path)?;
            if len == 0 {
                return Ok(None);
            }
            Ok(t.remove(path, len - 1, 1)?.pop())
        })
    }

    /// Remove and return the first element.
    fn shift(&mut self, path: &Path) -> Result<Option<Value>, DocError> {
        translate(self, |t| Ok(t.remove(path, 0, 1)?.pop()))
    }

    /// Remove up to `count` elements starting at `index`.
    fn remove(&mut self, path: &Path, index: usize, count: usize) -> Result<Vec<Value>, DocError> {
        translate(self, |t| t.remove(path, index, count))
    }

    /// Move `count` contiguous elements from `from` so that the block starts
    /// at `to`. Returns the moved elements.
    fn move_items(
        &mut self,
        path: &Path,
        from: usize,
        to: usize,
        count: usize,
    ) -> Result<Vec<Value>, DocError> {
        translate(self, |t| t.move_items(path, from, to, count))
    }

    /// Insert `text` at character `index` of the string at `path`,
    /// returning the previous string.
    fn string_insert(&mut self, path: &Path, index: usize, text: &str) -> Result<Option<Value>, DocError> {
        translate(self, |t| t.string_insert(path, index, text))
    }

    /// Remove `count` characters at `index`, returning the previous string.
    fn string_remove(&mut self, path: &Path, index: usize, count: usize) -> Result<Option<Value>, DocError> {
        translate(self, |t| t.string_remove(path, index, count))
    }

    /// Replace the string at `path` with `value` using the smallest
    /// remove/insert pair. Falls back to [`set`](Self::set) when there is
    /// no string there yet.
    fn set_text(&mut self, path: &Path, value: &str) -> Result<Option<Value>, DocError> {
        let previous = match self.get(path) {
            Some(Value::String(previous)) => previous.clone(),
            _ => return self.set(path, Value::String(value.to_string())),
        };
        if let Some(edit) = text::diff(&previous, value) {
            let removed = edit.removed.chars().count();
            if removed > 0 {
                self.string_remove(path, edit.index, removed)?;
            }
            if !edit.inserted.is_empty() {
                self.string_insert(path, edit.index, &edit.inserted)?;
            }
        }
        Ok(Some(Value::String(previous)))
    }
}

impl<T: Body + ?Sized> DocMutator for T {}

/// Run `edit` against the document body and record what it emitted, even
/// when it fails part way: whatever was emitted has been applied.
fn translate<D, T>(
    doc: &mut D,
    edit: impl FnOnce(&mut Translator<'_>) -> Result<T, DocError>,
) -> Result<T, DocError>
where
    D: Body + ?Sized,
{
    let mut translator = Translator {
        body: doc.body_mut(),
        ops: Vec::new(),
    };
    let result = edit(&mut translator);
    let ops = translator.ops;
    if !ops.is_empty() {
        doc.record(ops);
    }
    result
}

struct Translator<'a> {
    body: &'a mut Value,
    ops: Vec<Operation>,
}

impl Translator<'_> {
    /// Apply `op`, keeping it only if it applied.
    fn emit(&mut self, op: Operation) -> Result<(), DocError> {
        apply(self.body, &op)?;
        self.ops.push(op);
        Ok(())
    }

    fn current(&self, path: &Path) -> Option<&Value> {
        lookup(self.body, path.segments())
    }

    fn set(&mut self, path: &Path, value: Value) -> Result<Option<Value>, DocError> {
        let previous = self.current(path).cloned();
        let list_parent = match path.parent() {
            None => false,
            Some(parent) => match self.current(&parent) {
                Some(Value::Array(_)) => true,
                Some(Value::Object(_)) => false,
                _ => path.last().is_some_and(|segment| segment.is_index()),
            },
        };
        let path = path.clone();
        let op = match (previous.clone(), list_parent) {
            (Some(before), true) => Operation::ListReplace {
                path,
                before,
                after: value,
            },
            (None, true) => Operation::ListInsert { path, value },
            (Some(before), false) => Operation::ObjectReplace {
                path,
                before,
                after: value,
            },
            (None, false) => Operation::ObjectInsert { path, value },
        };
        self.emit(op)?;
        Ok(previous)
    }

    fn del(&mut self, path: &Path) -> Result<Option<Value>, DocError> {
        let Some(before) = self.current(path).cloned() else {
            return Ok(None);
        };
        self.emit(Operation::ObjectDelete {
            path: path.clone(),
            before: before.clone(),
        })?;
        Ok(Some(before))
    }

    fn increment(&mut self, path: &Path, delta: Number) -> Result<Number, DocError> {
        match self.current(path) {
            Some(Value::Number(current)) => {
                let result = add_numbers(current, &delta)?;
                self.emit(Operation::Increment {
                    path: path.clone(),
                    delta,
                })?;
                Ok(result)
            }
            None | Some(Value::Null) => {
                self.set(path, Value::Number(delta.clone()))?;
                Ok(delta)
            }
            Some(other) => Err(DocError::TypeConflict {
                op: "increment",
                path: path.clone(),
                expected: "a number",
                found: kind_of(Some(other)),
            }),
        }
    }

    /// Length of the array at `path`, or `None` if nothing is there.
    fn array_len(&self, op: &'static str, path: &Path) -> Result<Option<usize>, DocError> {
        match self.current(path) {
            Some(Value::Array(items)) => Ok(Some(items.len())),
            None | Some(Value::Null) => Ok(None),
            Some(other) => Err(DocError::TypeConflict {
                op,
                path: path.clone(),
                expected: "an array",
                found: kind_of(Some(other)),
            }),
        }
    }

    /// Length of the array at `path`, writing an empty one if it is missing.
    fn ensure_array(&mut self, op: &'static str, path: &Path) -> Result<usize, DocError> {
        match self.array_len(op, path)? {
            Some(len) => Ok(len),
            None => {
                self.set(path, Value::Array(Vec::new()))?;
                Ok(0)
            }
        }
    }

    fn insert(&mut self, path: &Path, index: usize, values: Vec<Value>) -> Result<usize, DocError> {
        // A non-empty insert creates the array itself when it is applied.
        let len = if values.is_empty() {
            self.ensure_array("insert", path)?
        } else {
            self.array_len("insert", path)?.unwrap_or(0)
        };
        if index > len {
            return Err(DocError::Validation(format!(
                "insert at `{path}`: index {index} out of range for length {len}"
            )));
        }
        let count = values.len();
        for (offset, value) in values.into_iter().enumerate() {
            self.emit(Operation::ListInsert {
                path: path.child(index + offset),
                value,
            })?;
        }
        Ok(len + count)
    }

    fn remove(&mut self, path: &Path, index: usize, count: usize) -> Result<Vec<Value>, DocError> {
        let len = self.ensure_array("remove", path)?;
        if index > len {
            return Err(DocError::Validation(format!(
                "remove at `{path}`: index {index} out of range for length {len}"
            )));
        }
        let count = count.min(len - index);
        let mut removed = Vec::with_capacity(count);
        for _ in 0..count {
            let before = self
                .current(&path.child(index))
                .cloned()
                .unwrap_or(Value::Null);
            self.emit(Operation::ListRemove {
                path: path.child(index),
                before: before.clone(),
            })?;
            removed.push(before);
        }
        Ok(removed)
    }

    fn move_items(
        &mut self,
        path: &Path,
        from: usize,
        to: usize,
        count: usize,
    ) -> Result<Vec<Value>, DocError> {
        let len = self.ensure_array("move", path)?;
        if from.saturating_add(count) > len || to.saturating_add(count) > len {
            return Err(DocError::Validation(format!(
                "move at `{path}`: {count} items from {from} to {to} out of range for length {len}"
            )));
        }
        let moved = match self.current(path) {
            Some(Value::Array(items)) => items[from..from + count].to_vec(),
            _ => Vec::new(),
        };
        if from == to || count == 0 {
            return Ok(moved);
        }
        // One single-element move per item: moving right always takes the
        // block's first element to its final last slot, moving left takes
        // the block's last element to its final first slot.
        let (source, target) = if from < to {
            (from, to + count - 1)
        } else {
            (from + count - 1, to)
        };
        for _ in 0..count {
            self.emit(Operation::ListMove {
                path: path.child(source),
                to: target,
            })?;
        }
        Ok(moved)
    }

    fn string_insert(&mut self, path: &Path, index: usize, text: &str) -> Result<Option<Value>, DocError> {
        let previous = match self.current(path) {
            Some(Value::String(s)) => {
                let len = s.chars().count();
                if index > len {
                    return Err(DocError::Validation(format!(
                        "string insert at `{path}`: offset {index} out of range for length {len}"
                    )));
                }
                Some(Value::String(s.clone()))
            }
            None | Some(Value::Null) => None,
            Some(other) => {
                return Err(DocError::TypeConflict {
                    op: "string_insert",
                    path: path.clone(),
                    expected: "a string",
                    found: kind_of(Some(other)),
                })
            }
        };
        if !text.is_empty() {
            self.emit(Operation::StringInsert {
                path: path.child(index),
                text: text.to_string(),
            })?;
        }
        Ok(previous)
    }

    fn string_remove(&mut self, path: &Path, index: usize, count: usize) -> Result<Option<Value>, DocError> {
        let previous = match self.current(path) {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => return Ok(None),
            Some(other) => {
                return Err(DocError::TypeConflict {
                    op: "string_remove",
                    path: path.clone(),
                    expected: "a string",
                    found: kind_of(Some(other)),
                })
            }
        };
        let len = previous.chars().count();
        if index > len {
            return Err(DocError::Validation(format!(
                "string remove at `{path}`: offset {index} out of range for length {len}"
            )));
        }
        let removed: String = previous.chars().skip(index).take(count).collect();
        if !removed.is_empty() {
            self.emit(Operation::StringRemove {
                path: path.child(index),
                text: removed,
            })?;
        }
        Ok(Some(Value::String(previous)))
    }
}
