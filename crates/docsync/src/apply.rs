//! Applying operations to a document body.
//!
//! Application is all-or-nothing: every check runs before the body is
//! touched, so a failed operation leaves the body unchanged.
//!
//! Insert-class operations (`ObjectInsert`, `ObjectReplace`, `ListInsert`,
//! `StringInsert`) create missing intermediate containers on the way down:
//! a missing node becomes a sequence when the next segment is an index and a
//! mapping otherwise. `null` counts as missing. Removal-class operations
//! never create structure.

use serde_json::{Number, Value};

use crate::error::kind_of;
use crate::{DocError, Operation, Segment};

/// Resolve `segments` against `root` without creating anything.
///
/// Index segments address sequence elements, or mapping keys spelled as
/// decimal numbers.
pub fn lookup<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(&segment.to_key()),
        Value::Array(items) => segment.as_index().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get_mut(&segment.to_key()),
        Value::Array(items) => segment.as_index().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// Apply `op` to `root`.
///
/// ```
/// use docsync::{apply, Operation, Path};
/// use serde_json::json;
///
/// let mut body = json!({});
/// apply(&mut body, &Operation::ListInsert {
///     path: Path::parse("items.0"),
///     value: json!("a"),
/// }).unwrap();
/// assert_eq!(body, json!({"items": ["a"]}));
/// ```
pub fn apply(root: &mut Value, op: &Operation) -> Result<(), DocError> {
    log::trace!("apply {} at `{}`", op.name(), op.path());
    let path = op.path();
    let Some((leaf, parent)) = path.segments().split_last() else {
        return apply_at_root(root, op);
    };
    let conflict = |expected: &'static str, found: Option<&Value>| DocError::TypeConflict {
        op: op.name(),
        path: path.clone(),
        expected,
        found: kind_of(found),
    };

    match op {
        Operation::ObjectInsert { value, .. } | Operation::ObjectReplace { after: value, .. } => {
            if let Some(container) = probe(root, parent, op)? {
                check_slot(container, leaf, op)?;
            } else {
                check_fresh_slot(leaf, op)?;
            }
            let container = vivify(root, parent, container_for(leaf), op)?;
            put_slot(container, leaf, value.clone(), op)
        }
        Operation::ObjectDelete { .. } => {
            match lookup_mut(root, parent) {
                Some(Value::Object(map)) => {
                    map.shift_remove(&leaf.to_key());
                }
                Some(Value::Array(items)) => {
                    if let Some(slot) = leaf.as_index().and_then(|i| items.get_mut(i)) {
                        *slot = Value::Null;
                    }
                }
                _ => {}
            }
            Ok(())
        }
        Operation::ListInsert { value, .. } => {
            let index = position(leaf, op)?;
            match probe(root, parent, op)? {
                Some(Value::Array(items)) if index <= items.len() => {}
                Some(Value::Array(items)) => return Err(out_of_range(op, index, items.len())),
                Some(other) => return Err(conflict("an array", Some(other))),
                None if index == 0 => {}
                None => return Err(out_of_range(op, index, 0)),
            }
            match vivify(root, parent, Value::Array(Vec::new()), op)? {
                Value::Array(items) => {
                    items.insert(index, value.clone());
                    Ok(())
                }
                other => Err(conflict("an array", Some(other))),
            }
        }
        Operation::ListReplace { after, .. } => {
            let index = position(leaf, op)?;
            match lookup_mut(root, parent) {
                Some(Value::Array(items)) => match items.get_mut(index) {
                    Some(slot) => {
                        *slot = after.clone();
                        Ok(())
                    }
                    None => Err(out_of_range(op, index, items.len())),
                },
                other => Err(conflict("an array", other.map(|v| &*v))),
            }
        }
        Operation::ListRemove { .. } => {
            let index = position(leaf, op)?;
            match lookup_mut(root, parent) {
                Some(Value::Array(items)) if index < items.len() => {
                    items.remove(index);
                    Ok(())
                }
                Some(Value::Array(items)) => Err(out_of_range(op, index, items.len())),
                other => Err(conflict("an array", other.map(|v| &*v))),
            }
        }
        Operation::ListMove { to, .. } => {
            let from = position(leaf, op)?;
            match lookup_mut(root, parent) {
                Some(Value::Array(items)) => {
                    let len = items.len();
                    if from >= len || *to >= len {
                        return Err(out_of_range(op, from.max(*to), len));
                    }
                    let item = items.remove(from);
                    items.insert(*to, item);
                    Ok(())
                }
                other => Err(conflict("an array", other.map(|v| &*v))),
            }
        }
        Operation::StringInsert { text, .. } => {
            let offset = position(leaf, op)?;
            match probe(root, parent, op)? {
                Some(Value::String(s)) if offset <= s.chars().count() => {}
                Some(Value::String(s)) => {
                    return Err(out_of_range(op, offset, s.chars().count()))
                }
                Some(other) => return Err(conflict("a string", Some(other))),
                None if offset == 0 => {}
                None => return Err(out_of_range(op, offset, 0)),
            }
            match vivify(root, parent, Value::String(String::new()), op)? {
                Value::String(s) => {
                    let at = byte_offset(s, offset);
                    s.insert_str(at, text);
                    Ok(())
                }
                other => Err(conflict("a string", Some(other))),
            }
        }
        Operation::StringRemove { text, .. } => {
            let offset = position(leaf, op)?;
            match lookup_mut(root, parent) {
                Some(Value::String(s)) => {
                    let start = byte_offset(s, offset);
                    let end = start
                        + s[start..]
                            .chars()
                            .take(text.chars().count())
                            .map(char::len_utf8)
                            .sum::<usize>();
                    if &s[start..end] != text {
                        return Err(DocError::Validation(format!(
                            "{} at `{path}` expected to remove {text:?}, found {:?}",
                            op.name(),
                            &s[start..end],
                        )));
                    }
                    s.replace_range(start..end, "");
                    Ok(())
                }
                other => Err(conflict("a string", other.map(|v| &*v))),
            }
        }
        Operation::Increment { delta, .. } => increment(lookup_mut(root, path.segments()), delta, op),
    }
}

fn apply_at_root(root: &mut Value, op: &Operation) -> Result<(), DocError> {
    match op {
        Operation::ObjectInsert { value, .. } | Operation::ObjectReplace { after: value, .. } => {
            *root = value.clone();
            Ok(())
        }
        Operation::ObjectDelete { .. } => {
            *root = Value::Null;
            Ok(())
        }
        Operation::Increment { delta, .. } => increment(Some(root), delta, op),
        _ => Err(DocError::Validation(format!(
            "{} needs a non-empty path",
            op.name()
        ))),
    }
}

fn increment(target: Option<&mut Value>, delta: &Number, op: &Operation) -> Result<(), DocError> {
    match target {
        Some(Value::Number(n)) => {
            *n = add_numbers(n, delta)?;
            Ok(())
        }
        other => Err(DocError::TypeConflict {
            op: op.name(),
            path: op.path().clone(),
            expected: "a number",
            found: kind_of(other.map(|v| &*v)),
        }),
    }
}

/// Walk `segments` read-only, checking that [`vivify`] would succeed.
/// Returns the existing node, or `None` when it will be created.
fn probe<'a>(
    root: &'a Value,
    segments: &[Segment],
    op: &Operation,
) -> Result<Option<&'a Value>, DocError> {
    let mut node = root;
    for (depth, segment) in segments.iter().enumerate() {
        let next = match node {
            Value::Null => None,
            Value::Object(map) => map.get(&segment.to_key()),
            Value::Array(items) => {
                let index = segment.as_index().ok_or_else(|| DocError::TypeConflict {
                    op: op.name(),
                    path: op.path().clone(),
                    expected: "an object",
                    found: "an array",
                })?;
                if index > items.len() {
                    return Err(out_of_range(op, index, items.len()));
                }
                items.get(index)
            }
            other => {
                return Err(DocError::TypeConflict {
                    op: op.name(),
                    path: op.path().clone(),
                    expected: "an object or array",
                    found: kind_of(Some(other)),
                })
            }
        };
        match next {
            Some(Value::Null) | None => {
                // Everything below here is fresh, so indices must start lists.
                let rest = &segments[depth + 1..];
                if let Some(index) = rest.iter().filter_map(Segment::as_index).find(|&i| i != 0) {
                    return Err(out_of_range(op, index, 0));
                }
                return Ok(None);
            }
            Some(value) => node = value,
        }
    }
    Ok(if node.is_null() { None } else { Some(node) })
}

/// Walk `segments`, creating missing containers, and return the node they
/// address. A missing final node is replaced by `default`.
fn vivify<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    default: Value,
    op: &Operation,
) -> Result<&'a mut Value, DocError> {
    let mut node = root;
    for segment in segments {
        if node.is_null() {
            *node = container_for(segment);
        }
        node = match node {
            Value::Object(map) => map.entry(segment.to_key()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = position(segment, op)?;
                if index == items.len() {
                    items.push(Value::Null);
                }
                let len = items.len();
                items
                    .get_mut(index)
                    .ok_or_else(|| out_of_range(op, index, len))?
            }
            other => {
                return Err(DocError::TypeConflict {
                    op: op.name(),
                    path: op.path().clone(),
                    expected: "an object or array",
                    found: kind_of(Some(other)),
                })
            }
        };
    }
    if node.is_null() {
        *node = default;
    }
    Ok(node)
}

fn check_slot(container: &Value, leaf: &Segment, op: &Operation) -> Result<(), DocError> {
    match (container, leaf) {
        (Value::Object(_), _) => Ok(()),
        (Value::Array(items), Segment::Index(index)) if *index <= items.len() => Ok(()),
        (Value::Array(items), Segment::Index(index)) => Err(out_of_range(op, *index, items.len())),
        (other, _) => Err(DocError::TypeConflict {
            op: op.name(),
            path: op.path().clone(),
            expected: "an object",
            found: kind_of(Some(other)),
        }),
    }
}

fn check_fresh_slot(leaf: &Segment, op: &Operation) -> Result<(), DocError> {
    match leaf {
        Segment::Index(index) if *index > 0 => Err(out_of_range(op, *index, 0)),
        _ => Ok(()),
    }
}

fn put_slot(container: &mut Value, leaf: &Segment, value: Value, op: &Operation) -> Result<(), DocError> {
    match container {
        Value::Object(map) => {
            map.insert(leaf.to_key(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = position(leaf, op)?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(out_of_range(op, index, items.len()));
            }
            Ok(())
        }
        other => Err(DocError::TypeConflict {
            op: op.name(),
            path: op.path().clone(),
            expected: "an object",
            found: kind_of(Some(other)),
        }),
    }
}

/// The empty container that a segment can step into.
fn container_for(segment: &Segment) -> Value {
    match segment {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Key(_) => Value::Object(serde_json::Map::new()),
    }
}

fn position(segment: &Segment, op: &Operation) -> Result<usize, DocError> {
    segment.as_index().ok_or_else(|| DocError::TypeConflict {
        op: op.name(),
        path: op.path().clone(),
        expected: "an array",
        found: "an object",
    })
}

fn out_of_range(op: &Operation, index: usize, len: usize) -> DocError {
    DocError::Validation(format!(
        "{} at `{}`: index {index} out of range for length {len}",
        op.name(),
        op.path()
    ))
}

/// Byte offset of the `chars`-th character, clamped to the end.
pub(crate) fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(at, _)| at)
}

/// `a + b`, staying integral when both sides are integers that do not
/// overflow.
pub(crate) fn add_numbers(a: &Number, b: &Number) -> Result<Number, DocError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(sum.into());
        }
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(sum.into());
        }
    }
    float(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())
}

/// `a - b`, with the same integer handling as [`add_numbers`].
pub(crate) fn sub_numbers(a: &Number, b: &Number) -> Result<Number, DocError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(diff) = x.checked_sub(y) {
            return Ok(diff.into());
        }
    }
    float(a.as_f64().unwrap_or_default() - b.as_f64().unwrap_or_default())
}

fn float(value: f64) -> Result<Number, DocError> {
    Number::from_f64(value)
        .ok_or_else(|| DocError::Validation(format!("numeric result {value} is not finite")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Path;
    use serde_json::json;

    fn op(wire: Value) -> Operation {
        Operation::from_wire(&wire).unwrap()
    }

    #[test]
    fn object_insert_replace_delete() {
        let mut body = json!({"title": "a"});
        apply(&mut body, &op(json!({"p": ["done"], "oi": false}))).unwrap();
        apply(&mut body, &op(json!({"p": ["title"], "od": "a", "oi": "b"}))).unwrap();
        assert_eq!(body, json!({"title": "b", "done": false}));
        apply(&mut body, &op(json!({"p": ["title"], "od": "b"}))).unwrap();
        assert_eq!(body, json!({"done": false}));
    }

    #[test]
    fn delete_keeps_key_order() {
        let mut body = json!({"a": 1, "b": 2, "c": 3});
        apply(&mut body, &op(json!({"p": ["a"], "od": 1}))).unwrap();
        let keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["b", "c"]);
    }

    #[test]
    fn insert_vivifies_mixed_containers() {
        let mut body = json!({});
        apply(&mut body, &op(json!({"p": ["a", "b", 0, "c"], "oi": 1}))).unwrap();
        assert_eq!(body, json!({"a": {"b": [{"c": 1}]}}));
    }

    #[test]
    fn list_insert_vivifies_from_null_root() {
        let mut body = Value::Null;
        apply(&mut body, &op(json!({"p": ["items", 0], "li": "a"}))).unwrap();
        assert_eq!(body, json!({"items": ["a"]}));
    }

    #[test]
    fn failed_vivify_leaves_body_untouched() {
        let mut body = json!({"x": 1});
        let err = apply(&mut body, &op(json!({"p": ["items", "deep", 3], "li": "a"}))).unwrap_err();
        assert!(matches!(err, DocError::Validation(_)));
        assert_eq!(body, json!({"x": 1}));
    }

    #[test]
    fn descending_through_scalar_is_a_conflict() {
        let mut body = json!({"x": 1});
        let err = apply(&mut body, &op(json!({"p": ["x", "y"], "oi": 2}))).unwrap_err();
        assert!(matches!(err, DocError::TypeConflict { found: "a number", .. }));
        assert_eq!(body, json!({"x": 1}));
    }

    #[test]
    fn list_replace_remove_move() {
        let mut body = json!({"l": ["a", "b", "c"]});
        apply(&mut body, &op(json!({"p": ["l", 1], "ld": "b", "li": "B"}))).unwrap();
        apply(&mut body, &op(json!({"p": ["l", 0], "lm": 2}))).unwrap();
        assert_eq!(body, json!({"l": ["B", "c", "a"]}));
        apply(&mut body, &op(json!({"p": ["l", 1], "ld": "c"}))).unwrap();
        assert_eq!(body, json!({"l": ["B", "a"]}));
    }

    #[test]
    fn list_bounds_are_checked() {
        let mut body = json!({"l": [1]});
        assert!(apply(&mut body, &op(json!({"p": ["l", 2], "li": 0}))).is_err());
        assert!(apply(&mut body, &op(json!({"p": ["l", 1], "ld": 0}))).is_err());
        assert!(apply(&mut body, &op(json!({"p": ["l", 0], "lm": 1}))).is_err());
        assert_eq!(body, json!({"l": [1]}));
    }

    #[test]
    fn removal_on_missing_list_is_a_conflict() {
        let mut body = json!({});
        let err = apply(&mut body, &op(json!({"p": ["l", 0], "ld": 1}))).unwrap_err();
        assert!(matches!(err, DocError::TypeConflict { found: "nothing", .. }));
        assert_eq!(body, json!({}));
    }

    #[test]
    fn string_ops_count_characters() {
        let mut body = json!({"s": "héllo"});
        apply(&mut body, &op(json!({"p": ["s", 2], "si": "ü"}))).unwrap();
        assert_eq!(body, json!({"s": "héüllo"}));
        apply(&mut body, &op(json!({"p": ["s", 1], "sd": "éü"}))).unwrap();
        assert_eq!(body, json!({"s": "hllo"}));
    }

    #[test]
    fn string_remove_must_match() {
        let mut body = json!({"s": "abc"});
        assert!(apply(&mut body, &op(json!({"p": ["s", 0], "sd": "x"}))).is_err());
        assert_eq!(body, json!({"s": "abc"}));
    }

    #[test]
    fn string_insert_vivifies_at_zero_only() {
        let mut body = json!({});
        apply(&mut body, &op(json!({"p": ["s", 0], "si": "hi"}))).unwrap();
        assert_eq!(body, json!({"s": "hi"}));
        let mut empty = json!({});
        assert!(apply(&mut empty, &op(json!({"p": ["s", 1], "si": "hi"}))).is_err());
    }

    #[test]
    fn increment_integers_and_floats() {
        let mut body = json!({"n": 2, "f": 0.5});
        apply(&mut body, &op(json!({"p": ["n"], "na": 3}))).unwrap();
        apply(&mut body, &op(json!({"p": ["f"], "na": 1}))).unwrap();
        assert_eq!(body, json!({"n": 5, "f": 1.5}));
    }

    #[test]
    fn increment_needs_a_number() {
        let mut body = json!({"s": "x"});
        let err = apply(&mut body, &op(json!({"p": ["s"], "na": 1}))).unwrap_err();
        assert!(matches!(err, DocError::TypeConflict { expected: "a number", .. }));
        let err = apply(&mut body, &op(json!({"p": ["missing"], "na": 1}))).unwrap_err();
        assert!(matches!(err, DocError::TypeConflict { found: "nothing", .. }));
    }

    #[test]
    fn increment_overflow_falls_back_to_float() {
        let sum = add_numbers(&i64::MAX.into(), &1.into()).unwrap();
        assert_eq!(sum, Number::from(i64::MAX as u64 + 1));
        let sum = add_numbers(&u64::MAX.into(), &1.into()).unwrap();
        assert!(sum.is_f64());
    }

    #[test]
    fn root_delete_nulls_the_body() {
        let mut body = json!({"a": 1});
        apply(&mut body, &op(json!({"p": [], "od": {"a": 1}}))).unwrap();
        assert!(body.is_null());
    }

    #[test]
    fn delete_of_missing_key_creates_nothing() {
        let mut body = json!({});
        apply(&mut body, &op(json!({"p": ["a", "b"], "od": 1}))).unwrap();
        assert_eq!(body, json!({}));
    }

    #[test]
    fn delete_in_list_leaves_a_hole() {
        let mut body = json!({"l": [1, 2]});
        apply(&mut body, &op(json!({"p": ["l", 0], "od": 1}))).unwrap();
        assert_eq!(body, json!({"l": [null, 2]}));
    }

    #[test]
    fn lookup_reads_numeric_keys_on_objects() {
        let body = json!({"m": {"0": "zero"}, "l": ["a"]});
        assert_eq!(lookup(&body, Path::parse("m.0").segments()), Some(&json!("zero")));
        assert_eq!(lookup(&body, Path::parse("l.0").segments()), Some(&json!("a")));
        assert_eq!(lookup(&body, Path::parse("l.x").segments()), None);
    }
}
