//! Evaluating query filters against persisted rows.
//!
//! The filter language is the familiar document-store one: a mapping from
//! (dotted) field names to either a literal, matched by equality, or an
//! operator object such as `{"$gt": 3}`. `$and`, `$or`, `$nor` combine
//! sub-filters and `$where` hands the row to a [`WhereEvaluator`].

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::query::{QueryError, WhereEvaluator};
use crate::traits::Row;

/// Returns `true` if `row` satisfies `filter`.
///
/// `$where` clauses fail with [`QueryError::WhereNotAllowed`] unless an
/// evaluator is supplied.
pub fn matches(
    row: &Row,
    filter: &Map<String, Value>,
    evaluator: Option<&dyn WhereEvaluator>,
) -> Result<bool, QueryError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(row, clause, evaluator)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(row, clause, evaluator)? {
                        any = true;
                        break;
                    }
                }
                any == (key == "$or")
            }
            "$where" => {
                let evaluator = evaluator.ok_or(QueryError::WhereNotAllowed)?;
                evaluator
                    .evaluate(condition, row)
                    .map_err(QueryError::Where)?
            }
            op if op.starts_with('$') => return Err(QueryError::UnknownOperator(op.to_string())),
            field => matches_condition(field_value(row, field), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolve a dotted field name against a row. Numeric segments index into
/// arrays.
pub fn field_value<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let first = row.get(segments.next()?)?;
    segments.try_fold(first, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Total order over values: null < numbers < strings < objects < arrays <
/// booleans. Within a kind, numbers compare numerically, strings
/// lexicographically, and containers element by element.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(va, vb)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

fn clauses<'a>(op: &str, operand: &'a Value) -> Result<Vec<&'a Map<String, Value>>, QueryError> {
    let invalid = || QueryError::InvalidOperand {
        op: op.to_string(),
        reason: "expected an array of filter objects".into(),
    };
    operand
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|clause| clause.as_object().ok_or_else(invalid))
        .collect()
}

fn is_operator_object(condition: &Value) -> bool {
    matches!(condition, Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')))
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> Result<bool, QueryError> {
    let Value::Object(ops) = condition else {
        return Ok(equals(value, condition));
    };
    if !is_operator_object(condition) {
        return Ok(equals(value, condition));
    }
    for (op, operand) in ops {
        let satisfied = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, Ordering::is_gt),
            "$gte" => ordered(value, operand, Ordering::is_ge),
            "$lt" => ordered(value, operand, Ordering::is_lt),
            "$lte" => ordered(value, operand, Ordering::is_le),
            "$in" => candidates(op, operand)?.iter().any(|c| equals(value, c)),
            "$nin" => !candidates(op, operand)?.iter().any(|c| equals(value, c)),
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(!operand.is_null());
                value.is_some() == wanted
            }
            "$size" => {
                let size = operand.as_u64().ok_or_else(|| QueryError::InvalidOperand {
                    op: op.clone(),
                    reason: format!("expected a non-negative integer, got {operand}"),
                })?;
                matches!(value, Some(Value::Array(items)) if items.len() as u64 == size)
            }
            "$not" => !matches_condition(value, operand)?,
            other => return Err(QueryError::UnknownOperator(other.to_string())),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn candidates<'a>(op: &str, operand: &'a Value) -> Result<&'a Vec<Value>, QueryError> {
    operand.as_array().ok_or_else(|| QueryError::InvalidOperand {
        op: op.to_string(),
        reason: format!("expected an array, got {operand}"),
    })
}

/// Equality with array membership: `["a", "b"]` equals `"a"`. A missing
/// field equals `null`.
fn equals(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(Value::Array(items)) if !target.is_array() => items.iter().any(|item| same(item, target)),
        Some(value) => same(value, target),
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b).is_eq(),
        _ => a == b,
    }
}

/// Range comparison, only between values of the same kind. Arrays match if
/// any element does.
fn ordered(value: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) if !operand.is_array() => items
            .iter()
            .any(|item| ordered(Some(item), operand, accept)),
        Some(value) if rank(value) == rank(operand) => accept(compare_values(value, operand)),
        _ => false,
    }
}
