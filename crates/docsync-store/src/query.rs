//! Query parsing, classification and in-process execution.
//!
//! A query arrives either flat (`{"status": "open", "$orderby": {...}}`) or
//! boxed (`{"$query": {"status": "open"}, "$orderby": {...}}`). Parsing
//! separates the plain filter from meta operators (`$orderby`, `$count`,
//! ...) and cursor operators (`$limit`, `$skip`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::{ID_FIELD, TYPE_FIELD};
use crate::filter::{compare_values, field_value, matches};
use crate::traits::Row;

/// Meta operators. Only `$orderby` and `$count` change in-process results;
/// the rest are carried for backends that understand them.
pub const META_OPERATORS: [&str; 11] = [
    "$comment",
    "$explain",
    "$hint",
    "$maxScan",
    "$max",
    "$min",
    "$orderby",
    "$returnKey",
    "$showDiskLoc",
    "$snapshot",
    "$count",
];

/// Cursor operators.
pub const CURSOR_OPERATORS: [&str; 2] = ["$limit", "$skip"];

/// Errors raised while parsing or evaluating a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The query (or its `$query` box) is not an object.
    #[error("query must be an object, got {0}")]
    NotAnObject(String),
    /// `$where` used while free-form predicates are disabled.
    #[error("illegal $where query")]
    WhereNotAllowed,
    /// An operator this engine does not know.
    #[error("unknown query operator `{0}`")]
    UnknownOperator(String),
    /// An operator with an operand of the wrong shape.
    #[error("invalid operand for `{op}`: {reason}")]
    InvalidOperand {
        /// The operator.
        op: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The `$where` evaluator failed.
    #[error("$where evaluation failed: {0}")]
    Where(String),
}

/// Evaluates `$where` expressions.
///
/// Arbitrary predicates are a security boundary, so a store only consults
/// an evaluator when `allow_where_query` is set.
pub trait WhereEvaluator: Send + Sync {
    /// Decide whether `row` satisfies `expression`.
    fn evaluate(&self, expression: &Value, row: &Row) -> Result<bool, String>;
}

impl<F> WhereEvaluator for F
where
    F: Fn(&Value, &Row) -> Result<bool, String> + Send + Sync,
{
    fn evaluate(&self, expression: &Value, row: &Row) -> Result<bool, String> {
        self(expression, row)
    }
}

/// `$limit` and `$skip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOps {
    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Results to skip before the first one returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
}

/// A query split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalQuery {
    /// Plain filter predicates.
    #[serde(default)]
    pub filter: Map<String, Value>,
    /// Recognised meta operators, keyed with their `$`.
    #[serde(default)]
    pub meta_ops: Map<String, Value>,
    /// Cursor operators.
    #[serde(default)]
    pub cursor_ops: CursorOps,
}

/// Result of running a query over a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Matching rows, sorted, skipped and limited.
    Rows(Vec<Row>),
    /// Number of matching rows, for `$count` queries.
    Count(u64),
}

impl CanonicalQuery {
    /// Split a flat or `$query`-boxed query.
    ///
    /// ```
    /// use docsync_store::CanonicalQuery;
    /// use serde_json::json;
    ///
    /// let query = CanonicalQuery::parse(&json!({"status": "open", "$limit": 10})).unwrap();
    /// assert_eq!(query.filter["status"], "open");
    /// assert_eq!(query.cursor_ops.limit, Some(10));
    /// assert!(query.needs_poll_mode());
    /// ```
    pub fn parse(input: &Value) -> Result<Self, QueryError> {
        let object = input
            .as_object()
            .ok_or_else(|| QueryError::NotAnObject(input.to_string()))?;
        let mut query = Self::default();

        let boxed = object.get("$query").filter(|q| !q.is_null());
        if let Some(inner) = boxed {
            query.filter = inner
                .as_object()
                .cloned()
                .ok_or_else(|| QueryError::NotAnObject(inner.to_string()))?;
        }
        for (key, value) in object {
            if key == "$query" {
                continue;
            }
            if META_OPERATORS.contains(&key.as_str()) {
                query.meta_ops.insert(key.clone(), value.clone());
            } else if CURSOR_OPERATORS.contains(&key.as_str()) {
                let n = value.as_u64().and_then(|n| usize::try_from(n).ok()).ok_or_else(|| {
                    QueryError::InvalidOperand {
                        op: key.clone(),
                        reason: format!("expected a non-negative integer, got {value}"),
                    }
                })?;
                if key == "$limit" {
                    query.cursor_ops.limit = Some(n);
                } else {
                    query.cursor_ops.skip = Some(n);
                }
            } else if boxed.is_some() {
                return Err(QueryError::UnknownOperator(key.clone()));
            } else {
                query.filter.insert(key.clone(), value.clone());
            }
        }
        Ok(query)
    }

    /// Exclude deleted documents unless the filter already says something
    /// about the type.
    pub fn normalize(mut self) -> Self {
        let constrained = self.filter.get(TYPE_FIELD).is_some_and(|t| !t.is_null());
        if !constrained {
            let mut not_null = Map::new();
            not_null.insert("$ne".into(), Value::Null);
            self.filter.insert(TYPE_FIELD.into(), Value::Object(not_null));
        }
        self
    }

    /// Restrict the query to one document id, keeping any `_id` predicate
    /// the caller already had.
    pub fn for_id(mut self, id: &str) -> Self {
        let pinned = Value::String(id.to_string());
        match self.filter.shift_remove(ID_FIELD) {
            Some(existing) => {
                let clause = |v: Value| {
                    let mut m = Map::new();
                    m.insert(ID_FIELD.into(), v);
                    Value::Object(m)
                };
                let mut all = match self.filter.shift_remove("$and") {
                    Some(Value::Array(clauses)) => clauses,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                all.push(clause(pinned));
                all.push(clause(existing));
                self.filter.insert("$and".into(), Value::Array(all));
            }
            None => {
                self.filter.insert(ID_FIELD.into(), pinned);
            }
        }
        self
    }

    /// Whether results depend on the whole result set (ordering, paging or
    /// counting), so the query must be re-run on every relevant write
    /// instead of being updated from single operations.
    pub fn needs_poll_mode(&self) -> bool {
        self.meta_ops.contains_key("$orderby")
            || self.meta_ops.contains_key("$count")
            || self.cursor_ops.limit.is_some()
            || self.cursor_ops.skip.is_some()
    }

    /// Whether the filter contains a `$where` predicate at any depth.
    pub fn uses_where(&self) -> bool {
        fn scan(filter: &Map<String, Value>) -> bool {
            filter.iter().any(|(key, value)| match key.as_str() {
                "$where" => true,
                "$and" | "$or" | "$nor" => value
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_object)
                    .any(scan),
                _ => false,
            })
        }
        scan(&self.filter)
    }

    /// Returns `true` for `$count` queries.
    pub fn is_count(&self) -> bool {
        self.meta_ops.contains_key("$count")
    }

    /// Run the query over `rows`.
    pub fn execute(
        &self,
        rows: Vec<Row>,
        evaluator: Option<&dyn WhereEvaluator>,
    ) -> Result<QueryOutcome, QueryError> {
        let mut matched = Vec::new();
        for row in rows {
            if matches(&row, &self.filter, evaluator)? {
                matched.push(row);
            }
        }
        if self.is_count() {
            return Ok(QueryOutcome::Count(matched.len() as u64));
        }

        if let Some(orderby) = self.meta_ops.get("$orderby") {
            let keys = sort_keys(orderby)?;
            matched.sort_by(|a, b| {
                keys.iter()
                    .map(|(field, descending)| {
                        let null = Value::Null;
                        let x = field_value(a, field).unwrap_or(&null);
                        let y = field_value(b, field).unwrap_or(&null);
                        let order = compare_values(x, y);
                        if *descending {
                            order.reverse()
                        } else {
                            order
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let skip = self.cursor_ops.skip.unwrap_or(0);
        let limit = self.cursor_ops.limit.unwrap_or(usize::MAX);
        Ok(QueryOutcome::Rows(
            matched.into_iter().skip(skip).take(limit).collect(),
        ))
    }
}

fn sort_keys(orderby: &Value) -> Result<Vec<(String, bool)>, QueryError> {
    let invalid = |reason: String| QueryError::InvalidOperand {
        op: "$orderby".into(),
        reason,
    };
    let fields = orderby
        .as_object()
        .ok_or_else(|| invalid(format!("expected an object, got {orderby}")))?;
    fields
        .iter()
        .map(|(field, direction)| match direction.as_f64() {
            Some(d) if d < 0.0 => Ok((field.clone(), true)),
            Some(_) => Ok((field.clone(), false)),
            None => Err(invalid(format!("direction of `{field}` must be 1 or -1"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Row> {
        serde_json::from_value(values).unwrap()
    }

    fn parsed(input: Value) -> CanonicalQuery {
        CanonicalQuery::parse(&input).unwrap()
    }

    #[test]
    fn poll_mode_classification() {
        assert!(parsed(json!({"$orderby": {"x": 1}, "$limit": 10})).needs_poll_mode());
        assert!(parsed(json!({"$skip": 5})).needs_poll_mode());
        assert!(parsed(json!({"$count": true})).needs_poll_mode());
        assert!(!parsed(json!({"status": "open"})).needs_poll_mode());
        assert!(!parsed(json!({"status": "open", "$comment": "hi"})).needs_poll_mode());
    }

    #[test]
    fn bare_operator_names_are_fields() {
        let q = parsed(json!({"orderby": {"x": 1}, "limit": 3}));
        assert!(!q.needs_poll_mode());
        assert_eq!(q.filter.len(), 2);
    }

    #[test]
    fn boxed_queries() {
        let q = parsed(json!({"$query": {"a": 1}, "$orderby": {"a": -1}, "$limit": 2}));
        assert_eq!(q.filter, *json!({"a": 1}).as_object().unwrap());
        assert_eq!(q.cursor_ops.limit, Some(2));
        assert!(CanonicalQuery::parse(&json!({"$query": {"a": 1}, "$bogus": 1})).is_err());
        assert!(CanonicalQuery::parse(&json!({"$query": 3})).is_err());
        assert!(CanonicalQuery::parse(&json!([1])).is_err());
        assert!(CanonicalQuery::parse(&json!({"$limit": -1})).is_err());
    }

    #[test]
    fn canonical_shape_deserializes() {
        let q: CanonicalQuery = serde_json::from_value(json!({
            "filter": {"a": 1},
            "metaOps": {"$orderby": {"a": 1}},
            "cursorOps": {"limit": 3}
        }))
        .unwrap();
        assert!(q.needs_poll_mode());
        assert_eq!(q.cursor_ops.limit, Some(3));
    }

    #[test]
    fn normalize_hides_tombstones_unless_type_is_constrained() {
        let q = parsed(json!({"a": 1})).normalize();
        assert_eq!(q.filter[TYPE_FIELD], json!({"$ne": null}));
        let q = parsed(json!({"_type": "json0"})).normalize();
        assert_eq!(q.filter[TYPE_FIELD], json!("json0"));
    }

    #[test]
    fn for_id_keeps_existing_id_predicate() {
        let q = parsed(json!({"a": 1})).for_id("d1");
        assert_eq!(q.filter[ID_FIELD], json!("d1"));
        let q = parsed(json!({"_id": {"$in": ["d1", "d2"]}})).for_id("d1");
        assert_eq!(
            q.filter["$and"],
            json!([{"_id": "d1"}, {"_id": {"$in": ["d1", "d2"]}}])
        );
    }

    #[test]
    fn where_is_found_at_depth() {
        assert!(parsed(json!({"$where": "x"})).uses_where());
        assert!(parsed(json!({"$or": [{"a": 1}, {"$where": "x"}]})).uses_where());
        assert!(!parsed(json!({"a": {"$ne": 1}})).uses_where());
    }

    #[test]
    fn execute_sorts_skips_and_limits() {
        let data = rows(json!([
            {"_id": "a", "n": 3},
            {"_id": "b", "n": 1},
            {"_id": "c", "n": 2},
            {"_id": "d"}
        ]));
        let q = parsed(json!({"$orderby": {"n": -1}, "$skip": 1, "$limit": 2}));
        let QueryOutcome::Rows(result) = q.execute(data, None).unwrap() else {
            panic!("expected rows");
        };
        let ids: Vec<_> = result.iter().map(|r| r["_id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("b")]);
    }

    #[test]
    fn count_ignores_cursor() {
        let data = rows(json!([{"k": 1}, {"k": 1}, {"k": 2}]));
        let q = parsed(json!({"k": 1, "$count": true, "$limit": 1}));
        assert_eq!(q.execute(data, None).unwrap(), QueryOutcome::Count(2));
    }
}
