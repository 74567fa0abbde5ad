/// Typed query expressions for the document store.
///
/// Filter predicates are a sum type rather than free-form nested maps, so the
/// dual-storage proxy can validate them structurally before execution: every
/// field reference in the tree is checked against the class's lite set
/// (see `document::validate`). The shapes mirror the operators the
/// repositories actually use: equality, ranges over audit timestamps,
/// membership tests for message-id windows, and boolean combinators.
///
/// # Example
///
/// ```ignore
/// use engram::query::{Filter, Query};
///
/// let q = Query::new()
///     .filter(Filter::eq("group_id", "g1"))
///     .filter(Filter::r#in("sync_status", vec![(-1).into(), 0.into()]))
///     .sort_by("created_at", true)
///     .limit(100);
/// ```
use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A filter condition against a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals value.
    Eq { field: String, value: JsonValue },
    /// Field not equals value.
    Ne { field: String, value: JsonValue },
    /// Field greater than value.
    Gt { field: String, value: JsonValue },
    /// Field greater than or equal to value.
    Gte { field: String, value: JsonValue },
    /// Field less than value.
    Lt { field: String, value: JsonValue },
    /// Field less than or equal to value.
    Lte { field: String, value: JsonValue },
    /// Field value is one of the listed values.
    In { field: String, values: Vec<JsonValue> },
    /// Field value is none of the listed values (or the field is absent).
    NotIn { field: String, values: Vec<JsonValue> },
    /// Field contains substring (for strings) or element (for arrays).
    Contains { field: String, value: JsonValue },
    /// Field exists (is not null/missing).
    Exists { field: String },
    /// Field matches regex pattern (for strings).
    Matches { field: String, pattern: String },
    /// Logical AND of multiple filters.
    And(Vec<Filter>),
    /// Logical OR of multiple filters.
    Or(Vec<Filter>),
    /// Logical NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equals filter.
    pub fn ne(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a membership filter.
    pub fn r#in(field: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Create an exclusion filter.
    pub fn not_in(field: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self::NotIn {
            field: field.into(),
            values,
        }
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an exists filter.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    /// Create a regex match filter.
    pub fn matches(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Matches {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Combine filters with AND.
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Combine filters with OR.
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Negate a filter.
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Evaluate this filter against a JSON document.
    pub fn matches_value(&self, value: &JsonValue) -> bool {
        match self {
            Filter::Eq {
                field,
                value: expected,
            } => get_field(value, field).is_some_and(|v| &v == expected),
            Filter::Ne {
                field,
                value: expected,
            } => get_field(value, field).is_none_or(|v| &v != expected),
            Filter::Gt {
                field,
                value: expected,
            } => get_field(value, field)
                .is_some_and(|v| compare_json(&v, expected) == Some(Ordering::Greater)),
            Filter::Gte {
                field,
                value: expected,
            } => get_field(value, field).is_some_and(|v| {
                matches!(
                    compare_json(&v, expected),
                    Some(Ordering::Greater | Ordering::Equal)
                )
            }),
            Filter::Lt {
                field,
                value: expected,
            } => get_field(value, field)
                .is_some_and(|v| compare_json(&v, expected) == Some(Ordering::Less)),
            Filter::Lte {
                field,
                value: expected,
            } => get_field(value, field).is_some_and(|v| {
                matches!(
                    compare_json(&v, expected),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }),
            Filter::In { field, values } => {
                get_field(value, field).is_some_and(|v| values.contains(&v))
            }
            Filter::NotIn { field, values } => {
                get_field(value, field).is_none_or(|v| !values.contains(&v))
            }
            Filter::Contains {
                field,
                value: expected,
            } => get_field(value, field).is_some_and(|v| json_contains(&v, expected)),
            Filter::Exists { field } => get_field(value, field).is_some_and(|v| !v.is_null()),
            Filter::Matches { field, pattern } => get_field(value, field).is_some_and(|v| {
                if let Some(s) = v.as_str() {
                    regex::Regex::new(pattern).is_ok_and(|re| re.is_match(s))
                } else {
                    false
                }
            }),
            Filter::And(filters) => filters.iter().all(|f| f.matches_value(value)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches_value(value)),
            Filter::Not(filter) => !filter.matches_value(value),
        }
    }

    /// Collect every field name referenced anywhere in this filter tree.
    ///
    /// Used by query-field validation before execution.
    pub fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::In { field, .. }
            | Filter::NotIn { field, .. }
            | Filter::Contains { field, .. }
            | Filter::Exists { field }
            | Filter::Matches { field, .. } => {
                out.insert(field.clone());
            }
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_fields(out);
                }
            }
            Filter::Not(filter) => filter.collect_fields(out),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order (smallest first).
    Asc,
    /// Descending order (largest first).
    Desc,
}

/// Sort specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortBy {
    /// Field to sort by.
    pub field: String,
    /// Sort order.
    pub order: SortOrder,
}

impl SortBy {
    /// Create a new sort specification.
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    /// Sort ascending.
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Asc)
    }

    /// Sort descending.
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Desc)
    }
}

/// A query against a document-store collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// Filter conditions (implicitly ANDed).
    pub filters: Vec<Filter>,
    /// Sort specifications.
    pub sort: Vec<SortBy>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: Option<usize>,
}

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add multiple filter conditions (AND).
    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Add a sort specification.
    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortBy::new(
            field,
            if ascending {
                SortOrder::Asc
            } else {
                SortOrder::Desc
            },
        ));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of results to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check if a document matches all filters.
    pub fn matches(&self, value: &JsonValue) -> bool {
        self.filters.iter().all(|f| f.matches_value(value))
    }

    /// Collect every field name referenced by any filter.
    pub fn collect_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for f in &self.filters {
            f.collect_fields(&mut out);
        }
        out
    }

    /// Order two documents according to the sort specifications.
    pub fn compare_docs(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        for sort_spec in &self.sort {
            let a_val = get_field(a, &sort_spec.field);
            let b_val = get_field(b, &sort_spec.field);

            let cmp = match (a_val, b_val) {
                (Some(av), Some(bv)) => compare_json(&av, &bv).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };

            let cmp = match sort_spec.order {
                SortOrder::Asc => cmp,
                SortOrder::Desc => cmp.reverse(),
            };

            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    }
}

/// Get a field from a JSON value using dot notation.
pub(crate) fn get_field(value: &JsonValue, field: &str) -> Option<JsonValue> {
    let mut current = value;
    for part in field.split('.') {
        match current {
            JsonValue::Object(map) => {
                current = map.get(part)?;
            }
            JsonValue::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Compare two JSON values.
/// Returns ordering with nulls sorting before all other values.
pub(crate) fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        // Null sorts before everything
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        (JsonValue::Null, _) => Some(Ordering::Less),
        (_, JsonValue::Null) => Some(Ordering::Greater),

        (JsonValue::Number(a), JsonValue::Number(b)) => {
            let a_f = a.as_f64()?;
            let b_f = b.as_f64()?;
            a_f.partial_cmp(&b_f)
        }
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),

        // Mixed types are incomparable
        _ => None,
    }
}

/// Check if a JSON value contains another value.
fn json_contains(container: &JsonValue, item: &JsonValue) -> bool {
    match container {
        JsonValue::String(s) => {
            if let Some(substr) = item.as_str() {
                s.contains(substr)
            } else {
                false
            }
        }
        JsonValue::Array(arr) => arr.contains(item),
        JsonValue::Object(map) => {
            if let Some(key) = item.as_str() {
                map.contains_key(key)
            } else {
                false
            }
        }
        _ => false,
    }
}
