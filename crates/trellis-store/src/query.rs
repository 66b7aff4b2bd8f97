//! Query predicates and search options.
//!
//! Predicates operate on top-level fields of JSON documents and cover
//! what the engine needs: equality, `$in`, `$gte` and `$any`
//! (array overlap) on label-like fields, plus presence checks.

use serde_json::Value;
use std::collections::BTreeMap;

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value.
    Eq(Value),
    /// Field equals one of the values.
    In(Vec<Value>),
    /// Field is greater than or equal to the value (numbers and
    /// strings; RFC 3339 timestamps compare by instant).
    Gte(Value),
    /// Field is an array sharing at least one element with the values.
    Any(Vec<Value>),
    /// Field is present and non-null (or absent/null for `false`).
    Exists(bool),
}

/// A conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    predicates: BTreeMap<String, Predicate>,
}

impl Query {
    /// The empty query, matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builder-style predicate addition.
    pub fn field(mut self, name: impl Into<String>, predicate: Predicate) -> Self {
        self.predicates.insert(name.into(), predicate);
        self
    }

    /// Shorthand for an equality predicate on a serializable value.
    pub fn eq(self, name: impl Into<String>, value: impl serde::Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.field(name, Predicate::Eq(value))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether `doc` satisfies every predicate.
    pub fn matches(&self, doc: &Value) -> bool {
        self.predicates.iter().all(|(field, predicate)| {
            let actual = doc.get(field).unwrap_or(&Value::Null);
            match predicate {
                Predicate::Eq(expected) => actual == expected,
                Predicate::In(options) => options.iter().any(|v| v == actual),
                Predicate::Gte(bound) => gte(actual, bound),
                Predicate::Any(values) => match actual {
                    Value::Array(items) => items.iter().any(|item| values.contains(item)),
                    _ => false,
                },
                Predicate::Exists(expected) => (*expected) != actual.is_null(),
            }
        })
    }
}

fn gte(actual: &Value, bound: &Value) -> bool {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        },
        // Timestamps serialize with variable fractional-second width,
        // which breaks lexicographic order at equal-prefix boundaries.
        (Value::String(a), Value::String(b)) => match (
            chrono::DateTime::parse_from_rfc3339(a),
            chrono::DateTime::parse_from_rfc3339(b),
        ) {
            (Ok(a), Ok(b)) => a >= b,
            _ => a.as_str() >= b.as_str(),
        },
        _ => false,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Ordering and limit options for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Order by a top-level field.
    pub order_by: Option<(String, SortOrder)>,

    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

impl SearchOptions {
    pub fn ordered(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            order_by: Some((field.into(), order)),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lock token options for `update`.
///
/// `lock` sets the document's `lock` field to the token only if it is
/// currently unset, as one conditional update; documents already locked
/// are skipped and not counted. `unlock` clears the field only where it
/// equals the token.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub lock: Option<String>,
    pub unlock: Option<String>,
}

impl UpdateOptions {
    pub fn acquire(token: impl Into<String>) -> Self {
        Self {
            lock: Some(token.into()),
            unlock: None,
        }
    }

    pub fn release(token: impl Into<String>) -> Self {
        Self {
            lock: None,
            unlock: Some(token.into()),
        }
    }
}
