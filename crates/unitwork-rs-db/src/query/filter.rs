//! Where-clauses for reads and bulk writes.
//!
//! [`Lookup`] is a field-level comparison and [`Filter`] combines lookups
//! with AND, OR and NOT, or descends into a relation.
//!
//! # Examples
//!
//! ```
//! use unitwork_rs_db::query::filter::{Filter, Lookup};
//! use unitwork_rs_db::value::Value;
//!
//! // title = "Kickoff" AND NOT(done = true)
//! let f = Filter::field("title", Lookup::Exact(Value::from("Kickoff")))
//!     & !Filter::field("done", Lookup::Exact(Value::from(true)));
//!
//! // any related tag named "urgent"
//! let tagged = Filter::relation("tags", Filter::eq("name", "urgent"));
//! ```

use std::cmp::Ordering;
use std::ops;

use crate::record::{Record, RecordValue};
use crate::value::Value;

/// A field-level comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// `field = value`.
    Exact(Value),
    /// `field <> value`.
    Not(Value),
    /// `field IN (values...)`.
    In(Vec<Value>),
    /// `field NOT IN (values...)`.
    NotIn(Vec<Value>),
    /// `field > value`.
    Gt(Value),
    /// `field >= value`.
    Gte(Value),
    /// `field < value`.
    Lt(Value),
    /// `field <= value`.
    Lte(Value),
    /// Substring match.
    Contains(String),
    /// Prefix match.
    StartsWith(String),
    /// Suffix match.
    EndsWith(String),
    /// `field IS NULL` (`true`) or `field IS NOT NULL` (`false`).
    IsNull(bool),
    /// Regular expression match.
    Regex(String),
}

impl Lookup {
    /// Evaluates this lookup against a stored value.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Exact(v) => value.same_as(v),
            Self::Not(v) => !value.same_as(v),
            Self::In(vs) => vs.iter().any(|v| value.same_as(v)),
            Self::NotIn(vs) => !vs.iter().any(|v| value.same_as(v)),
            Self::Gt(v) => compare(value, v) == Some(Ordering::Greater),
            Self::Gte(v) => matches!(compare(value, v), Some(Ordering::Greater | Ordering::Equal)),
            Self::Lt(v) => compare(value, v) == Some(Ordering::Less),
            Self::Lte(v) => matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal)),
            Self::Contains(s) => value.as_str().is_some_and(|v| v.contains(s.as_str())),
            Self::StartsWith(s) => value.as_str().is_some_and(|v| v.starts_with(s.as_str())),
            Self::EndsWith(s) => value.as_str().is_some_and(|v| v.ends_with(s.as_str())),
            Self::IsNull(expected) => value.is_null() == *expected,
            Self::Regex(pattern) => match (value.as_str(), regex::Regex::new(pattern)) {
                (Some(v), Ok(re)) => re.is_match(v),
                _ => false,
            },
        }
    }

    /// Renders this lookup as a JSON condition object.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        let list = |vs: &[Value]| serde_json::Value::Array(vs.iter().map(Value::to_json).collect());
        match self {
            Self::Exact(v) => json!({ "equals": v.to_json() }),
            Self::Not(v) => json!({ "not": v.to_json() }),
            Self::In(vs) => json!({ "in": list(vs) }),
            Self::NotIn(vs) => json!({ "notIn": list(vs) }),
            Self::Gt(v) => json!({ "gt": v.to_json() }),
            Self::Gte(v) => json!({ "gte": v.to_json() }),
            Self::Lt(v) => json!({ "lt": v.to_json() }),
            Self::Lte(v) => json!({ "lte": v.to_json() }),
            Self::Contains(s) => json!({ "contains": s }),
            Self::StartsWith(s) => json!({ "startsWith": s }),
            Self::EndsWith(s) => json!({ "endsWith": s }),
            Self::IsNull(true) => json!({ "equals": null }),
            Self::IsNull(false) => json!({ "not": null }),
            Self::Regex(p) => json!({ "regex": p }),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (a.timestamp_millis(), b.timestamp_millis()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

/// A composable where-clause.
///
/// Filters combine with `&` (AND), `|` (OR) and `!` (NOT).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A single field lookup.
    Field {
        /// The column name.
        field: String,
        /// The comparison.
        lookup: Lookup,
    },
    /// A condition on related rows (any related row matches).
    Relation {
        /// The relation name.
        field: String,
        /// The condition applied to the related rows.
        filter: Box<Filter>,
    },
    /// Logical AND.
    And(Vec<Filter>),
    /// Logical OR.
    Or(Vec<Filter>),
    /// Logical negation.
    Not(Box<Filter>),
}

impl Filter {
    /// Creates a field lookup.
    pub fn field(field: impl Into<String>, lookup: Lookup) -> Self {
        Self::Field {
            field: field.into(),
            lookup,
        }
    }

    /// Shorthand for an exact-match lookup.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Lookup::Exact(value.into()))
    }

    /// Creates a condition on related rows.
    pub fn relation(field: impl Into<String>, filter: Self) -> Self {
        Self::Relation {
            field: field.into(),
            filter: Box::new(filter),
        }
    }

    /// Returns `true` if this is an empty AND/OR.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }

    /// Returns `true` if `field` is constrained on this level of the filter,
    /// ignoring conditions nested inside relations.
    pub fn mentions(&self, field: &str) -> bool {
        match self {
            Self::Field { field: f, .. } => f == field,
            Self::Relation { .. } => false,
            Self::And(children) | Self::Or(children) => children.iter().any(|c| c.mentions(field)),
            Self::Not(inner) => inner.mentions(field),
        }
    }

    /// Evaluates this filter against a record. Missing columns read as
    /// null; relation conditions need the relation to be included.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Field { field, lookup } => {
                lookup.matches(record.value(field).unwrap_or(&Value::Null))
            }
            Self::Relation { field, filter } => match record.get(field) {
                Some(RecordValue::One(Some(r))) => filter.matches(r),
                Some(RecordValue::Many(rs)) => rs.iter().any(|r| filter.matches(r)),
                _ => false,
            },
            Self::And(children) => children.iter().all(|c| c.matches(record)),
            Self::Or(children) => children.iter().any(|c| c.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }

    /// Renders this filter as a JSON where-object.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Field { field, lookup } => json!({ field.as_str(): lookup.to_json() }),
            Self::Relation { field, filter } => {
                json!({ field.as_str(): { "some": filter.to_json() } })
            }
            Self::And(children) => {
                json!({ "AND": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            Self::Or(children) => {
                json!({ "OR": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            Self::Not(inner) => json!({ "NOT": inner.to_json() }),
        }
    }
}

impl ops::BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Filter {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattening() {
        let f = (Filter::eq("a", 1) & Filter::eq("b", 2)) & Filter::eq("c", 3);
        match &f {
            Filter::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected And with 3 children"),
        }
    }

    #[test]
    fn test_or_flattening() {
        let f = Filter::eq("a", 1) | (Filter::eq("b", 2) | Filter::eq("c", 3));
        match &f {
            Filter::Or(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected Or with 3 children"),
        }
    }

    #[test]
    fn test_double_negation() {
        let f = Filter::eq("active", true);
        assert_eq!(!!f.clone(), f);
    }

    #[test]
    fn test_mentions_ignores_relations() {
        let f = Filter::eq("title", "x") & !Filter::eq("deleted", true);
        assert!(f.mentions("deleted"));
        assert!(!f.mentions("done"));
        let nested = Filter::relation("tags", Filter::eq("deleted", false));
        assert!(!nested.mentions("deleted"));
    }

    #[test]
    fn test_matches_fields() {
        let row = Record::new()
            .with("title", "Kickoff meeting")
            .with("priority", 3_i64)
            .with("done", false);
        assert!(Filter::eq("title", "Kickoff meeting").matches(&row));
        assert!(Filter::field("priority", Lookup::Gte(Value::Int(3))).matches(&row));
        assert!(!Filter::field("priority", Lookup::Gt(Value::Float(3.5))).matches(&row));
        assert!(Filter::field("title", Lookup::StartsWith("Kick".into())).matches(&row));
        assert!(Filter::field("missing", Lookup::IsNull(true)).matches(&row));
        assert!((Filter::eq("done", true) | Filter::eq("priority", 3)).matches(&row));
        assert!(!(Filter::eq("done", true) & Filter::eq("priority", 3)).matches(&row));
        assert!(Filter::field("priority", Lookup::In(vec![Value::Int(1), Value::Int(3)])).matches(&row));
    }

    #[test]
    fn test_matches_relations() {
        let row = Record::new().with_many(
            "tags",
            vec![
                Record::new().with("name", "a"),
                Record::new().with("name", "b"),
            ],
        );
        assert!(Filter::relation("tags", Filter::eq("name", "b")).matches(&row));
        assert!(!Filter::relation("tags", Filter::eq("name", "c")).matches(&row));
        assert!(!Filter::relation("owner", Filter::eq("name", "a")).matches(&row));
    }

    #[test]
    fn test_to_json() {
        let f = Filter::eq("deleted", false) & Filter::field("id", Lookup::In(vec![Value::Int(1)]));
        assert_eq!(
            f.to_json(),
            serde_json::json!({"AND": [
                {"deleted": {"equals": false}},
                {"id": {"in": [1]}}
            ]})
        );
    }
}
