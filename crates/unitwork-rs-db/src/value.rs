//! Scalar values stored in entity properties.
//!
//! The [`Value`] enum is the scalar type used throughout the engine to
//! represent property values, storage payload leaves, and query parameters.
//! Relations are not values; they live in [`Slot`](crate::entity::Slot).

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// A storage-agnostic representation of a scalar property value.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::String("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(chrono::NaiveDate),
    /// A date and time without timezone (interpreted as UTC).
    DateTime(NaiveDateTime),
    /// A date and time with UTC timezone.
    DateTimeTz(DateTime<Utc>),
    /// A time without date.
    Time(chrono::NaiveTime),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON value.
    Json(serde_json::Value),
    /// A primitive array.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::DateTimeTz(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<chrono::NaiveDate> for Value {
    fn from(v: chrono::NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<chrono::NaiveTime> for Value {
    fn from(v: chrono::NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

impl Value {
    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to extract a boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a float value.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract a UUID.
    pub fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => uuid::Uuid::parse_str(s).ok(),
            Self::Bytes(b) => uuid::Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    /// Returns the instant this value denotes, for temporal values.
    pub fn timestamp_millis(&self) -> Option<i64> {
        match self {
            Self::DateTime(dt) => Some(dt.and_utc().timestamp_millis()),
            Self::DateTimeTz(dt) => Some(dt.timestamp_millis()),
            Self::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis()),
            _ => None,
        }
    }

    /// Equality used by change tracking.
    ///
    /// Identical to `==` except that temporal values compare by instant
    /// (a naive date-time equals the UTC date-time of the same moment) and
    /// lists compare element-wise with the same rule.
    pub fn same_as(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => match (self.timestamp_millis(), other.timestamp_millis()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Renders this value as plain JSON for payloads and logs.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => json!(b),
            Self::Int(i) => json!(i),
            Self::Float(v) => json!(v),
            Self::String(s) => json!(s),
            Self::Bytes(b) => {
                use base64::Engine as _;
                json!(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Date(d) => json!(d.to_string()),
            Self::DateTime(dt) => json!(dt.and_utc().to_rfc3339()),
            Self::DateTimeTz(dt) => json!(dt.to_rfc3339()),
            Self::Time(t) => json!(t.to_string()),
            Self::Uuid(u) => json!(u.to_string()),
            Self::Json(j) => j.clone(),
            Self::List(vals) => serde_json::Value::Array(vals.iter().map(Self::to_json).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(42_i32), Value::Int(42));
        assert_eq!(Value::from(42_i64), Value::Int(42));
    }

    #[test]
    fn test_from_string() {
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(
            Value::from("hello".to_string()),
            Value::String("hello".to_string())
        );
    }

    #[test]
    fn test_from_option() {
        let some_val: Option<i64> = Some(42);
        assert_eq!(Value::from(some_val), Value::Int(42));

        let none_val: Option<i64> = None;
        assert_eq!(Value::from(none_val), Value::Null);
    }

    #[test]
    fn test_display_list() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn test_as_uuid_from_string_and_bytes() {
        let u = uuid::Uuid::new_v4();
        assert_eq!(Value::String(u.to_string()).as_uuid(), Some(u));
        assert_eq!(Value::Bytes(u.as_bytes().to_vec()).as_uuid(), Some(u));
        assert_eq!(Value::Int(1).as_uuid(), None);
    }

    #[test]
    fn test_same_as_compares_dates_by_instant() {
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let tz = naive.and_utc();
        assert_ne!(Value::DateTime(naive), Value::DateTimeTz(tz));
        assert!(Value::DateTime(naive).same_as(&Value::DateTimeTz(tz)));
        assert!(!Value::DateTime(naive).same_as(&Value::DateTimeTz(tz + chrono::Duration::seconds(1))));
    }

    #[test]
    fn test_same_as_buffers_and_lists() {
        assert!(Value::Bytes(vec![1, 2]).same_as(&Value::Bytes(vec![1, 2])));
        assert!(!Value::Bytes(vec![1, 2]).same_as(&Value::Bytes(vec![2, 1])));
        assert!(Value::List(vec![Value::Int(1)]).same_as(&Value::List(vec![Value::Int(1)])));
        assert!(!Value::List(vec![Value::Int(1)]).same_as(&Value::List(vec![])));
        assert!(Value::Null.same_as(&Value::Null));
        assert!(!Value::Null.same_as(&Value::Int(0)));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Int(3).to_json(), serde_json::json!(3));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_json(), serde_json::json!("AQID"));
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::Bool(true)]).to_json(),
            serde_json::json!(["a", true])
        );
    }
}
