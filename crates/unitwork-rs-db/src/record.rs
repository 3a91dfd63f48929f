//! Rows returned by a storage driver.
//!
//! A [`Record`] is one row of a `find_many`/`find_unique` result, possibly
//! carrying nested rows for included relations and a `_count` side-channel.

use std::collections::BTreeMap;

use crate::guid::Guid;
use crate::value::Value;

/// Name of the field carrying aggregate counts.
pub const COUNT_FIELD: &str = "_count";

/// A single field of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A scalar column.
    Value(Value),
    /// An included to-one relation.
    One(Option<Box<Record>>),
    /// An included to-many relation.
    Many(Vec<Record>),
    /// Relation counts keyed by relation name.
    Counts(BTreeMap<String, i64>),
}

/// A row returned by the storage driver.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::record::Record;
/// use unitwork_rs_db::value::Value;
///
/// let row = Record::new().with("title", "Kickoff").with("done", false);
/// assert_eq!(row.value("title"), Some(&Value::from("Kickoff")));
/// assert!(row.value("missing").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, RecordValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar column.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .insert(name.into(), RecordValue::Value(value.into()));
        self
    }

    /// Adds the `id` column.
    #[must_use]
    pub fn with_id(self, guid: Guid) -> Self {
        self.with("id", guid.to_value())
    }

    /// Adds an included to-one relation.
    #[must_use]
    pub fn with_one(mut self, name: impl Into<String>, record: Option<Self>) -> Self {
        self.fields
            .insert(name.into(), RecordValue::One(record.map(Box::new)));
        self
    }

    /// Adds an included to-many relation.
    #[must_use]
    pub fn with_many(mut self, name: impl Into<String>, records: Vec<Self>) -> Self {
        self.fields.insert(name.into(), RecordValue::Many(records));
        self
    }

    /// Adds relation counts under [`COUNT_FIELD`].
    #[must_use]
    pub fn with_counts(mut self, counts: BTreeMap<String, i64>) -> Self {
        self.fields
            .insert(COUNT_FIELD.to_string(), RecordValue::Counts(counts));
        self
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, name: impl Into<String>, value: RecordValue) {
        self.fields.insert(name.into(), value);
    }

    /// Returns a field.
    pub fn get(&self, name: &str) -> Option<&RecordValue> {
        self.fields.get(name)
    }

    /// Returns a scalar column.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(RecordValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns the row identity read from its `id` column.
    pub fn guid(&self) -> Option<Guid> {
        self.value("id").and_then(Guid::from_value)
    }

    /// Returns the `_count` side-channel.
    pub fn counts(&self) -> Option<&BTreeMap<String, i64>> {
        match self.fields.get(COUNT_FIELD) {
            Some(RecordValue::Counts(c)) => Some(c),
            _ => None,
        }
    }

    /// Iterates over all fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &RecordValue)> {
        self.fields.iter()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the record as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, field) in &self.fields {
            let rendered = match field {
                RecordValue::Value(v) => v.to_json(),
                RecordValue::One(Some(r)) => r.to_json(),
                RecordValue::One(None) => serde_json::Value::Null,
                RecordValue::Many(rs) => {
                    serde_json::Value::Array(rs.iter().map(Self::to_json).collect())
                }
                RecordValue::Counts(c) => serde_json::json!(c),
            };
            map.insert(name.clone(), rendered);
        }
        serde_json::Value::Object(map)
    }
}
