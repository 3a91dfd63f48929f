//! Nested write payloads.
//!
//! The diff engine turns in-memory changes into one [`WritePayload`] per
//! top-level write. Scalar columns map to values; relation fields map to a
//! [`NestedWrite`] carrying nested creates, connects, updates and deletes.

use std::collections::BTreeMap;

use crate::guid::Guid;
use crate::value::Value;

/// Identifies a single row for connect/update/delete.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereUnique {
    /// By primary id.
    Id(Guid),
    /// By a named compound key. Fields are in canonical column order.
    Compound {
        /// The compound key name.
        name: String,
        /// The key columns and their values.
        fields: Vec<(String, Value)>,
    },
}

impl WhereUnique {
    /// Renders this selector as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Id(guid) => serde_json::json!({ "id": guid.to_value().to_json() }),
            Self::Compound { name, fields } => {
                let inner: serde_json::Map<String, serde_json::Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::json!({ name.as_str(): inner })
            }
        }
    }
}

/// One nested update: which row, and what to write.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedUpdate {
    /// The row to update.
    pub where_: WhereUnique,
    /// The columns and relations to write.
    pub data: WritePayload,
}

/// The operations applied through one relation field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedWrite {
    /// Rows to create and associate.
    pub create: Vec<WritePayload>,
    /// Existing rows to associate.
    pub connect: Vec<WhereUnique>,
    /// Associated rows to update.
    pub update: Vec<NestedUpdate>,
    /// Associated rows to delete.
    pub delete: Vec<WhereUnique>,
    /// Clears a to-one association.
    pub disconnect: bool,
    /// `true` for a to-one relation.
    pub single: bool,
}

impl NestedWrite {
    /// An empty nested write for a to-one relation.
    pub fn one() -> Self {
        Self {
            single: true,
            ..Self::default()
        }
    }

    /// An empty nested write for a to-many relation.
    pub fn many() -> Self {
        Self::default()
    }

    /// Returns `true` if no operation is recorded.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.connect.is_empty()
            && self.update.is_empty()
            && self.delete.is_empty()
            && !self.disconnect
    }

    /// Renders this nested write as JSON. To-one relations use object
    /// shapes; to-many relations use arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if self.single {
            if let Some(create) = self.create.first() {
                map.insert("create".into(), create.to_json());
            }
            if let Some(connect) = self.connect.first() {
                map.insert("connect".into(), connect.to_json());
            }
            if let Some(update) = self.update.first() {
                map.insert("update".into(), update.data.to_json());
            }
            if self.disconnect {
                map.insert("disconnect".into(), serde_json::Value::Bool(true));
            }
        } else {
            if !self.create.is_empty() {
                map.insert(
                    "create".into(),
                    self.create.iter().map(WritePayload::to_json).collect(),
                );
            }
            if !self.connect.is_empty() {
                map.insert(
                    "connect".into(),
                    self.connect.iter().map(WhereUnique::to_json).collect(),
                );
            }
            if !self.update.is_empty() {
                map.insert(
                    "update".into(),
                    self.update
                        .iter()
                        .map(|u| {
                            serde_json::json!({
                                "where": u.where_.to_json(),
                                "data": u.data.to_json(),
                            })
                        })
                        .collect(),
                );
            }
            if !self.delete.is_empty() {
                map.insert(
                    "delete".into(),
                    self.delete.iter().map(WhereUnique::to_json).collect(),
                );
            }
        }
        serde_json::Value::Object(map)
    }
}

/// A field of a [`WritePayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadField {
    /// A scalar column.
    Value(Value),
    /// Nested relation operations.
    Nested(NestedWrite),
}

/// The data of one create or update.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::payload::WritePayload;
///
/// let mut data = WritePayload::new();
/// data.insert_value("firstName", "Ann");
/// assert!(data.is_flat());
/// assert_eq!(data.to_json(), serde_json::json!({"firstName": "Ann"}));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePayload {
    fields: BTreeMap<String, PayloadField>,
}

impl WritePayload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar column.
    pub fn insert_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .insert(name.into(), PayloadField::Value(value.into()));
    }

    /// Sets a relation field.
    pub fn insert_nested(&mut self, name: impl Into<String>, nested: NestedWrite) {
        self.fields.insert(name.into(), PayloadField::Nested(nested));
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<PayloadField> {
        self.fields.remove(name)
    }

    /// Returns a field.
    pub fn get(&self, name: &str) -> Option<&PayloadField> {
        self.fields.get(name)
    }

    /// Returns a scalar column.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(PayloadField::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a relation field.
    pub fn nested(&self, name: &str) -> Option<&NestedWrite> {
        match self.fields.get(name) {
            Some(PayloadField::Nested(n)) => Some(n),
            _ => None,
        }
    }

    /// Returns `true` if the payload has this field.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over the field names.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `true` if the payload carries no nested relation writes.
    pub fn is_flat(&self) -> bool {
        self.fields
            .values()
            .all(|f| matches!(f, PayloadField::Value(_)))
    }

    /// Renders the payload as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(name, field)| {
                let rendered = match field {
                    PayloadField::Value(v) => v.to_json(),
                    PayloadField::Nested(n) => n.to_json(),
                };
                (name.clone(), rendered)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}
