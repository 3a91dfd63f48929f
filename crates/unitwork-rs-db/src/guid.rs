//! Entity identity.
//!
//! Every entity carries an immutable [`Guid`]. New entities generate one
//! client-side; hydrated entities take the one stored in their row.

use std::fmt;

use crate::value::Value;

/// A 16-byte entity identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Guid(uuid::Uuid);

impl Guid {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Builds an identifier from its raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Reads an identifier out of a stored value (UUID, string or bytes).
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_uuid().map(Self)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the identifier as a storable value.
    pub const fn to_value(self) -> Value {
        Value::Uuid(self.0)
    }
}

impl From<uuid::Uuid> for Guid {
    fn from(value: uuid::Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(Guid::generate(), Guid::generate());
    }

    #[test]
    fn test_value_roundtrip() {
        let guid = Guid::generate();
        assert_eq!(Guid::from_value(&guid.to_value()), Some(guid));
        assert_eq!(
            Guid::from_value(&Value::Bytes(guid.as_bytes().to_vec())),
            Some(guid)
        );
        assert_eq!(Guid::from_value(&Value::Null), None);
    }
}
