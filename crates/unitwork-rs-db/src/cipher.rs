//! Encryption boundary.
//!
//! Encrypted properties pass through a [`Cipher`] when they are placed into
//! a write payload and when they are hydrated from a row. The engine never
//! holds ciphertext in entity state.

use std::fmt;

use unitwork_rs_core::{OrmError, OrmResult};

use crate::guid::Guid;
use crate::registry::Encryption;
use crate::value::Value;

/// Encrypts and decrypts property values.
///
/// `key` is `None` for the shared key and the entity's guid bytes for
/// unique-encrypted properties.
pub trait Cipher: Send + Sync + fmt::Debug {
    /// Encrypts a plaintext value.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Encryption`] if the value cannot be encrypted.
    fn encrypt(&self, value: &Value, key: Option<&[u8]>) -> OrmResult<Value>;

    /// Decrypts a stored value.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Encryption`] if the value cannot be decrypted.
    fn decrypt(&self, value: &Value, key: Option<&[u8]>) -> OrmResult<Value>;
}

/// The key material for one property of one entity.
pub(crate) fn key_for(mode: Encryption, guid: &Guid) -> Option<&[u8]> {
    match mode {
        Encryption::Standard => None,
        Encryption::Unique => Some(guid.as_bytes().as_slice()),
    }
}

pub(crate) fn missing_cipher(kind: &str, property: &str) -> OrmError {
    OrmError::Configuration(format!(
        "{kind}.{property} is encrypted but the session has no cipher"
    ))
}
