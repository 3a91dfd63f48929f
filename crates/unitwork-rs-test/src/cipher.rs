//! A reversible cipher for tests.
//!
//! [`TestCipher`] is not encryption: it base64-encodes the plaintext and
//! tags it with the key it was sealed with, so tests can assert that a
//! value reached the payload encrypted and that unique-encrypted columns
//! use a per-entity key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use unitwork_rs_core::{OrmError, OrmResult};
use unitwork_rs_db::{Cipher, Value};

const PREFIX: &str = "enc";
const SHARED_KEY: &str = "shared";

/// Seals strings as `enc:<key>:<base64 plaintext>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestCipher;

impl TestCipher {
    /// The sealed form of `plaintext` under `key`.
    pub fn sealed(plaintext: &str, key: Option<&[u8]>) -> String {
        format!("{PREFIX}:{}:{}", key_tag(key), STANDARD.encode(plaintext))
    }
}

fn key_tag(key: Option<&[u8]>) -> String {
    key.map_or_else(|| SHARED_KEY.to_string(), |k| STANDARD.encode(k))
}

impl Cipher for TestCipher {
    fn encrypt(&self, value: &Value, key: Option<&[u8]>) -> OrmResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(Value::String(Self::sealed(s, key))),
            other => Err(OrmError::Encryption(format!(
                "test cipher only seals strings, got {other:?}"
            ))),
        }
    }

    fn decrypt(&self, value: &Value, key: Option<&[u8]>) -> OrmResult<Value> {
        let Value::String(sealed) = value else {
            return Ok(value.clone());
        };
        let mut parts = sealed.splitn(3, ':');
        let (Some(PREFIX), Some(tag), Some(body)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(OrmError::Encryption(format!("not a sealed value: {sealed}")));
        };
        if tag != key_tag(key) {
            return Err(OrmError::Encryption("sealed with a different key".to_string()));
        }
        let bytes = STANDARD
            .decode(body)
            .map_err(|e| OrmError::Encryption(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|e| OrmError::Encryption(e.to_string()))
    }
}
