//! Property validators.
//!
//! Validators are attached to persisted properties through
//! [`PropertyDef::validator`](crate::registry::PropertyDef::validator) and run
//! against the root entity before any storage write.

use std::fmt;

use regex::Regex;
use unitwork_rs_core::ValidationError;

use crate::value::Value;

/// A check applied to a single property value.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::validators::{Validator, MaxLengthValidator};
/// use unitwork_rs_db::value::Value;
///
/// let v = MaxLengthValidator::new(5);
/// assert!(v.validate(&Value::String("hi".into())).is_ok());
/// assert!(v.validate(&Value::String("toolong".into())).is_err());
/// ```
pub trait Validator: Send + Sync + fmt::Debug {
    /// Validates the given value.
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;

    /// Returns a human-readable name for this validator.
    fn name(&self) -> &str;
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Rejects strings longer than `max_length` characters.
#[derive(Debug, Clone)]
pub struct MaxLengthValidator {
    /// The maximum allowed length.
    pub max_length: usize,
}

impl MaxLengthValidator {
    /// Creates a new `MaxLengthValidator`.
    pub const fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Validator for MaxLengthValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if let Value::String(s) = value {
            let len = s.chars().count();
            if len > self.max_length {
                return Err(ValidationError::new(
                    format!(
                        "Ensure this value has at most {} characters (it has {len}).",
                        self.max_length
                    ),
                    "max_length",
                )
                .with_param("limit_value", self.max_length.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MaxLengthValidator"
    }
}

/// Rejects strings shorter than `min_length` characters.
#[derive(Debug, Clone)]
pub struct MinLengthValidator {
    /// The minimum required length.
    pub min_length: usize,
}

impl MinLengthValidator {
    /// Creates a new `MinLengthValidator`.
    pub const fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl Validator for MinLengthValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if let Value::String(s) = value {
            let len = s.chars().count();
            if len < self.min_length {
                return Err(ValidationError::new(
                    format!(
                        "Ensure this value has at least {} characters (it has {len}).",
                        self.min_length
                    ),
                    "min_length",
                )
                .with_param("limit_value", self.min_length.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MinLengthValidator"
    }
}

/// Rejects numbers above `max_value`.
#[derive(Debug, Clone)]
pub struct MaxValueValidator {
    /// The maximum allowed value.
    pub max_value: f64,
}

impl MaxValueValidator {
    /// Creates a new `MaxValueValidator`.
    pub const fn new(max_value: f64) -> Self {
        Self { max_value }
    }
}

impl Validator for MaxValueValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match numeric(value) {
            Some(n) if n > self.max_value => Err(ValidationError::new(
                format!(
                    "Ensure this value is less than or equal to {}.",
                    self.max_value
                ),
                "max_value",
            )),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "MaxValueValidator"
    }
}

/// Rejects numbers below `min_value`.
#[derive(Debug, Clone)]
pub struct MinValueValidator {
    /// The minimum required value.
    pub min_value: f64,
}

impl MinValueValidator {
    /// Creates a new `MinValueValidator`.
    pub const fn new(min_value: f64) -> Self {
        Self { min_value }
    }
}

impl Validator for MinValueValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match numeric(value) {
            Some(n) if n < self.min_value => Err(ValidationError::new(
                format!(
                    "Ensure this value is greater than or equal to {}.",
                    self.min_value
                ),
                "min_value",
            )),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "MinValueValidator"
    }
}

/// Requires strings to match a regular expression.
#[derive(Debug, Clone)]
pub struct RegexValidator {
    regex: Regex,
    message: String,
}

impl RegexValidator {
    /// Compiles `pattern` into a validator.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error if `pattern` is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            message: "Enter a valid value.".to_string(),
        })
    }

    /// Replaces the error message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for RegexValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::String(s) if !self.regex.is_match(s) => {
                Err(ValidationError::new(self.message.clone(), "invalid")
                    .with_param("pattern", self.regex.as_str()))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "RegexValidator"
    }
}

/// Rejects strings that are empty or whitespace only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotBlankValidator;

impl Validator for NotBlankValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::String(s) if s.trim().is_empty() => {
                Err(ValidationError::new("This field cannot be blank.", "blank"))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "NotBlankValidator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_length() {
        let v = MaxLengthValidator::new(5);
        assert!(v.validate(&Value::String("hello".into())).is_ok());
        let err = v.validate(&Value::String("toolong".into())).unwrap_err();
        assert_eq!(err.code, "max_length");
        assert_eq!(err.params.get("limit_value").map(String::as_str), Some("5"));
    }

    #[test]
    fn test_length_counts_chars() {
        let v = MaxLengthValidator::new(3);
        assert!(v.validate(&Value::String("äöü".into())).is_ok());
    }

    #[test]
    fn test_max_length_non_string() {
        let v = MaxLengthValidator::new(3);
        assert!(v.validate(&Value::Int(12345)).is_ok());
        assert!(v.validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_min_length() {
        let v = MinLengthValidator::new(3);
        assert!(v.validate(&Value::String("hello".into())).is_ok());
        assert!(v.validate(&Value::String("hi".into())).is_err());
    }

    #[test]
    fn test_max_value() {
        let v = MaxValueValidator::new(100.0);
        assert!(v.validate(&Value::Int(50)).is_ok());
        assert!(v.validate(&Value::Int(101)).is_err());
        assert!(v.validate(&Value::Float(100.1)).is_err());
    }

    #[test]
    fn test_min_value() {
        let v = MinValueValidator::new(0.0);
        assert!(v.validate(&Value::Float(0.0)).is_ok());
        assert!(v.validate(&Value::Int(-1)).is_err());
    }

    #[test]
    fn test_regex() {
        let v = RegexValidator::new(r"^[^@]+@[^@]+$")
            .unwrap()
            .with_message("Enter a valid email address.");
        assert!(v.validate(&Value::from("ann@example.com")).is_ok());
        let err = v.validate(&Value::from("nope")).unwrap_err();
        assert_eq!(err.message, "Enter a valid email address.");
        assert!(RegexValidator::new("(").is_err());
    }

    #[test]
    fn test_not_blank() {
        assert!(NotBlankValidator.validate(&Value::from("x")).is_ok());
        assert!(NotBlankValidator.validate(&Value::from("  ")).is_err());
        assert!(NotBlankValidator.validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_validator_names() {
        assert_eq!(MaxLengthValidator::new(5).name(), "MaxLengthValidator");
        assert_eq!(MinLengthValidator::new(5).name(), "MinLengthValidator");
        assert_eq!(MaxValueValidator::new(5.0).name(), "MaxValueValidator");
        assert_eq!(MinValueValidator::new(5.0).name(), "MinValueValidator");
        assert_eq!(NotBlankValidator.name(), "NotBlankValidator");
    }
}
