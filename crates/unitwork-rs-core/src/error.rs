//! Core error types for the unitwork-rs engine.
//!
//! This module provides the [`OrmError`] enum covering every failure the
//! change-tracking and commit engine can report, the [`StorageError`] enum
//! that storage drivers surface, and a [`ValidationError`] carrying optional
//! per-property errors.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Represents a validation error with optional property-level errors.
///
/// Validation errors can be either simple (a single message) or compound
/// (containing per-property error lists).
///
/// # Examples
///
/// ```
/// use unitwork_rs_core::error::ValidationError;
///
/// // Simple validation error
/// let err = ValidationError::new("This field is required.", "required");
///
/// // Property-level validation errors
/// let mut field_errors = std::collections::HashMap::new();
/// field_errors.insert(
///     "email".to_string(),
///     vec![ValidationError::new("Invalid email address.", "invalid")],
/// );
/// let err = ValidationError::with_field_errors(field_errors);
/// ```
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The primary error message.
    pub message: String,
    /// A short code identifying the type of validation failure (e.g. "required", "invalid").
    pub code: String,
    /// Additional parameters providing context for the error message.
    pub params: HashMap<String, String>,
    /// Per-property validation errors, keyed by property name.
    pub field_errors: HashMap<String, Vec<Self>>,
}

impl ValidationError {
    /// Creates a new `ValidationError` with a message and code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            params: HashMap::new(),
            field_errors: HashMap::new(),
        }
    }

    /// Creates a `ValidationError` containing per-property errors.
    pub fn with_field_errors(field_errors: HashMap<String, Vec<Self>>) -> Self {
        Self {
            message: String::new(),
            code: String::new(),
            params: HashMap::new(),
            field_errors,
        }
    }

    /// Adds a parameter to this validation error.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            write!(f, "{}", self.message)?;
        } else if !self.field_errors.is_empty() {
            let mut fields: Vec<_> = self.field_errors.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            let mut first = true;
            for (field, errors) in fields {
                for error in errors {
                    if !first {
                        write!(f, "; ")?;
                    }
                    write!(f, "{field}: {error}")?;
                    first = false;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by a storage driver.
///
/// Drivers must report uniqueness failures as [`StorageError::UniqueViolation`]
/// so the commit orchestrator can translate them into
/// [`OrmError::UniqueConstraintViolation`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A unique constraint was violated by a write.
    #[error("unique constraint failed on {kind} ({})", fields.join(", "))]
    UniqueViolation {
        /// The kind whose constraint failed.
        kind: String,
        /// The offending fields.
        fields: Vec<String>,
    },

    /// The targeted row does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Any other driver failure (connection, syntax, ...).
    #[error("driver error: {0}")]
    Driver(String),
}

/// The error type for every engine operation.
///
/// The first group of variants is raised before any storage write is
/// attempted; see [`OrmError::is_pre_write`].
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Lifecycle ────────────────────────────────────────────────────

    /// An operation was attempted on a deleted entity.
    #[error("Deleted object: {0}")]
    DeletedObject(String),

    /// A load was attempted on an entity that has never been stored.
    #[error("Uncommitted object: {0}")]
    UncommittedObject(String),

    /// A write was attempted on a frozen snapshot.
    #[error("Read-only object: {0}")]
    ReadOnly(String),

    // ── Validation ───────────────────────────────────────────────────

    /// A required property was missing when creating an entity.
    #[error("Required property '{property}' missing on {kind}")]
    RequiredProperty {
        /// The human-readable kind name.
        kind: String,
        /// The missing property.
        property: String,
    },

    /// An entity failed validation.
    #[error("Validation error on {kind}: {error}")]
    Validation {
        /// The human-readable kind name.
        kind: String,
        /// The underlying validation failure.
        error: ValidationError,
    },

    /// A before-hook aborted the operation.
    #[error("Hook aborted {operation} on {kind}: {reason}")]
    HookAborted {
        /// The kind whose hook aborted.
        kind: String,
        /// The operation that was aborted (create, update, delete).
        operation: String,
        /// Why the hook aborted.
        reason: String,
    },

    /// Illegal projection or where-clause usage.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // ── Storage ──────────────────────────────────────────────────────

    /// A storage write violated a unique constraint.
    #[error("Unique constraint violation on {kind}: {}", fields.join(", "))]
    UniqueConstraintViolation {
        /// The kind whose constraint failed.
        kind: String,
        /// The offending fields.
        fields: Vec<String>,
    },

    /// The storage driver failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The encryption collaborator failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was violated (missing registry entry,
    /// unresolvable reverse relation). Not meant to be caught.
    #[error("Programming error: {0}")]
    Programming(String),
}

impl OrmError {
    /// Returns `true` if this error is raised before any storage write.
    pub const fn is_pre_write(&self) -> bool {
        matches!(
            self,
            Self::DeletedObject(_)
                | Self::UncommittedObject(_)
                | Self::ReadOnly(_)
                | Self::RequiredProperty { .. }
                | Self::Validation { .. }
                | Self::HookAborted { .. }
                | Self::UnsupportedOperation(_)
        )
    }

    /// Translates a storage failure, turning uniqueness violations into
    /// [`OrmError::UniqueConstraintViolation`].
    pub fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation { kind, fields } => {
                Self::UniqueConstraintViolation { kind, fields }
            }
            other => Self::Storage(other),
        }
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;
