//! Settings for the unitwork-rs engine.
//!
//! This module provides the [`Settings`] struct, which holds every tunable of
//! the change-tracking engine with sensible defaults. A `Session` is built
//! from one `Settings` value; there is no global settings instance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default soft-delete column names.
///
/// Kinds that opt into soft deletion without naming their own columns use
/// these. A kind may override either name in its registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteSettings {
    /// The boolean flag column set to `true` when a row is soft-deleted.
    pub flag_field: String,
    /// The optional timestamp column set to the deletion time.
    pub timestamp_field: Option<String>,
}

impl Default for SoftDeleteSettings {
    fn default() -> Self {
        Self {
            flag_field: "deleted".to_string(),
            timestamp_field: Some("deletedAt".to_string()),
        }
    }
}

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use unitwork_rs_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.soft_delete.flag_field, "deleted");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// The tracing filter directive (e.g. "info", "unitwork_rs_db=debug").
    pub log_level: String,

    // ── Persistence ──────────────────────────────────────────────────

    /// Default soft-delete column names.
    pub soft_delete: SoftDeleteSettings,
    /// Maximum number of rows per bulk storage call. `None` sends everything
    /// in one call.
    pub batch_size: Option<usize>,
    /// Log a warning when a relation connects to a target that has its own
    /// uncommitted changes.
    pub warn_on_dirty_connect: bool,
    /// Whether reads include soft-deleted rows unless told otherwise.
    pub include_deleted_by_default: bool,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Additional settings not covered above.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            soft_delete: SoftDeleteSettings::default(),
            batch_size: None,
            warn_on_dirty_connect: true,
            include_deleted_by_default: false,
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Splits `len` rows into chunk sizes according to [`Settings::batch_size`].
    pub fn chunk_size(&self, len: usize) -> usize {
        match self.batch_size {
            Some(size) if size > 0 => size,
            _ => len.max(1),
        }
    }
}
