//! # unitwork-rs-core
//!
//! Core types shared by every unitwork-rs crate. This crate has no engine
//! dependencies and provides the foundation the ORM layer builds on.
//!
//! ## Modules
//!
//! - [`error`] - The [`OrmError`] taxonomy, [`StorageError`] and result aliases
//! - [`settings`] - Engine settings with sensible defaults
//! - [`settings_loader`] - Loading settings from TOML/JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{OrmError, OrmResult, StorageError, ValidationError};
pub use settings::{Settings, SoftDeleteSettings};
