//! Relationship resolution.
//!
//! - [`wrap`]: single-entity foreign-key relations and their reverse
//!   pointers
//! - [`jointable`]: many-to-many relations through an intermediate kind

pub mod jointable;
pub mod wrap;

pub use jointable::{compound_fields, row_key};
