//! # unitwork-rs
//!
//! A unit-of-work ORM engine for Rust.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. Depend on `unitwork-rs` to get the engine, or on the individual
//! crates for finer-grained control.

/// Error taxonomy, settings, and logging.
pub use unitwork_rs_core as core;

/// The engine: registry, session, change tracking, diffing and commits.
#[cfg(feature = "db")]
pub use unitwork_rs_db as db;

/// Recording storage driver, test cipher, fixtures and call assertions.
#[cfg(feature = "testing")]
pub use unitwork_rs_test as test;

/// The types most programs need, in one import.
#[cfg(feature = "db")]
pub mod prelude {
    pub use unitwork_rs_core::{OrmError, OrmResult, Settings, StorageError, ValidationError};
    pub use unitwork_rs_db::query::{Filter, Lookup, ReadArgs};
    pub use unitwork_rs_db::registry::{
        JointableDef, KindMeta, PropertyDef, Registry, RelationDef,
    };
    pub use unitwork_rs_db::{
        Cipher, EntityKey, Guid, HookOutcome, ModelSet, Record, Session, Slot, StorageDriver,
        Value,
    };
}
