//! # unitwork-rs-test
//!
//! Testing support for unitwork-rs. Provides an in-memory
//! [`RecordingDriver`] that captures every storage call as JSON, a
//! reversible [`TestCipher`], a CRM-style fixture registry, and assertion
//! helpers for the number and shape of storage calls.

pub mod assert_calls;
pub mod cipher;
pub mod fixtures;
pub mod recording_driver;

pub use assert_calls::{assert_max_calls, assert_no_writes, assert_num_calls};
pub use cipher::TestCipher;
pub use fixtures::{crm_registry, crm_session};
pub use recording_driver::RecordingDriver;
