//! Storage call counting assertions.
//!
//! Provides [`assert_num_calls`], which resets the call counter of a
//! [`RecordingDriver`], awaits a future and asserts how many storage calls
//! it issued. A commit of a whole object graph should cost exactly one
//! write; these helpers catch regressions that split it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unitwork_rs_test::{assert_num_calls, crm_session, RecordingDriver};
//!
//! async fn example() {
//!     let driver = Arc::new(RecordingDriver::new());
//!     let mut session = crm_session(driver.clone());
//!     let contact = session.new_entity("Contact").unwrap();
//!     session.set(contact, "firstName", "Ann").unwrap();
//!     assert_num_calls(&driver, 1, session.create(contact))
//!         .await
//!         .unwrap();
//! }
//! ```

use std::future::Future;

use crate::recording_driver::RecordingDriver;

/// Asserts that exactly `expected_count` storage calls are issued while
/// awaiting `fut`, and returns its output.
///
/// # Panics
///
/// Panics if the number of calls does not match `expected_count`.
pub async fn assert_num_calls<Fut>(
    driver: &RecordingDriver,
    expected_count: usize,
    fut: Fut,
) -> Fut::Output
where
    Fut: Future,
{
    driver.reset_call_count();
    let output = fut.await;
    let actual = driver.call_count();
    assert_eq!(
        actual, expected_count,
        "Expected {expected_count} storage calls, but {actual} were issued"
    );
    output
}

/// Asserts that at most `max_count` storage calls are issued while
/// awaiting `fut`.
///
/// # Panics
///
/// Panics if more than `max_count` calls are issued.
pub async fn assert_max_calls<Fut>(
    driver: &RecordingDriver,
    max_count: usize,
    fut: Fut,
) -> Fut::Output
where
    Fut: Future,
{
    driver.reset_call_count();
    let output = fut.await;
    let actual = driver.call_count();
    assert!(
        actual <= max_count,
        "Expected at most {max_count} storage calls, but {actual} were issued"
    );
    output
}

/// Asserts that the driver has logged no create, update or delete call.
///
/// # Panics
///
/// Panics listing the first write call found.
pub fn assert_no_writes(driver: &RecordingDriver) {
    let write = driver.calls().into_iter().find(|c| {
        c["op"]
            .as_str()
            .is_some_and(|op| !matches!(op, "find_many" | "count"))
    });
    assert!(write.is_none(), "Expected no storage writes, found {write:?}");
}
