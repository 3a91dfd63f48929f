//! Storage driver boundary.
//!
//! The engine never talks to a database directly. Every read and write goes
//! through a [`StorageDriver`], which accepts nested [`WritePayload`]s and
//! [`QueryPlan`]s and reports failures as [`StorageError`]s. Uniqueness
//! failures must surface as [`StorageError::UniqueViolation`] so the
//! commit orchestrator can translate them.

use unitwork_rs_core::StorageError;

use crate::payload::{WhereUnique, WritePayload};
use crate::query::filter::Filter;
use crate::query::planner::QueryPlan;
use crate::record::Record;

/// Minimal async storage interface, one method per primitive operation.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    /// Creates one row, including nested relation writes.
    async fn create(&self, kind: &str, data: &WritePayload) -> Result<Record, StorageError>;

    /// Creates many flat rows. Returns the number created.
    async fn create_many(&self, kind: &str, data: &[WritePayload]) -> Result<u64, StorageError>;

    /// Updates one row, including nested relation writes.
    async fn update(
        &self,
        kind: &str,
        target: &WhereUnique,
        data: &WritePayload,
    ) -> Result<Record, StorageError>;

    /// Applies the same flat update to every matching row.
    async fn update_many(
        &self,
        kind: &str,
        filter: &Filter,
        data: &WritePayload,
    ) -> Result<u64, StorageError>;

    /// Deletes one row.
    async fn delete(&self, kind: &str, target: &WhereUnique) -> Result<(), StorageError>;

    /// Deletes every matching row.
    async fn delete_many(&self, kind: &str, filter: &Filter) -> Result<u64, StorageError>;

    /// Runs a read plan.
    async fn find_many(&self, plan: &QueryPlan) -> Result<Vec<Record>, StorageError>;

    /// Runs a read plan expected to match at most one row.
    async fn find_unique(&self, plan: &QueryPlan) -> Result<Option<Record>, StorageError> {
        Ok(self.find_many(plan).await?.into_iter().next())
    }

    /// Counts matching rows.
    async fn count(&self, kind: &str, filter: &Filter) -> Result<u64, StorageError>;
}

/// An extra storage call requested by a lifecycle hook.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    /// See [`StorageDriver::create`].
    Create {
        /// The kind to write.
        kind: String,
        /// The row.
        data: WritePayload,
    },
    /// See [`StorageDriver::create_many`].
    CreateMany {
        /// The kind to write.
        kind: String,
        /// The rows.
        data: Vec<WritePayload>,
    },
    /// See [`StorageDriver::update`].
    Update {
        /// The kind to write.
        kind: String,
        /// The row to update.
        target: WhereUnique,
        /// The changes.
        data: WritePayload,
    },
    /// See [`StorageDriver::update_many`].
    UpdateMany {
        /// The kind to write.
        kind: String,
        /// The rows to update.
        filter: Filter,
        /// The changes.
        data: WritePayload,
    },
    /// See [`StorageDriver::delete`].
    Delete {
        /// The kind to delete from.
        kind: String,
        /// The row to delete.
        target: WhereUnique,
    },
    /// See [`StorageDriver::delete_many`].
    DeleteMany {
        /// The kind to delete from.
        kind: String,
        /// The rows to delete.
        filter: Filter,
    },
}

impl StorageOp {
    /// The kind this operation writes.
    pub fn kind(&self) -> &str {
        match self {
            Self::Create { kind, .. }
            | Self::CreateMany { kind, .. }
            | Self::Update { kind, .. }
            | Self::UpdateMany { kind, .. }
            | Self::Delete { kind, .. }
            | Self::DeleteMany { kind, .. } => kind,
        }
    }

    /// Sends this operation to the driver.
    ///
    /// # Errors
    ///
    /// Returns whatever the driver reports.
    pub async fn execute(&self, driver: &dyn StorageDriver) -> Result<(), StorageError> {
        match self {
            Self::Create { kind, data } => driver.create(kind, data).await.map(drop),
            Self::CreateMany { kind, data } => driver.create_many(kind, data).await.map(drop),
            Self::Update { kind, target, data } => {
                driver.update(kind, target, data).await.map(drop)
            }
            Self::UpdateMany { kind, filter, data } => {
                driver.update_many(kind, filter, data).await.map(drop)
            }
            Self::Delete { kind, target } => driver.delete(kind, target).await,
            Self::DeleteMany { kind, filter } => driver.delete_many(kind, filter).await.map(drop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Test that StorageDriver is object-safe
    fn _assert_object_safe(_: &dyn StorageDriver) {}

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl StorageDriver for Calls {
        async fn create(&self, kind: &str, _: &WritePayload) -> Result<Record, StorageError> {
            self.0.lock().unwrap().push(format!("create {kind}"));
            Ok(Record::new())
        }
        async fn create_many(&self, kind: &str, data: &[WritePayload]) -> Result<u64, StorageError> {
            self.0.lock().unwrap().push(format!("create_many {kind}"));
            Ok(data.len() as u64)
        }
        async fn update(&self, kind: &str, _: &WhereUnique, _: &WritePayload) -> Result<Record, StorageError> {
            self.0.lock().unwrap().push(format!("update {kind}"));
            Ok(Record::new())
        }
        async fn update_many(&self, kind: &str, _: &Filter, _: &WritePayload) -> Result<u64, StorageError> {
            self.0.lock().unwrap().push(format!("update_many {kind}"));
            Ok(0)
        }
        async fn delete(&self, kind: &str, _: &WhereUnique) -> Result<(), StorageError> {
            Err(StorageError::NotFound(kind.to_string()))
        }
        async fn delete_many(&self, kind: &str, _: &Filter) -> Result<u64, StorageError> {
            self.0.lock().unwrap().push(format!("delete_many {kind}"));
            Ok(0)
        }
        async fn find_many(&self, plan: &QueryPlan) -> Result<Vec<Record>, StorageError> {
            Ok(vec![Record::new().with("kind", plan.kind.as_str()), Record::new()])
        }
        async fn count(&self, _: &str, _: &Filter) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let driver = Calls::default();
        StorageOp::Create { kind: "Note".into(), data: WritePayload::new() }
            .execute(&driver)
            .await
            .unwrap();
        StorageOp::DeleteMany { kind: "Note".into(), filter: Filter::eq("id", 1) }
            .execute(&driver)
            .await
            .unwrap();
        let err = StorageOp::Delete { kind: "Note".into(), target: WhereUnique::Id(crate::guid::Guid::generate()) }
            .execute(&driver)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("Note".into()));
        assert_eq!(*driver.0.lock().unwrap(), vec!["create Note", "delete_many Note"]);
    }

    #[test]
    fn test_find_unique_defaults_to_first_row() {
        let driver = Calls::default();
        let plan = QueryPlan::new("Note");
        let row = tokio_test::block_on(driver.find_unique(&plan)).unwrap();
        assert_eq!(row.and_then(|r| r.value("kind").cloned()), Some("Note".into()));
    }
}
