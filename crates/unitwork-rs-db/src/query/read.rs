//! Session-level reads: `read`, `find_unique` and `count`.

use tracing::Instrument;
use unitwork_rs_core::logging::operation_span;
use unitwork_rs_core::{OrmError, OrmResult};

use crate::entity::EntityKey;
use crate::guid::Guid;
use crate::query::filter::Filter;
use crate::query::planner::ReadArgs;
use crate::session::Session;

impl Session {
    /// Reads every row of `kind` matching `args` into the session.
    ///
    /// Before-read hooks of the kind may rewrite `args` first; after-read
    /// hooks run on each returned entity.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::plan`], with [`OrmError::HookAborted`] if a
    /// before-read hook rejects the read, and with storage errors.
    pub async fn read(&mut self, kind: &str, args: ReadArgs) -> OrmResult<Vec<EntityKey>> {
        let span = operation_span(kind, "read");
        async move {
            let mut args = args;
            self.run_read_hooks(kind, &mut args)?;
            let plan = self.plan(kind, &args)?;
            tracing::debug!(plan = %plan.to_json(), "reading");
            let rows = self
                .driver
                .find_many(&plan)
                .await
                .map_err(OrmError::from_storage)?;
            let mut keys = Vec::with_capacity(rows.len());
            for row in &rows {
                keys.push(self.hydrate(&plan, row)?);
            }
            for key in &keys {
                self.run_after_read(*key)?;
            }
            self.drain()?;
            Ok(keys)
        }
        .instrument(span)
        .await
    }

    /// Reads one entity by guid, or `None` if no (visible) row matches.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::read`].
    pub async fn find_unique(
        &mut self,
        kind: &str,
        guid: Guid,
        args: ReadArgs,
    ) -> OrmResult<Option<EntityKey>> {
        let span = operation_span(kind, "find_unique");
        async move {
            let mut args = args.filter(Filter::eq("id", guid.to_value()));
            self.run_read_hooks(kind, &mut args)?;
            let plan = self.plan(kind, &args)?;
            let Some(row) = self
                .driver
                .find_unique(&plan)
                .await
                .map_err(OrmError::from_storage)?
            else {
                return Ok(None);
            };
            let key = self.hydrate(&plan, &row)?;
            self.run_after_read(key)?;
            self.drain()?;
            Ok(Some(key))
        }
        .instrument(span)
        .await
    }

    /// Counts the (non soft-deleted) rows of `kind` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for unknown kinds and storage
    /// errors from the driver.
    pub async fn count(&self, kind: &str, filter: Option<Filter>) -> OrmResult<u64> {
        let filter = self
            .default_filter(kind, filter, false)?
            .unwrap_or_else(|| Filter::And(Vec::new()));
        self.driver
            .count(kind, &filter)
            .instrument(operation_span(kind, "count"))
            .await
            .map_err(OrmError::from_storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests_support::fixture_session;
    use crate::hooks::HookOutcome;
    use crate::record::Record;
    use crate::registry::{KindMeta, PropertyDef, Registry};
    use crate::value::Value;
    use std::sync::Arc;

    fn note_rows(driver: &crate::entity::tests_support::TestDriver) -> (Guid, Guid) {
        let (live, gone) = (Guid::generate(), Guid::generate());
        let mut rows = driver.rows.lock().unwrap();
        rows.push(Record::new().with_id(live).with("body", "kept").with("deleted", false));
        rows.push(Record::new().with_id(gone).with("body", "gone").with("deleted", true));
        (live, gone)
    }

    #[tokio::test]
    async fn test_read_hides_soft_deleted_rows() {
        let (mut s, driver) = fixture_session();
        let (live, _) = note_rows(&driver);
        let keys = s.read("Note", ReadArgs::new()).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(s.entity(keys[0]).unwrap().guid(), live);

        let all = s.read("Note", ReadArgs::new().include_deleted()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], keys[0]);
    }

    #[tokio::test]
    async fn test_find_unique_and_count() {
        let (mut s, driver) = fixture_session();
        let (live, gone) = note_rows(&driver);
        let key = s.find_unique("Note", live, ReadArgs::new()).await.unwrap();
        assert_eq!(s.value(key.unwrap(), "body").unwrap(), Value::from("kept"));
        assert!(s.find_unique("Note", gone, ReadArgs::new()).await.unwrap().is_none());
        assert_eq!(s.count("Note", None).await.unwrap(), 1);
        assert_eq!(
            s.count("Note", Some(Filter::eq("deleted", true))).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_read_hooks_rewrite_and_abort() {
        let registry = Registry::builder()
            .kind(
                KindMeta::new("Memo")
                    .with_property(PropertyDef::scalar("body"))
                    .before_read(|_, args| {
                        if args.take == Some(0) {
                            return HookOutcome::Abort("empty page".into());
                        }
                        args.filter = Some(Filter::eq("body", "public"));
                        HookOutcome::Continue
                    }),
            )
            .build()
            .unwrap();
        let (_, driver) = fixture_session();
        {
            let mut rows = driver.rows.lock().unwrap();
            rows.push(Record::new().with_id(Guid::generate()).with("body", "public"));
            rows.push(Record::new().with_id(Guid::generate()).with("body", "secret"));
        }
        let mut s = Session::new(Arc::new(registry), driver.clone());
        assert_eq!(s.read("Memo", ReadArgs::new()).await.unwrap().len(), 1);
        let err = s.read("Memo", ReadArgs::new().limit(0)).await.unwrap_err();
        assert!(matches!(err, OrmError::HookAborted { .. }));
    }
}
