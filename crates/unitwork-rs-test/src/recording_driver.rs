//! An in-memory storage driver that records every call.
//!
//! [`RecordingDriver`] implements [`StorageDriver`] over a map of rows per
//! kind. Each call is appended to a log as JSON (`op`, `kind`, and `data`
//! and/or `where`) so tests can assert on the exact payloads the engine
//! produced, and a call counter backs
//! [`assert_num_calls`](crate::assert_num_calls).
//!
//! Writes apply their flat columns to the stored rows; nested relation
//! writes are recorded but not materialized.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unitwork_rs_db::{Guid, Record};
//! use unitwork_rs_test::{crm_session, RecordingDriver};
//!
//! let driver = Arc::new(RecordingDriver::new());
//! driver.seed("Contact", Record::new().with_id(Guid::generate()).with("firstName", "Ann"));
//! let session = crm_session(driver.clone());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;
use unitwork_rs_core::StorageError;
use unitwork_rs_db::payload::{PayloadField, WhereUnique, WritePayload};
use unitwork_rs_db::query::{Filter, QueryPlan};
use unitwork_rs_db::record::{Record, RecordValue};
use unitwork_rs_db::{Guid, StorageDriver};

/// An in-memory driver that logs every storage call.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    rows: Mutex<HashMap<String, Vec<Record>>>,
    calls: Mutex<Vec<serde_json::Value>>,
    plans: Mutex<Vec<QueryPlan>>,
    call_count: AtomicUsize,
    unique_violation: Mutex<Option<(String, Vec<String>)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingDriver {
    /// Creates an empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row of `kind` that reads will return.
    pub fn seed(&self, kind: &str, record: Record) {
        lock(&self.rows).entry(kind.to_string()).or_default().push(record);
    }

    /// Makes the next create or update of `kind` fail with a unique
    /// violation on `fields`.
    pub fn prime_unique_violation(&self, kind: &str, fields: &[&str]) {
        *lock(&self.unique_violation) = Some((
            kind.to_string(),
            fields.iter().map(ToString::to_string).collect(),
        ));
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<serde_json::Value> {
        lock(&self.calls).clone()
    }

    /// The calls whose `op` is `op`.
    pub fn calls_for(&self, op: &str) -> Vec<serde_json::Value> {
        lock(&self.calls)
            .iter()
            .filter(|c| c["op"] == op)
            .cloned()
            .collect()
    }

    /// Every plan passed to `find_many`/`find_unique`.
    pub fn plans(&self) -> Vec<QueryPlan> {
        lock(&self.plans).clone()
    }

    /// The stored rows of `kind`.
    pub fn rows(&self, kind: &str) -> Vec<Record> {
        lock(&self.rows).get(kind).cloned().unwrap_or_default()
    }

    /// Returns the number of calls since the last reset.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Resets the call counter to zero. The log is kept.
    pub fn reset_call_count(&self) {
        self.call_count.store(0, Ordering::Relaxed);
    }

    /// Clears the log and the counter.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
        lock(&self.plans).clear();
        self.reset_call_count();
    }

    fn log(&self, call: serde_json::Value) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%call, "storage call");
        lock(&self.calls).push(call);
    }

    fn check_unique(&self, kind: &str) -> Result<(), StorageError> {
        let mut primed = lock(&self.unique_violation);
        if primed.as_ref().is_some_and(|(k, _)| k == kind) {
            if let Some((kind, fields)) = primed.take() {
                return Err(StorageError::UniqueViolation { kind, fields });
            }
        }
        Ok(())
    }

    fn apply(row: &mut Record, data: &WritePayload) {
        for name in data.keys() {
            if let Some(PayloadField::Value(value)) = data.get(name) {
                row.insert(name.clone(), RecordValue::Value(value.clone()));
            }
        }
    }

    fn matches_unique(row: &Record, target: &WhereUnique) -> bool {
        match target {
            WhereUnique::Id(guid) => row.guid() == Some(*guid),
            WhereUnique::Compound { fields, .. } => fields
                .iter()
                .all(|(column, value)| row.value(column).is_some_and(|v| v.same_as(value))),
        }
    }
}

#[async_trait::async_trait]
impl StorageDriver for RecordingDriver {
    async fn create(&self, kind: &str, data: &WritePayload) -> Result<Record, StorageError> {
        self.log(json!({"op": "create", "kind": kind, "data": data.to_json()}));
        self.check_unique(kind)?;
        let mut row = Record::new();
        Self::apply(&mut row, data);
        if row.guid().is_none() {
            row = row.with_id(Guid::generate());
        }
        self.seed(kind, row.clone());
        Ok(row)
    }

    async fn create_many(&self, kind: &str, data: &[WritePayload]) -> Result<u64, StorageError> {
        let rows: Vec<_> = data.iter().map(WritePayload::to_json).collect();
        self.log(json!({"op": "create_many", "kind": kind, "data": rows}));
        self.check_unique(kind)?;
        for payload in data {
            let mut row = Record::new();
            Self::apply(&mut row, payload);
            self.seed(kind, row);
        }
        Ok(data.len() as u64)
    }

    async fn update(
        &self,
        kind: &str,
        target: &WhereUnique,
        data: &WritePayload,
    ) -> Result<Record, StorageError> {
        self.log(json!({
            "op": "update",
            "kind": kind,
            "where": target.to_json(),
            "data": data.to_json(),
        }));
        self.check_unique(kind)?;
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(kind)
            .and_then(|rows| rows.iter_mut().find(|r| Self::matches_unique(r, target)));
        match row {
            Some(row) => {
                Self::apply(row, data);
                Ok(row.clone())
            }
            // rows created outside the driver are not tracked
            None => Ok(Record::new()),
        }
    }

    async fn update_many(
        &self,
        kind: &str,
        filter: &Filter,
        data: &WritePayload,
    ) -> Result<u64, StorageError> {
        self.log(json!({
            "op": "update_many",
            "kind": kind,
            "where": filter.to_json(),
            "data": data.to_json(),
        }));
        let mut rows = lock(&self.rows);
        let mut updated = 0;
        for row in rows.get_mut(kind).into_iter().flatten() {
            if filter.matches(row) {
                Self::apply(row, data);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, kind: &str, target: &WhereUnique) -> Result<(), StorageError> {
        self.log(json!({"op": "delete", "kind": kind, "where": target.to_json()}));
        if let Some(rows) = lock(&self.rows).get_mut(kind) {
            rows.retain(|r| !Self::matches_unique(r, target));
        }
        Ok(())
    }

    async fn delete_many(&self, kind: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.log(json!({"op": "delete_many", "kind": kind, "where": filter.to_json()}));
        let mut rows = lock(&self.rows);
        let Some(rows) = rows.get_mut(kind) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !filter.matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn find_many(&self, plan: &QueryPlan) -> Result<Vec<Record>, StorageError> {
        self.log(json!({"op": "find_many", "kind": plan.kind, "args": plan.to_json()}));
        lock(&self.plans).push(plan.clone());
        let rows = lock(&self.rows);
        let matching = rows
            .get(&plan.kind)
            .into_iter()
            .flatten()
            .filter(|r| plan.filter.as_ref().map_or(true, |f| f.matches(r)))
            .skip(plan.skip.unwrap_or(0))
            .take(plan.take.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn count(&self, kind: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.log(json!({"op": "count", "kind": kind, "where": filter.to_json()}));
        let rows = lock(&self.rows);
        Ok(rows
            .get(kind)
            .into_iter()
            .flatten()
            .filter(|r| filter.matches(r))
            .count() as u64)
    }
}
