//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use serde_json::json;
use unitwork_rs_core::StorageError;

use crate::driver::StorageDriver;
use crate::entity::{EntityKey, EntityState};
use crate::guid::Guid;
use crate::payload::{WhereUnique, WritePayload};
use crate::query::filter::Filter;
use crate::query::planner::QueryPlan;
use crate::record::Record;
use crate::registry::{
    CalculatedDef, ComputedDef, JointableDef, KindMeta, PropertyDef, Registry, RelationDef,
};
use crate::session::Session;
use crate::value::Value;

/// Records every call and serves `rows` to reads.
#[derive(Debug, Default)]
pub(crate) struct TestDriver {
    pub(crate) rows: Mutex<Vec<Record>>,
    pub(crate) plans: Mutex<Vec<QueryPlan>>,
    pub(crate) calls: Mutex<Vec<serde_json::Value>>,
}

impl TestDriver {
    fn log(&self, call: serde_json::Value) {
        self.calls.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageDriver for TestDriver {
    async fn create(&self, kind: &str, data: &WritePayload) -> Result<Record, StorageError> {
        self.log(json!({"op": "create", "kind": kind, "data": data.to_json()}));
        Ok(Record::new())
    }

    async fn create_many(&self, kind: &str, data: &[WritePayload]) -> Result<u64, StorageError> {
        let rows: Vec<_> = data.iter().map(WritePayload::to_json).collect();
        self.log(json!({"op": "create_many", "kind": kind, "data": rows}));
        Ok(data.len() as u64)
    }

    async fn update(
        &self,
        kind: &str,
        target: &WhereUnique,
        data: &WritePayload,
    ) -> Result<Record, StorageError> {
        self.log(json!({"op": "update", "kind": kind, "where": target.to_json(), "data": data.to_json()}));
        Ok(Record::new())
    }

    async fn update_many(
        &self,
        kind: &str,
        filter: &Filter,
        data: &WritePayload,
    ) -> Result<u64, StorageError> {
        self.log(json!({"op": "update_many", "kind": kind, "where": filter.to_json(), "data": data.to_json()}));
        Ok(0)
    }

    async fn delete(&self, kind: &str, target: &WhereUnique) -> Result<(), StorageError> {
        self.log(json!({"op": "delete", "kind": kind, "where": target.to_json()}));
        Ok(())
    }

    async fn delete_many(&self, kind: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.log(json!({"op": "delete_many", "kind": kind, "where": filter.to_json()}));
        Ok(0)
    }

    async fn find_many(&self, plan: &QueryPlan) -> Result<Vec<Record>, StorageError> {
        self.plans.lock().unwrap().push(plan.clone());
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| plan.filter.as_ref().map_or(true, |f| f.matches(r)))
            .cloned()
            .collect())
    }

    async fn count(&self, _kind: &str, filter: &Filter) -> Result<u64, StorageError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|r| filter.matches(r)).count() as u64)
    }
}

/// Contact, Activity, Note (soft-deleted), Tag and ActivityTag
/// (soft-deleted, synthetic ids).
pub(crate) fn fixture_registry() -> Registry {
    let contact = KindMeta::new("Contact")
        .with_property(PropertyDef::scalar("firstName"))
        .with_property(PropertyDef::scalar("lastName"))
        .with_property(
            PropertyDef::scalar("email").equals(|a, b| match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => a == b,
            }),
        )
        .with_property(PropertyDef::scalar("aliases"))
        .with_property(PropertyDef::computed(
            "fullName",
            ComputedDef::new(&["firstName", "lastName"], |ctx| {
                let parts: Vec<String> = ["firstName", "lastName"]
                    .iter()
                    .filter_map(|p| ctx.value(p).as_str().map(ToString::to_string))
                    .collect();
                Value::from(parts.join(" "))
            })
            .with_update(|v| {
                let mut parts = v.as_str().unwrap_or_default().splitn(2, ' ');
                vec![
                    ("firstName".to_string(), Value::from(parts.next().unwrap_or_default())),
                    ("lastName".to_string(), Value::from(parts.next().unwrap_or_default())),
                ]
            }),
        ))
        .with_property(PropertyDef::calculated(
            "initials",
            CalculatedDef::new(&["firstName", "lastName"], |ctx| {
                let initial = |p: &str| {
                    ctx.value(p)
                        .as_str()
                        .and_then(|s| s.chars().next())
                        .map(String::from)
                        .unwrap_or_default()
                };
                Value::from(format!("{}{}", initial("firstName"), initial("lastName")))
            })
            .cached(),
        ))
        .with_property(PropertyDef::relation(
            "activities",
            RelationDef::many("Activity").reverse("owner"),
        ));

    let activity = KindMeta::new("Activity")
        .with_property(PropertyDef::scalar("title").required())
        .with_property(PropertyDef::scalar("ownerId"))
        .with_property(PropertyDef::relation(
            "owner",
            RelationDef::one("Contact").id_field("ownerId").reverse("activities").root(),
        ))
        .with_property(PropertyDef::relation("contacts", RelationDef::many("Contact")))
        .with_property(PropertyDef::relation(
            "notes",
            RelationDef::many("Note").reverse("activity"),
        ))
        .with_property(PropertyDef::jointable(
            "tags",
            JointableDef::new("Tag", "ActivityTag", "activityTags", "tag", "activity")
                .joined_field("addedAt", "createdAt"),
        ));

    let note = KindMeta::new("Note")
        .with_soft_delete()
        .with_property(PropertyDef::scalar("body"))
        .with_property(PropertyDef::scalar("deleted"))
        .with_property(PropertyDef::scalar("activityId"))
        .with_property(PropertyDef::relation(
            "activity",
            RelationDef::one("Activity").id_field("activityId").reverse("notes").root(),
        ));

    let tag = KindMeta::new("Tag")
        .with_property(PropertyDef::scalar("name"))
        .with_property(PropertyDef::joined("addedAt", "Activity", "tags"))
        .with_property(PropertyDef::jointable(
            "activities",
            JointableDef::new("Activity", "ActivityTag", "activityTags", "activity", "tag"),
        ));

    let link = KindMeta::new("ActivityTag")
        .with_soft_delete()
        .with_property(PropertyDef::scalar("createdAt"))
        .with_property(PropertyDef::scalar("tagId"))
        .with_property(PropertyDef::scalar("activityId"))
        .with_property(PropertyDef::relation(
            "tag",
            RelationDef::one("Tag").id_field("tagId").root(),
        ))
        .with_property(PropertyDef::relation(
            "activity",
            RelationDef::one("Activity").id_field("activityId").root(),
        ));

    Registry::builder()
        .kind(contact)
        .kind(activity)
        .kind(note)
        .kind(tag)
        .kind(link)
        .build()
        .unwrap()
}

pub(crate) fn fixture_session() -> (Session, Arc<TestDriver>) {
    let driver = Arc::new(TestDriver::default());
    let session = Session::new(Arc::new(fixture_registry()), driver.clone());
    (session, driver)
}

/// A persisted entity with the given string values loaded.
pub(crate) fn seeded(session: &mut Session, kind: &str, values: &[(&str, &str)]) -> EntityKey {
    let key = session.insert_entity(EntityState::new(Guid::generate(), kind, false), true);
    for (property, value) in values {
        session.set_override(key, property, *value).unwrap();
    }
    key
}
