//! A CRM-shaped fixture schema.
//!
//! Kinds:
//!
//! - `Company` with its `contacts`
//! - `Contact` with an encrypted `phone`, a unique-encrypted `email`, a
//!   list of `aliases`, a computed `fullName`, a cached calculated
//!   `initials`, and `friends`/`friendOf`, the two sides of one
//!   self-referential jointable through `Friendship` (synthetic ids)
//! - `Activity` with a required `title`, an `owner`, plain to-many
//!   `contacts`, soft-deleted `notes`, `tags` through `ActivityTag`
//!   (synthetic ids, joined `addedAt`) and `labels` through `ActivityLabel`
//!   (compound key)
//! - `Note` and `ActivityTag`, both soft-deleted
//! - `Tag`, `Label`, `ActivityLabel` and `Friendship`

use std::sync::Arc;

use unitwork_rs_core::{OrmError, OrmResult};
use unitwork_rs_db::query::ReadArgs;
use unitwork_rs_db::registry::{
    CalculatedDef, ComputedDef, JointableDef, KindMeta, PropertyDef, Registry, RelationDef,
};
use unitwork_rs_db::{EntityKey, MaxLengthValidator, Record, Session, Value};

use crate::cipher::TestCipher;
use crate::recording_driver::RecordingDriver;

/// The compound key of `ActivityLabel` rows.
pub const ACTIVITY_LABEL_KEY: &str = "activityId_labelId";

fn contact() -> KindMeta {
    KindMeta::new("Contact")
        .with_property(PropertyDef::scalar("firstName"))
        .with_property(PropertyDef::scalar("lastName").validator(MaxLengthValidator::new(40)))
        .with_property(PropertyDef::scalar("email").unique_encrypted())
        .with_property(PropertyDef::scalar("phone").encrypted())
        .with_property(PropertyDef::scalar("aliases"))
        .with_property(PropertyDef::scalar("companyId"))
        .with_property(PropertyDef::relation(
            "company",
            RelationDef::one("Company")
                .id_field("companyId")
                .reverse("contacts")
                .root(),
        ))
        .with_property(PropertyDef::computed(
            "fullName",
            ComputedDef::new(&["firstName", "lastName"], |ctx| {
                let parts: Vec<String> = ["firstName", "lastName"]
                    .iter()
                    .filter_map(|p| ctx.value(p).as_str().map(ToString::to_string))
                    .collect();
                Value::from(parts.join(" "))
            })
            .with_update(|full| {
                let mut parts = full.as_str().unwrap_or_default().splitn(2, ' ');
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
        .with_property(PropertyDef::jointable(
            "friends",
            JointableDef::new("Contact", "Friendship", "friendships", "friend", "contact"),
        ))
        .with_property(PropertyDef::jointable(
            "friendOf",
            JointableDef::new("Contact", "Friendship", "friendOfs", "contact", "friend"),
        ))
}

fn activity() -> KindMeta {
    KindMeta::new("Activity")
        .with_property(
            PropertyDef::scalar("title")
                .required()
                .validator(MaxLengthValidator::new(80)),
        )
        .with_property(PropertyDef::scalar("status").default_value("open"))
        .with_property(PropertyDef::scalar("ownerId"))
        .with_property(PropertyDef::relation(
            "owner",
            RelationDef::one("Contact").id_field("ownerId").root(),
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
        ))
        .with_property(PropertyDef::jointable(
            "labels",
            JointableDef::new("Label", "ActivityLabel", "activityLabels", "label", "activity")
                .compound(ACTIVITY_LABEL_KEY),
        ))
}

/// Builds the fixture registry.
///
/// # Panics
///
/// Panics if the fixture schema fails registry validation.
pub fn crm_registry() -> Registry {
    let company = KindMeta::new("Company")
        .with_property(PropertyDef::scalar("name").required())
        .with_property(PropertyDef::relation(
            "contacts",
            RelationDef::many("Contact").reverse("company"),
        ));

    let note = KindMeta::new("Note")
        .with_soft_delete()
        .with_property(PropertyDef::scalar("body"))
        .with_property(PropertyDef::scalar("deleted"))
        .with_property(PropertyDef::scalar("deletedAt"))
        .with_property(PropertyDef::scalar("activityId"))
        .with_property(PropertyDef::relation(
            "activity",
            RelationDef::one("Activity")
                .id_field("activityId")
                .reverse("notes")
                .root(),
        ));

    let tag = KindMeta::new("Tag")
        .with_property(PropertyDef::scalar("name"))
        .with_property(PropertyDef::joined("addedAt", "Activity", "tags"))
        .with_property(PropertyDef::jointable(
            "activities",
            JointableDef::new("Activity", "ActivityTag", "activityTags", "activity", "tag"),
        ));

    let activity_tag = KindMeta::new("ActivityTag")
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

    let label = KindMeta::new("Label").with_property(PropertyDef::scalar("name"));

    let activity_label = KindMeta::new("ActivityLabel")
        .with_property(PropertyDef::scalar("labelId"))
        .with_property(PropertyDef::scalar("activityId"))
        .with_property(PropertyDef::relation(
            "label",
            RelationDef::one("Label").id_field("labelId").root(),
        ))
        .with_property(PropertyDef::relation(
            "activity",
            RelationDef::one("Activity").id_field("activityId").root(),
        ));

    let friendship = KindMeta::new("Friendship")
        .with_property(PropertyDef::scalar("contactId"))
        .with_property(PropertyDef::scalar("friendId"))
        .with_property(PropertyDef::relation(
            "contact",
            RelationDef::one("Contact").id_field("contactId").root(),
        ))
        .with_property(PropertyDef::relation(
            "friend",
            RelationDef::one("Contact").id_field("friendId").root(),
        ));

    Registry::builder()
        .kind(company)
        .kind(contact())
        .kind(activity())
        .kind(note)
        .kind(tag)
        .kind(activity_tag)
        .kind(label)
        .kind(activity_label)
        .kind(friendship)
        .build()
        .expect("fixture registry is valid")
}

/// A session over [`crm_registry`] writing to `driver`, with a
/// [`TestCipher`].
pub fn crm_session(driver: Arc<RecordingDriver>) -> Session {
    Session::new(Arc::new(crm_registry()), driver).with_cipher(Arc::new(TestCipher))
}

/// Seeds `record` into the driver and reads it back into the session, so
/// the entity (and any nested rows of the record) is persisted, loaded and
/// clean. The call log is cleared afterwards.
///
/// # Errors
///
/// Fails like [`Session::find_unique`], and with
/// [`OrmError::Programming`] if the record has no id.
pub async fn fetch(
    session: &mut Session,
    driver: &RecordingDriver,
    kind: &str,
    record: Record,
) -> OrmResult<EntityKey> {
    let guid = record
        .guid()
        .ok_or_else(|| OrmError::Programming(format!("fixture {kind} row without an id")))?;
    driver.seed(kind, record);
    let key = session
        .find_unique(kind, guid, ReadArgs::new().include_deleted())
        .await?
        .ok_or_else(|| OrmError::Programming(format!("fixture {kind} {guid} not readable")))?;
    driver.clear_calls();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitwork_rs_db::Guid;

    #[test]
    fn test_registry_builds() {
        let registry = crm_registry();
        assert!(registry.kind("Activity").unwrap().property("labels").is_some());
        assert!(registry.kind("Note").unwrap().soft_delete().is_some());
        assert_eq!(
            registry.reverse_jointable("Contact", "friends"),
            Some(("Contact", "friendOf"))
        );
        assert_eq!(
            registry.joined_fields("Activity", "Tag", "tags")[0].column,
            "createdAt"
        );
    }

    #[tokio::test]
    async fn test_fetch_hydrates_a_clean_entity() {
        let driver = Arc::new(RecordingDriver::new());
        let mut session = crm_session(driver.clone());
        let guid = Guid::generate();
        let record = Record::new()
            .with_id(guid)
            .with("firstName", "Ann")
            .with("phone", TestCipher::sealed("555-0100", None));
        let key = fetch(&mut session, &driver, "Contact", record).await.unwrap();
        assert!(driver.calls().is_empty());
        assert_eq!(session.value(key, "phone").unwrap(), Value::from("555-0100"));
        assert!(!session.entity(key).unwrap().is_dirty());
    }
}
