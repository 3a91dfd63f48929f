//! Change tracking through a full read, edit, commit cycle.

use std::sync::Arc;

use serde_json::json;
use unitwork_rs_db::{Difference, EntityKey, Guid, ModelSet, Record, Session, Slot, Value};
use unitwork_rs_test::fixtures::fetch;
use unitwork_rs_test::{assert_num_calls, crm_session, RecordingDriver, TestCipher};

async fn ann(s: &mut Session, driver: &RecordingDriver) -> EntityKey {
    let row = Record::new()
        .with_id(Guid::generate())
        .with("firstName", "Ann")
        .with("lastName", "Lee")
        .with("phone", TestCipher::sealed("555-0100", None))
        .with("aliases", Value::List(vec![Value::from("Annie")]));
    fetch(s, driver, "Contact", row).await.unwrap()
}

#[tokio::test]
async fn test_old_keeps_the_first_baseline() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;

    s.set(c, "firstName", "Bo").unwrap();
    s.set(c, "firstName", "Cy").unwrap();
    let state = s.entity(c).unwrap();
    assert_eq!(state.old("firstName"), Some(&Slot::from("Ann")));
    assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Cy"));

    // assigning the current value again changes nothing
    s.set(c, "lastName", "Lee").unwrap();
    assert!(!s.entity(c).unwrap().dirty().contains("lastName"));
    assert!(s.entity(c).unwrap().old("lastName").is_none());
}

#[tokio::test]
async fn test_every_dirty_property_has_a_baseline() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;
    s.set(c, "lastName", "Ray").unwrap();
    s.set(c, "phone", "555-0199").unwrap();

    let state = s.entity(c).unwrap();
    assert!(!state.dirty().is_empty());
    for property in state.dirty() {
        assert!(state.old(property).is_some(), "{property} has no baseline");
    }
    // the computed column follows its dependencies
    assert!(state.dirty().contains("fullName"));
    assert_eq!(s.value(c, "fullName").unwrap(), Value::from("Ann Ray"));
}

#[tokio::test]
async fn test_freshly_read_values_are_not_different() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;

    for property in ["firstName", "lastName", "phone", "aliases"] {
        let current = s.get(c, property).unwrap();
        assert_eq!(
            s.is_different(c, property, &current).unwrap(),
            Difference::Same,
            "{property}"
        );
    }
    assert_eq!(
        s.is_different(c, "firstName", &Slot::from("Bo")).unwrap(),
        Difference::Different
    );
}

#[tokio::test]
async fn test_commit_clears_dirt_and_encrypts() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;
    s.set(c, "phone", "555-0199").unwrap();
    assert_num_calls(&driver, 1, s.commit(c)).await.unwrap();

    let update = &driver.calls_for("update")[0];
    assert_eq!(
        update["data"],
        json!({"phone": TestCipher::sealed("555-0199", None)})
    );
    let state = s.entity(c).unwrap();
    assert!(!state.is_dirty());
    assert!(state.old("phone").is_none());
    assert_eq!(s.value(c, "phone").unwrap(), Value::from("555-0199"));

    // a second commit has nothing to write
    assert_num_calls(&driver, 0, s.commit(c)).await.unwrap();
}

#[tokio::test]
async fn test_revert_restores_baselines() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;
    s.set(c, "firstName", "Bo").unwrap();
    s.set(c, "fullName", "Cy Dow").unwrap();
    assert_eq!(s.value(c, "lastName").unwrap(), Value::from("Dow"));

    s.revert(c).unwrap();
    assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Ann"));
    assert_eq!(s.value(c, "lastName").unwrap(), Value::from("Lee"));
    assert!(!s.entity(c).unwrap().is_dirty());
    s.commit(c).await.unwrap();
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_in_place_list_mutation() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;

    let len = s
        .modify_list(c, "aliases", |list| {
            list.push(Value::from("Nan"));
            list.len()
        })
        .unwrap();
    assert_eq!(len, 2);
    assert_eq!(
        s.entity(c).unwrap().old("aliases"),
        Some(&Slot::Value(Value::List(vec![Value::from("Annie")])))
    );

    s.commit(c).await.unwrap();
    assert_eq!(
        driver.calls_for("update")[0]["data"],
        json!({"aliases": ["Annie", "Nan"]})
    );
    assert!(!s.entity(c).unwrap().is_dirty());

    // reading without mutating leaves the entity clean
    let first = s.modify_list(c, "aliases", |list| list.get(0).cloned()).unwrap();
    assert_eq!(first, Some(Value::from("Annie")));
    assert!(!s.entity(c).unwrap().is_dirty());
}

#[tokio::test]
async fn test_in_place_collection_mutation() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let activity = Record::new().with_id(Guid::generate()).with("title", "Sync");
    let a = fetch(&mut s, &driver, "Activity", activity).await.unwrap();
    let c = ann(&mut s, &driver).await;
    let member = s.member(c).unwrap();

    s.modify_collection(a, "contacts", |list| {
        list.push(member);
        list.push(member);
    })
    .unwrap();
    assert_eq!(s.members(a, "contacts").unwrap(), vec![c]);
    assert!(s.entity(a).unwrap().dirty_sub_models().contains("contacts"));

    s.commit(a).await.unwrap();
    let guid = s.entity(c).unwrap().guid();
    assert_eq!(
        driver.calls_for("update")[0]["data"],
        json!({"contacts": {"connect": [{"id": guid.to_string()}]}})
    );
}

#[tokio::test]
async fn test_collection_differences() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let keys: Vec<_> = (0..3)
        .map(|_| s.new_entity("Contact").unwrap())
        .collect();
    let old = s.model_set(&keys[..2]).unwrap();
    let new = s.model_set(&keys[1..]).unwrap();

    let added = old.added_to(&new);
    let removed = old.removed(&new);
    assert_eq!(added.len(), 1);
    assert_eq!(removed.len(), 1);
    assert!(added.contains(s.entity(keys[2]).unwrap().guid()));
    assert!(removed.contains(s.entity(keys[0]).unwrap().guid()));
    assert_eq!(old.intersection(&new).len(), 1);
    assert!(old.is_different(&new));
    assert!(!old.is_different(&old.clone()));
    assert!(ModelSet::new().added_to(&ModelSet::new()).is_empty());
}

#[tokio::test]
async fn test_lazy_load_of_an_unloaded_property() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let owner = Guid::generate();
    let activity = Record::new()
        .with_id(Guid::generate())
        .with("title", "Plan")
        .with("ownerId", owner.to_value())
        .with_one("owner", Some(Record::new().with_id(owner)));
    let a = fetch(&mut s, &driver, "Activity", activity).await.unwrap();
    let o = s.related(a, "owner").unwrap().unwrap();
    assert!(!s.entity(o).unwrap().is_loaded("firstName"));

    driver.seed("Contact", Record::new().with_id(owner).with("firstName", "Olga"));
    let slot = s.async_get(o, "firstName").await.unwrap();
    assert_eq!(slot, Slot::from("Olga"));
    assert_eq!(driver.calls_for("find_many").len(), 1);
    assert!(s.entity(o).unwrap().is_loaded("firstName"));
    assert!(!s.entity(o).unwrap().is_dirty());

    // loaded now, no second read
    s.async_get(o, "firstName").await.unwrap();
    assert_eq!(driver.calls_for("find_many").len(), 1);
}

#[tokio::test]
async fn test_calculated_initials_follow_their_inputs() {
    let driver = Arc::new(RecordingDriver::new());
    let mut s = crm_session(driver.clone());
    let c = ann(&mut s, &driver).await;
    assert_eq!(s.value(c, "initials").unwrap(), Value::from("AL"));
    s.set(c, "firstName", "Bo").unwrap();
    assert_eq!(s.value(c, "initials").unwrap(), Value::from("BL"));
    assert!(s.set(c, "initials", "XX").is_err());
}
