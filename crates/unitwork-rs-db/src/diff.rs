//! Turning tracked changes into nested write payloads.
//!
//! The diff walks an entity's changed properties and decides the write
//! shape of each one:
//!
//! - scalars and computed columns: written as values, encrypted on the way
//!   into the payload
//! - to-one relations: nested `create` for new targets, `connect` when the
//!   target guid changed, nested `update` when the same target changed
//! - to-many relations and jointables: set differences between the
//!   baseline and the current members (`create`/`connect` for added rows,
//!   `delete` or a soft-delete `update` for removed rows, nested `update`
//!   for dirty shared rows)
//!
//! Every entity a payload touches is collected into a [`DiffContext`]
//! worklist, so the commit can run hooks on it and finish it afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use unitwork_rs_core::OrmResult;

use crate::cipher::{key_for, missing_cipher};
use crate::entity::{EntityKey, Slot};
use crate::guid::Guid;
use crate::model_set::{Member, ModelSet};
use crate::payload::{NestedUpdate, NestedWrite, WhereUnique, WritePayload};
use crate::registry::{JointableDef, PropertyDef, PropertyType, RelationDef, SoftDeleteColumns};
use crate::resolve::row_key;
use crate::session::Session;
use crate::value::Value;

/// A synthetic intermediate row created by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinRow {
    pub(crate) owner: EntityKey,
    pub(crate) property: String,
    pub(crate) target: EntityKey,
    pub(crate) row: Guid,
}

/// Worklists and bookkeeping of one commit.
#[derive(Debug)]
pub(crate) struct DiffContext {
    pub(crate) created: Vec<EntityKey>,
    pub(crate) updated: Vec<EntityKey>,
    pub(crate) deleted: Vec<EntityKey>,
    pub(crate) soft_deleted: Vec<EntityKey>,
    pub(crate) join_rows: Vec<JoinRow>,
    // (owner, jointable property, target) of every join written
    pub(crate) linked: Vec<(EntityKey, String, EntityKey)>,
    pub(crate) forgotten_joins: Vec<(EntityKey, String, Guid)>,
    pub(crate) now: DateTime<Utc>,
    visited: HashSet<EntityKey>,
    emitted_joins: HashSet<String>,
}

impl DiffContext {
    pub(crate) fn new() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            soft_deleted: Vec::new(),
            join_rows: Vec::new(),
            linked: Vec::new(),
            forgotten_joins: Vec::new(),
            now: Utc::now(),
            visited: HashSet::new(),
            emitted_joins: HashSet::new(),
        }
    }

    /// Every entity that is written, in worklist order.
    pub(crate) fn written(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.created.iter().chain(&self.updated).copied()
    }

    /// Every entity that is removed, physically or by flag.
    pub(crate) fn removed(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.deleted.iter().chain(&self.soft_deleted).copied()
    }

    pub(crate) fn is_visited(&self, key: EntityKey) -> bool {
        self.visited.contains(&key)
    }
}

/// The update marking a row of a soft-delete kind as deleted.
pub(crate) fn soft_delete_payload(columns: &SoftDeleteColumns, now: DateTime<Utc>) -> WritePayload {
    let mut data = WritePayload::new();
    data.insert_value(&columns.flag, true);
    if let Some(timestamp) = &columns.timestamp {
        data.insert_value(timestamp, now);
    }
    data
}

impl Session {
    /// The full create payload of a new entity: its id, every loaded
    /// column and every non-empty relation.
    ///
    /// `strip` names properties the enclosing nested write already encodes.
    pub(crate) fn create_payload(
        &mut self,
        key: EntityKey,
        ctx: &mut DiffContext,
        strip: &[String],
    ) -> OrmResult<WritePayload> {
        ctx.visited.insert(key);
        ctx.created.push(key);
        let state = self.state(key)?;
        let (kind, guid) = (state.kind.clone(), state.guid);
        let registry = Arc::clone(&self.registry);

        let mut data = WritePayload::new();
        data.insert_value("id", guid.to_value());
        let mut encoded_ids = Vec::new();
        for def in registry.kind(&kind)?.properties() {
            if strip.contains(&def.name) {
                continue;
            }
            let current = self.current_slot(key, def)?;
            match &def.property_type {
                PropertyType::Scalar | PropertyType::Computed(_) => {
                    if self.state(key)?.loaded.contains(&def.name) {
                        if let Slot::Value(value) = current {
                            data.insert_value(&def.name, self.payload_value(key, def, value)?);
                        }
                    }
                }
                PropertyType::Relation(rel) => {
                    let nested = if rel.is_array {
                        let members = current.as_many().cloned().unwrap_or_else(ModelSet::new);
                        self.diff_many(key, rel, &ModelSet::new(), &members, ctx)?
                    } else {
                        self.diff_single(key, &def.name, rel, None, current.as_one().copied(), ctx)?
                    };
                    if !nested.is_empty() {
                        encoded_ids.extend(rel.id_field_name().map(ToString::to_string));
                        data.insert_nested(&def.name, nested);
                    }
                }
                PropertyType::Jointable(j) => {
                    let members = current.as_many().cloned().unwrap_or_else(ModelSet::new);
                    let nested = self.diff_jointable(key, &def.name, j, &ModelSet::new(), &members, ctx)?;
                    if !nested.is_empty() {
                        data.insert_nested(&j.relation, nested);
                    }
                }
                PropertyType::Joined { .. } | PropertyType::Calculated(_) => {}
            }
        }
        for id_field in encoded_ids {
            data.remove(&id_field);
        }
        Ok(data)
    }

    /// The update payload of a persisted entity: its dirty columns and the
    /// nested writes of its dirty relations.
    pub(crate) fn update_payload(
        &mut self,
        key: EntityKey,
        ctx: &mut DiffContext,
        strip: &[String],
    ) -> OrmResult<WritePayload> {
        ctx.visited.insert(key);
        ctx.updated.push(key);
        let state = self.state(key)?;
        let kind = state.kind.clone();
        let dirty: Vec<String> = state.dirty.iter().cloned().collect();
        let dirty_sub_models: Vec<String> = state.dirty_sub_models.iter().cloned().collect();
        let registry = Arc::clone(&self.registry);

        let mut data = WritePayload::new();
        for name in dirty.iter().filter(|p| !strip.contains(*p)) {
            let def = registry.property(&kind, name)?;
            if !def.is_persisted() {
                continue;
            }
            if let Slot::Value(value) = self.current_slot(key, def)? {
                data.insert_value(name, self.payload_value(key, def, value)?);
            }
        }

        let mut encoded_ids = Vec::new();
        for name in dirty_sub_models.iter().filter(|p| !strip.contains(*p)) {
            let def = registry.property(&kind, name)?;
            let current = self.current_slot(key, def)?;
            let baseline = self
                .state(key)?
                .old
                .get(name)
                .cloned()
                .unwrap_or_else(|| current.clone());
            match &def.property_type {
                PropertyType::Relation(rel) if rel.is_array => {
                    let old = baseline.as_many().cloned().unwrap_or_else(ModelSet::new);
                    let new = current.as_many().cloned().unwrap_or_else(ModelSet::new);
                    let nested = self.diff_many(key, rel, &old, &new, ctx)?;
                    if !nested.is_empty() {
                        data.insert_nested(name, nested);
                    }
                }
                PropertyType::Relation(rel) => {
                    let nested = self.diff_single(
                        key,
                        name,
                        rel,
                        baseline.as_one().copied(),
                        current.as_one().copied(),
                        ctx,
                    )?;
                    if !nested.is_empty() {
                        encoded_ids.extend(rel.id_field_name().map(ToString::to_string));
                        data.insert_nested(name, nested);
                    }
                }
                PropertyType::Jointable(j) => {
                    let old = baseline.as_many().cloned().unwrap_or_else(ModelSet::new);
                    let new = current.as_many().cloned().unwrap_or_else(ModelSet::new);
                    let nested = self.diff_jointable(key, name, j, &old, &new, ctx)?;
                    if !nested.is_empty() {
                        data.insert_nested(&j.relation, nested);
                    }
                }
                // joined fields are written through the owner's jointable
                _ => {}
            }
        }
        for id_field in encoded_ids {
            data.remove(&id_field);
        }
        Ok(data)
    }

    fn diff_single(
        &mut self,
        parent: EntityKey,
        property: &str,
        rel: &RelationDef,
        baseline: Option<Member>,
        current: Option<Member>,
        ctx: &mut DiffContext,
    ) -> OrmResult<NestedWrite> {
        let mut nested = NestedWrite::one();
        let Some(target) = current.map(|m| self.live_member(m)) else {
            // a root relation with an id mirror is cleared by the mirror column
            let mirrored = rel.is_relation_root && rel.id_field_name().is_some();
            nested.disconnect = baseline.is_some() && !mirrored;
            return Ok(nested);
        };
        let state = self.state(target.key)?;
        if state.is_deleted || ctx.is_visited(target.key) {
            return Ok(nested);
        }
        if state.is_new {
            let stripped = self.stamp_reverse(parent, rel, target.key)?;
            nested.create.push(self.create_payload(target.key, ctx, &stripped)?);
        } else if baseline.map(|m| m.guid) != Some(target.guid) {
            if state.is_dirty() && self.settings.warn_on_dirty_connect {
                tracing::warn!(
                    kind = %state.kind,
                    property,
                    target = %target.guid,
                    "connecting a dirty entity; its own changes need a separate commit"
                );
            }
            nested.connect.push(WhereUnique::Id(target.guid));
        } else if state.is_dirty() {
            let strip = self.reverse_fields(rel)?;
            let data = self.update_payload(target.key, ctx, &strip)?;
            if !data.is_empty() {
                nested.update.push(NestedUpdate {
                    where_: WhereUnique::Id(target.guid),
                    data,
                });
            }
        }
        Ok(nested)
    }

    fn diff_many(
        &mut self,
        parent: EntityKey,
        rel: &RelationDef,
        old: &ModelSet,
        new: &ModelSet,
        ctx: &mut DiffContext,
    ) -> OrmResult<NestedWrite> {
        let mut nested = NestedWrite::many();

        for member in &old.added_to(new) {
            let target = self.live_member(*member);
            let state = self.state(target.key)?;
            if state.is_deleted || ctx.is_visited(target.key) {
                continue;
            }
            if state.is_new {
                let stripped = self.stamp_reverse(parent, rel, target.key)?;
                nested.create.push(self.create_payload(target.key, ctx, &stripped)?);
            } else {
                nested.connect.push(WhereUnique::Id(target.guid));
            }
        }

        let soft_delete = self.registry.kind(&rel.target)?.soft_delete().cloned();
        for member in &old.removed(new) {
            let live = self.lookup(member.guid);
            let state = self.state(live.unwrap_or(member.key))?;
            if state.is_new || state.is_deleted || live.is_some_and(|k| ctx.is_visited(k)) {
                continue;
            }
            let target = WhereUnique::Id(member.guid);
            match &soft_delete {
                Some(columns) => {
                    nested.update.push(NestedUpdate {
                        where_: target,
                        data: soft_delete_payload(columns, ctx.now),
                    });
                    ctx.soft_deleted.extend(live);
                }
                None => {
                    nested.delete.push(target);
                    ctx.deleted.extend(live);
                }
            }
        }

        let strip = self.reverse_fields(rel)?;
        for (_, member) in old.pairs(new) {
            let target = self.live_member(member);
            let state = self.state(target.key)?;
            if state.is_deleted || !state.is_dirty() || ctx.is_visited(target.key) {
                continue;
            }
            let data = self.update_payload(target.key, ctx, &strip)?;
            if !data.is_empty() {
                nested.update.push(NestedUpdate {
                    where_: WhereUnique::Id(target.guid),
                    data,
                });
            }
        }
        Ok(nested)
    }

    fn diff_jointable(
        &mut self,
        owner: EntityKey,
        property: &str,
        j: &JointableDef,
        old: &ModelSet,
        new: &ModelSet,
        ctx: &mut DiffContext,
    ) -> OrmResult<NestedWrite> {
        let owner_state = self.state(owner)?;
        let owner_guid = owner_state.guid;
        let reverse = self
            .registry
            .reverse_jointable(&owner_state.kind, property)
            .map(|(_, p)| p.to_string());
        let mut nested = NestedWrite::many();

        for member in &old.added_to(new) {
            let target = self.live_member(*member);
            let state = self.state(target.key)?;
            // already stored, written earlier from either side
            let known = self.state(owner)?.join_row_id(property, target.guid).is_some()
                || reverse
                    .as_deref()
                    .is_some_and(|r| state.join_row_id(r, owner_guid).is_some());
            if state.is_deleted
                || known
                || !ctx.emitted_joins.insert(row_key(j, owner_guid, target.guid))
            {
                continue;
            }
            ctx.linked.push((owner, property.to_string(), target.key));
            let is_new = state.is_new && !ctx.is_visited(target.key);
            let mut row = WritePayload::new();
            if j.is_synthetic() {
                let id = Guid::generate();
                row.insert_value("id", id.to_value());
                ctx.join_rows.push(JoinRow {
                    owner,
                    property: property.to_string(),
                    target: target.key,
                    row: id,
                });
            }
            for jf in &j.joined_fields {
                if let Some(Slot::Value(value)) = self.state(target.key)?.values.get(&jf.property) {
                    row.insert_value(&jf.column, value.clone());
                }
            }
            let mut target_write = NestedWrite::one();
            if is_new {
                target_write.create.push(self.create_payload(target.key, ctx, &[])?);
            } else {
                target_write.connect.push(WhereUnique::Id(target.guid));
            }
            row.insert_nested(&j.join_field, target_write);
            nested.create.push(row);
        }

        let soft_delete = self.registry.kind(&j.intermediate)?.soft_delete().cloned();
        for member in &old.removed(new) {
            let key = format!("-{}", row_key(j, owner_guid, member.guid));
            if !ctx.emitted_joins.insert(key) {
                continue;
            }
            let target = self.intermediate_where(owner, property, j, member.guid)?;
            match &soft_delete {
                Some(columns) => nested.update.push(NestedUpdate {
                    where_: target,
                    data: soft_delete_payload(columns, ctx.now),
                }),
                None => nested.delete.push(target),
            }
            ctx.forgotten_joins
                .push((owner, property.to_string(), member.guid));
        }

        let joined: Vec<String> = j.joined_fields.iter().map(|f| f.property.clone()).collect();
        for (_, member) in old.pairs(new) {
            let target = self.live_member(member);
            let state = self.state(target.key)?;
            if state.is_deleted || !state.is_dirty() || ctx.is_visited(target.key) {
                continue;
            }
            let mut row = WritePayload::new();
            for jf in &j.joined_fields {
                if state.dirty_sub_models.contains(&jf.property) {
                    if let Some(Slot::Value(value)) = state.values.get(&jf.property) {
                        row.insert_value(&jf.column, value.clone());
                    }
                }
            }
            let own_changes = !state.dirty.is_empty()
                || state.dirty_sub_models.iter().any(|p| !joined.contains(p));
            if own_changes {
                let data = self.update_payload(target.key, ctx, &joined)?;
                if !data.is_empty() {
                    let mut target_write = NestedWrite::one();
                    target_write.update.push(NestedUpdate {
                        where_: WhereUnique::Id(target.guid),
                        data,
                    });
                    row.insert_nested(&j.join_field, target_write);
                }
            } else {
                ctx.visited.insert(target.key);
                ctx.updated.push(target.key);
            }
            if !row.is_empty() {
                let where_ = self.intermediate_where(owner, property, j, target.guid)?;
                nested.update.push(NestedUpdate { where_, data: row });
            }
        }
        Ok(nested)
    }

    /// The properties of a relation's target that point back at the parent.
    fn reverse_fields(&self, rel: &RelationDef) -> OrmResult<Vec<String>> {
        let Some(reverse) = rel.reverse_name() else {
            return Ok(Vec::new());
        };
        let mut fields = vec![reverse.to_string()];
        let reverse_def = self.registry.property(&rel.target, reverse)?;
        if let Some(id_field) = reverse_def.as_relation().and_then(RelationDef::id_field_name) {
            fields.push(id_field.to_string());
        }
        Ok(fields)
    }

    fn payload_value(&self, key: EntityKey, def: &PropertyDef, value: Value) -> OrmResult<Value> {
        let Some(mode) = def.encryption else {
            return Ok(value);
        };
        if value.is_null() {
            return Ok(value);
        }
        let state = self.state(key)?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| missing_cipher(&state.kind, &def.name))?;
        cipher.encrypt(&value, key_for(mode, &state.guid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests_support::{fixture_session, seeded};
    use crate::registry::{KindMeta, Registry};
    use serde_json::json;

    fn set_of(s: &Session, keys: &[EntityKey]) -> ModelSet {
        s.model_set(keys).unwrap()
    }

    #[test]
    fn test_create_payload_has_id_and_loaded_columns() {
        let (mut s, _) = fixture_session();
        let c = s.new_entity("Contact").unwrap();
        s.set(c, "firstName", "Ann").unwrap();
        s.set(c, "lastName", "Lee").unwrap();
        let mut ctx = DiffContext::new();
        let data = s.create_payload(c, &mut ctx, &[]).unwrap();

        let guid = s.entity(c).unwrap().guid();
        assert_eq!(data.value("id"), Some(&guid.to_value()));
        assert_eq!(data.value("firstName"), Some(&Value::from("Ann")));
        assert_eq!(data.value("fullName"), Some(&Value::from("Ann Lee")));
        assert!(!data.contains("email"));
        assert!(!data.contains("initials"));
        assert!(!data.contains("activities"));
        assert_eq!(ctx.created, vec![c]);
    }

    #[test]
    fn test_new_single_target_is_nested_create() {
        let (mut s, _) = fixture_session();
        let owner = s.new_entity("Contact").unwrap();
        s.set(owner, "firstName", "Ann").unwrap();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let m = s.member(owner).unwrap();
        s.set(a, "owner", m).unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        assert!(!data.contains("ownerId"));
        let nested = data.nested("owner").unwrap();
        assert_eq!(nested.create.len(), 1);
        assert!(!nested.create[0].contains("activities"));
        assert_eq!(ctx.created, vec![owner]);
        assert_eq!(ctx.updated, vec![a]);
    }

    #[test]
    fn test_changed_single_target_is_connect() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let m = s.member(c).unwrap();
        s.set(a, "owner", m).unwrap();
        s.set(c, "firstName", "Anna").unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let guid = s.entity(c).unwrap().guid().to_string();
        assert_eq!(data.to_json(), json!({"owner": {"connect": {"id": guid}}}));
        assert_eq!(ctx.updated, vec![a]);
    }

    #[test]
    fn test_same_single_target_is_nested_update() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let m = s.member(c).unwrap();
        s.set_override(a, "owner", m).unwrap();
        s.set(c, "firstName", "Anna").unwrap();
        assert!(s.entity(a).unwrap().dirty_sub_models().contains("owner"));

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let nested = data.nested("owner").unwrap();
        assert_eq!(nested.update[0].data.to_json(), json!({"firstName": "Anna"}));
        assert_eq!(ctx.updated, vec![a, c]);
    }

    #[test]
    fn test_to_many_added_removed_and_shared() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c1 = seeded(&mut s, "Contact", &[("firstName", "One")]);
        let c2 = seeded(&mut s, "Contact", &[("firstName", "Two")]);
        let c3 = seeded(&mut s, "Contact", &[("firstName", "Three")]);
        let c4 = s.new_entity("Contact").unwrap();
        let initial = set_of(&s, &[c1, c2]);
        s.set_override(a, "contacts", initial).unwrap();
        let next = set_of(&s, &[c2, c3, c4]);
        s.set(a, "contacts", next).unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let nested = data.nested("contacts").unwrap();
        let guid = |k| s.entity(k).unwrap().guid();
        assert_eq!(nested.connect, vec![WhereUnique::Id(guid(c3))]);
        assert_eq!(nested.create.len(), 1);
        assert_eq!(nested.delete, vec![WhereUnique::Id(guid(c1))]);
        assert!(nested.update.is_empty());
        assert_eq!(ctx.deleted, vec![c1]);
    }

    #[test]
    fn test_removed_soft_delete_child_is_flagged() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let n = seeded(&mut s, "Note", &[("body", "hi")]);
        let notes = set_of(&s, &[n]);
        s.set_override(a, "notes", notes).unwrap();
        s.set(a, "notes", ModelSet::new()).unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let nested = data.nested("notes").unwrap();
        assert!(nested.delete.is_empty());
        assert_eq!(nested.update[0].data.value("deleted"), Some(&Value::Bool(true)));
        assert!(nested.update[0].data.contains("deletedAt"));
        assert_eq!(ctx.soft_deleted, vec![n]);
    }

    #[test]
    fn test_nested_create_strips_reverse_pointer() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let n = s.new_entity("Note").unwrap();
        s.set(n, "body", "hello").unwrap();
        let notes = set_of(&s, &[n]);
        s.set(a, "notes", notes).unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let created = &data.nested("notes").unwrap().create[0];
        assert!(!created.contains("activityId"));
        assert!(!created.contains("activity"));
        assert_eq!(created.value("body"), Some(&Value::from("hello")));
        // the stamped mirror is in memory even though the payload omits it
        assert_eq!(
            s.value(n, "activityId").unwrap(),
            s.entity(a).unwrap().guid().to_value()
        );
    }

    #[test]
    fn test_jointable_rows_and_joined_fields() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let old_tag = seeded(&mut s, "Tag", &[("name", "old")]);
        let new_tag = seeded(&mut s, "Tag", &[("name", "new"), ("addedAt", "2024-05-01")]);
        let row = Guid::generate();
        let tags = set_of(&s, &[old_tag]);
        s.set_override(a, "tags", tags).unwrap();
        s.record_join_row(a, "tags", old_tag, row).unwrap();
        let next = set_of(&s, &[new_tag]);
        s.set(a, "tags", next).unwrap();

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        assert!(data.nested("tags").is_none());
        let nested = data.nested("activityTags").unwrap();
        assert_eq!(nested.create.len(), 1);
        let created = &nested.create[0];
        assert!(created.contains("id"));
        assert_eq!(created.value("createdAt"), Some(&Value::from("2024-05-01")));
        let new_guid = s.entity(new_tag).unwrap().guid();
        assert_eq!(created.nested("tag").unwrap().connect, vec![WhereUnique::Id(new_guid)]);
        // the link kind is soft-deleted
        assert_eq!(nested.update[0].where_, WhereUnique::Id(row));
        assert_eq!(ctx.join_rows.len(), 1);
        assert_eq!(ctx.forgotten_joins.len(), 1);
    }

    #[test]
    fn test_joined_field_change_updates_the_row() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let t = seeded(&mut s, "Tag", &[("name", "urgent"), ("addedAt", "2024-01-01")]);
        let row = Guid::generate();
        let tags = set_of(&s, &[t]);
        s.set_override(a, "tags", tags).unwrap();
        s.record_join_row(a, "tags", t, row).unwrap();
        s.set(t, "addedAt", "2024-02-02").unwrap();
        assert!(s.entity(a).unwrap().dirty_sub_models().contains("tags"));

        let mut ctx = DiffContext::new();
        let data = s.update_payload(a, &mut ctx, &[]).unwrap();
        let update = &data.nested("activityTags").unwrap().update[0];
        assert_eq!(update.where_, WhereUnique::Id(row));
        assert_eq!(update.data.to_json(), json!({"createdAt": "2024-02-02"}));
        assert_eq!(ctx.updated, vec![a, t]);
    }

    #[test]
    fn test_encrypted_column_without_cipher_fails() {
        let registry = Registry::builder()
            .kind(KindMeta::new("Secret").with_property(PropertyDef::scalar("pin").encrypted()))
            .build()
            .unwrap();
        let (_, driver) = fixture_session();
        let mut s = Session::new(Arc::new(registry), driver);
        let k = s.new_entity("Secret").unwrap();
        s.set(k, "pin", "1234").unwrap();
        let err = s.create_payload(k, &mut DiffContext::new(), &[]).unwrap_err();
        assert!(matches!(err, unitwork_rs_core::OrmError::Configuration(_)));
    }
}
