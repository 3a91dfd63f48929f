//! Many-to-many relations through an intermediate kind.
//!
//! Intermediate rows are addressed one of two ways:
//!
//! - synthetic id: each row has its own id. The session remembers, per
//!   owner and jointable property, which row joins it to which target, on
//!   both sides of the relation.
//! - compound key: the row is identified by its two foreign keys, ordered
//!   by column name, so it can be derived from the two guids alone.
//!
//! Joined fields (intermediate columns exposed on the target) are copied
//! onto targets when rows are hydrated.

use unitwork_rs_core::{OrmError, OrmResult};

use crate::entity::listeners::MutationEvent;
use crate::entity::{EntityKey, SetMode, Slot};
use crate::guid::Guid;
use crate::payload::WhereUnique;
use crate::record::Record;
use crate::registry::{IntermediateId, JointableDef};
use crate::session::Session;
use crate::value::Value;

/// The foreign key columns of the row joining `owner` to `target`, ordered
/// by column name.
pub fn compound_fields(j: &JointableDef, owner: Guid, target: Guid) -> Vec<(String, Value)> {
    let mut fields = vec![
        (j.reverse_join_key.clone(), owner.to_value()),
        (j.join_key.clone(), target.to_value()),
    ];
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
}

/// A key identifying the row joining `owner` to `target`, identical when
/// computed from either side of a self-referential pair.
pub fn row_key(j: &JointableDef, owner: Guid, target: Guid) -> String {
    let columns: Vec<String> = compound_fields(j, owner, target)
        .into_iter()
        .map(|(column, value)| format!("{column}={value}"))
        .collect();
    format!("{}({})", j.intermediate, columns.join(","))
}

impl Session {
    /// Selects the intermediate row joining `owner` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] if a synthetic-id row was never
    /// hydrated or created through this session.
    pub(crate) fn intermediate_where(
        &self,
        owner: EntityKey,
        property: &str,
        j: &JointableDef,
        target: Guid,
    ) -> OrmResult<WhereUnique> {
        let state = self.state(owner)?;
        match &j.intermediate_id {
            IntermediateId::Synthetic => state
                .join_row_id(property, target)
                .map(WhereUnique::Id)
                .ok_or_else(|| {
                    OrmError::Programming(format!(
                        "no {} row known joining {} {} to {target}",
                        j.intermediate, state.kind, state.guid
                    ))
                }),
            IntermediateId::Compound(name) => Ok(WhereUnique::Compound {
                name: name.clone(),
                fields: compound_fields(j, state.guid, target),
            }),
        }
    }

    /// Remembers the intermediate row joining `owner` to `target`, on the
    /// owner and on the reverse jointable of the target if there is one.
    pub(crate) fn record_join_row(
        &mut self,
        owner: EntityKey,
        property: &str,
        target: EntityKey,
        row: Guid,
    ) -> OrmResult<()> {
        let owner_guid = self.state(owner)?.guid;
        let target_guid = self.state(target)?.guid;
        let kind = self.kind_of(owner)?;
        self.state_mut(owner)?
            .join_rows
            .entry(property.to_string())
            .or_default()
            .insert(target_guid, row);
        let reverse = self
            .registry
            .reverse_jointable(&kind, property)
            .map(|(_, p)| p.to_string());
        if let Some(reverse) = reverse {
            self.state_mut(target)?
                .join_rows
                .entry(reverse)
                .or_default()
                .insert(owner_guid, row);
        }
        Ok(())
    }

    /// Forgets the intermediate row joining `owner` to `target`.
    pub(crate) fn forget_join_row(
        &mut self,
        owner: EntityKey,
        property: &str,
        target: Guid,
    ) -> OrmResult<()> {
        let owner_guid = self.state(owner)?.guid;
        let kind = self.kind_of(owner)?;
        if let Some(rows) = self.state_mut(owner)?.join_rows.get_mut(property) {
            rows.remove(&target);
        }
        let reverse = self
            .registry
            .reverse_jointable(&kind, property)
            .map(|(_, p)| p.to_string());
        if let (Some(reverse), Some(target_key)) = (reverse, self.lookup(target)) {
            if let Some(rows) = self.state_mut(target_key)?.join_rows.get_mut(&reverse) {
                rows.remove(&owner_guid);
            }
        }
        Ok(())
    }

    /// Folds a join written (`linked`) or deleted from `owner`'s side into
    /// the pending baseline of the target's reverse jointable. A reverse
    /// change the write already covers stops being dirty.
    pub(crate) fn sync_reverse_baseline(
        &mut self,
        owner: EntityKey,
        property: &str,
        target: Guid,
        linked: bool,
    ) -> OrmResult<()> {
        let kind = self.kind_of(owner)?;
        let Some(reverse) = self
            .registry
            .reverse_jointable(&kind, property)
            .map(|(_, p)| p.to_string())
        else {
            return Ok(());
        };
        let Some(target_key) = self.lookup(target) else {
            return Ok(());
        };
        let owner_member = self.member(owner)?;
        let state = self.state(target_key)?;
        let Some(Slot::Many(baseline)) = state.old.get(&reverse) else {
            return Ok(());
        };
        let was_dirty = state.is_dirty();
        let mut baseline = baseline.clone();
        if linked {
            baseline.insert(owner_member);
        } else {
            baseline.remove(owner_member.guid);
        }
        let current = state.values.get(&reverse).and_then(Slot::as_many);
        let settled = current.is_some_and(|current| !current.is_different(&baseline));
        let members_clean = current.map_or(true, |current| {
            current.iter().all(|m| {
                self.state(self.live_member(*m).key)
                    .map_or(true, |s| !s.is_dirty())
            })
        });
        let state = self.state_mut(target_key)?;
        if settled {
            state.old.remove(&reverse);
            state.dirty.remove(&reverse);
            if members_clean {
                state.dirty_sub_models.remove(&reverse);
            }
        } else {
            state.old.insert(reverse, Slot::Many(baseline));
        }
        if was_dirty && !state.is_dirty() {
            self.notify(MutationEvent::Commit { child: target_key });
        }
        Ok(())
    }

    /// Copies the joined columns of an intermediate row onto its target.
    /// Joined fields changed in memory are kept.
    pub(crate) fn copy_joined_fields(
        &mut self,
        target: EntityKey,
        j: &JointableDef,
        row: &Record,
    ) -> OrmResult<()> {
        for jf in &j.joined_fields {
            let Some(value) = row.value(&jf.column) else {
                continue;
            };
            let state = self.state(target)?;
            if state.dirty_sub_models.contains(&jf.property) || !self.has_property(target, &jf.property)? {
                continue;
            }
            self.set_with_mode(target, &jf.property, Slot::Value(value.clone()), SetMode::Override)?;
        }
        Ok(())
    }

    fn has_property(&self, key: EntityKey, property: &str) -> OrmResult<bool> {
        let kind = &self.state(key)?.kind;
        Ok(self.registry.kind(kind)?.property(property).is_some())
    }
}
