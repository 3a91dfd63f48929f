//! Materializing rows into session entities.
//!
//! Hydration goes through the identity map: a row whose guid is already
//! live merges into that entity, and properties with uncommitted changes
//! keep their in-memory value. Everything else is stored in override mode,
//! so a freshly read entity is loaded and clean.

use std::sync::Arc;

use unitwork_rs_core::{OrmError, OrmResult};

use crate::cipher::{key_for, missing_cipher};
use crate::entity::{EntityKey, EntityState, SetMode, Slot};
use crate::model_set::ModelSet;
use crate::query::planner::QueryPlan;
use crate::record::{Record, RecordValue, COUNT_FIELD};
use crate::registry::{JointableDef, PropertyDef, PropertyType};
use crate::session::Session;
use crate::value::Value;

impl Session {
    /// Merges one row read with `plan` into the session.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for rows without an id and
    /// [`OrmError::Configuration`] or [`OrmError::Encryption`] when an
    /// encrypted column cannot be decrypted.
    pub(crate) fn hydrate(&mut self, plan: &QueryPlan, row: &Record) -> OrmResult<EntityKey> {
        let kind = plan.kind.as_str();
        let guid = row.guid().ok_or_else(|| {
            OrmError::Programming(format!("{kind} row without an id: {}", row.to_json()))
        })?;
        let key = match self.lookup(guid) {
            Some(key) => key,
            None => self.insert_entity(EntityState::new(guid, kind, false), true),
        };
        let registry = Arc::clone(&self.registry);
        let meta = registry.kind(kind)?;

        for (name, field) in row.fields() {
            if name == "id" || name == COUNT_FIELD {
                continue;
            }
            if let Some(jointable) = registry.jointable_by_relation(kind, name) {
                let def = registry.property(kind, jointable)?;
                if let (Some(j), RecordValue::Many(rows)) = (def.as_jointable(), field) {
                    let sub = relation_plan(plan, name, &j.intermediate);
                    self.hydrate_jointable(key, jointable, j, &sub, rows)?;
                }
                continue;
            }
            let Some(def) = meta.property(name) else {
                tracing::trace!(kind, column = %name, "ignoring undeclared column");
                continue;
            };
            if self.is_changed(key, name)? {
                continue;
            }
            self.hydrate_field(key, def, plan, field)?;
        }

        if let Some(counts) = row.counts() {
            self.state_mut(key)?.counts = Some(counts.clone());
        }
        for name in &plan.calculated {
            if let PropertyType::Calculated(calc) = &registry.property(kind, name)?.property_type {
                if let Some(loader) = &calc.loader {
                    let value = loader(row);
                    self.state_mut(key)?.cache.insert(name.clone(), value);
                }
            }
        }
        Ok(key)
    }

    fn is_changed(&self, key: EntityKey, property: &str) -> OrmResult<bool> {
        let state = self.state(key)?;
        Ok(state.dirty.contains(property) || state.dirty_sub_models.contains(property))
    }

    fn hydrate_field(
        &mut self,
        key: EntityKey,
        def: &PropertyDef,
        plan: &QueryPlan,
        field: &RecordValue,
    ) -> OrmResult<()> {
        match (&def.property_type, field) {
            (PropertyType::Scalar | PropertyType::Computed(_), RecordValue::Value(v)) => {
                let value = self.decrypt_column(key, def, v)?;
                self.set_with_mode(key, &def.name, Slot::Value(value), SetMode::Override)
            }
            (PropertyType::Relation(rel), RecordValue::One(child)) => {
                let child = match child {
                    Some(row) => {
                        let sub = relation_plan(plan, &def.name, &rel.target);
                        Some(self.hydrate(&sub, row)?)
                    }
                    None => None,
                };
                let member = child.map(|c| self.member(c)).transpose()?;
                self.set_with_mode(key, &def.name, Slot::One(member), SetMode::Override)?;
                if let (Some(child), Some(reverse)) = (child, rel.reverse_name()) {
                    self.register_single_reverse(child, &rel.target, reverse, key)?;
                }
                Ok(())
            }
            (PropertyType::Relation(rel), RecordValue::Many(rows)) => {
                let sub = relation_plan(plan, &def.name, &rel.target);
                let mut children = Vec::with_capacity(rows.len());
                for row in rows {
                    children.push(self.hydrate(&sub, row)?);
                }
                let set = self.model_set(&children)?;
                self.set_with_mode(key, &def.name, Slot::Many(set), SetMode::Override)?;
                if let Some(reverse) = rel.reverse_name() {
                    for child in children {
                        self.register_single_reverse(child, &rel.target, reverse, key)?;
                    }
                }
                Ok(())
            }
            _ => {
                tracing::trace!(property = %def.name, "column shape does not match property");
                Ok(())
            }
        }
    }

    /// Registers `parent` on `child.reverse` when that reverse is a to-one
    /// relation.
    fn register_single_reverse(
        &mut self,
        child: EntityKey,
        child_kind: &str,
        reverse: &str,
        parent: EntityKey,
    ) -> OrmResult<()> {
        let single = self
            .registry
            .property(child_kind, reverse)?
            .as_relation()
            .is_some_and(|r| !r.is_array);
        if single {
            self.register_reverse(child, reverse, parent)?;
        }
        Ok(())
    }

    fn hydrate_jointable(
        &mut self,
        owner: EntityKey,
        property: &str,
        j: &JointableDef,
        plan: &QueryPlan,
        rows: &[Record],
    ) -> OrmResult<()> {
        let target_plan = relation_plan(plan, &j.join_field, &j.target);
        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(RecordValue::One(Some(target_row))) = row.get(&j.join_field) else {
                continue;
            };
            let target = self.hydrate(&target_plan, target_row)?;
            self.copy_joined_fields(target, j, row)?;
            if j.is_synthetic() {
                if let Some(row_id) = row.guid() {
                    self.record_join_row(owner, property, target, row_id)?;
                }
            }
            targets.push(target);
        }
        if self.is_changed(owner, property)? {
            return Ok(());
        }
        let set: ModelSet = self.model_set(&targets)?;
        self.set_with_mode(owner, property, Slot::Many(set), SetMode::Override)
    }

    fn decrypt_column(&self, key: EntityKey, def: &PropertyDef, value: &Value) -> OrmResult<Value> {
        let Some(mode) = def.encryption else {
            return Ok(value.clone());
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
        let state = self.state(key)?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| missing_cipher(&state.kind, &def.name))?;
        cipher.decrypt(value, key_for(mode, &state.guid))
    }
}

fn relation_plan(plan: &QueryPlan, field: &str, target: &str) -> QueryPlan {
    plan.relation(field)
        .cloned()
        .unwrap_or_else(|| QueryPlan::new(target))
}
