//! Property access and change tracking.
//!
//! `get`/`set` and their async variants, explicit loading, change detection
//! and reverting. A tracked `set` records the first baseline in `old`,
//! marks the property dirty (scalars) or dirty-as-submodel (relations),
//! mirrors single-relation guids into their id field, and recomputes
//! dependent derived properties.

use tracing::Instrument;
use unitwork_rs_core::logging::operation_span;
use unitwork_rs_core::{OrmError, OrmResult, StorageError};

use crate::entity::listeners::MutationEvent;
use crate::entity::{CalcContext, Difference, EntityKey, SetMode, Slot};
use crate::model_set::Member;
use crate::query::filter::Filter;
use crate::query::planner::ReadArgs;
use crate::registry::{CalculatedDef, PropertyDef, PropertyType};
use crate::session::Session;
use crate::value::Value;

impl Session {
    // ── Reads ──────────────────────────────────────────────────────────

    /// Reads a property.
    ///
    /// - calculated: the cached value, or a fresh calculation
    /// - loaded: the stored value
    /// - computed but unloaded: the raw slot; the value is recomputed for
    ///   the next read when its dependencies are loaded
    /// - otherwise: a reverse-relation value registered during hydration,
    ///   else the property default
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnsupportedOperation`] if a calculated property
    /// depends on an unloaded property; use [`Session::async_get`].
    pub fn get(&mut self, key: EntityKey, property: &str) -> OrmResult<Slot> {
        let def = self.property_def(key, property)?;
        let _span = operation_span(&self.state(key)?.kind, "get").entered();
        self.get_with_def(key, &def)
    }

    /// Reads a scalar property.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::get`], and with [`OrmError::Programming`] if
    /// the property holds entities.
    pub fn value(&mut self, key: EntityKey, property: &str) -> OrmResult<Value> {
        match self.get(key, property)? {
            Slot::Value(v) => Ok(v),
            other => Err(OrmError::Programming(format!(
                "{property} holds entities, not a value: {other:?}"
            ))),
        }
    }

    /// Reads a to-one relation.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::get`].
    pub fn related(&mut self, key: EntityKey, property: &str) -> OrmResult<Option<EntityKey>> {
        Ok(self.get(key, property)?.as_one().map(|m| m.key))
    }

    /// Reads a to-many relation or jointable.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::get`].
    pub fn members(&mut self, key: EntityKey, property: &str) -> OrmResult<Vec<EntityKey>> {
        Ok(self
            .get(key, property)?
            .members()
            .into_iter()
            .map(|m| m.key)
            .collect())
    }

    pub(crate) fn get_with_def(&mut self, key: EntityKey, def: &PropertyDef) -> OrmResult<Slot> {
        if let PropertyType::Calculated(calc) = &def.property_type {
            return self.calculate(key, def, calc).map(Slot::Value);
        }
        let state = self.state(key)?;
        if state.loaded.contains(&def.name) {
            return self.current_slot(key, def);
        }
        if let PropertyType::Computed(computed) = &def.property_type {
            let raw = self.current_slot(key, def)?;
            if self.dependencies_loaded(key, &computed.depends_on)? {
                let value = (computed.compute)(&CalcContext::new(self, key));
                self.set_with_mode(key, &def.name, Slot::Value(value), SetMode::Override)?;
            }
            return Ok(raw);
        }
        Ok(state
            .reverse
            .get(&def.name)
            .cloned()
            .unwrap_or_else(|| Self::default_slot(def)))
    }

    fn calculate(
        &mut self,
        key: EntityKey,
        def: &PropertyDef,
        calc: &CalculatedDef,
    ) -> OrmResult<Value> {
        let state = self.state(key)?;
        if calc.cached {
            if let Some(hit) = state.cache.get(&def.name) {
                return Ok(hit.clone());
            }
        }
        if let Some(dep) = calc.depends_on.iter().find(|d| !state.loaded.contains(*d)) {
            return Err(OrmError::UnsupportedOperation(format!(
                "{}.{} depends on unloaded property {dep}; use async_get",
                state.kind, def.name
            )));
        }
        let value = (calc.calculate)(&CalcContext::new(self, key));
        if calc.cached {
            self.state_mut(key)?
                .cache
                .insert(def.name.clone(), value.clone());
        }
        Ok(value)
    }

    pub(crate) fn dependencies_loaded(&self, key: EntityKey, deps: &[String]) -> OrmResult<bool> {
        let state = self.state(key)?;
        Ok(deps.iter().all(|d| state.loaded.contains(d)))
    }

    /// Properties that must be fetched before `def` can be read.
    fn missing_for_read(&self, key: EntityKey, def: &PropertyDef) -> OrmResult<Vec<String>> {
        let state = self.state(key)?;
        let mut missing: Vec<String> = def
            .depends_on()
            .iter()
            .filter(|d| !state.loaded.contains(*d))
            .cloned()
            .collect();
        let self_missing = match &def.property_type {
            PropertyType::Calculated(_) => false,
            PropertyType::Computed(_) => missing.is_empty() && !state.loaded.contains(&def.name),
            _ => !state.loaded.contains(&def.name),
        };
        if self_missing {
            missing.push(def.name.clone());
        }
        Ok(missing)
    }

    /// Reads a property, loading it and its dependencies first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DeletedObject`] for deleted entities and
    /// [`OrmError::UncommittedObject`] if a load is needed on a new entity.
    pub async fn async_get(&mut self, key: EntityKey, property: &str) -> OrmResult<Slot> {
        let def = self.property_def(key, property)?;
        let span = operation_span(&self.state(key)?.kind, "async_get");
        async move {
            let state = self.state(key)?;
            if state.is_deleted {
                return Err(OrmError::DeletedObject(format!(
                    "cannot read {}.{property} of deleted {}",
                    state.kind, state.guid
                )));
            }
            let missing = self.missing_for_read(key, &def)?;
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(String::as_str).collect();
                self.load(key, &names).await?;
            }
            let result = self.get_with_def(key, &def);
            self.drained(result)
        }
        .instrument(span)
        .await
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Assigns a property.
    ///
    /// Equal values (by value, by guid for relations, by member guids for
    /// collections) are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DeletedObject`], [`OrmError::ReadOnly`],
    /// [`OrmError::UnsupportedOperation`] for calculated properties and
    /// [`OrmError::Programming`] for a value of the wrong shape or kind.
    pub fn set(&mut self, key: EntityKey, property: &str, value: impl Into<Slot>) -> OrmResult<()> {
        let _span = operation_span(&self.state(key)?.kind, "set").entered();
        let result = self.set_with_mode(key, property, value.into(), SetMode::Tracked);
        self.drained(result)
    }

    /// Stores a value without change tracking or notification. Used for
    /// hydration and for stamping pointers onto nested new entities.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for a value of the wrong shape.
    pub fn set_override(
        &mut self,
        key: EntityKey,
        property: &str,
        value: impl Into<Slot>,
    ) -> OrmResult<()> {
        self.set_with_mode(key, property, value.into(), SetMode::Override)
    }

    /// Assigns a property, loading its current value first so the baseline
    /// is the stored one.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::set`] and [`Session::load`].
    pub async fn async_set(
        &mut self,
        key: EntityKey,
        property: &str,
        value: impl Into<Slot> + Send,
    ) -> OrmResult<()> {
        let def = self.property_def(key, property)?;
        let value = value.into();
        let span = operation_span(&self.state(key)?.kind, "async_set");
        async move {
            let state = self.state(key)?;
            if state.is_deleted {
                return Err(OrmError::DeletedObject(format!(
                    "cannot set {}.{property} on deleted {}",
                    state.kind, state.guid
                )));
            }
            if state.is_read_only {
                return Err(OrmError::ReadOnly(format!(
                    "cannot set {}.{property} on a snapshot",
                    state.kind
                )));
            }
            let needs_load = !state.is_new
                && !state.loaded.contains(property)
                && !matches!(
                    def.property_type,
                    PropertyType::Calculated(_) | PropertyType::Joined { .. }
                );
            if needs_load {
                self.load(key, &[property]).await?;
            }
            let result = self.set_with_mode(key, property, value, SetMode::Tracked);
            self.drained(result)
        }
        .instrument(span)
        .await
    }

    pub(crate) fn set_with_mode(
        &mut self,
        key: EntityKey,
        property: &str,
        value: Slot,
        mode: SetMode,
    ) -> OrmResult<()> {
        let def = self.property_def(key, property)?;
        let state = self.state(key)?;
        if mode != SetMode::Override {
            if state.is_deleted {
                return Err(OrmError::DeletedObject(format!(
                    "cannot set {}.{property} on deleted {}",
                    state.kind, state.guid
                )));
            }
            if state.is_read_only {
                return Err(OrmError::ReadOnly(format!(
                    "cannot set {}.{property} on a snapshot",
                    state.kind
                )));
            }
        }
        let comparable = state.is_new || state.loaded.contains(property);
        let value = self.normalize(key, &def, value)?;
        let current = self.current_slot(key, &def)?;

        if mode == SetMode::Override {
            self.detach(key, property, &current);
            self.attach(key, property, &value);
            let state = self.state_mut(key)?;
            state.values.insert(property.to_string(), value);
            state.loaded.insert(property.to_string());
            return self.invalidate_calculated(key, property);
        }

        if comparable && self.slots_equal(&def, &current, &value) {
            return Ok(());
        }

        self.detach(key, property, &current);
        if !self.state(key)?.old.contains_key(property) {
            let baseline = self.snapshot_slot(&current)?;
            self.state_mut(key)?
                .old
                .insert(property.to_string(), baseline);
        }
        self.attach(key, property, &value);
        self.notify(MutationEvent::Dirty { child: key });
        {
            let state = self.state_mut(key)?;
            state.values.insert(property.to_string(), value.clone());
            state.loaded.insert(property.to_string());
        }

        match &def.property_type {
            PropertyType::Scalar => {
                self.state_mut(key)?.dirty.insert(property.to_string());
            }
            PropertyType::Computed(computed) => {
                self.state_mut(key)?.dirty.insert(property.to_string());
                if let (SetMode::Tracked, Some(update), Slot::Value(v)) =
                    (mode, &computed.update, &value)
                {
                    for (derived, derived_value) in update(v) {
                        self.set_with_mode(key, &derived, Slot::Value(derived_value), SetMode::Derived)?;
                    }
                }
            }
            PropertyType::Relation(rel) => {
                self.state_mut(key)?
                    .dirty_sub_models
                    .insert(property.to_string());
                if let (false, Some(id_field)) = (rel.is_array, rel.id_field_name()) {
                    let id = value.as_one().map_or(Value::Null, |m| m.guid.to_value());
                    self.set_with_mode(key, id_field, Slot::Value(id), mode)?;
                }
            }
            PropertyType::Jointable(_) | PropertyType::Joined { .. } => {
                self.state_mut(key)?
                    .dirty_sub_models
                    .insert(property.to_string());
            }
            PropertyType::Calculated(_) => {}
        }
        self.recompute_dependents(key, property)
    }

    fn normalize(&self, key: EntityKey, def: &PropertyDef, value: Slot) -> OrmResult<Slot> {
        let kind = &self.state(key)?.kind;
        match (&def.property_type, value) {
            (PropertyType::Calculated(_), _) => Err(OrmError::UnsupportedOperation(format!(
                "{kind}.{} is calculated and cannot be set",
                def.name
            ))),
            (PropertyType::Relation(rel), Slot::Value(Value::Null)) if !rel.is_array => {
                Ok(Slot::One(None))
            }
            (PropertyType::Relation(rel), Slot::One(member)) if !rel.is_array => {
                let member = member
                    .map(|m| self.checked_member(m, &rel.target))
                    .transpose()?;
                Ok(Slot::One(member))
            }
            (PropertyType::Relation(rel), Slot::Many(set)) if rel.is_array => {
                self.checked_set(set, &rel.target)
            }
            (PropertyType::Jointable(j), Slot::Many(set)) => self.checked_set(set, &j.target),
            (
                PropertyType::Scalar | PropertyType::Computed(_) | PropertyType::Joined { .. },
                Slot::Value(v),
            ) => Ok(Slot::Value(v)),
            (_, other) => Err(OrmError::Programming(format!(
                "{kind}.{} cannot hold {other:?}",
                def.name
            ))),
        }
    }

    fn checked_member(&self, member: Member, target: &str) -> OrmResult<Member> {
        let state = self.state(member.key)?;
        if state.kind != target || state.guid != member.guid {
            return Err(OrmError::Programming(format!(
                "expected a {target}, got {} {}",
                state.kind, member.guid
            )));
        }
        Ok(self.live_member(member))
    }

    fn checked_set(&self, set: crate::model_set::ModelSet, target: &str) -> OrmResult<Slot> {
        let set = set
            .iter()
            .map(|m| self.checked_member(*m, target))
            .collect::<OrmResult<crate::model_set::ModelSet>>()?;
        Ok(Slot::Many(set))
    }

    pub(crate) fn slots_equal(&self, def: &PropertyDef, a: &Slot, b: &Slot) -> bool {
        match (a, b) {
            (Slot::Value(x), Slot::Value(y)) => def
                .equals
                .as_ref()
                .map_or_else(|| x.same_as(y), |eq| eq(x, y)),
            (Slot::One(x), Slot::One(y)) => x.map(|m| m.guid) == y.map(|m| m.guid),
            (Slot::Many(x), Slot::Many(y)) => x.guids() == y.guids(),
            _ => false,
        }
    }

    fn recompute_dependents(&mut self, key: EntityKey, property: &str) -> OrmResult<()> {
        let kind = self.kind_of(key)?;
        let registry = std::sync::Arc::clone(&self.registry);
        for dependent in registry.dependents(&kind, property) {
            let def = registry.property(&kind, dependent)?;
            match &def.property_type {
                PropertyType::Calculated(_) => {
                    self.state_mut(key)?.cache.remove(dependent);
                }
                PropertyType::Computed(computed)
                    if self.dependencies_loaded(key, &computed.depends_on)? =>
                {
                    let value = (computed.compute)(&CalcContext::new(self, key));
                    self.set_with_mode(key, dependent, Slot::Value(value), SetMode::Derived)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invalidate_calculated(&mut self, key: EntityKey, property: &str) -> OrmResult<()> {
        let kind = self.kind_of(key)?;
        let registry = std::sync::Arc::clone(&self.registry);
        let state = self.state_mut(key)?;
        for dependent in registry.dependents(&kind, property) {
            state.cache.remove(dependent);
        }
        Ok(())
    }

    // ── Loading ────────────────────────────────────────────────────────

    /// Fetches `properties` (plus relation id fields and derived-property
    /// dependencies) and merges them into the entity. Dirty properties are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DeletedObject`] for deleted entities,
    /// [`OrmError::UncommittedObject`] for new ones, and a storage
    /// `NotFound` error if the row no longer exists.
    pub async fn load(&mut self, key: EntityKey, properties: &[&str]) -> OrmResult<()> {
        let state = self.state(key)?;
        let (kind, guid) = (state.kind.clone(), state.guid);
        if state.is_deleted {
            return Err(OrmError::DeletedObject(format!("cannot load deleted {kind} {guid}")));
        }
        if state.is_new {
            return Err(OrmError::UncommittedObject(format!(
                "cannot load {} of unsaved {kind} {guid}",
                properties.join(", ")
            )));
        }
        let span = operation_span(&kind, "load");
        async move {
            let mut args = ReadArgs::new().include_deleted();
            for property in properties {
                let def = self.registry.property(&kind, property)?;
                args = args.field(*property);
                if let Some(id_field) = def.as_relation().and_then(|r| r.id_field_name()) {
                    args = args.field(id_field);
                }
                for dep in def.depends_on() {
                    args = args.field(dep.as_str());
                }
            }
            args = args.filter(Filter::eq("id", guid.to_value()));
            let plan = self.plan(&kind, &args)?;
            tracing::debug!(plan = %plan.to_json(), "loading properties");
            let record = self
                .driver
                .find_unique(&plan)
                .await
                .map_err(OrmError::from_storage)?
                .ok_or_else(|| StorageError::NotFound(format!("{kind} {guid}")))?;
            self.hydrate(&plan, &record)?;
            self.drain()
        }
        .instrument(span)
        .await
    }

    // ── Change detection ───────────────────────────────────────────────

    /// Compares `candidate` against the property's baseline (its `old`
    /// value, else its current value).
    ///
    /// Scalars compare by value (custom `equals` first, dates by instant).
    /// A to-one relation to a different guid is `Different`, or `SubModel`
    /// when the new target has uncommitted changes of its own; to the same
    /// guid it is `SubModel` if that entity changed. Collections are
    /// `SubModel` if membership differs or a shared member changed.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for unknown properties.
    pub fn is_different(
        &self,
        key: EntityKey,
        property: &str,
        candidate: &Slot,
    ) -> OrmResult<Difference> {
        let def = self.property_def(key, property)?;
        let baseline = match self.state(key)?.old.get(property) {
            Some(old) => old.clone(),
            None => self.current_slot(key, &def)?,
        };
        self.compare_slots(&def, &baseline, candidate)
    }

    pub(crate) fn compare_slots(
        &self,
        def: &PropertyDef,
        baseline: &Slot,
        candidate: &Slot,
    ) -> OrmResult<Difference> {
        Ok(match (baseline, candidate) {
            (Slot::Value(_), Slot::Value(_)) => {
                if self.slots_equal(def, baseline, candidate) {
                    Difference::Same
                } else {
                    Difference::Different
                }
            }
            (Slot::One(None), Slot::One(None)) => Difference::Same,
            (Slot::One(Some(old)), Slot::One(Some(new))) if old.guid == new.guid => {
                if self.entity_changed(*old, *new)? {
                    Difference::SubModel
                } else {
                    Difference::Same
                }
            }
            (Slot::One(Some(_)), Slot::One(Some(new))) => {
                if self.state(new.key)?.is_dirty() {
                    Difference::SubModel
                } else {
                    Difference::Different
                }
            }
            (Slot::Many(old), Slot::Many(new)) => {
                if old.is_different(new) {
                    Difference::SubModel
                } else {
                    let mut changed = false;
                    for (o, n) in old.pairs(new) {
                        if self.entity_changed(o, n)? {
                            changed = true;
                            break;
                        }
                    }
                    if changed {
                        Difference::SubModel
                    } else {
                        Difference::Same
                    }
                }
            }
            _ => Difference::Different,
        })
    }

    /// `true` if `new` has uncommitted changes or its loaded scalar values
    /// differ from the `old` snapshot of the same row.
    pub(crate) fn entity_changed(&self, old: Member, new: Member) -> OrmResult<bool> {
        let current = self.state(new.key)?;
        if current.is_dirty() {
            return Ok(true);
        }
        if old.key == new.key {
            return Ok(false);
        }
        let snapshot = self.state(old.key)?;
        Ok(current.values.iter().any(|(name, slot)| match slot {
            Slot::Value(v) => snapshot
                .values
                .get(name)
                .and_then(Slot::as_value)
                .is_some_and(|s| !s.same_as(v)),
            _ => false,
        }))
    }

    // ── Reverting ──────────────────────────────────────────────────────

    /// Discards uncommitted changes, restoring every baseline value.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for an unknown handle.
    pub fn revert(&mut self, key: EntityKey) -> OrmResult<()> {
        let properties: Vec<String> = self.state(key)?.old.keys().cloned().collect();
        for property in properties {
            self.revert_property(key, &property)?;
        }
        let state = self.state_mut(key)?;
        state.dirty.clear();
        state.dirty_sub_models.clear();
        state.cache.clear();
        self.drain()?;
        self.collect_snapshots();
        Ok(())
    }

    /// Restores one property to its baseline and clears its dirt.
    pub(crate) fn revert_property(&mut self, key: EntityKey, property: &str) -> OrmResult<()> {
        let Some(baseline) = self.state_mut(key)?.old.remove(property) else {
            return Ok(());
        };
        let restored = match baseline {
            Slot::One(m) => Slot::One(m.map(|m| self.live_member(m))),
            Slot::Many(set) => Slot::Many(set.iter().map(|m| self.live_member(*m)).collect()),
            value @ Slot::Value(_) => value,
        };
        let def = self.property_def(key, property)?;
        let current = self.current_slot(key, &def)?;
        self.detach(key, property, &current);
        self.attach(key, property, &restored);
        {
            let state = self.state_mut(key)?;
            state.values.insert(property.to_string(), restored);
            state.dirty.remove(property);
            state.dirty_sub_models.remove(property);
        }
        if let Some(id_field) = def.as_relation().and_then(|r| r.id_field_name()) {
            self.revert_property(key, id_field)?;
        }
        self.invalidate_calculated(key, property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests_support::{fixture_session, seeded};
    use crate::model_set::ModelSet;

    #[test]
    fn test_set_records_old_and_dirty() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann"), ("lastName", "Lee")]);
        s.set(c, "firstName", "Anna").unwrap();
        let state = s.entity(c).unwrap();
        assert!(state.dirty().contains("firstName"));
        assert_eq!(state.old("firstName"), Some(&Slot::from("Ann")));
        assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Anna"));
    }

    #[test]
    fn test_set_same_value_is_noop() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.set(c, "firstName", "Ann").unwrap();
        assert!(!s.entity(c).unwrap().is_dirty());
        assert!(s.entity(c).unwrap().old("firstName").is_none());
    }

    #[test]
    fn test_set_twice_keeps_first_baseline() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.set(c, "firstName", "Bea").unwrap();
        s.set(c, "firstName", "Cy").unwrap();
        s.set(c, "firstName", "Cy").unwrap();
        let state = s.entity(c).unwrap();
        assert_eq!(state.dirty().len(), 1);
        assert_eq!(state.old("firstName"), Some(&Slot::from("Ann")));
    }

    #[test]
    fn test_deleted_and_read_only_reject_writes() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let snap = s.clone_for_old_assignment(c).unwrap();
        assert!(matches!(s.set(snap, "firstName", "X"), Err(OrmError::ReadOnly(_))));
        s.state_mut(c).unwrap().is_deleted = true;
        assert!(matches!(s.set(c, "firstName", "X"), Err(OrmError::DeletedObject(_))));
    }

    #[test]
    fn test_relation_mirrors_id_field() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let member = s.member(c).unwrap();
        s.set(a, "owner", member).unwrap();
        assert_eq!(s.value(a, "ownerId").unwrap(), member.guid.to_value());
        assert!(s.entity(a).unwrap().dirty_sub_models().contains("owner"));
        assert!(s.entity(a).unwrap().dirty().contains("ownerId"));

        s.set(a, "owner", None::<Member>).unwrap();
        assert_eq!(s.value(a, "ownerId").unwrap(), Value::Null);

        // setting the mirror alone leaves the relation alone
        s.set(a, "ownerId", member.guid.to_value()).unwrap();
        assert_eq!(s.related(a, "owner").unwrap(), None);
    }

    #[test]
    fn test_relation_rejects_wrong_kind() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let b = seeded(&mut s, "Activity", &[("title", "Other")]);
        let member = s.member(b).unwrap();
        assert!(matches!(s.set(a, "owner", member), Err(OrmError::Programming(_))));
    }

    #[test]
    fn test_computed_update_and_recompute() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann"), ("lastName", "Lee")]);
        s.set(c, "lastName", "Ray").unwrap();
        assert_eq!(s.value(c, "fullName").unwrap(), Value::from("Ann Ray"));

        s.set(c, "fullName", "Bea Moss").unwrap();
        assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Bea"));
        assert_eq!(s.value(c, "lastName").unwrap(), Value::from("Moss"));
        assert!(s.entity(c).unwrap().dirty().contains("fullName"));
    }

    #[test]
    fn test_calculated_requires_loaded_dependencies() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        assert!(matches!(s.get(c, "initials"), Err(OrmError::UnsupportedOperation(_))));
        s.set_override(c, "lastName", "Lee").unwrap();
        assert_eq!(s.value(c, "initials").unwrap(), Value::from("AL"));
        assert!(matches!(s.set(c, "initials", "X"), Err(OrmError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_calculated_cache_invalidated_by_dependency() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann"), ("lastName", "Lee")]);
        assert_eq!(s.value(c, "initials").unwrap(), Value::from("AL"));
        assert!(s.entity(c).unwrap().cache.contains_key("initials"));
        s.set(c, "firstName", "Bea").unwrap();
        assert!(!s.entity(c).unwrap().cache.contains_key("initials"));
        assert_eq!(s.value(c, "initials").unwrap(), Value::from("BL"));
    }

    #[test]
    fn test_round_trip_is_different() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let set = s.model_set(&[c]).unwrap();
        s.set_override(a, "contacts", set).unwrap();
        for property in s.entity(a).unwrap().loaded().clone() {
            let current = s.get(a, &property).unwrap();
            assert_eq!(s.is_different(a, &property, &current).unwrap(), Difference::Same);
        }
    }

    #[test]
    fn test_is_different_rules() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c1 = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let c2 = seeded(&mut s, "Contact", &[("firstName", "Bea")]);
        let m1 = s.member(c1).unwrap();
        let m2 = s.member(c2).unwrap();
        s.set_override(a, "owner", m1).unwrap();
        s.set_override(a, "contacts", ModelSet::from_members([m1])).unwrap();

        assert_eq!(s.is_different(a, "title", &Slot::from("Other")).unwrap(), Difference::Different);
        assert_eq!(s.is_different(a, "owner", &Slot::from(m2)).unwrap(), Difference::Different);
        assert_eq!(s.is_different(a, "owner", &Slot::from(m1)).unwrap(), Difference::Same);
        assert_eq!(
            s.is_different(a, "contacts", &Slot::Many(ModelSet::from_members([m1, m2]))).unwrap(),
            Difference::SubModel
        );

        s.set(c1, "firstName", "Anna").unwrap();
        assert_eq!(s.is_different(a, "owner", &Slot::from(m1)).unwrap(), Difference::SubModel);
    }

    #[test]
    fn test_replaced_target_with_changes_is_sub_model() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c1 = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let c2 = seeded(&mut s, "Contact", &[("firstName", "Bea")]);
        let m1 = s.member(c1).unwrap();
        let m2 = s.member(c2).unwrap();
        s.set_override(a, "owner", m1).unwrap();

        assert_eq!(s.is_different(a, "owner", &Slot::from(m2)).unwrap(), Difference::Different);
        s.set(c2, "firstName", "Beatrix").unwrap();
        assert_eq!(s.is_different(a, "owner", &Slot::from(m2)).unwrap(), Difference::SubModel);
        assert_eq!(
            s.is_different(a, "owner", &Slot::One(None)).unwrap(),
            Difference::Different
        );
    }

    #[test]
    fn test_custom_equals_suppresses_change() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("email", "Ann@Example.com")]);
        s.set(c, "email", "ann@example.com").unwrap();
        assert!(!s.entity(c).unwrap().is_dirty());
    }

    #[test]
    fn test_revert_restores_baseline() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.set(a, "title", "Visit").unwrap();
        let member = s.member(c).unwrap();
        s.set(a, "owner", member).unwrap();
        s.revert(a).unwrap();
        assert_eq!(s.value(a, "title").unwrap(), Value::from("Call"));
        assert_eq!(s.related(a, "owner").unwrap(), None);
        assert!(!s.entity(a).unwrap().is_dirty());
        assert!(s.entity(c).unwrap().listeners().is_empty());
    }

    #[test]
    fn test_get_unloaded_reads_reverse_pointer() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let member = s.member(c).unwrap();
        s.state_mut(a).unwrap().reverse.insert("owner".into(), Slot::from(member));
        assert_eq!(s.related(a, "owner").unwrap(), Some(c));
        assert!(!s.entity(a).unwrap().is_loaded("owner"));
    }

    #[tokio::test]
    async fn test_async_get_on_new_entity_needing_load() {
        let (mut s, _) = fixture_session();
        let c = s.new_entity("Contact").unwrap();
        let err = s.async_get(c, "firstName").await.unwrap_err();
        assert!(matches!(err, OrmError::UncommittedObject(_)));
        // new entities never load before a set
        s.async_set(c, "firstName", "Ann").await.unwrap();
        assert_eq!(s.async_get(c, "firstName").await.unwrap(), Slot::from("Ann"));
    }

    #[tokio::test]
    async fn test_async_get_loads_missing_property() {
        let (mut s, driver) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let guid = s.entity(c).unwrap().guid();
        driver.rows.lock().unwrap().push(
            crate::record::Record::new()
                .with_id(guid)
                .with("firstName", "Ann")
                .with("lastName", "Lee"),
        );
        s.set(c, "firstName", "Anna").unwrap();
        assert_eq!(s.async_get(c, "lastName").await.unwrap(), Slot::from("Lee"));
        // dirty values survive hydration
        assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Anna"));
        assert_eq!(driver.plans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_rejects_deleted() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.state_mut(c).unwrap().is_deleted = true;
        assert!(matches!(s.load(c, &["lastName"]).await, Err(OrmError::DeletedObject(_))));
        assert!(matches!(s.async_get(c, "lastName").await, Err(OrmError::DeletedObject(_))));
    }
}
