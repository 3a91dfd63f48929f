//! The commit orchestrator.
//!
//! Every write operation follows the same phases:
//!
//! 1. validate the root entities (required properties, property validators,
//!    the kind validator)
//! 2. diff them into nested payloads, collecting every touched entity
//! 3. run the before-hooks of every touched entity, then the storage
//!    operations they requested. Hook writes trigger a fresh diff; entities
//!    it adds get their own hooks, and each entity's before-hooks run once
//!    per commit
//! 4. write
//! 5. run the after-hooks and their storage operations
//! 6. finish: clear the written changes, flip `is_new`/`is_deleted`, notify
//!    parents and release baselines nothing refers to any more
//!
//! Failures in phases 1 to 3 happen before any storage call and roll back
//! every in-memory write made by hooks.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::Instrument;
use unitwork_rs_core::logging::operation_span;
use unitwork_rs_core::{OrmError, OrmResult, ValidationError};

use crate::diff::{soft_delete_payload, DiffContext};
use crate::driver::StorageOp;
use crate::entity::listeners::MutationEvent;
use crate::entity::{CalcContext, EntityKey, Slot};
use crate::hooks::{HookContext, HookOutcome, HookPhase, Hooks, PropertyChange};
use crate::payload::{WhereUnique, WritePayload};
use crate::query::filter::{Filter, Lookup};
use crate::registry::{PropertyType, SoftDeleteColumns};
use crate::session::Session;
use crate::value::Value;

/// Properties whose changes a commit wrote, per entity.
type Written = HashMap<EntityKey, BTreeSet<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum When {
    Before,
    After,
}

impl Session {
    /// Writes the changes of an entity and of every entity nested in its
    /// dirty relations. New entities are created; clean ones are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DeletedObject`] or [`OrmError::ReadOnly`] for
    /// entities that cannot be written, validation and hook errors before
    /// any storage call, and storage errors (uniqueness violations as
    /// [`OrmError::UniqueConstraintViolation`]).
    pub async fn commit(&mut self, key: EntityKey) -> OrmResult<()> {
        self.check_writable(key, "commit")?;
        let state = self.state(key)?;
        if state.is_new {
            return self.create(key).await;
        }
        if !state.is_dirty() {
            return Ok(());
        }
        let (kind, guid) = (state.kind.clone(), state.guid);
        let span = operation_span(&kind, "commit");
        async move {
            self.validate_entity(key, false)?;
            let (ctx, payload, phase) = self.before_hooks(&[key], false, |s| {
                let mut ctx = DiffContext::new();
                let payload = s.update_payload(key, &mut ctx, &[])?;
                Ok((ctx, payload))
            })?;
            let written = self.changed_properties(&ctx)?;
            self.run_ops(phase.batch).await?;

            if !payload.is_empty() {
                tracing::debug!(payload = %payload.to_json(), "updating");
                self.driver
                    .update(&kind, &WhereUnique::Id(guid), &payload)
                    .await
                    .map_err(OrmError::from_storage)?;
            }
            self.after_write(ctx, &written, false).await
        }
        .instrument(span)
        .await
    }

    /// Creates a new entity together with the entities nested in its
    /// relations.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] if the entity is already stored,
    /// otherwise fails like [`Session::commit`].
    pub async fn create(&mut self, key: EntityKey) -> OrmResult<()> {
        self.check_writable(key, "create")?;
        let state = self.state(key)?;
        if !state.is_new {
            return Err(OrmError::Programming(format!(
                "{} {} is already stored; use commit",
                state.kind, state.guid
            )));
        }
        let kind = state.kind.clone();
        let span = operation_span(&kind, "create");
        async move {
            self.validate_entity(key, true)?;
            let (ctx, payload, phase) = self.before_hooks(&[key], false, |s| {
                let mut ctx = DiffContext::new();
                let payload = s.create_payload(key, &mut ctx, &[])?;
                Ok((ctx, payload))
            })?;
            let written = self.changed_properties(&ctx)?;
            self.run_ops(phase.batch).await?;

            tracing::debug!(payload = %payload.to_json(), "creating");
            self.driver
                .create(&kind, &payload)
                .await
                .map_err(OrmError::from_storage)?;
            self.after_write(ctx, &written, false).await
        }
        .instrument(span)
        .await
    }

    /// Deletes a stored entity. Soft-delete kinds get their deleted flag
    /// (and timestamp) written instead.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UncommittedObject`] for new entities,
    /// [`OrmError::DeletedObject`] if already deleted, hook errors before
    /// any storage call, and storage errors.
    pub async fn delete(&mut self, key: EntityKey) -> OrmResult<()> {
        self.check_deletable(key)?;
        let state = self.state(key)?;
        let (kind, guid) = (state.kind.clone(), state.guid);
        let soft_delete = self.registry.kind(&kind)?.soft_delete().cloned();
        let span = operation_span(&kind, "delete");
        async move {
            let mut ctx = DiffContext::new();
            if soft_delete.is_some() {
                ctx.soft_deleted.push(key);
            } else {
                ctx.deleted.push(key);
            }
            let phase = self.delete_hooks(&ctx, false)?;
            self.run_ops(phase.batch).await?;

            let target = WhereUnique::Id(guid);
            let written = match &soft_delete {
                Some(columns) => {
                    let data = soft_delete_payload(columns, ctx.now);
                    self.driver.update(&kind, &target, &data).await.map(drop)
                }
                None => self.driver.delete(&kind, &target).await,
            };
            written.map_err(OrmError::from_storage)?;
            self.after_write(ctx, &Written::new(), false).await
        }
        .instrument(span)
        .await
    }

    /// Creates several new entities. Flat payloads are sent as one
    /// `create_many` per kind (chunked by `batch_size`); payloads with
    /// nested writes are created one by one.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::create`] for any of the entities.
    pub async fn create_many(&mut self, keys: &[EntityKey]) -> OrmResult<()> {
        let Some(first) = keys.first() else {
            return Ok(());
        };
        for key in keys {
            self.check_writable(*key, "create_many")?;
            let state = self.state(*key)?;
            if !state.is_new {
                return Err(OrmError::Programming(format!(
                    "{} {} is already stored; use update_many",
                    state.kind, state.guid
                )));
            }
        }
        let span = operation_span(&self.kind_of(*first)?, "create_many");
        async move {
            for key in keys {
                self.validate_entity(*key, true)?;
            }
            let (ctx, payloads, phase) =
                self.before_hooks(keys, true, |s| s.bulk_payloads(keys, true))?;
            let written = self.changed_properties(&ctx)?;
            self.run_ops(phase.batch).await?;

            let mut flat: BTreeMap<String, Vec<WritePayload>> = BTreeMap::new();
            let mut nested = Vec::new();
            for (key, payload) in payloads {
                let kind = self.kind_of(key)?;
                if payload.is_flat() {
                    flat.entry(kind).or_default().push(payload);
                } else {
                    nested.push((kind, payload));
                }
            }
            for (kind, rows) in &flat {
                for chunk in rows.chunks(self.settings.chunk_size(rows.len())) {
                    tracing::debug!(kind = %kind, rows = chunk.len(), "creating in bulk");
                    self.driver
                        .create_many(kind, chunk)
                        .await
                        .map_err(OrmError::from_storage)?;
                }
            }
            for (kind, payload) in &nested {
                self.driver
                    .create(kind, payload)
                    .await
                    .map_err(OrmError::from_storage)?;
            }
            self.after_write(ctx, &written, true).await
        }
        .instrument(span)
        .await
    }

    /// Writes the changes of several stored entities. Identical flat
    /// payloads of one kind are sent as a single `update_many` filtered by
    /// id; the rest are updated one by one. Clean entities are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UncommittedObject`] for new entities, otherwise
    /// fails like [`Session::commit`].
    pub async fn update_many(&mut self, keys: &[EntityKey]) -> OrmResult<()> {
        let mut dirty = Vec::with_capacity(keys.len());
        for key in keys {
            self.check_writable(*key, "update_many")?;
            let state = self.state(*key)?;
            if state.is_new {
                return Err(OrmError::UncommittedObject(format!(
                    "cannot update unsaved {} {}",
                    state.kind, state.guid
                )));
            }
            if state.is_dirty() {
                dirty.push(*key);
            }
        }
        let Some(first) = dirty.first() else {
            return Ok(());
        };
        let span = operation_span(&self.kind_of(*first)?, "update_many");
        async move {
            for key in &dirty {
                self.validate_entity(*key, false)?;
            }
            let (ctx, payloads, phase) =
                self.before_hooks(&dirty, true, |s| s.bulk_payloads(&dirty, false))?;
            let written = self.changed_properties(&ctx)?;
            self.run_ops(phase.batch).await?;

            // (kind, rendered payload) -> (payload, ids)
            let mut grouped: BTreeMap<(String, String), (WritePayload, Vec<Value>)> =
                BTreeMap::new();
            for (key, payload) in payloads {
                if payload.is_empty() {
                    continue;
                }
                let state = self.state(key)?;
                let (kind, guid) = (state.kind.clone(), state.guid);
                if payload.is_flat() {
                    let rendered = payload.to_json().to_string();
                    grouped
                        .entry((kind, rendered))
                        .or_insert_with(|| (payload, Vec::new()))
                        .1
                        .push(guid.to_value());
                } else {
                    self.driver
                        .update(&kind, &WhereUnique::Id(guid), &payload)
                        .await
                        .map_err(OrmError::from_storage)?;
                }
            }
            for ((kind, _), (data, ids)) in &grouped {
                for chunk in ids.chunks(self.settings.chunk_size(ids.len())) {
                    let filter = Filter::field("id", Lookup::In(chunk.to_vec()));
                    tracing::debug!(kind = %kind, rows = chunk.len(), "updating in bulk");
                    self.driver
                        .update_many(kind, &filter, data)
                        .await
                        .map_err(OrmError::from_storage)?;
                }
            }
            self.after_write(ctx, &written, true).await
        }
        .instrument(span)
        .await
    }

    /// Deletes several stored entities with one `delete_many` (or, for
    /// soft-delete kinds, one `update_many`) per kind.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::delete`] for any of the entities.
    pub async fn delete_many(&mut self, keys: &[EntityKey]) -> OrmResult<()> {
        let Some(first) = keys.first() else {
            return Ok(());
        };
        for key in keys {
            self.check_deletable(*key)?;
        }
        let span = operation_span(&self.kind_of(*first)?, "delete_many");
        async move {
            let mut ctx = DiffContext::new();
            let mut hard: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            let mut soft: BTreeMap<String, (SoftDeleteColumns, Vec<Value>)> = BTreeMap::new();
            for key in keys {
                let state = self.state(*key)?;
                let (kind, guid) = (state.kind.clone(), state.guid);
                match self.registry.kind(&kind)?.soft_delete() {
                    Some(columns) => {
                        soft.entry(kind)
                            .or_insert_with(|| (columns.clone(), Vec::new()))
                            .1
                            .push(guid.to_value());
                        ctx.soft_deleted.push(*key);
                    }
                    None => {
                        hard.entry(kind).or_default().push(guid.to_value());
                        ctx.deleted.push(*key);
                    }
                }
            }
            let phase = self.delete_hooks(&ctx, true)?;
            self.run_ops(phase.batch).await?;

            for (kind, ids) in &hard {
                for chunk in ids.chunks(self.settings.chunk_size(ids.len())) {
                    let filter = Filter::field("id", Lookup::In(chunk.to_vec()));
                    self.driver
                        .delete_many(kind, &filter)
                        .await
                        .map_err(OrmError::from_storage)?;
                }
            }
            for (kind, (columns, ids)) in &soft {
                let data = soft_delete_payload(columns, ctx.now);
                for chunk in ids.chunks(self.settings.chunk_size(ids.len())) {
                    let filter = Filter::field("id", Lookup::In(chunk.to_vec()));
                    self.driver
                        .update_many(kind, &filter, &data)
                        .await
                        .map_err(OrmError::from_storage)?;
                }
            }
            self.after_write(ctx, &Written::new(), true).await
        }
        .instrument(span)
        .await
    }

    // ── Validation ─────────────────────────────────────────────────────

    fn check_writable(&self, key: EntityKey, operation: &str) -> OrmResult<()> {
        let state = self.state(key)?;
        if state.is_deleted {
            return Err(OrmError::DeletedObject(format!(
                "cannot {operation} deleted {} {}",
                state.kind, state.guid
            )));
        }
        if state.is_read_only {
            return Err(OrmError::ReadOnly(format!(
                "cannot {operation} a snapshot of {} {}",
                state.kind, state.guid
            )));
        }
        Ok(())
    }

    fn check_deletable(&self, key: EntityKey) -> OrmResult<()> {
        self.check_writable(key, "delete")?;
        let state = self.state(key)?;
        if state.is_new {
            return Err(OrmError::UncommittedObject(format!(
                "cannot delete unsaved {} {}",
                state.kind, state.guid
            )));
        }
        Ok(())
    }

    /// Checks required properties (when `creating`), property validators
    /// and the kind validator.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::RequiredProperty`] or [`OrmError::Validation`],
    /// both naming the kind by its verbose name.
    pub fn validate_entity(&self, key: EntityKey, creating: bool) -> OrmResult<()> {
        let state = self.state(key)?;
        let meta = self.registry.kind(&state.kind)?;
        let mut field_errors: HashMap<String, Vec<ValidationError>> = HashMap::new();
        for def in meta.properties() {
            if matches!(
                def.property_type,
                PropertyType::Calculated(_) | PropertyType::Joined { .. }
            ) {
                continue;
            }
            let loaded = state.loaded.contains(&def.name);
            let slot = if loaded {
                self.current_slot(key, def)?
            } else {
                Self::default_slot(def)
            };
            if creating && def.required && slot.is_empty() {
                let mirrored = def
                    .as_relation()
                    .and_then(|r| r.id_field_name())
                    .and_then(|f| state.values.get(f))
                    .is_some_and(|s| !s.is_empty());
                if !mirrored {
                    return Err(OrmError::RequiredProperty {
                        kind: meta.verbose_name().to_string(),
                        property: def.name.clone(),
                    });
                }
            }
            let checked = if creating {
                loaded
            } else {
                state.dirty.contains(&def.name)
            };
            if let (true, Slot::Value(value)) = (checked, &slot) {
                let errors: Vec<ValidationError> = def
                    .validators
                    .iter()
                    .filter_map(|v| v.validate(value).err())
                    .collect();
                if !errors.is_empty() {
                    field_errors.insert(def.name.clone(), errors);
                }
            }
        }
        if !field_errors.is_empty() {
            return Err(OrmError::Validation {
                kind: meta.verbose_name().to_string(),
                error: ValidationError::with_field_errors(field_errors),
            });
        }
        if let Some(validator) = meta.validator() {
            validator(&CalcContext::new(self, key)).map_err(|error| OrmError::Validation {
                kind: meta.verbose_name().to_string(),
                error,
            })?;
        }
        Ok(())
    }

    /// Validates the nested entities a diff collected besides `roots`.
    fn validate_worklist(&self, ctx: &DiffContext, roots: &[EntityKey]) -> OrmResult<()> {
        for key in ctx.created.iter().filter(|k| !roots.contains(k)) {
            self.validate_entity(*key, true)?;
        }
        for key in ctx.updated.iter().filter(|k| !roots.contains(k)) {
            self.validate_entity(*key, false)?;
        }
        Ok(())
    }

    fn bulk_payloads(
        &mut self,
        keys: &[EntityKey],
        creating: bool,
    ) -> OrmResult<(DiffContext, Vec<(EntityKey, WritePayload)>)> {
        let mut ctx = DiffContext::new();
        let mut payloads = Vec::with_capacity(keys.len());
        for key in keys {
            // already nested in an earlier root
            if ctx.is_visited(*key) {
                continue;
            }
            let payload = if creating {
                self.create_payload(*key, &mut ctx, &[])?
            } else {
                self.update_payload(*key, &mut ctx, &[])?
            };
            payloads.push((*key, payload));
        }
        Ok((ctx, payloads))
    }

    // ── Hooks ──────────────────────────────────────────────────────────

    fn changed_properties(&self, ctx: &DiffContext) -> OrmResult<Written> {
        let mut written = Written::new();
        for key in ctx.written() {
            let state = self.state(key)?;
            let entry: &mut BTreeSet<String> = written.entry(key).or_default();
            entry.extend(state.dirty.iter().cloned());
            entry.extend(state.dirty_sub_models.iter().cloned());
        }
        Ok(written)
    }

    /// One [`PropertyChange`] per dirty property of an entity.
    fn property_changes(&self, key: EntityKey) -> OrmResult<Vec<PropertyChange>> {
        let state = self.state(key)?;
        let names: BTreeSet<&String> = state.dirty.iter().chain(&state.dirty_sub_models).collect();
        let mut changes = Vec::with_capacity(names.len());
        for name in names {
            let def = self.registry.property(&state.kind, name)?;
            let new = self.current_slot(key, def)?;
            let old = state.old.get(name).cloned().unwrap_or_else(|| new.clone());
            changes.push(PropertyChange {
                property: name.clone(),
                new,
                old,
            });
        }
        Ok(changes)
    }

    /// Diffs with `diff` and runs the before-hooks of every touched entity
    /// until no hook writes any more. Every entity's before-hooks run once,
    /// including entities a hook write pulled into the worklist. Hook
    /// writes are journaled; on any failure they are rolled back and a
    /// rejected property is reverted.
    fn before_hooks<P>(
        &mut self,
        roots: &[EntityKey],
        batched: bool,
        diff: impl Fn(&mut Self) -> OrmResult<(DiffContext, P)>,
    ) -> OrmResult<(DiffContext, P, HookPhase)> {
        let (mut ctx, mut payload) = diff(self)?;
        self.validate_worklist(&ctx, roots)?;
        let mut phase = HookPhase::default();
        let mut hooked = HashSet::new();
        self.open_journal();
        let rounds = loop {
            let writes = self.hook_writes();
            if let Err(err) = self.run_hooks(&ctx, &mut phase, When::Before, batched, &mut hooked) {
                break Err(err);
            }
            if self.hook_writes() == writes {
                break Ok(());
            }
            match diff(self) {
                Ok(next) => (ctx, payload) = next,
                Err(err) => break Err(err),
            }
            // hook writes are validated, on the roots too
            if let Err(err) = self.validate_worklist(&ctx, &[]) {
                break Err(err);
            }
        };
        self.settle_journal(&mut phase, rounds)?;
        Ok((ctx, payload, phase))
    }

    fn delete_hooks(&mut self, ctx: &DiffContext, batched: bool) -> OrmResult<HookPhase> {
        let mut phase = HookPhase::default();
        self.open_journal();
        let ran = self.run_hooks(ctx, &mut phase, When::Before, batched, &mut HashSet::new());
        self.settle_journal(&mut phase, ran)?;
        Ok(phase)
    }

    /// Closes the hook journal, unwinding it when `result` failed.
    fn settle_journal(&mut self, phase: &mut HookPhase, result: OrmResult<()>) -> OrmResult<()> {
        let Err(err) = result else {
            self.close_journal(false);
            return Ok(());
        };
        self.close_journal(true);
        if let Some((key, property)) = phase.rejected.take() {
            self.revert_property(key, &property)?;
            self.drain()?;
        }
        self.collect_snapshots();
        Err(err)
    }

    /// Runs the hooks of every worklist entity not in `hooked` yet.
    fn run_hooks(
        &mut self,
        ctx: &DiffContext,
        phase: &mut HookPhase,
        when: When,
        batched: bool,
        hooked: &mut HashSet<EntityKey>,
    ) -> OrmResult<()> {
        let registry = Arc::clone(&self.registry);
        for &key in &ctx.created {
            if !hooked.insert(key) {
                continue;
            }
            let kind = self.kind_of(key)?;
            let hooks = registry.kind(&kind)?.hooks();
            let hooks = match when {
                When::Before => &hooks.before_create,
                When::After => &hooks.after_create,
            };
            for hook in hooks {
                let outcome = hook(&mut HookContext::new(self, key, batched));
                Self::settle(phase, when, outcome, &kind, "create", None)?;
            }
        }
        for &key in &ctx.updated {
            if !hooked.insert(key) {
                continue;
            }
            let kind = self.kind_of(key)?;
            let hooks = registry.kind(&kind)?.hooks();
            let hooks = match when {
                When::Before => &hooks.before_update,
                When::After => &hooks.after_update,
            };
            if hooks.is_empty() {
                continue;
            }
            for change in self.property_changes(key)? {
                for hook in Hooks::update_hooks(hooks, &change.property) {
                    let outcome = hook(&mut HookContext::new(self, key, batched), &change);
                    let rejected = Some((key, change.property.as_str()));
                    Self::settle(phase, when, outcome, &kind, "update", rejected)?;
                }
            }
        }
        for key in ctx.removed() {
            if !hooked.insert(key) {
                continue;
            }
            let kind = self.kind_of(key)?;
            let hooks = registry.kind(&kind)?.hooks();
            let hooks = match when {
                When::Before => &hooks.before_delete,
                When::After => &hooks.after_delete,
            };
            for hook in hooks {
                let outcome = hook(&mut HookContext::new(self, key, batched));
                Self::settle(phase, when, outcome, &kind, "delete", None)?;
            }
        }
        Ok(())
    }

    fn settle(
        phase: &mut HookPhase,
        when: When,
        outcome: HookOutcome,
        kind: &str,
        operation: &'static str,
        rejected: Option<(EntityKey, &str)>,
    ) -> OrmResult<()> {
        match when {
            When::Before => phase.settle(outcome, kind, operation, rejected),
            When::After => {
                phase.settle_after(outcome, kind, operation);
                Ok(())
            }
        }
    }

    async fn run_ops(&self, ops: Vec<StorageOp>) -> OrmResult<()> {
        for op in ops {
            tracing::debug!(kind = op.kind(), ?op, "running hook operation");
            op.execute(self.driver.as_ref())
                .await
                .map_err(OrmError::from_storage)?;
        }
        Ok(())
    }

    // ── Finishing ──────────────────────────────────────────────────────

    async fn after_write(
        &mut self,
        ctx: DiffContext,
        written: &Written,
        batched: bool,
    ) -> OrmResult<()> {
        let mut phase = HookPhase::default();
        self.run_hooks(&ctx, &mut phase, When::After, batched, &mut HashSet::new())?;
        self.run_ops(phase.batch).await?;
        self.finish(ctx, written)
    }

    fn finish(&mut self, ctx: DiffContext, written: &Written) -> OrmResult<()> {
        for key in ctx.written() {
            let state = self.state_mut(key)?;
            state.is_new = false;
            if let Some(properties) = written.get(&key) {
                for property in properties {
                    state.dirty.remove(property);
                    state.dirty_sub_models.remove(property);
                    state.old.remove(property);
                }
            }
            self.notify(MutationEvent::Commit { child: key });
        }

        for key in ctx.removed() {
            let kind = self.kind_of(key)?;
            let columns = self.registry.kind(&kind)?.soft_delete().cloned();
            if let Some(columns) = columns {
                let meta = self.registry.kind(&kind)?;
                let has_flag = meta.property(&columns.flag).is_some();
                let timestamp = columns.timestamp.filter(|t| meta.property(t).is_some());
                if has_flag {
                    self.set_override(key, &columns.flag, true)?;
                }
                if let Some(timestamp) = timestamp {
                    self.set_override(key, &timestamp, Value::from(ctx.now))?;
                }
            }
            let state = self.state_mut(key)?;
            state.is_deleted = true;
            state.dirty.clear();
            state.dirty_sub_models.clear();
            state.old.clear();
            self.notify(MutationEvent::Delete { child: key });
        }

        for row in &ctx.join_rows {
            self.record_join_row(row.owner, &row.property, row.target, row.row)?;
        }
        for (owner, property, target) in &ctx.linked {
            let target = self.state(*target)?.guid;
            self.sync_reverse_baseline(*owner, property, target, true)?;
        }
        for (owner, property, target) in &ctx.forgotten_joins {
            self.forget_join_row(*owner, property, *target)?;
            self.sync_reverse_baseline(*owner, property, *target, false)?;
        }
        self.drain()?;
        self.collect_snapshots();
        Ok(())
    }
}
