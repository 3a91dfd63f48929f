//! Lifecycle hooks.
//!
//! Kinds register hooks on their [`KindMeta`](crate::registry::KindMeta).
//! Create and delete hooks receive a [`HookContext`] for the entity; update
//! hooks run once per changed property and also receive the
//! [`PropertyChange`]. Read hooks may rewrite the [`ReadArgs`] of a read.
//!
//! A hook answers with a [`HookOutcome`]. `Abort` (or an error severity)
//! from a before-hook stops the commit: every in-memory edit made by hooks
//! is rolled back, the rejected property is reverted, and no storage write
//! is issued. `Batch` queues extra storage operations, run once after all
//! hooks of the phase.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use unitwork_rs_core::{OrmError, OrmResult};

use crate::driver::StorageOp;
use crate::entity::{EntityKey, Slot};
use crate::guid::Guid;
use crate::query::planner::ReadArgs;
use crate::session::{ArenaSlot, Session};
use crate::value::Value;

/// How serious a hook message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Logged at info level.
    Info,
    /// Logged at warn level.
    Warning,
    /// Treated like an abort.
    Error,
}

/// What a hook asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Proceed.
    Continue,
    /// Stop the commit with a reason.
    Abort(String),
    /// Report a message; `Severity::Error` aborts.
    Severity(Severity, String),
    /// Proceed and run these storage operations.
    Batch(Vec<StorageOp>),
}

impl From<bool> for HookOutcome {
    fn from(proceed: bool) -> Self {
        if proceed {
            Self::Continue
        } else {
            Self::Abort("rejected by hook".to_string())
        }
    }
}

/// One changed property handed to update hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    /// The property name.
    pub property: String,
    /// The value about to be (or just) written.
    pub new: Slot,
    /// The baseline value.
    pub old: Slot,
}

/// A create, delete or read-result hook.
pub type EntityHook = Arc<dyn Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync>;

/// An update hook.
pub type UpdateHook = Arc<dyn Fn(&mut HookContext<'_>, &PropertyChange) -> HookOutcome + Send + Sync>;

/// A hook that may rewrite read arguments for a kind.
pub type ReadHook = Arc<dyn Fn(&str, &mut ReadArgs) -> HookOutcome + Send + Sync>;

/// The hooks registered for one kind.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_create: Vec<EntityHook>,
    pub(crate) after_create: Vec<EntityHook>,
    pub(crate) before_update: Vec<(Option<String>, UpdateHook)>,
    pub(crate) after_update: Vec<(Option<String>, UpdateHook)>,
    pub(crate) before_delete: Vec<EntityHook>,
    pub(crate) after_delete: Vec<EntityHook>,
    pub(crate) before_read: Vec<ReadHook>,
    pub(crate) after_read: Vec<EntityHook>,
}

impl Hooks {
    /// Returns `true` if no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.before_create.is_empty()
            && self.after_create.is_empty()
            && self.before_update.is_empty()
            && self.after_update.is_empty()
            && self.before_delete.is_empty()
            && self.after_delete.is_empty()
            && self.before_read.is_empty()
            && self.after_read.is_empty()
    }

    pub(crate) fn update_hooks<'h>(
        hooks: &'h [(Option<String>, UpdateHook)],
        property: &'h str,
    ) -> impl Iterator<Item = &'h UpdateHook> + 'h {
        hooks
            .iter()
            .filter(move |(only, _)| only.as_deref().map_or(true, |p| p == property))
            .map(|(_, hook)| hook)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_create", &self.before_create.len())
            .field("after_create", &self.after_create.len())
            .field("before_update", &self.before_update.len())
            .field("after_update", &self.after_update.len())
            .field("before_delete", &self.before_delete.len())
            .field("after_delete", &self.after_delete.len())
            .field("before_read", &self.before_read.len())
            .field("after_read", &self.after_read.len())
            .finish()
    }
}

/// Pre-images of everything before-hooks touched, saved on first write.
///
/// Slots that existed when the journal opened are copied the first time
/// they are borrowed mutably; slots pushed afterwards are truncated away on
/// rollback.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    arena_len: usize,
    free: Vec<usize>,
    slots: HashMap<usize, ArenaSlot>,
    live: HashMap<Guid, Option<EntityKey>>,
    writes: usize,
}

impl Journal {
    fn open(session: &Session) -> Self {
        Self {
            arena_len: session.entities.len(),
            free: session.free.clone(),
            ..Self::default()
        }
    }

    pub(crate) fn save_slot(&mut self, index: usize, slot: &ArenaSlot) {
        if index < self.arena_len {
            self.slots.entry(index).or_insert_with(|| slot.clone());
        }
    }

    pub(crate) fn save_live(&mut self, guid: Guid, previous: Option<EntityKey>) {
        self.live.entry(guid).or_insert(previous);
    }

    /// Number of saved slots.
    pub(crate) fn saved(&self) -> usize {
        self.slots.len()
    }

    fn rollback(self, session: &mut Session) {
        session.entities.truncate(self.arena_len);
        for (index, slot) in self.slots {
            if let Some(cell) = session.entities.get_mut(index) {
                *cell = slot;
            }
        }
        session.free = self.free;
        for (guid, previous) in self.live {
            match previous {
                Some(key) => session.live.insert(guid, key),
                None => session.live.remove(&guid),
            };
        }
        session.pending.clear();
    }
}

impl Session {
    /// Starts journaling arena writes. Hook writes made while it is open
    /// can be undone with [`Session::close_journal`].
    pub(crate) fn open_journal(&mut self) {
        self.journal = Some(Journal::open(self));
    }

    /// Ends journaling; `rollback` restores every saved pre-image.
    pub(crate) fn close_journal(&mut self, rollback: bool) {
        if let Some(journal) = self.journal.take() {
            if rollback {
                journal.rollback(self);
            }
        }
    }

    /// Number of hook writes since the journal opened.
    pub(crate) fn hook_writes(&self) -> usize {
        self.journal.as_ref().map_or(0, |j| j.writes)
    }
}

/// The entity a hook runs for, with journaled write access.
pub struct HookContext<'a> {
    session: &'a mut Session,
    key: EntityKey,
    batched: bool,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(session: &'a mut Session, key: EntityKey, batched: bool) -> Self {
        Self {
            session,
            key,
            batched,
        }
    }

    /// The entity's handle.
    pub const fn key(&self) -> EntityKey {
        self.key
    }

    /// The entity's identity.
    pub fn guid(&self) -> OrmResult<Guid> {
        Ok(self.session.state(self.key)?.guid)
    }

    /// The entity's kind.
    pub fn kind(&self) -> OrmResult<&str> {
        Ok(&self.session.state(self.key)?.kind)
    }

    /// `true` inside `create_many`/`update_many`/`delete_many`.
    pub const fn is_batched(&self) -> bool {
        self.batched
    }

    /// Reads a property of the entity.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::get`].
    pub fn get(&mut self, property: &str) -> OrmResult<Slot> {
        self.session.get(self.key, property)
    }

    /// Reads a scalar property of the entity.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::value`].
    pub fn value(&mut self, property: &str) -> OrmResult<Value> {
        self.session.value(self.key, property)
    }

    /// Writes a property of the entity. Inside a before-hook the write is
    /// undone if any hook of the same commit aborts, and entities it dirties
    /// join the commit.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::set`].
    pub fn set(&mut self, property: &str, value: impl Into<Slot>) -> OrmResult<()> {
        if let Some(journal) = self.session.journal.as_mut() {
            journal.writes += 1;
        }
        self.session.set(self.key, property, value)
    }

    /// The owning session, read-only.
    pub fn session(&self) -> &Session {
        &*self.session
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("key", &self.key)
            .field("batched", &self.batched)
            .finish_non_exhaustive()
    }
}

/// Hook phase of a commit: the storage operations its hooks requested and
/// the property to revert if one of them aborts.
#[derive(Debug, Default)]
pub(crate) struct HookPhase {
    pub(crate) batch: Vec<StorageOp>,
    pub(crate) rejected: Option<(EntityKey, String)>,
}

impl HookPhase {
    /// Applies one before-hook outcome. An abort remembers `rejected`; the
    /// caller unwinds the journal.
    pub(crate) fn settle(
        &mut self,
        outcome: HookOutcome,
        kind: &str,
        operation: &'static str,
        rejected: Option<(EntityKey, &str)>,
    ) -> OrmResult<()> {
        let reason = match outcome {
            HookOutcome::Continue => return Ok(()),
            HookOutcome::Batch(ops) => {
                self.batch.extend(ops);
                return Ok(());
            }
            HookOutcome::Severity(level, message) if level < Severity::Error => {
                log_severity(kind, operation, level, &message);
                return Ok(());
            }
            HookOutcome::Severity(_, reason) | HookOutcome::Abort(reason) => reason,
        };
        tracing::info!(kind, operation, %reason, "hook aborted commit");
        self.rejected = rejected.map(|(key, property)| (key, property.to_string()));
        Err(OrmError::HookAborted {
            kind: kind.to_string(),
            operation: operation.to_string(),
            reason,
        })
    }

    /// Applies one after-hook outcome. The write already happened, so
    /// aborts are logged instead of unwinding.
    pub(crate) fn settle_after(&mut self, outcome: HookOutcome, kind: &str, operation: &'static str) {
        match outcome {
            HookOutcome::Continue => {}
            HookOutcome::Batch(ops) => self.batch.extend(ops),
            HookOutcome::Severity(level, message) => log_severity(kind, operation, level, &message),
            HookOutcome::Abort(reason) => {
                tracing::error!(kind, operation, %reason, "after-hook rejected a completed write");
            }
        }
    }
}

fn log_severity(kind: &str, operation: &str, level: Severity, message: &str) {
    match level {
        Severity::Info => tracing::info!(kind, operation, message, "hook message"),
        Severity::Warning => tracing::warn!(kind, operation, message, "hook warning"),
        Severity::Error => tracing::error!(kind, operation, message, "hook error"),
    }
}

impl Session {
    /// Runs every before-read hook of `kind` over `args`.
    pub(crate) fn run_read_hooks(&self, kind: &str, args: &mut ReadArgs) -> OrmResult<()> {
        let hooks = self.registry.kind(kind)?.hooks().before_read.clone();
        for hook in hooks {
            match hook(kind, args) {
                HookOutcome::Abort(reason) | HookOutcome::Severity(Severity::Error, reason) => {
                    return Err(OrmError::HookAborted {
                        kind: kind.to_string(),
                        operation: "read".to_string(),
                        reason,
                    });
                }
                HookOutcome::Severity(level, message) => log_severity(kind, "read", level, &message),
                HookOutcome::Continue | HookOutcome::Batch(_) => {}
            }
        }
        Ok(())
    }

    /// Runs every after-read hook of the entity's kind.
    pub(crate) fn run_after_read(&mut self, key: EntityKey) -> OrmResult<()> {
        let kind = self.kind_of(key)?;
        let hooks = self.registry.kind(&kind)?.hooks().after_read.clone();
        let mut phase = HookPhase::default();
        for hook in hooks {
            let outcome = hook(&mut HookContext::new(self, key, false));
            phase.settle_after(outcome, &kind, "read");
        }
        Ok(())
    }
}
