//! The unit of work.
//!
//! A [`Session`] owns every entity it has created or hydrated, in an arena
//! addressed by [`EntityKey`]. All engine operations (`get`, `set`,
//! `commit`, `read`, ...) are methods on it and take `&mut self`, so one
//! object graph is never mutated from two places at once. Share a session
//! across tasks through [`SharedSession`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use unitwork_rs_db::registry::{KindMeta, PropertyDef, Registry};
//! use unitwork_rs_db::session::Session;
//! # use unitwork_rs_db::driver::StorageDriver;
//! # fn driver() -> Arc<dyn StorageDriver> { unimplemented!() }
//!
//! # fn run() -> unitwork_rs_core::OrmResult<()> {
//! let registry = Registry::builder()
//!     .kind(KindMeta::new("Contact").with_property(PropertyDef::scalar("firstName")))
//!     .build()?;
//! let mut session = Session::new(Arc::new(registry), driver());
//! let ann = session.new_entity("Contact")?;
//! session.set(ann, "firstName", "Ann")?;
//! assert!(session.entity(ann)?.is_dirty());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use unitwork_rs_core::{OrmError, OrmResult, Settings};

use crate::cipher::Cipher;
use crate::driver::StorageDriver;
use crate::entity::listeners::MutationEvent;
use crate::entity::{EntityKey, EntityState, Slot};
use crate::guid::Guid;
use crate::hooks::Journal;
use crate::model_set::{Member, ModelSet};
use crate::registry::{PropertyDef, PropertyType, Registry};
use crate::value::Value;

/// A session shared between tasks; lock it for one exclusive section per
/// aggregate.
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// One arena cell; `state` is `None` once a snapshot is released.
#[derive(Debug, Clone)]
pub(crate) struct ArenaSlot {
    pub(crate) generation: u32,
    pub(crate) state: Option<EntityState>,
}

/// The in-memory unit of work.
pub struct Session {
    pub(crate) registry: Arc<Registry>,
    pub(crate) driver: Arc<dyn StorageDriver>,
    pub(crate) cipher: Option<Arc<dyn Cipher>>,
    pub(crate) settings: Settings,
    pub(crate) entities: Vec<ArenaSlot>,
    pub(crate) free: Vec<usize>,
    // guid -> live (non-snapshot) entity
    pub(crate) live: HashMap<Guid, EntityKey>,
    pub(crate) pending: VecDeque<MutationEvent>,
    // open while before-hooks run
    pub(crate) journal: Option<Journal>,
}

impl Session {
    /// Creates a session with default settings.
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            registry,
            driver,
            cipher: None,
            settings: Settings::default(),
            entities: Vec::new(),
            free: Vec::new(),
            live: HashMap::new(),
            pending: VecDeque::new(),
            journal: None,
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the cipher used for encrypted properties.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Wraps the session for sharing across tasks.
    pub fn into_shared(self) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// The registry.
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The storage driver.
    pub fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }

    /// Number of entities in the arena, snapshots included.
    pub fn len(&self) -> usize {
        self.entities.len() - self.free.len()
    }

    /// Returns `true` if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Arena ──────────────────────────────────────────────────────────

    /// Creates a new, unsaved entity of `kind` with a fresh guid.
    /// Defaults are applied and to-many properties start out as loaded,
    /// empty sets.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] if `kind` is not registered.
    pub fn new_entity(&mut self, kind: &str) -> OrmResult<EntityKey> {
        let meta = self.registry.kind(kind)?;
        let mut state = EntityState::new(Guid::generate(), kind, true);
        for p in meta.properties() {
            let initial = match (&p.property_type, &p.default) {
                (PropertyType::Scalar | PropertyType::Computed(_), Some(default)) => {
                    Some(Slot::Value(default.clone()))
                }
                _ if p.is_to_many() => Some(Slot::Many(ModelSet::new())),
                _ => None,
            };
            if let Some(slot) = initial {
                state.values.insert(p.name.clone(), slot);
                state.loaded.insert(p.name.clone());
            }
        }
        Ok(self.insert_entity(state, true))
    }

    /// Creates a new entity and assigns `values` through tracked sets.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::new_entity`] and [`Session::set`].
    pub fn new_entity_with<'p, I>(&mut self, kind: &str, values: I) -> OrmResult<EntityKey>
    where
        I: IntoIterator<Item = (&'p str, Slot)>,
    {
        let key = self.new_entity(kind)?;
        for (property, value) in values {
            self.set(key, property, value)?;
        }
        Ok(key)
    }

    pub(crate) fn insert_entity(&mut self, state: EntityState, live: bool) -> EntityKey {
        let guid = state.guid;
        let reused = self.free.pop();
        let key = match reused.and_then(|index| self.entities.get_mut(index).map(|slot| (index, slot))) {
            Some((index, slot)) => {
                if let Some(journal) = self.journal.as_mut() {
                    journal.save_slot(index, slot);
                }
                slot.state = Some(state);
                EntityKey::new(index, slot.generation)
            }
            None => {
                self.entities.push(ArenaSlot {
                    generation: 0,
                    state: Some(state),
                });
                EntityKey::new(self.entities.len() - 1, 0)
            }
        };
        if live {
            let previous = self.live.insert(guid, key);
            if let Some(journal) = self.journal.as_mut() {
                journal.save_live(guid, previous);
            }
        }
        key
    }

    /// Frees the slot of a read-only snapshot. Live entities are never
    /// released.
    pub(crate) fn release(&mut self, key: EntityKey) {
        let Some(slot) = self.entities.get_mut(key.index()).filter(|slot| {
            slot.generation == key.generation()
                && slot.state.as_ref().is_some_and(|s| s.is_read_only)
        }) else {
            return;
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.save_slot(key.index(), slot);
        }
        slot.state = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
    }

    /// Every occupied slot with its handle.
    pub(crate) fn occupied(&self) -> impl Iterator<Item = (EntityKey, &EntityState)> {
        self.entities.iter().enumerate().filter_map(|(index, slot)| {
            slot.state
                .as_ref()
                .map(|state| (EntityKey::new(index, slot.generation), state))
        })
    }

    /// Returns an entity's state.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for a handle from another session.
    pub fn entity(&self, key: EntityKey) -> OrmResult<&EntityState> {
        self.state(key)
    }

    pub(crate) fn state(&self, key: EntityKey) -> OrmResult<&EntityState> {
        self.entities
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.state.as_ref())
            .ok_or_else(|| unknown_handle(key))
    }

    /// Mutable state; while a journal is open the slot's pre-image is
    /// saved on first access.
    pub(crate) fn state_mut(&mut self, key: EntityKey) -> OrmResult<&mut EntityState> {
        let slot = self
            .entities
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation() && slot.state.is_some())
            .ok_or_else(|| unknown_handle(key))?;
        if let Some(journal) = self.journal.as_mut() {
            journal.save_slot(key.index(), slot);
        }
        slot.state.as_mut().ok_or_else(|| unknown_handle(key))
    }

    /// The live entity with this guid.
    pub fn lookup(&self, guid: Guid) -> Option<EntityKey> {
        self.live.get(&guid).copied()
    }

    /// An entity as a relation value.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for an unknown handle.
    pub fn member(&self, key: EntityKey) -> OrmResult<Member> {
        Ok(self.state(key)?.member(key))
    }

    /// Several entities as a to-many relation value.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for an unknown handle.
    pub fn model_set(&self, keys: &[EntityKey]) -> OrmResult<ModelSet> {
        keys.iter().map(|k| self.member(*k)).collect()
    }

    /// The live counterpart of a member that may be a snapshot.
    pub(crate) fn live_member(&self, member: Member) -> Member {
        self.lookup(member.guid)
            .map_or(member, |key| Member::new(member.guid, key))
    }

    // ── Registry helpers ───────────────────────────────────────────────

    pub(crate) fn kind_of(&self, key: EntityKey) -> OrmResult<String> {
        Ok(self.state(key)?.kind.clone())
    }

    pub(crate) fn property_def(&self, key: EntityKey, property: &str) -> OrmResult<PropertyDef> {
        let kind = &self.state(key)?.kind;
        Ok(self.registry.property(kind, property)?.clone())
    }

    /// The value a property reads as when nothing is stored.
    pub(crate) fn default_slot(def: &PropertyDef) -> Slot {
        match &def.property_type {
            PropertyType::Relation(r) if !r.is_array => Slot::One(None),
            PropertyType::Relation(_) | PropertyType::Jointable(_) => Slot::Many(ModelSet::new()),
            _ => Slot::Value(def.default.clone().unwrap_or(Value::Null)),
        }
    }

    /// The stored slot, or the property default.
    pub(crate) fn current_slot(&self, key: EntityKey, def: &PropertyDef) -> OrmResult<Slot> {
        Ok(self
            .state(key)?
            .values
            .get(&def.name)
            .cloned()
            .unwrap_or_else(|| Self::default_slot(def)))
    }
}

fn unknown_handle(key: EntityKey) -> OrmError {
    OrmError::Programming(format!("unknown entity handle {key:?}"))
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.len())
            .field("live", &self.live.len())
            .field("pending", &self.pending.len())
            .field("has_cipher", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}
