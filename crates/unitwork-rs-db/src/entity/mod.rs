//! Entities and their tracked state.
//!
//! Entities live in the arena of a [`Session`] and are addressed by
//! [`EntityKey`] handles. Each one carries an [`EntityState`]: identity,
//! lifecycle flags, property slots and the change-tracking maps the diff
//! engine reads (`loaded`, `dirty`, `dirty_sub_models`, `old`).
//!
//! The operations on entities are methods of [`Session`]:
//!
//! - [`access`]: `get`/`set`, async variants, loading, change detection
//! - [`listeners`]: parent/child mutation notifications
//! - [`observed`]: in-place array mutation with first-mutation snapshots
//! - [`snapshot`]: read-only baseline clones

pub mod access;
pub mod listeners;
pub mod observed;
pub mod snapshot;
#[cfg(test)]
pub(crate) mod tests_support;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::guid::Guid;
use crate::model_set::{Member, ModelSet};
use crate::session::Session;
use crate::value::Value;

pub use observed::ObservedList;

/// Handle of an entity inside one [`Session`].
///
/// Arena slots of released snapshots are reused; the generation makes a
/// handle to a released slot fail instead of resolving to its new
/// occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    index: u32,
    generation: u32,
}

impl EntityKey {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self {
            index: u32::try_from(index).unwrap_or(u32::MAX),
            generation,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self::new(index, 0)
    }

    pub(crate) const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

/// The value held by one property.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A scalar or primitive array.
    Value(Value),
    /// A to-one relation.
    One(Option<Member>),
    /// A to-many relation or jointable.
    Many(ModelSet),
}

impl Slot {
    /// Returns the scalar value, if this is one.
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the related member of a to-one slot.
    pub const fn as_one(&self) -> Option<&Member> {
        match self {
            Self::One(Some(m)) => Some(m),
            _ => None,
        }
    }

    /// Returns the members of a to-many slot.
    pub const fn as_many(&self) -> Option<&ModelSet> {
        match self {
            Self::Many(set) => Some(set),
            _ => None,
        }
    }

    /// Every member held by this slot.
    pub fn members(&self) -> Vec<Member> {
        match self {
            Self::Value(_) | Self::One(None) => Vec::new(),
            Self::One(Some(m)) => vec![*m],
            Self::Many(set) => set.as_slice().to_vec(),
        }
    }

    /// Returns `true` for a null scalar, an empty to-one or an empty set.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Value(v) => v.is_null(),
            Self::One(m) => m.is_none(),
            Self::Many(set) => set.is_empty(),
        }
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Slot {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Slot {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i64> for Slot {
    fn from(value: i64) -> Self {
        Self::Value(Value::Int(value))
    }
}

impl From<bool> for Slot {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<Member> for Slot {
    fn from(value: Member) -> Self {
        Self::One(Some(value))
    }
}

impl From<Option<Member>> for Slot {
    fn from(value: Option<Member>) -> Self {
        Self::One(value)
    }
}

impl From<ModelSet> for Slot {
    fn from(value: ModelSet) -> Self {
        Self::Many(value)
    }
}

/// A parent observing a child through one of its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    /// The observing entity.
    pub parent: EntityKey,
    /// The parent property holding the child.
    pub property: String,
}

/// Result of comparing a property against a candidate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difference {
    /// Nothing to write.
    Same,
    /// The value or related identity was replaced.
    Different,
    /// Same related identities, but nested entities changed.
    SubModel,
}

impl Difference {
    /// Returns `true` unless `Same`.
    pub const fn is_different(self) -> bool {
        !matches!(self, Self::Same)
    }
}

/// How a `set` is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetMode {
    /// A user-visible mutation.
    Tracked,
    /// A mutation derived from another one (computed inverse); tracked but
    /// does not re-derive.
    Derived,
    /// Hydration and pointer stamping: stored and loaded, not tracked.
    Override,
}

/// Everything the session knows about one entity.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub(crate) guid: Guid,
    pub(crate) kind: String,
    pub(crate) is_new: bool,
    pub(crate) is_deleted: bool,
    pub(crate) is_read_only: bool,
    pub(crate) values: BTreeMap<String, Slot>,
    pub(crate) loaded: BTreeSet<String>,
    pub(crate) dirty: BTreeSet<String>,
    pub(crate) dirty_sub_models: BTreeSet<String>,
    pub(crate) old: BTreeMap<String, Slot>,
    pub(crate) cache: HashMap<String, Value>,
    pub(crate) counts: Option<BTreeMap<String, i64>>,
    pub(crate) reverse: BTreeMap<String, Slot>,
    pub(crate) listeners: Vec<Listener>,
    // jointable property -> target guid -> intermediate row id
    pub(crate) join_rows: BTreeMap<String, BTreeMap<Guid, Guid>>,
}

impl EntityState {
    pub(crate) fn new(guid: Guid, kind: impl Into<String>, is_new: bool) -> Self {
        Self {
            guid,
            kind: kind.into(),
            is_new,
            is_deleted: false,
            is_read_only: false,
            values: BTreeMap::new(),
            loaded: BTreeSet::new(),
            dirty: BTreeSet::new(),
            dirty_sub_models: BTreeSet::new(),
            old: BTreeMap::new(),
            cache: HashMap::new(),
            counts: None,
            reverse: BTreeMap::new(),
            listeners: Vec::new(),
            join_rows: BTreeMap::new(),
        }
    }

    /// The entity's identity.
    pub const fn guid(&self) -> Guid {
        self.guid
    }

    /// The entity's kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `true` until the entity is first created in storage.
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    /// `true` once the entity has been deleted.
    pub const fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// `true` for snapshot clones.
    pub const fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    /// `true` if `property` is materialized.
    pub fn is_loaded(&self, property: &str) -> bool {
        self.loaded.contains(property)
    }

    /// `true` if any property or nested entity has uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.dirty_sub_models.is_empty()
    }

    /// Persisted properties whose value changed.
    pub const fn dirty(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Relation properties whose nested entities changed.
    pub const fn dirty_sub_models(&self) -> &BTreeSet<String> {
        &self.dirty_sub_models
    }

    /// The baseline captured when `property` first changed.
    pub fn old(&self, property: &str) -> Option<&Slot> {
        self.old.get(property)
    }

    /// Materialized property names.
    pub const fn loaded(&self) -> &BTreeSet<String> {
        &self.loaded
    }

    /// Aggregate counts attached by a read.
    pub const fn counts(&self) -> Option<&BTreeMap<String, i64>> {
        self.counts.as_ref()
    }

    /// The parents observing this entity.
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// The intermediate row id joining this entity to `target` through
    /// `property`, for synthetic-id jointables.
    pub fn join_row_id(&self, property: &str, target: Guid) -> Option<Guid> {
        self.join_rows.get(property)?.get(&target).copied()
    }

    /// This entity as a collection member.
    pub const fn member(&self, key: EntityKey) -> Member {
        Member::new(self.guid, key)
    }
}

/// Read-only view of an entity handed to derived-property functions and
/// kind validators.
#[derive(Clone, Copy)]
pub struct CalcContext<'a> {
    session: &'a Session,
    key: EntityKey,
}

impl<'a> CalcContext<'a> {
    pub(crate) const fn new(session: &'a Session, key: EntityKey) -> Self {
        Self { session, key }
    }

    fn state(&self) -> Option<&'a EntityState> {
        self.session.state(self.key).ok()
    }

    /// The entity's handle.
    pub const fn key(&self) -> EntityKey {
        self.key
    }

    /// The entity's identity.
    pub fn guid(&self) -> Option<Guid> {
        self.state().map(|s| s.guid)
    }

    /// The raw slot of `property`, if materialized.
    pub fn slot(&self, property: &str) -> Option<&'a Slot> {
        let state = self.state()?;
        state
            .values
            .get(property)
            .or_else(|| state.reverse.get(property))
    }

    /// The scalar value of `property`, or null.
    pub fn value(&self, property: &str) -> Value {
        self.slot(property)
            .and_then(Slot::as_value)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// `true` if `property` is materialized.
    pub fn is_loaded(&self, property: &str) -> bool {
        self.state().is_some_and(|s| s.loaded.contains(property))
    }

    /// The entity a to-one relation points at.
    pub fn related(&self, property: &str) -> Option<Self> {
        let member = self.slot(property)?.as_one()?;
        Some(Self::new(self.session, member.key))
    }

    /// The entities of a to-many relation or jointable.
    pub fn members(&self, property: &str) -> Vec<Self> {
        self.slot(property)
            .and_then(Slot::as_many)
            .map(|set| set.iter().map(|m| Self::new(self.session, m.key)).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CalcContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalcContext").field("key", &self.key).finish()
    }
}
