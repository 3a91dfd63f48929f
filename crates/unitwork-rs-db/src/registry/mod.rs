//! Property metadata registry.
//!
//! The [`Registry`] holds one [`KindMeta`] per entity kind: its properties,
//! soft-delete columns, lifecycle hooks and kind-level validator. It is built
//! once with [`RegistryBuilder`], validated, and shared as `Arc<Registry>` by
//! every [`Session`](crate::session::Session).
//!
//! # Examples
//!
//! ```
//! use unitwork_rs_db::registry::{KindMeta, PropertyDef, Registry, RelationDef};
//!
//! let registry = Registry::builder()
//!     .kind(
//!         KindMeta::new("Contact")
//!             .with_property(PropertyDef::scalar("firstName").required())
//!             .with_property(PropertyDef::relation(
//!                 "activities",
//!                 RelationDef::many("Activity").reverse("contact"),
//!             )),
//!     )
//!     .kind(
//!         KindMeta::new("Activity")
//!             .with_property(PropertyDef::scalar("contactId"))
//!             .with_property(PropertyDef::relation(
//!                 "contact",
//!                 RelationDef::one("Contact").id_field("contactId").reverse("activities").root(),
//!             )),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(registry.property("Contact", "firstName").is_ok());
//! assert!(registry.kind("Missing").is_err());
//! ```

mod property;
mod relation;

use std::collections::HashMap;
use std::sync::Arc;

use unitwork_rs_core::{OrmError, OrmResult, SoftDeleteSettings, ValidationError};

use crate::entity::CalcContext;
use crate::hooks::{EntityHook, HookContext, HookOutcome, Hooks, PropertyChange, ReadHook};
use crate::query::planner::ReadArgs;

pub use property::{
    CalculatedDef, ComputeFn, ComputedDef, Encryption, EqualsFn, LoaderFn, PropertyDef,
    PropertyType, UpdateFn,
};
pub use relation::{IntermediateId, JoinedField, JointableDef, RelationDef};

/// Validates a whole entity before it is written.
pub type KindValidator = Arc<dyn Fn(&CalcContext<'_>) -> Result<(), ValidationError> + Send + Sync>;

/// Columns a soft-delete kind writes instead of deleting rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteColumns {
    /// Boolean deleted flag.
    pub flag: String,
    /// Optional deletion timestamp.
    pub timestamp: Option<String>,
}

impl SoftDeleteColumns {
    /// Creates explicit soft-delete columns.
    pub fn new(flag: impl Into<String>, timestamp: Option<&str>) -> Self {
        Self {
            flag: flag.into(),
            timestamp: timestamp.map(ToString::to_string),
        }
    }
}

impl From<&SoftDeleteSettings> for SoftDeleteColumns {
    fn from(settings: &SoftDeleteSettings) -> Self {
        Self {
            flag: settings.flag_field.clone(),
            timestamp: settings.timestamp_field.clone(),
        }
    }
}

/// Metadata for one entity kind.
#[derive(Clone)]
pub struct KindMeta {
    name: String,
    verbose_name: String,
    properties: Vec<PropertyDef>,
    soft_delete: Option<SoftDeleteColumns>,
    soft_delete_defaults: bool,
    hooks: Hooks,
    validator: Option<KindValidator>,
}

impl KindMeta {
    /// Creates metadata for `name`. The verbose name defaults to the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            verbose_name: name.clone(),
            name,
            properties: Vec::new(),
            soft_delete: None,
            soft_delete_defaults: false,
            hooks: Hooks::default(),
            validator: None,
        }
    }

    /// Sets the human-readable name used in validation errors.
    #[must_use]
    pub fn with_verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = name.into();
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Enables soft delete with the registry's default columns.
    #[must_use]
    pub const fn with_soft_delete(mut self) -> Self {
        self.soft_delete_defaults = true;
        self
    }

    /// Enables soft delete with explicit columns.
    #[must_use]
    pub fn with_soft_delete_columns(mut self, columns: SoftDeleteColumns) -> Self {
        self.soft_delete = Some(columns);
        self
    }

    /// Sets the kind-level validator.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&CalcContext<'_>) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Registers a hook run before this kind is created.
    #[must_use]
    pub fn before_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks.before_create.push(Arc::new(hook));
        self
    }

    /// Registers a hook run after this kind is created.
    #[must_use]
    pub fn after_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks.after_create.push(Arc::new(hook));
        self
    }

    /// Registers a hook run before an update, once per changed property.
    /// `property` restricts the hook to one property.
    #[must_use]
    pub fn before_update<F>(mut self, property: Option<&str>, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>, &PropertyChange) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks
            .before_update
            .push((property.map(ToString::to_string), Arc::new(hook)));
        self
    }

    /// Registers a hook run after an update, once per changed property.
    #[must_use]
    pub fn after_update<F>(mut self, property: Option<&str>, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>, &PropertyChange) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks
            .after_update
            .push((property.map(ToString::to_string), Arc::new(hook)));
        self
    }

    /// Registers a hook run before this kind is deleted.
    #[must_use]
    pub fn before_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks.before_delete.push(Arc::new(hook));
        self
    }

    /// Registers a hook run after this kind is deleted.
    #[must_use]
    pub fn after_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks.after_delete.push(Arc::new(hook));
        self
    }

    /// Registers a hook that may rewrite read arguments for this kind.
    #[must_use]
    pub fn before_read<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &mut ReadArgs) -> HookOutcome + Send + Sync + 'static,
    {
        let hook: ReadHook = Arc::new(hook);
        self.hooks.before_read.push(hook);
        self
    }

    /// Registers a hook run on every entity of this kind a read returns.
    #[must_use]
    pub fn after_read<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        let hook: EntityHook = Arc::new(hook);
        self.hooks.after_read.push(hook);
        self
    }

    /// The kind name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable name.
    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// Looks up a property.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// The soft-delete columns, if this kind is soft-deleted.
    pub const fn soft_delete(&self) -> Option<&SoftDeleteColumns> {
        self.soft_delete.as_ref()
    }

    /// The lifecycle hooks.
    pub const fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// The kind-level validator.
    pub const fn validator(&self) -> Option<&KindValidator> {
        self.validator.as_ref()
    }
}

impl std::fmt::Debug for KindMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindMeta")
            .field("name", &self.name)
            .field("verbose_name", &self.verbose_name)
            .field("properties", &self.properties)
            .field("soft_delete", &self.soft_delete)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Builds and validates a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    kinds: Vec<KindMeta>,
    soft_delete_defaults: SoftDeleteSettings,
}

impl RegistryBuilder {
    /// Adds a kind.
    #[must_use]
    pub fn kind(mut self, meta: KindMeta) -> Self {
        self.kinds.push(meta);
        self
    }

    /// Sets the columns used by kinds declared with
    /// [`KindMeta::with_soft_delete`].
    #[must_use]
    pub fn soft_delete_defaults(mut self, defaults: SoftDeleteSettings) -> Self {
        self.soft_delete_defaults = defaults;
        self
    }

    /// Validates all descriptors and builds the derived indexes.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] for duplicate kinds, unknown target
    /// or intermediate kinds, unknown reverse/id-mirror/dependency properties,
    /// duplicate jointables through one intermediate kind, and joined fields
    /// without an owning jointable.
    pub fn build(self) -> OrmResult<Registry> {
        let mut kinds = HashMap::new();
        for mut meta in self.kinds {
            if meta.soft_delete_defaults && meta.soft_delete.is_none() {
                meta.soft_delete = Some(SoftDeleteColumns::from(&self.soft_delete_defaults));
            }
            let name = meta.name.clone();
            if kinds.insert(name.clone(), meta).is_some() {
                return Err(OrmError::Programming(format!("kind {name} registered twice")));
            }
        }

        let mut registry = Registry {
            kinds,
            dependents: HashMap::new(),
            joined: HashMap::new(),
            jointable_relations: HashMap::new(),
        };
        registry.validate()?;
        registry.index();
        Ok(registry)
    }
}

/// Metadata for every registered kind plus derived lookup indexes.
#[derive(Debug)]
pub struct Registry {
    kinds: HashMap<String, KindMeta>,
    // (kind, property) -> derived properties depending on it
    dependents: HashMap<(String, String), Vec<String>>,
    // (owner kind, target kind, jointable) -> joined fields
    joined: HashMap<(String, String, String), Vec<JoinedField>>,
    // (owner kind, intermediate relation) -> jointable property
    jointable_relations: HashMap<(String, String), String>,
}

impl Registry {
    /// Starts a new builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a kind.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] if the kind is not registered.
    pub fn kind(&self, name: &str) -> OrmResult<&KindMeta> {
        self.kinds
            .get(name)
            .ok_or_else(|| OrmError::Programming(format!("no registry entry for kind {name}")))
    }

    /// Looks up a property of a kind.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`] if the kind or property is unknown.
    pub fn property(&self, kind: &str, property: &str) -> OrmResult<&PropertyDef> {
        self.kind(kind)?.property(property).ok_or_else(|| {
            OrmError::Programming(format!("{kind} has no property {property}"))
        })
    }

    /// Iterates over all registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &KindMeta> {
        self.kinds.values()
    }

    /// Derived properties that depend on `kind.property`.
    pub fn dependents(&self, kind: &str, property: &str) -> &[String] {
        self.dependents
            .get(&(kind.to_string(), property.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// Joined fields carried by `owner.jointable` onto `target`.
    pub fn joined_fields(&self, owner: &str, target: &str, jointable: &str) -> &[JoinedField] {
        self.joined
            .get(&(owner.to_string(), target.to_string(), jointable.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// The jointable property of `kind` stored through `relation`.
    pub fn jointable_by_relation(&self, kind: &str, relation: &str) -> Option<&str> {
        self.jointable_relations
            .get(&(kind.to_string(), relation.to_string()))
            .map(String::as_str)
    }

    /// The jointable on the target kind describing the same intermediate
    /// rows from the other side.
    pub fn reverse_jointable(&self, kind: &str, property: &str) -> Option<(&str, &str)> {
        let def = self.property(kind, property).ok()?.as_jointable()?;
        let target = self.kinds.get(&def.target)?;
        target.properties.iter().find_map(|p| match p.as_jointable() {
            Some(other)
                if other.intermediate == def.intermediate
                    && other.join_field == def.reverse_join_field
                    && other.reverse_join_field == def.join_field
                    && !(target.name == kind && p.name == property) =>
            {
                Some((target.name.as_str(), p.name.as_str()))
            }
            _ => None,
        })
    }

    fn validate(&self) -> OrmResult<()> {
        let programming = |msg: String| Err(OrmError::Programming(msg));
        for meta in self.kinds.values() {
            let kind = meta.name.as_str();
            let mut intermediates: Vec<&str> = Vec::new();
            for p in &meta.properties {
                match &p.property_type {
                    PropertyType::Scalar => {}
                    PropertyType::Relation(r) => {
                        let Some(target) = self.kinds.get(&r.target) else {
                            return programming(format!(
                                "{kind}.{} targets unknown kind {}",
                                p.name, r.target
                            ));
                        };
                        if let Some(reverse) = r.reverse_name() {
                            if target.property(reverse).and_then(PropertyDef::as_relation).is_none() {
                                return programming(format!(
                                    "{kind}.{}: reverse relation {}.{reverse} not found",
                                    p.name, r.target
                                ));
                            }
                        }
                        if let Some(id_field) = r.id_field_name() {
                            if !meta.property(id_field).is_some_and(PropertyDef::is_persisted) {
                                return programming(format!(
                                    "{kind}.{}: id field {id_field} is not a persisted property",
                                    p.name
                                ));
                            }
                        }
                    }
                    PropertyType::Jointable(j) => {
                        if !self.kinds.contains_key(&j.target) {
                            return programming(format!(
                                "{kind}.{} targets unknown kind {}",
                                p.name, j.target
                            ));
                        }
                        let Some(intermediate) = self.kinds.get(&j.intermediate) else {
                            return programming(format!(
                                "{kind}.{} joins through unknown kind {}",
                                p.name, j.intermediate
                            ));
                        };
                        if intermediate.property(&j.join_field).and_then(PropertyDef::as_relation).is_none() {
                            return programming(format!(
                                "{kind}.{}: {}.{} is not a relation",
                                p.name, j.intermediate, j.join_field
                            ));
                        }
                        // self-referential pairs may join twice through one kind
                        if j.target != kind && intermediates.contains(&j.intermediate.as_str()) {
                            return programming(format!(
                                "{kind} has two jointables through {}",
                                j.intermediate
                            ));
                        }
                        intermediates.push(&j.intermediate);
                        for jf in &j.joined_fields {
                            if intermediate.property(&jf.column).is_none() {
                                return programming(format!(
                                    "{kind}.{}: joined column {}.{} not found",
                                    p.name, j.intermediate, jf.column
                                ));
                            }
                        }
                    }
                    PropertyType::Joined {
                        owner_kind,
                        jointable,
                    } => {
                        let owned = self
                            .kinds
                            .get(owner_kind)
                            .and_then(|o| o.property(jointable))
                            .and_then(PropertyDef::as_jointable)
                            .is_some_and(|j| {
                                j.target == kind && j.joined_fields.iter().any(|f| f.property == p.name)
                            });
                        if !owned {
                            return programming(format!(
                                "joined field {kind}.{} has no owning jointable {owner_kind}.{jointable}",
                                p.name
                            ));
                        }
                    }
                    PropertyType::Computed(_) | PropertyType::Calculated(_) => {
                        for dep in p.depends_on() {
                            if meta.property(dep).is_none() {
                                return programming(format!(
                                    "{kind}.{} depends on unknown property {dep}",
                                    p.name
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn index(&mut self) {
        for meta in self.kinds.values() {
            for p in &meta.properties {
                for dep in p.depends_on() {
                    self.dependents
                        .entry((meta.name.clone(), dep.clone()))
                        .or_default()
                        .push(p.name.clone());
                }
                if let Some(j) = p.as_jointable() {
                    self.joined.insert(
                        (meta.name.clone(), j.target.clone(), p.name.clone()),
                        j.joined_fields.clone(),
                    );
                    self.jointable_relations
                        .insert((meta.name.clone(), j.relation.clone()), p.name.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn tag_kinds() -> (KindMeta, KindMeta, KindMeta) {
        let activity = KindMeta::new("Activity")
            .with_property(PropertyDef::scalar("title"))
            .with_property(PropertyDef::jointable(
                "tags",
                JointableDef::new("Tag", "ActivityTag", "activityTags", "tag", "activity")
                    .joined_field("addedAt", "createdAt"),
            ));
        let tag = KindMeta::new("Tag")
            .with_property(PropertyDef::scalar("name"))
            .with_property(PropertyDef::joined("addedAt", "Activity", "tags"));
        let link = KindMeta::new("ActivityTag")
            .with_soft_delete()
            .with_property(PropertyDef::scalar("createdAt"))
            .with_property(PropertyDef::scalar("tagId"))
            .with_property(PropertyDef::scalar("activityId"))
            .with_property(PropertyDef::relation("tag", RelationDef::one("Tag").id_field("tagId").root()))
            .with_property(PropertyDef::relation(
                "activity",
                RelationDef::one("Activity").id_field("activityId").root(),
            ));
        (activity, tag, link)
    }

    #[test]
    fn test_build_indexes() {
        let (activity, tag, link) = tag_kinds();
        let activity = activity.with_property(PropertyDef::computed(
            "slug",
            ComputedDef::new(&["title"], |ctx| ctx.value("title")),
        ));
        let registry = Registry::builder()
            .kind(activity)
            .kind(tag)
            .kind(link)
            .build()
            .unwrap();

        assert_eq!(registry.dependents("Activity", "title"), &["slug".to_string()]);
        assert!(registry.dependents("Activity", "slug").is_empty());
        assert_eq!(registry.joined_fields("Activity", "Tag", "tags")[0].column, "createdAt");
        assert_eq!(registry.jointable_by_relation("Activity", "activityTags"), Some("tags"));
        assert_eq!(
            registry.kind("ActivityTag").unwrap().soft_delete(),
            Some(&SoftDeleteColumns::new("deleted", Some("deletedAt")))
        );
        assert!(registry.kind("Tag").unwrap().soft_delete().is_none());
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let err = Registry::builder()
            .kind(KindMeta::new("A").with_property(PropertyDef::relation("b", RelationDef::one("B"))))
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::Programming(ref m) if m.contains("unknown kind B")));
    }

    #[test]
    fn test_unknown_reverse_is_rejected() {
        let err = Registry::builder()
            .kind(KindMeta::new("A").with_property(PropertyDef::relation(
                "b",
                RelationDef::one("B").reverse("nope"),
            )))
            .kind(KindMeta::new("B"))
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::Programming(_)));
    }

    #[test]
    fn test_orphan_joined_field_is_rejected() {
        let (_, _, link) = tag_kinds();
        let err = Registry::builder()
            .kind(KindMeta::new("Activity"))
            .kind(KindMeta::new("Tag").with_property(PropertyDef::joined("addedAt", "Activity", "tags")))
            .kind(link)
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::Programming(ref m) if m.contains("no owning jointable")));
    }

    #[test]
    fn test_duplicate_jointable_through_same_kind() {
        let (activity, tag, link) = tag_kinds();
        let activity = activity.with_property(PropertyDef::jointable(
            "moreTags",
            JointableDef::new("Tag", "ActivityTag", "moreActivityTags", "tag", "activity"),
        ));
        let err = Registry::builder().kind(activity).kind(tag).kind(link).build().unwrap_err();
        assert!(matches!(err, OrmError::Programming(ref m) if m.contains("two jointables")));
    }

    #[test]
    fn test_self_referential_jointables_are_permitted() {
        let contact = KindMeta::new("Contact")
            .with_property(PropertyDef::jointable(
                "friends",
                JointableDef::new("Contact", "Friendship", "friendships", "friend", "contact"),
            ))
            .with_property(PropertyDef::jointable(
                "friendOf",
                JointableDef::new("Contact", "Friendship", "friendOfs", "contact", "friend"),
            ));
        let friendship = KindMeta::new("Friendship")
            .with_property(PropertyDef::scalar("contactId"))
            .with_property(PropertyDef::scalar("friendId"))
            .with_property(PropertyDef::relation("contact", RelationDef::one("Contact").id_field("contactId").root()))
            .with_property(PropertyDef::relation("friend", RelationDef::one("Contact").id_field("friendId").root()));
        let registry = Registry::builder().kind(contact).kind(friendship).build().unwrap();
        assert_eq!(registry.reverse_jointable("Contact", "friends"), Some(("Contact", "friendOf")));
        assert_eq!(registry.reverse_jointable("Contact", "friendOf"), Some(("Contact", "friends")));
    }

    #[test]
    fn test_custom_soft_delete_defaults() {
        let registry = Registry::builder()
            .soft_delete_defaults(SoftDeleteSettings {
                flag_field: "archived".into(),
                timestamp_field: None,
            })
            .kind(KindMeta::new("Note").with_soft_delete().with_property(PropertyDef::scalar("body").default_value(Value::from(""))))
            .build()
            .unwrap();
        assert_eq!(
            registry.kind("Note").unwrap().soft_delete(),
            Some(&SoftDeleteColumns::new("archived", None))
        );
    }
}
