//! Property descriptors.
//!
//! Every property of a kind is described by a [`PropertyDef`]: its
//! [`PropertyType`] plus the flags the engine consults (required, encrypted,
//! default, custom equality, validators).

use std::fmt;
use std::sync::Arc;

use crate::entity::CalcContext;
use crate::record::Record;
use crate::validators::Validator;
use crate::value::Value;

use super::relation::{JointableDef, RelationDef};

/// Derives a value from an entity's loaded properties.
pub type ComputeFn = Arc<dyn Fn(&CalcContext<'_>) -> Value + Send + Sync>;

/// Reverse-derives other properties from a computed property's new value.
pub type UpdateFn = Arc<dyn Fn(&Value) -> Vec<(String, Value)> + Send + Sync>;

/// Produces a calculated value directly from a fetched row.
pub type LoaderFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Custom equality for change detection.
pub type EqualsFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// A persisted property derived from other properties.
#[derive(Clone)]
pub struct ComputedDef {
    /// Properties the value is computed from.
    pub depends_on: Vec<String>,
    /// Computes the value.
    pub compute: ComputeFn,
    /// Applied when the computed property is set directly.
    pub update: Option<UpdateFn>,
}

impl ComputedDef {
    /// Creates a computed descriptor.
    pub fn new<F>(depends_on: &[&str], compute: F) -> Self
    where
        F: Fn(&CalcContext<'_>) -> Value + Send + Sync + 'static,
    {
        Self {
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
            compute: Arc::new(compute),
            update: None,
        }
    }

    /// Sets the inverse function run when the property is assigned.
    #[must_use]
    pub fn with_update<F>(mut self, update: F) -> Self
    where
        F: Fn(&Value) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(update));
        self
    }
}

impl fmt::Debug for ComputedDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedDef")
            .field("depends_on", &self.depends_on)
            .field("has_update", &self.update.is_some())
            .finish_non_exhaustive()
    }
}

/// A non-persisted property computed on demand.
#[derive(Clone)]
pub struct CalculatedDef {
    /// Properties the value is calculated from.
    pub depends_on: Vec<String>,
    /// Calculates the value.
    pub calculate: ComputeFn,
    /// Whether results are memoized until a dependency changes.
    pub cached: bool,
    /// Reads the value straight from a fetched row.
    pub loader: Option<LoaderFn>,
}

impl CalculatedDef {
    /// Creates a calculated descriptor.
    pub fn new<F>(depends_on: &[&str], calculate: F) -> Self
    where
        F: Fn(&CalcContext<'_>) -> Value + Send + Sync + 'static,
    {
        Self {
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
            calculate: Arc::new(calculate),
            cached: false,
            loader: None,
        }
    }

    /// Memoizes the value.
    #[must_use]
    pub const fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Sets a custom loader.
    #[must_use]
    pub fn with_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }
}

impl fmt::Debug for CalculatedDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatedDef")
            .field("depends_on", &self.depends_on)
            .field("cached", &self.cached)
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

/// What a property is.
#[derive(Debug, Clone)]
pub enum PropertyType {
    /// A persisted column (scalar or primitive array).
    Scalar,
    /// A foreign-key relation.
    Relation(RelationDef),
    /// A many-to-many relation through an intermediate kind.
    Jointable(JointableDef),
    /// A column of an intermediate row exposed on this (target) kind.
    Joined {
        /// The kind owning the jointable.
        owner_kind: String,
        /// The jointable property on `owner_kind`.
        jointable: String,
    },
    /// A persisted derived column.
    Computed(ComputedDef),
    /// A non-persisted derived value.
    Calculated(CalculatedDef),
}

/// How a property is encrypted at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Encrypted with the cipher's shared key.
    Standard,
    /// Encrypted with a per-entity key derived from the guid.
    Unique,
}

/// Complete description of one property.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::registry::{PropertyDef, RelationDef};
/// use unitwork_rs_db::validators::MaxLengthValidator;
///
/// let name = PropertyDef::scalar("firstName")
///     .required()
///     .validator(MaxLengthValidator::new(50));
/// assert!(name.is_persisted());
///
/// let owner = PropertyDef::relation("owner", RelationDef::one("Contact").id_field("ownerId"));
/// assert!(owner.as_relation().is_some());
/// ```
#[derive(Clone)]
pub struct PropertyDef {
    /// The property name.
    pub name: String,
    /// The property type.
    pub property_type: PropertyType,
    /// Must be present (and non-null) when creating.
    pub required: bool,
    /// Encryption at rest.
    pub encryption: Option<Encryption>,
    /// Value assigned to new entities.
    pub default: Option<Value>,
    /// Custom equality for change detection.
    pub equals: Option<EqualsFn>,
    /// Validators run before writes.
    pub validators: Vec<Arc<dyn Validator>>,
}

impl PropertyDef {
    fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: false,
            encryption: None,
            default: None,
            equals: None,
            validators: Vec::new(),
        }
    }

    /// A persisted column.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Scalar)
    }

    /// A foreign-key relation.
    pub fn relation(name: impl Into<String>, def: RelationDef) -> Self {
        Self::new(name, PropertyType::Relation(def))
    }

    /// A many-to-many relation.
    pub fn jointable(name: impl Into<String>, def: JointableDef) -> Self {
        Self::new(name, PropertyType::Jointable(def))
    }

    /// An intermediate column exposed on this kind through
    /// `owner_kind.jointable`.
    pub fn joined(
        name: impl Into<String>,
        owner_kind: impl Into<String>,
        jointable: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            PropertyType::Joined {
                owner_kind: owner_kind.into(),
                jointable: jointable.into(),
            },
        )
    }

    /// A persisted derived column.
    pub fn computed(name: impl Into<String>, def: ComputedDef) -> Self {
        Self::new(name, PropertyType::Computed(def))
    }

    /// A non-persisted derived value.
    pub fn calculated(name: impl Into<String>, def: CalculatedDef) -> Self {
        Self::new(name, PropertyType::Calculated(def))
    }

    /// Marks the property as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Encrypts the property with the shared key.
    #[must_use]
    pub const fn encrypted(mut self) -> Self {
        self.encryption = Some(Encryption::Standard);
        self
    }

    /// Encrypts the property with a per-entity key.
    #[must_use]
    pub const fn unique_encrypted(mut self) -> Self {
        self.encryption = Some(Encryption::Unique);
        self
    }

    /// Sets the value assigned to new entities.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets a custom equality used to detect changes.
    #[must_use]
    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.equals = Some(Arc::new(equals));
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Returns `true` for columns written by the engine (scalar or computed).
    pub const fn is_persisted(&self) -> bool {
        matches!(
            self.property_type,
            PropertyType::Scalar | PropertyType::Computed(_)
        )
    }

    /// Returns the relation descriptor, if this is a relation.
    pub const fn as_relation(&self) -> Option<&RelationDef> {
        match &self.property_type {
            PropertyType::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the jointable descriptor, if this is a jointable.
    pub const fn as_jointable(&self) -> Option<&JointableDef> {
        match &self.property_type {
            PropertyType::Jointable(j) => Some(j),
            _ => None,
        }
    }

    /// Returns `true` for to-many relations and jointables.
    pub const fn is_to_many(&self) -> bool {
        match &self.property_type {
            PropertyType::Relation(r) => r.is_array,
            PropertyType::Jointable(_) => true,
            _ => false,
        }
    }

    /// Returns `true` for relations and jointables.
    pub const fn holds_entities(&self) -> bool {
        matches!(
            self.property_type,
            PropertyType::Relation(_) | PropertyType::Jointable(_)
        )
    }

    /// Returns the related kind for relations and jointables.
    pub fn target_kind(&self) -> Option<&str> {
        match &self.property_type {
            PropertyType::Relation(r) => Some(&r.target),
            PropertyType::Jointable(j) => Some(&j.target),
            _ => None,
        }
    }

    /// Returns the declared dependencies of a derived property.
    pub fn depends_on(&self) -> &[String] {
        match &self.property_type {
            PropertyType::Computed(c) => &c.depends_on,
            PropertyType::Calculated(c) => &c.depends_on,
            _ => &[],
        }
    }
}

impl fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDef")
            .field("name", &self.name)
            .field("property_type", &self.property_type)
            .field("required", &self.required)
            .field("encryption", &self.encryption)
            .field("default", &self.default)
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JointableDef;
    use crate::validators::NotBlankValidator;

    #[test]
    fn test_scalar_flags() {
        let p = PropertyDef::scalar("email")
            .required()
            .unique_encrypted()
            .default_value("")
            .validator(NotBlankValidator);
        assert!(p.required);
        assert_eq!(p.encryption, Some(Encryption::Unique));
        assert_eq!(p.default, Some(Value::from("")));
        assert_eq!(p.validators.len(), 1);
        assert!(p.is_persisted());
        assert!(!p.holds_entities());
    }

    #[test]
    fn test_relation_kinds() {
        let one = PropertyDef::relation("owner", RelationDef::one("Contact"));
        let many = PropertyDef::relation("contacts", RelationDef::many("Contact"));
        let tags = PropertyDef::jointable(
            "tags",
            JointableDef::new("Tag", "ActivityTag", "activityTags", "tag", "activity"),
        );
        assert!(!one.is_to_many());
        assert!(many.is_to_many());
        assert!(tags.is_to_many());
        assert_eq!(tags.target_kind(), Some("Tag"));
        assert!(!one.is_persisted());

        assert!(one.as_relation().is_some_and(|r| !r.is_array));
        assert!(one.as_jointable().is_none());
        assert_eq!(tags.as_jointable().map(|j| j.intermediate.as_str()), Some("ActivityTag"));
        assert!(tags.as_relation().is_none());
    }

    #[test]
    fn test_derived_dependencies() {
        let full = PropertyDef::computed(
            "fullName",
            ComputedDef::new(&["firstName", "lastName"], |ctx| {
                Value::from(format!("{} {}", ctx.value("firstName"), ctx.value("lastName")))
            }),
        );
        assert_eq!(full.depends_on(), &["firstName".to_string(), "lastName".to_string()]);
        let calc = PropertyDef::calculated("n", CalculatedDef::new(&[], |_| Value::Null).cached());
        assert!(matches!(calc.property_type, PropertyType::Calculated(ref c) if c.cached));
    }

    #[test]
    fn test_custom_equals() {
        let p = PropertyDef::scalar("email").equals(|a, b| {
            a.as_str().map(str::to_lowercase) == b.as_str().map(str::to_lowercase)
        });
        let eq = p.equals.unwrap();
        assert!(eq(&Value::from("A@x.io"), &Value::from("a@x.io")));
    }
}
