//! Relation and jointable descriptors.

/// A foreign-key relation to another kind ("wrap").
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::registry::RelationDef;
///
/// // Activity.owner -> Contact, foreign key stored on Activity.ownerId
/// let owner = RelationDef::one("Contact")
///     .id_field("ownerId")
///     .reverse("ownedActivities")
///     .root();
/// assert!(owner.is_relation_root);
///
/// // Contact.ownedActivities -> [Activity]
/// let owned = RelationDef::many("Activity").reverse("owner");
/// assert!(owned.is_array);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    /// The related kind.
    pub target: String,
    /// The scalar property mirroring the related guid. Empty if none.
    pub id_field: String,
    /// The property on the target pointing back. Empty if none.
    pub reverse: String,
    /// `true` for a to-many relation.
    pub is_array: bool,
    /// `true` if this side owns the foreign key.
    pub is_relation_root: bool,
}

impl RelationDef {
    /// A to-one relation.
    pub fn one(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            id_field: String::new(),
            reverse: String::new(),
            is_array: false,
            is_relation_root: false,
        }
    }

    /// A to-many relation.
    pub fn many(target: impl Into<String>) -> Self {
        Self {
            is_array: true,
            ..Self::one(target)
        }
    }

    /// Sets the id-mirror property.
    #[must_use]
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    /// Sets the reverse property on the target.
    #[must_use]
    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = name.into();
        self
    }

    /// Marks this side as owning the foreign key.
    #[must_use]
    pub const fn root(mut self) -> Self {
        self.is_relation_root = true;
        self
    }

    /// Returns the id-mirror property, if any.
    pub fn id_field_name(&self) -> Option<&str> {
        (!self.id_field.is_empty()).then_some(self.id_field.as_str())
    }

    /// Returns the reverse property, if any.
    pub fn reverse_name(&self) -> Option<&str> {
        (!self.reverse.is_empty()).then_some(self.reverse.as_str())
    }
}

/// How rows of an intermediate kind are identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntermediateId {
    /// Rows carry their own id; diffs address rows by that id.
    Synthetic,
    /// Rows are identified by a named compound key over both foreign keys.
    Compound(String),
}

/// A column of the intermediate row exposed on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedField {
    /// The target-facing property name.
    pub property: String,
    /// The column on the intermediate kind.
    pub column: String,
}

/// A many-to-many relation through an intermediate kind.
///
/// For `Activity.tags` through `ActivityTag`:
/// - `relation` is the owner's relation to intermediate rows (`activityTags`)
/// - `join_field` is the intermediate relation to the target (`tag`)
/// - `reverse_join_field` is the intermediate relation back to the owner
///   (`activity`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointableDef {
    /// The related kind.
    pub target: String,
    /// The intermediate kind.
    pub intermediate: String,
    /// The owner's relation to intermediate rows.
    pub relation: String,
    /// The intermediate relation to the target.
    pub join_field: String,
    /// The intermediate relation back to the owner.
    pub reverse_join_field: String,
    /// The intermediate column holding the target guid.
    pub join_key: String,
    /// The intermediate column holding the owner guid.
    pub reverse_join_key: String,
    /// How intermediate rows are identified.
    pub intermediate_id: IntermediateId,
    /// Intermediate columns exposed on the target.
    pub joined_fields: Vec<JoinedField>,
}

impl JointableDef {
    /// Creates a synthetic-id jointable. Foreign key columns default to
    /// `{field}Id`.
    pub fn new(
        target: impl Into<String>,
        intermediate: impl Into<String>,
        relation: impl Into<String>,
        join_field: impl Into<String>,
        reverse_join_field: impl Into<String>,
    ) -> Self {
        let join_field = join_field.into();
        let reverse_join_field = reverse_join_field.into();
        Self {
            target: target.into(),
            intermediate: intermediate.into(),
            relation: relation.into(),
            join_key: format!("{join_field}Id"),
            reverse_join_key: format!("{reverse_join_field}Id"),
            join_field,
            reverse_join_field,
            intermediate_id: IntermediateId::Synthetic,
            joined_fields: Vec::new(),
        }
    }

    /// Identifies intermediate rows by a named compound key.
    #[must_use]
    pub fn compound(mut self, name: impl Into<String>) -> Self {
        self.intermediate_id = IntermediateId::Compound(name.into());
        self
    }

    /// Overrides the foreign key column names.
    #[must_use]
    pub fn join_keys(mut self, join_key: impl Into<String>, reverse_join_key: impl Into<String>) -> Self {
        self.join_key = join_key.into();
        self.reverse_join_key = reverse_join_key.into();
        self
    }

    /// Exposes intermediate `column` on the target as `property`.
    #[must_use]
    pub fn joined_field(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.joined_fields.push(JoinedField {
            property: property.into(),
            column: column.into(),
        });
        self
    }

    /// Returns `true` if intermediate rows have their own id.
    pub const fn is_synthetic(&self) -> bool {
        matches!(self.intermediate_id, IntermediateId::Synthetic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_builders() {
        let r = RelationDef::one("Contact").id_field("ownerId").root();
        assert_eq!(r.id_field_name(), Some("ownerId"));
        assert_eq!(r.reverse_name(), None);
        assert!(!r.is_array);
        assert!(RelationDef::many("Activity").is_array);
    }

    #[test]
    fn test_jointable_defaults() {
        let j = JointableDef::new("Tag", "ActivityTag", "activityTags", "tag", "activity");
        assert_eq!(j.join_key, "tagId");
        assert_eq!(j.reverse_join_key, "activityId");
        assert!(j.is_synthetic());
        let j = j.compound("activityId_tagId").joined_field("addedAt", "createdAt");
        assert!(!j.is_synthetic());
        assert_eq!(j.joined_fields[0].column, "createdAt");
    }
}
