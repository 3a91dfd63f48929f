//! Single-entity relations ("wrap").
//!
//! A to-one relation keeps an id mirror in sync with the related entity
//! (see [`Session::set`]). This module handles the other direction: the
//! reverse pointer a related entity carries back to its parent. Reverse
//! pointers are registered out-of-band, so reading them never counts as a
//! load and never makes the child observe the parent.

use unitwork_rs_core::{OrmError, OrmResult};

use crate::entity::{EntityKey, SetMode, Slot};
use crate::registry::RelationDef;
use crate::session::Session;

impl Session {
    /// Points `child` back at `parent` through the reverse of `rel`, ahead
    /// of a nested create. The reverse id mirror is stored as well.
    ///
    /// Returns the child properties the nested create must not carry,
    /// since the nesting already encodes the association.
    pub(crate) fn stamp_reverse(
        &mut self,
        parent: EntityKey,
        rel: &RelationDef,
        child: EntityKey,
    ) -> OrmResult<Vec<String>> {
        let Some(reverse) = rel.reverse_name() else {
            return Ok(Vec::new());
        };
        let child_kind = self.kind_of(child)?;
        let reverse_rel = self
            .registry
            .property(&child_kind, reverse)?
            .as_relation()
            .cloned()
            .ok_or_else(|| {
                OrmError::Programming(format!("{child_kind}.{reverse} is not a relation"))
            })?;
        let mut stripped = vec![reverse.to_string()];
        if !reverse_rel.is_array {
            let parent_member = self.member(parent)?;
            self.register_reverse(child, reverse, parent)?;
            if let Some(id_field) = reverse_rel.id_field_name() {
                self.set_with_mode(
                    child,
                    id_field,
                    Slot::Value(parent_member.guid.to_value()),
                    SetMode::Override,
                )?;
                stripped.push(id_field.to_string());
            }
        }
        Ok(stripped)
    }

    /// Registers `parent` as the out-of-band value of `child.reverse`,
    /// unless that relation is already loaded.
    pub(crate) fn register_reverse(
        &mut self,
        child: EntityKey,
        reverse: &str,
        parent: EntityKey,
    ) -> OrmResult<()> {
        let parent_member = self.member(parent)?;
        let state = self.state_mut(child)?;
        if !state.loaded.contains(reverse) {
            state
                .reverse
                .insert(reverse.to_string(), Slot::One(Some(parent_member)));
        }
        Ok(())
    }
}
