//! Read-only baseline clones.
//!
//! When a relation property first changes, its parent keeps the pre-change
//! state of the related entities so the diff engine can compare against it
//! later. Baselines are read-only entities in the same arena sharing the
//! guid of the live entity; they are never registered in the identity map.
//! Once no live entity reaches a baseline any more, its slot is released.

use std::collections::HashSet;

use unitwork_rs_core::OrmResult;

use crate::entity::{EntityKey, EntityState, Slot};
use crate::model_set::{Member, ModelSet};
use crate::session::Session;

impl Session {
    /// Clones an entity into a new read-only entity with the same guid.
    ///
    /// Every loaded property is copied, preferring the already-captured
    /// `old` value over the current one. Counts and intermediate row ids are
    /// carried over; listeners and dirt are not. A clone no live entity
    /// refers to is released by the next commit or revert.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Programming`](unitwork_rs_core::OrmError) for an
    /// unknown handle.
    pub fn clone_for_old_assignment(&mut self, key: EntityKey) -> OrmResult<EntityKey> {
        let source = self.state(key)?;
        if source.is_read_only {
            return Ok(key);
        }
        let mut clone = crate::entity::EntityState::new(source.guid, source.kind.clone(), source.is_new);
        clone.is_read_only = true;
        clone.is_deleted = source.is_deleted;
        for property in &source.loaded {
            let value = source
                .old
                .get(property)
                .or_else(|| source.values.get(property))
                .cloned();
            if let Some(value) = value {
                clone.values.insert(property.clone(), value);
                clone.loaded.insert(property.clone());
            }
        }
        clone.counts.clone_from(&source.counts);
        clone.join_rows.clone_from(&source.join_rows);
        clone.reverse.clone_from(&source.reverse);
        Ok(self.insert_entity(clone, false))
    }

    /// A baseline copy of a slot: related entities are replaced by
    /// read-only clones. Members that already are clones are reused.
    pub(crate) fn snapshot_slot(&mut self, slot: &Slot) -> OrmResult<Slot> {
        Ok(match slot {
            Slot::Value(v) => Slot::Value(v.clone()),
            Slot::One(None) => Slot::One(None),
            Slot::One(Some(m)) => Slot::One(Some(self.snapshot_member(*m)?)),
            Slot::Many(set) => {
                let mut members = ModelSet::new();
                for m in set {
                    members.insert(self.snapshot_member(*m)?);
                }
                Slot::Many(members)
            }
        })
    }

    fn snapshot_member(&mut self, member: Member) -> OrmResult<Member> {
        Ok(Member::new(member.guid, self.clone_for_old_assignment(member.key)?))
    }

    /// Releases every read-only clone no live entity reaches through its
    /// values, baselines or reverse values. Returns the number released.
    pub(crate) fn collect_snapshots(&mut self) -> usize {
        let mut reached: HashSet<EntityKey> = HashSet::new();
        let mut stack: Vec<EntityKey> = Vec::new();
        for (_, state) in self.occupied().filter(|(_, s)| !s.is_read_only) {
            push_references(state, &mut stack);
        }
        while let Some(key) = stack.pop() {
            if !reached.insert(key) {
                continue;
            }
            if let Ok(state) = self.state(key) {
                if state.is_read_only {
                    push_references(state, &mut stack);
                }
            }
        }
        let unreachable: Vec<EntityKey> = self
            .occupied()
            .filter(|(key, state)| state.is_read_only && !reached.contains(key))
            .map(|(key, _)| key)
            .collect();
        for key in &unreachable {
            self.release(*key);
        }
        if !unreachable.is_empty() {
            tracing::debug!(released = unreachable.len(), "released baseline clones");
        }
        unreachable.len()
    }
}

fn push_references(state: &EntityState, stack: &mut Vec<EntityKey>) {
    let slots = state.values.values().chain(state.old.values()).chain(state.reverse.values());
    for slot in slots {
        stack.extend(slot.members().into_iter().map(|m| m.key));
    }
    stack.extend(state.listeners.iter().map(|l| l.parent));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests_support::{fixture_session, seeded};
    use unitwork_rs_core::OrmError;

    #[test]
    fn test_clone_prefers_old_values() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann"), ("email", "a@x.io")]);
        s.set(c, "firstName", "Anna").unwrap();
        let snap = s.clone_for_old_assignment(c).unwrap();

        let state = s.entity(snap).unwrap();
        assert!(state.is_read_only());
        assert_eq!(state.guid(), s.entity(c).unwrap().guid());
        assert_eq!(state.values.get("firstName"), Some(&Slot::from("Ann")));
        assert_eq!(state.values.get("email"), Some(&Slot::from("a@x.io")));
        assert!(!state.is_dirty());

        // the identity map still resolves to the live entity
        assert_eq!(s.lookup(state.guid()), Some(c));
    }

    #[test]
    fn test_clone_rejects_writes() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let snap = s.clone_for_old_assignment(c).unwrap();
        assert!(matches!(s.set(snap, "firstName", "B"), Err(OrmError::ReadOnly(_))));
        assert_eq!(s.clone_for_old_assignment(snap).unwrap(), snap);
    }

    #[test]
    fn test_snapshot_slot_clones_members() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let m = s.member(c).unwrap();
        let slot = s
            .snapshot_slot(&Slot::Many(ModelSet::from_members([m])))
            .unwrap();
        let copy = slot.members()[0];
        assert_eq!(copy.guid, m.guid);
        assert_ne!(copy.key, m.key);
        assert_eq!(
            s.snapshot_slot(&Slot::from("x")).unwrap(),
            Slot::from("x")
        );
    }

    #[test]
    fn test_unreachable_clones_are_released() {
        let (mut s, _) = fixture_session();
        let activity = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let held = s.clone_for_old_assignment(c).unwrap();
        let stray = s.clone_for_old_assignment(c).unwrap();
        let baseline = ModelSet::from_members([Member::new(s.entity(c).unwrap().guid(), held)]);
        s.state_mut(activity)
            .unwrap()
            .old
            .insert("contacts".into(), Slot::Many(baseline));
        let before = s.len();

        assert_eq!(s.collect_snapshots(), 1);
        assert_eq!(s.len(), before - 1);
        assert!(s.entity(held).is_ok());
        assert!(matches!(s.entity(stray), Err(OrmError::Programming(_))));

        // the freed slot is reused under a new generation
        let again = s.clone_for_old_assignment(c).unwrap();
        assert_eq!(again.index(), stray.index());
        assert_ne!(again, stray);
        assert!(s.entity(stray).is_err());
    }
}
