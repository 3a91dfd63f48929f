//! Parent/child mutation notifications.
//!
//! Assigning an entity (or a set of entities) into a relation property
//! registers a [`Listener`] on each child. When a child changes, commits or
//! is deleted, an event is queued on the session and handed to every
//! parent when the queue is drained at the end of the mutating call:
//!
//! - `Dirty`: the parent captures a baseline of the child into
//!   `old[property]` and marks the property as a dirty sub-model
//! - `Commit`: the parent refreshes its baseline of the child
//! - `Delete`: the parent drops its baseline reference to the child
//!
//! Events never run re-entrantly; a parent that first becomes dirty (or
//! clean) queues the same event for its own parents.

use unitwork_rs_core::OrmResult;

use crate::entity::{EntityKey, Listener, Slot};
use crate::model_set::Member;
use crate::session::Session;

/// A queued notification from a child entity to its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationEvent {
    Dirty { child: EntityKey },
    Commit { child: EntityKey },
    Delete { child: EntityKey },
}

impl Session {
    /// Registers `parent.property` as a listener on every entity in `slot`.
    pub(crate) fn attach(&mut self, parent: EntityKey, property: &str, slot: &Slot) {
        for member in slot.members() {
            if let Ok(child) = self.state_mut(member.key) {
                let listener = Listener {
                    parent,
                    property: property.to_string(),
                };
                if !child.listeners.contains(&listener) {
                    child.listeners.push(listener);
                }
            }
        }
    }

    /// Removes `parent.property` from the listeners of every entity in
    /// `slot`.
    pub(crate) fn detach(&mut self, parent: EntityKey, property: &str, slot: &Slot) {
        for member in slot.members() {
            if let Ok(child) = self.state_mut(member.key) {
                child
                    .listeners
                    .retain(|l| !(l.parent == parent && l.property == property));
            }
        }
    }

    pub(crate) fn notify(&mut self, event: MutationEvent) {
        self.pending.push_back(event);
    }

    /// Delivers queued events until the queue is empty. Every event is
    /// delivered; the first failure is returned.
    pub(crate) fn drain(&mut self) -> OrmResult<()> {
        let mut failure = None;
        while let Some(event) = self.pending.pop_front() {
            let result = match event {
                MutationEvent::Dirty { child } => self.on_child_dirty(child),
                MutationEvent::Commit { child } => self.on_child_commit(child),
                MutationEvent::Delete { child } => self.on_child_delete(child),
            };
            if let Err(err) = result {
                tracing::warn!(?event, error = %err, "mutation event failed");
                failure.get_or_insert(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Drains the queue after a mutating call, keeping the call's own
    /// error first.
    pub(crate) fn drained<T>(&mut self, result: OrmResult<T>) -> OrmResult<T> {
        let delivered = self.drain();
        let value = result?;
        delivered.map(|()| value)
    }

    fn parents_of(&self, child: EntityKey) -> OrmResult<Vec<Listener>> {
        Ok(self.state(child)?.listeners.clone())
    }

    fn on_child_dirty(&mut self, child: EntityKey) -> OrmResult<()> {
        let guid = self.state(child)?.guid;
        for Listener { parent, property } in self.parents_of(child)? {
            let state = self.state(parent)?;
            if state.is_read_only || state.is_deleted {
                continue;
            }
            let was_dirty = state.is_dirty();
            match state.old.get(&property).cloned() {
                None => {
                    let def = self.property_def(parent, &property)?;
                    let current = self.current_slot(parent, &def)?;
                    let baseline = self.snapshot_slot(&current)?;
                    self.state_mut(parent)?.old.insert(property.clone(), baseline);
                }
                // the baseline still points at the live child; pin its
                // pre-change state
                Some(Slot::One(Some(m))) if m.key == child => {
                    let snapshot = self.clone_for_old_assignment(child)?;
                    self.state_mut(parent)?
                        .old
                        .insert(property.clone(), Slot::One(Some(Member::new(guid, snapshot))));
                }
                Some(Slot::Many(mut set)) if set.get(guid).is_some_and(|m| m.key == child) => {
                    let snapshot = self.clone_for_old_assignment(child)?;
                    set.replace(Member::new(guid, snapshot));
                    self.state_mut(parent)?
                        .old
                        .insert(property.clone(), Slot::Many(set));
                }
                Some(_) => {}
            }
            self.state_mut(parent)?.dirty_sub_models.insert(property);
            if !was_dirty {
                self.notify(MutationEvent::Dirty { child: parent });
            }
        }
        Ok(())
    }

    fn on_child_commit(&mut self, child: EntityKey) -> OrmResult<()> {
        let guid = self.state(child)?.guid;
        let committed = Member::new(guid, child);
        for Listener { parent, property } in self.parents_of(child)? {
            let state = self.state(parent)?;
            let was_dirty = state.is_dirty();
            let Some(old) = state.old.get(&property).cloned() else {
                continue;
            };
            let refreshed = match old {
                Slot::One(Some(m)) if m.guid == guid => Slot::One(Some(committed)),
                Slot::Many(mut set) => {
                    set.replace(committed);
                    Slot::Many(set)
                }
                other => other,
            };
            let def = self.property_def(parent, &property)?;
            let current = self.current_slot(parent, &def)?;
            let settled = self.slots_equal(&def, &refreshed, &current)
                && current.members().iter().all(|m| {
                    self.state(m.key)
                        .is_ok_and(|s| !s.is_new && !s.is_dirty())
                });
            let state = self.state_mut(parent)?;
            if settled {
                state.old.remove(&property);
                state.dirty_sub_models.remove(&property);
            } else {
                state.old.insert(property, refreshed);
            }
            if was_dirty && !state.is_dirty() {
                self.notify(MutationEvent::Commit { child: parent });
            }
        }
        Ok(())
    }

    fn on_child_delete(&mut self, child: EntityKey) -> OrmResult<()> {
        let guid = self.state(child)?.guid;
        for Listener { parent, property } in self.parents_of(child)? {
            let state = self.state_mut(parent)?;
            match state.old.get_mut(&property) {
                Some(Slot::One(m)) => {
                    if m.is_some_and(|x| x.guid == guid) {
                        *m = None;
                    }
                }
                Some(Slot::Many(set)) => {
                    set.remove(guid);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests_support::{fixture_session, seeded};
    use crate::model_set::ModelSet;
    use crate::value::Value;
    use unitwork_rs_core::OrmError;

    #[test]
    fn test_child_dirty_marks_parent_sub_model() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let m = s.member(c).unwrap();
        s.set_override(a, "contacts", ModelSet::from_members([m])).unwrap();
        assert_eq!(s.entity(c).unwrap().listeners().len(), 1);

        s.set(c, "firstName", "Anna").unwrap();
        let parent = s.entity(a).unwrap();
        assert!(parent.dirty_sub_models().contains("contacts"));
        assert!(parent.dirty().is_empty());

        // the baseline holds a read-only snapshot with the pre-change value
        let Some(Slot::Many(baseline)) = parent.old("contacts") else {
            panic!("expected a set baseline");
        };
        let snap = baseline.get(m.guid).unwrap().key;
        assert_ne!(snap, c);
        let snap_state = s.entity(snap).unwrap();
        assert!(snap_state.is_read_only());
        assert_eq!(snap_state.values.get("firstName"), Some(&Slot::from("Ann")));
    }

    #[test]
    fn test_dirty_propagates_to_grandparent() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let n = seeded(&mut s, "Note", &[("body", "hi")]);
        let ma = s.member(a).unwrap();
        let mn = s.member(n).unwrap();
        s.set_override(c, "activities", ModelSet::from_members([ma])).unwrap();
        s.set_override(a, "notes", ModelSet::from_members([mn])).unwrap();

        s.set(n, "body", "hello").unwrap();
        assert!(s.entity(a).unwrap().dirty_sub_models().contains("notes"));
        assert!(s.entity(c).unwrap().dirty_sub_models().contains("activities"));
    }

    #[test]
    fn test_detach_on_reassignment() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c1 = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let c2 = seeded(&mut s, "Contact", &[("firstName", "Bea")]);
        s.set(a, "owner", s.member(c1).unwrap()).unwrap();
        s.set(a, "owner", s.member(c2).unwrap()).unwrap();
        assert!(s.entity(c1).unwrap().listeners().is_empty());
        assert_eq!(s.entity(c2).unwrap().listeners()[0].parent, a);
    }

    #[test]
    fn test_commit_refreshes_and_settles_parent() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.set_override(a, "owner", s.member(c).unwrap()).unwrap();
        s.set(c, "firstName", "Anna").unwrap();
        assert!(s.entity(a).unwrap().is_dirty());

        // simulate the child's own commit
        let child = s.state_mut(c).unwrap();
        child.dirty.clear();
        child.old.clear();
        s.notify(MutationEvent::Commit { child: c });
        s.drain().unwrap();

        let parent = s.entity(a).unwrap();
        assert!(!parent.is_dirty());
        assert!(parent.old("owner").is_none());
    }

    #[test]
    fn test_delete_drops_baseline_reference() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        let m = s.member(c).unwrap();
        s.set_override(a, "contacts", ModelSet::from_members([m])).unwrap();
        s.set(c, "firstName", "Anna").unwrap();

        s.notify(MutationEvent::Delete { child: c });
        s.drain().unwrap();
        assert_eq!(
            s.entity(a).unwrap().old("contacts"),
            Some(&Slot::Many(ModelSet::new()))
        );
    }

    #[test]
    fn test_delete_clears_single_baseline() {
        let (mut s, _) = fixture_session();
        let a = seeded(&mut s, "Activity", &[("title", "Call")]);
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.set_override(a, "owner", s.member(c).unwrap()).unwrap();
        s.set(c, "firstName", "Anna").unwrap();
        assert!(matches!(s.entity(a).unwrap().old("owner"), Some(Slot::One(Some(_)))));

        s.notify(MutationEvent::Delete { child: c });
        s.drain().unwrap();
        assert_eq!(s.entity(a).unwrap().old("owner"), Some(&Slot::One(None)));
    }

    #[test]
    fn test_listener_failure_reaches_the_caller() {
        let (mut s, _) = fixture_session();
        let c = seeded(&mut s, "Contact", &[("firstName", "Ann")]);
        s.state_mut(c).unwrap().listeners.push(Listener {
            parent: EntityKey::from_index(999),
            property: "contacts".to_string(),
        });

        let err = s.set(c, "firstName", "Anna").unwrap_err();
        assert!(matches!(err, OrmError::Programming(_)));
        // the write itself happened and the queue is empty
        assert_eq!(s.value(c, "firstName").unwrap(), Value::from("Anna"));
        assert!(s.pending.is_empty());
    }
}
