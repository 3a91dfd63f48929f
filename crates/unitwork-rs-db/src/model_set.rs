//! Identity-keyed entity collections.
//!
//! A [`ModelSet`] is an ordered collection of entity handles that is unique
//! by [`Guid`]. The diff engine compares the set captured at load time with
//! the current one:
//!
//! - `old.added_to(&new)`: members present now but absent before
//! - `old.removed(&new)`: members present before but absent now
//! - `old.intersection(&new)`: members present in both
//!
//! `added_to` and `intersection` partition `new`; `removed` and
//! `intersection` partition `old`.

use std::collections::HashSet;

use crate::entity::EntityKey;
use crate::guid::Guid;

/// One entity in a collection: its identity and its arena handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Member {
    /// The entity's identity.
    pub guid: Guid,
    /// The entity's handle in the owning session.
    pub key: EntityKey,
}

impl Member {
    /// Creates a new member.
    pub const fn new(guid: Guid, key: EntityKey) -> Self {
        Self { guid, key }
    }
}

/// An ordered, unique-by-guid entity collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSet {
    members: Vec<Member>,
}

impl ModelSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Builds a set from members, keeping the first occurrence of each guid.
    pub fn from_members(members: impl IntoIterator<Item = Member>) -> Self {
        let mut set = Self::new();
        for member in members {
            set.insert(member);
        }
        set
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates over members in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Member> {
        self.members.iter()
    }

    /// Returns the members as a slice.
    pub fn as_slice(&self) -> &[Member] {
        &self.members
    }

    /// Returns `true` if a member with this guid is present.
    pub fn contains(&self, guid: Guid) -> bool {
        self.members.iter().any(|m| m.guid == guid)
    }

    /// Returns the member with this guid.
    pub fn get(&self, guid: Guid) -> Option<&Member> {
        self.members.iter().find(|m| m.guid == guid)
    }

    /// Appends a member. Returns `false` if its guid was already present.
    pub fn insert(&mut self, member: Member) -> bool {
        if self.contains(member.guid) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Removes the member with this guid.
    pub fn remove(&mut self, guid: Guid) -> Option<Member> {
        let index = self.members.iter().position(|m| m.guid == guid)?;
        Some(self.members.remove(index))
    }

    /// Replaces the member sharing `member.guid`, keeping its position.
    /// Returns `false` if no such member exists.
    pub fn replace(&mut self, member: Member) -> bool {
        match self.members.iter_mut().find(|m| m.guid == member.guid) {
            Some(slot) => {
                *slot = member;
                true
            }
            None => false,
        }
    }

    /// Returns the guids in order.
    pub fn guids(&self) -> Vec<Guid> {
        self.members.iter().map(|m| m.guid).collect()
    }

    /// Members of `new` that are not in `self`.
    pub fn added_to(&self, new: &Self) -> Self {
        let old: HashSet<Guid> = self.members.iter().map(|m| m.guid).collect();
        Self {
            members: new
                .members
                .iter()
                .filter(|m| !old.contains(&m.guid))
                .copied()
                .collect(),
        }
    }

    /// Members of `self` that are not in `new`.
    pub fn removed(&self, new: &Self) -> Self {
        new.added_to(self)
    }

    /// Members of `new` whose guid is also in `self`.
    pub fn intersection(&self, new: &Self) -> Self {
        let old: HashSet<Guid> = self.members.iter().map(|m| m.guid).collect();
        Self {
            members: new
                .members
                .iter()
                .filter(|m| old.contains(&m.guid))
                .copied()
                .collect(),
        }
    }

    /// Pairs of (`self` member, `new` member) sharing a guid, in `new` order.
    pub fn pairs(&self, new: &Self) -> Vec<(Member, Member)> {
        new.members
            .iter()
            .filter_map(|n| self.get(n.guid).map(|o| (*o, *n)))
            .collect()
    }

    /// Returns `true` if the two sets do not hold the same guids.
    /// Order is not significant.
    pub fn is_different(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return true;
        }
        !self.added_to(other).is_empty()
    }

    /// Drops later duplicates of any guid.
    pub(crate) fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.members.retain(|m| seen.insert(m.guid));
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<Member> {
        &mut self.members
    }
}

impl<'a> IntoIterator for &'a ModelSet {
    type Item = &'a Member;
    type IntoIter = std::slice::Iter<'a, Member>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

impl FromIterator<Member> for ModelSet {
    fn from_iter<T: IntoIterator<Item = Member>>(iter: T) -> Self {
        Self::from_members(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<Member> {
        (0..n)
            .map(|i| Member::new(Guid::generate(), EntityKey::from_index(i)))
            .collect()
    }

    fn guid_set(set: &ModelSet) -> HashSet<Guid> {
        set.guids().into_iter().collect()
    }

    #[test]
    fn test_insert_is_unique_by_guid() {
        let m = members(1)[0];
        let mut set = ModelSet::new();
        assert!(set.insert(m));
        assert!(!set.insert(Member::new(m.guid, EntityKey::from_index(9))));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(m.guid).unwrap().key, m.key);
    }

    #[test]
    fn test_remove_and_replace() {
        let ms = members(3);
        let mut set = ModelSet::from_members(ms.clone());
        assert_eq!(set.remove(ms[1].guid), Some(ms[1]));
        assert_eq!(set.remove(ms[1].guid), None);
        let replacement = Member::new(ms[0].guid, EntityKey::from_index(42));
        assert!(set.replace(replacement));
        assert_eq!(set.as_slice()[0].key, EntityKey::from_index(42));
        assert_eq!(set.guids(), vec![ms[0].guid, ms[2].guid]);
    }

    #[test]
    fn test_diff_laws() {
        let ms = members(5);
        let old = ModelSet::from_members(vec![ms[0], ms[1], ms[2]]);
        let new = ModelSet::from_members(vec![ms[2], ms[3], ms[1], ms[4]]);

        let added = old.added_to(&new);
        let removed = old.removed(&new);
        let shared = old.intersection(&new);

        assert_eq!(added.guids(), vec![ms[3].guid, ms[4].guid]);
        assert_eq!(removed.guids(), vec![ms[0].guid]);

        // added ∪ shared == new, without overlap
        let mut union = guid_set(&added);
        assert!(guid_set(&shared).iter().all(|g| union.insert(*g)));
        assert_eq!(union, guid_set(&new));

        // removed ∪ shared == old
        let mut union = guid_set(&removed);
        union.extend(guid_set(&shared));
        assert_eq!(union, guid_set(&old));
    }

    #[test]
    fn test_pairs_keep_both_sides() {
        let ms = members(2);
        let old = ModelSet::from_members(vec![ms[0], ms[1]]);
        let snapshot = Member::new(ms[1].guid, EntityKey::from_index(7));
        let new = ModelSet::from_members(vec![snapshot]);
        assert_eq!(old.pairs(&new), vec![(ms[1], snapshot)]);
    }

    #[test]
    fn test_is_different_ignores_order() {
        let ms = members(3);
        let a = ModelSet::from_members(vec![ms[0], ms[1]]);
        let b = ModelSet::from_members(vec![ms[1], ms[0]]);
        let c = ModelSet::from_members(vec![ms[1], ms[2]]);
        assert!(!a.is_different(&b));
        assert!(a.is_different(&c));
        assert!(a.is_different(&ModelSet::new()));
    }

    #[test]
    fn test_dedup() {
        let ms = members(2);
        let mut set = ModelSet::new();
        set.members_mut().extend([ms[0], ms[1], ms[0]]);
        set.dedup();
        assert_eq!(set.guids(), vec![ms[0].guid, ms[1].guid]);
    }
}
