//! In-place array mutation.
//!
//! [`ObservedList`] wraps a vector and calls an observer with the
//! pre-mutation contents exactly once, on the first mutating call. The
//! session uses it for primitive list properties
//! ([`Session::modify_list`]) and for to-many relations
//! ([`Session::modify_collection`]); both commit the result through a
//! tracked `set`, so the first baseline is kept in `old`.

use unitwork_rs_core::{OrmError, OrmResult};

use crate::entity::{EntityKey, SetMode, Slot};
use crate::model_set::{Member, ModelSet};
use crate::session::Session;
use crate::value::Value;

type Observer<'a, T> = Box<dyn FnOnce(&[T]) + 'a>;

/// A mutable view of a list that reports its first mutation.
///
/// # Examples
///
/// ```
/// use unitwork_rs_db::entity::ObservedList;
///
/// let mut items = vec![1, 2, 3];
/// let mut seen = None;
/// {
///     let mut list = ObservedList::with_observer(&mut items, |before| seen = Some(before.to_vec()));
///     list.push(4);
///     list.shift();
/// }
/// assert_eq!(items, vec![2, 3, 4]);
/// assert_eq!(seen, Some(vec![1, 2, 3]));
/// ```
pub struct ObservedList<'a, T> {
    items: &'a mut Vec<T>,
    observer: Option<Observer<'a, T>>,
    mutated: bool,
}

impl<'a, T: Clone + PartialEq> ObservedList<'a, T> {
    /// Wraps `items` without an observer.
    pub fn new(items: &'a mut Vec<T>) -> Self {
        Self {
            items,
            observer: None,
            mutated: false,
        }
    }

    /// Wraps `items`, calling `observer` with the original contents before
    /// the first mutation.
    pub fn with_observer<F>(items: &'a mut Vec<T>, observer: F) -> Self
    where
        F: FnOnce(&[T]) + 'a,
    {
        Self {
            items,
            observer: Some(Box::new(observer)),
            mutated: false,
        }
    }

    fn touch(&mut self) {
        self.mutated = true;
        if let Some(observer) = self.observer.take() {
            observer(self.items.as_slice());
        }
    }

    /// Assigns `items[index]`. Assigning at `len` appends; past the end or
    /// an equal value is a no-op. Returns `true` if the list changed.
    pub fn set_index(&mut self, index: usize, value: T) -> bool {
        match index.cmp(&self.items.len()) {
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => {
                self.push(value);
                true
            }
            std::cmp::Ordering::Less => {
                if self.items[index] == value {
                    return false;
                }
                self.touch();
                self.items[index] = value;
                true
            }
        }
    }

    /// Appends a value.
    pub fn push(&mut self, value: T) {
        self.touch();
        self.items.push(value);
    }

    /// Removes the last value.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        self.touch();
        self.items.pop()
    }

    /// Removes the first value.
    pub fn shift(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        self.touch();
        Some(self.items.remove(0))
    }

    /// Prepends a value.
    pub fn unshift(&mut self, value: T) {
        self.touch();
        self.items.insert(0, value);
    }

    /// Removes `delete_count` values at `start` and inserts `insert` in
    /// their place. Out-of-range bounds are clamped. Returns the removed
    /// values.
    pub fn splice<I>(&mut self, start: usize, delete_count: usize, insert: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        let start = start.min(self.items.len());
        let end = start.saturating_add(delete_count).min(self.items.len());
        let insert: Vec<T> = insert.into_iter().collect();
        if start == end && insert.is_empty() {
            return Vec::new();
        }
        self.touch();
        self.items.splice(start..end, insert).collect()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns a value.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Iterates over the values.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// The values as a slice.
    pub fn as_slice(&self) -> &[T] {
        self.items.as_slice()
    }

    /// Returns `true` once any mutating call changed the list.
    pub const fn mutated(&self) -> bool {
        self.mutated
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservedList<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedList")
            .field("items", &self.items)
            .field("mutated", &self.mutated)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Mutates a primitive list property in place.
    ///
    /// The first mutation records the original list (or null) as the
    /// property baseline and marks it dirty.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::set`], and with [`OrmError::Programming`] if
    /// the property does not hold a list.
    pub fn modify_list<F, R>(&mut self, key: EntityKey, property: &str, f: F) -> OrmResult<R>
    where
        F: FnOnce(&mut ObservedList<'_, Value>) -> R,
    {
        let def = self.property_def(key, property)?;
        let mut items = match self.current_slot(key, &def)? {
            Slot::Value(Value::List(items)) => items,
            Slot::Value(Value::Null) => Vec::new(),
            other => {
                return Err(OrmError::Programming(format!(
                    "{property} is not a list: {other:?}"
                )))
            }
        };
        let mut first = None;
        let result = {
            let mut list = ObservedList::with_observer(&mut items, |before| first = Some(before.len()));
            f(&mut list)
        };
        if first.is_some() {
            tracing::trace!(property, "list mutated in place");
            self.set_with_mode(key, property, Slot::Value(Value::List(items)), SetMode::Tracked)?;
            self.drain()?;
        }
        Ok(result)
    }

    /// Mutates a to-many relation or jointable in place. Duplicate guids
    /// are dropped, keeping the first.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::set`], and with [`OrmError::Programming`] if
    /// the property is not a collection.
    pub fn modify_collection<F, R>(&mut self, key: EntityKey, property: &str, f: F) -> OrmResult<R>
    where
        F: FnOnce(&mut ObservedList<'_, Member>) -> R,
    {
        let def = self.property_def(key, property)?;
        let Slot::Many(set) = self.current_slot(key, &def)? else {
            return Err(OrmError::Programming(format!(
                "{property} is not a collection"
            )));
        };
        let mut items = set.as_slice().to_vec();
        let mut touched = false;
        let result = {
            let mut list = ObservedList::with_observer(&mut items, |_| touched = true);
            f(&mut list)
        };
        if touched {
            let members = ModelSet::from_members(items);
            self.set_with_mode(key, property, Slot::Many(members), SetMode::Tracked)?;
            self.drain()?;
        }
        Ok(result)
    }
}
