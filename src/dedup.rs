//! Value-keyed, insertion-ordered deduplicating set.
//!
//! The aggregation pipeline deals in records that are structurally equal but
//! reference-distinct: the same movie annotated in ten videos arrives as ten
//! separate [`MediaRecord`](crate::models::MediaRecord) instances. A
//! [`DedupSet`] collapses them by a derived key while preserving the order
//! in which unique records were first seen.
//!
//! Records whose key derivation yields `None` (a null id) are never
//! considered equal to anything, including other `None`-key records — each
//! insertion of such a record succeeds and stays distinct.

use std::collections::HashMap;

/// Key derivation for deduplication.
///
/// `None` means the record has no usable identity and must be kept as a
/// distinct instance.
pub trait DedupKey {
    fn dedup_key(&self) -> Option<String>;
}

impl DedupKey for String {
    fn dedup_key(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// Insertion-ordered set keyed by [`DedupKey`].
///
/// The first-inserted record for a key is authoritative: inserting a record
/// whose key already exists is a no-op and does not overwrite fields.
#[derive(Debug, Clone)]
pub struct DedupSet<T: DedupKey> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: DedupKey> DedupSet<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a record. Returns `true` if the record was added, `false` if
    /// an equal key was already present (the existing record is retained).
    pub fn insert(&mut self, item: T) -> bool {
        match item.dedup_key() {
            Some(key) => {
                if self.index.contains_key(&key) {
                    return false;
                }
                self.index.insert(key, self.items.len());
                self.items.push(item);
                true
            }
            // Keyless records are always distinct.
            None => {
                self.items.push(item);
                true
            }
        }
    }

    /// Whether a record with the same key is present. Keyless records are
    /// never reported as present.
    pub fn contains(&self, item: &T) -> bool {
        match item.dedup_key() {
            Some(key) => self.index.contains_key(&key),
            None => false,
        }
    }

    /// Whether the given key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Remove the record with the same key as `item`, if any.
    ///
    /// Returns the removed record. Keyless records cannot be addressed and
    /// are never removed.
    pub fn remove(&mut self, item: &T) -> Option<T> {
        let key = item.dedup_key()?;
        let pos = self.index.remove(&key)?;
        let removed = self.items.remove(pos);
        // Positions after the removal point shift down by one.
        for idx in self.index.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    /// Unique records in first-insertion order.
    pub fn values(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Union: insert every record from `other`, first-seen wins.
    pub fn extend_from(&mut self, other: DedupSet<T>) {
        for item in other.items {
            self.insert(item);
        }
    }
}

impl<T: DedupKey> Default for DedupSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DedupKey> IntoIterator for DedupSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<T: DedupKey> FromIterator<T> for DedupSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}
