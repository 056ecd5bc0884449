//! Process-lifetime memoization of enrichment results.
//!
//! Keys include the locale because the same entity requested with different
//! `language` parameters yields different payloads. A cached `None` means
//! the API confirmed the entity absent (e.g. 404), which is distinct from
//! "not yet fetched" — the absence of the key itself.
//!
//! The cache is an explicit object owned by the enricher and lives for one
//! build/process run; nothing is persisted. Concurrent duplicate in-flight
//! requests for the same key are not coalesced: the last writer wins, and
//! writers for the same key are expected to produce identical values.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::MediaType;

/// What kind of entity a cache entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Movie,
    Tv,
    Person,
}

impl From<MediaType> for EntityType {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::Movie => EntityType::Movie,
            MediaType::Tv => EntityType::Tv,
        }
    }
}

impl EntityType {
    /// Path segment used by the metadata API.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Movie => "movie",
            EntityType::Tv => "tv",
            EntityType::Person => "person",
        }
    }
}

/// `(entity id, entity type, locale)` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity_type: EntityType,
    pub id: i64,
    pub locale: String,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, id: i64, locale: &str) -> Self {
        Self {
            entity_type,
            id,
            locale: locale.to_string(),
        }
    }
}

/// In-memory memoization map for enrichment values.
pub struct MetadataCache<V> {
    entries: Mutex<HashMap<CacheKey, Option<V>>>,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Outer `None` = not yet fetched; `Some(None)` = confirmed absent.
    pub fn get(&self, key: &CacheKey) -> Option<Option<V>> {
        self.entries
            .lock()
            .expect("metadata cache lock poisoned")
            .get(key)
            .cloned()
    }

    /// Store a fetch result, including an explicit absent (`None`) value.
    pub fn insert(&self, key: CacheKey, value: Option<V>) {
        self.entries
            .lock()
            .expect("metadata cache lock poisoned")
            .insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("metadata cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for MetadataCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
