//! Two-way table between native node ids and canonical bookmark ids.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bookmark::BookmarkId;
use crate::error::Result;
use crate::store::{KeyValueStore, StoreKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    pub native_id: String,
    pub canonical_id: BookmarkId,
}

impl IdMapping {
    pub fn new(native_id: impl Into<String>, canonical_id: BookmarkId) -> Self {
        Self { native_id: native_id.into(), canonical_id }
    }
}

/// Persisted as a list of [`IdMapping`]s; both directions are rebuilt on
/// load. Adding a pair replaces any earlier pair on either side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<IdMapping>", into = "Vec<IdMapping>")]
pub struct IdMapper {
    by_native: HashMap<String, BookmarkId>,
    by_canonical: HashMap<BookmarkId, String>,
}

impl From<Vec<IdMapping>> for IdMapper {
    fn from(mappings: Vec<IdMapping>) -> Self {
        let mut mapper = IdMapper::default();
        mapper.extend(mappings);
        mapper
    }
}

impl From<IdMapper> for Vec<IdMapping> {
    fn from(mapper: IdMapper) -> Self {
        mapper.mappings()
    }
}

impl IdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, native_id: impl Into<String>, canonical_id: BookmarkId) {
        let native_id = native_id.into();
        self.remove_native(&native_id);
        self.remove_canonical(canonical_id);
        self.by_canonical.insert(canonical_id, native_id.clone());
        self.by_native.insert(native_id, canonical_id);
    }

    pub fn extend(&mut self, mappings: impl IntoIterator<Item = IdMapping>) {
        for mapping in mappings {
            self.add(mapping.native_id, mapping.canonical_id);
        }
    }

    /// Replaces the whole table.
    pub fn set(&mut self, mappings: impl IntoIterator<Item = IdMapping>) {
        self.by_native.clear();
        self.by_canonical.clear();
        self.extend(mappings);
    }

    pub fn remove_native(&mut self, native_id: &str) -> Option<BookmarkId> {
        let canonical_id = self.by_native.remove(native_id)?;
        self.by_canonical.remove(&canonical_id);
        Some(canonical_id)
    }

    pub fn remove_canonical(&mut self, canonical_id: BookmarkId) -> Option<String> {
        let native_id = self.by_canonical.remove(&canonical_id)?;
        self.by_native.remove(&native_id);
        Some(native_id)
    }

    pub fn get_by_native(&self, native_id: &str) -> Option<BookmarkId> {
        self.by_native.get(native_id).copied()
    }

    pub fn get_by_canonical(&self, canonical_id: BookmarkId) -> Option<&str> {
        self.by_canonical.get(&canonical_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_native.is_empty()
    }

    /// All pairs, ordered by canonical id.
    pub fn mappings(&self) -> Vec<IdMapping> {
        let mut mappings: Vec<IdMapping> = self
            .by_native
            .iter()
            .map(|(native_id, canonical_id)| IdMapping::new(native_id.clone(), *canonical_id))
            .collect();
        mappings.sort_by_key(|m| m.canonical_id);
        mappings
    }

    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        match store.get(StoreKey::BookmarkIdMappings).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store
            .set(StoreKey::BookmarkIdMappings, serde_json::to_value(self)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_both_directions() {
        let mut mapper = IdMapper::new();
        mapper.add("101", 7);
        mapper.add("102", 8);

        assert_eq!(mapper.get_by_native("101"), Some(7));
        assert_eq!(mapper.get_by_canonical(8), Some("102"));
        assert_eq!(mapper.get_by_native("999"), None);

        assert_eq!(mapper.remove_canonical(7).as_deref(), Some("101"));
        assert_eq!(mapper.get_by_native("101"), None);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_add_replaces_stale_pairs() {
        let mut mapper = IdMapper::new();
        mapper.add("101", 7);
        mapper.add("101", 9);
        assert_eq!(mapper.get_by_canonical(7), None);
        assert_eq!(mapper.get_by_native("101"), Some(9));

        mapper.add("202", 9);
        assert_eq!(mapper.get_by_native("101"), None);
        assert_eq!(mapper.len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_as_list() {
        let store = MemoryStore::new();
        let mut mapper = IdMapper::new();
        mapper.set(vec![IdMapping::new("b", 2), IdMapping::new("a", 1)]);
        mapper.save(&store).await.unwrap();

        let raw = store.get(StoreKey::BookmarkIdMappings).await.unwrap().unwrap();
        assert_eq!(
            raw,
            serde_json::json!([
                { "nativeId": "a", "canonicalId": 1 },
                { "nativeId": "b", "canonicalId": 2 }
            ])
        );
        assert_eq!(IdMapper::load(&store).await.unwrap(), mapper);
    }
}
