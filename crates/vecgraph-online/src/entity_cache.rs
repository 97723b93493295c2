//! Per-evaluation staging area in front of the storage contract.
//!
//! Reads go through to storage once and are remembered. Writes stay in the
//! cache until [`EntityCache::flush`] sends every changed field in one
//! `write_entities` call, so a failed evaluation leaves storage untouched.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use vecgraph_storage::{EntityData, EntityId, StorageContract};
use vecgraph_types::Value;

use crate::error::Result;

#[derive(Debug, Clone)]
struct CachedField {
    value: Option<Value>,
    changed: bool,
}

pub struct EntityCache<'a> {
    storage: &'a dyn StorageContract,
    fields: DashMap<(EntityId, String), CachedField>,
}

impl std::fmt::Debug for EntityCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("fields", &self.fields.len())
            .field("changed", &self.changed_count())
            .finish()
    }
}

impl<'a> EntityCache<'a> {
    pub fn new(storage: &'a dyn StorageContract) -> Self {
        Self {
            storage,
            fields: DashMap::new(),
        }
    }

    /// Cached value, falling back to storage on first access.
    pub fn get(&self, entity: &EntityId, field: &str) -> Result<Option<Value>> {
        let key = (entity.clone(), field.to_string());
        if let Some(cached) = self.fields.get(&key) {
            return Ok(cached.value.clone());
        }
        let mut stored = self
            .storage
            .read(&entity.schema, &entity.object_id, &[field.to_string()])?;
        let value = stored.remove(field);
        // a concurrent set wins over what was just read
        let entry = self.fields.entry(key).or_insert(CachedField {
            value,
            changed: false,
        });
        Ok(entry.value.clone())
    }

    /// Stage a value. Setting the value already cached is not a change.
    pub fn set(&self, entity: &EntityId, field: impl Into<String>, value: Value) {
        match self.fields.entry((entity.clone(), field.into())) {
            Entry::Occupied(mut existing) => {
                if existing.get().value.as_ref() != Some(&value) {
                    existing.insert(CachedField {
                        value: Some(value),
                        changed: true,
                    });
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedField {
                    value: Some(value),
                    changed: true,
                });
            }
        }
    }

    pub fn changed_count(&self) -> usize {
        self.fields.iter().filter(|entry| entry.value().changed).count()
    }

    /// Changed fields grouped per entity.
    pub fn changed(&self) -> Vec<EntityData> {
        let mut by_entity: BTreeMap<EntityId, BTreeMap<String, Value>> = BTreeMap::new();
        for entry in self.fields.iter() {
            let ((entity, field), cached) = entry.pair();
            if let (true, Some(value)) = (cached.changed, &cached.value) {
                by_entity
                    .entry(entity.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
        }
        by_entity
            .into_iter()
            .map(|(id, fields)| EntityData { id, fields })
            .collect()
    }

    /// Write all changed fields in one batch.
    pub fn flush(&self) -> Result<usize> {
        let changed = self.changed();
        if changed.is_empty() {
            return Ok(0);
        }
        let entities = changed.len();
        self.storage.write_entities(changed)?;
        for mut entry in self.fields.iter_mut() {
            entry.value_mut().changed = false;
        }
        debug!(entities, "Flushed entity cache");
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecgraph_storage::InMemoryStorage;

    #[test]
    fn test_reads_through_and_stages_writes() {
        let storage = InMemoryStorage::new();
        storage.write("paper", "p1", "year", Value::Int(2020)).unwrap();
        let cache = EntityCache::new(&storage);
        let id = EntityId::new("paper", "p1");

        assert_eq!(cache.get(&id, "year").unwrap(), Some(Value::Int(2020)));
        assert_eq!(cache.get(&id, "missing").unwrap(), None);

        cache.set(&id, "year", Value::Int(2021));
        assert_eq!(cache.get(&id, "year").unwrap(), Some(Value::Int(2021)));
        // not written until flush
        let stored = storage.read("paper", "p1", &["year".to_string()]).unwrap();
        assert_eq!(stored.get("year"), Some(&Value::Int(2020)));

        assert_eq!(cache.flush().unwrap(), 1);
        let stored = storage.read("paper", "p1", &["year".to_string()]).unwrap();
        assert_eq!(stored.get("year"), Some(&Value::Int(2021)));
        assert_eq!(cache.changed_count(), 0);
    }

    #[test]
    fn test_changed_groups_by_entity() {
        let storage = InMemoryStorage::new();
        let cache = EntityCache::new(&storage);
        cache.set(&EntityId::new("paper", "p1"), "a", Value::Int(1));
        cache.set(&EntityId::new("paper", "p1"), "b", Value::Int(2));
        cache.set(&EntityId::new("paper", "p2"), "a", Value::Int(3));
        let changed = cache.changed();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].fields.len(), 2);
    }

    #[test]
    fn test_setting_loaded_value_is_not_a_change() {
        let storage = InMemoryStorage::new();
        storage.write("paper", "p1", "year", Value::Int(2020)).unwrap();
        let cache = EntityCache::new(&storage);
        let id = EntityId::new("paper", "p1");
        let loaded = cache.get(&id, "year").unwrap().unwrap();
        cache.set(&id, "year", loaded);
        assert_eq!(cache.changed_count(), 0);
    }

    #[test]
    fn test_flush_without_changes() {
        let storage = InMemoryStorage::new();
        let cache = EntityCache::new(&storage);
        cache.get(&EntityId::new("paper", "p1"), "a").unwrap();
        assert_eq!(cache.flush().unwrap(), 0);
        assert!(storage.is_empty());
    }
}
