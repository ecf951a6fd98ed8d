//! Store collaborator contract and the in-memory reference store.
//!
//! The sync engine never owns persistence or business rules; it only talks to
//! an [`EntityStore`]. [`MemoryStore`] is a small implementation used by the
//! CLI harness and the test suites. It persists as one YAML document:
//!
//! ```text
//! <sync root>/
//!   .canopy-store.yaml   (written via `.tmp` sibling + rename)
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{store_io, StoreError};
use crate::types::{Entity, EntityId, EntityKey, ItemType};

// ---------------------------------------------------------------------------
// 1. Contract
// ---------------------------------------------------------------------------

/// The hierarchical data store the engine reconciles against.
pub trait EntityStore {
    /// Look up an entity by its global key.
    fn get_by_key(&self, key: &EntityKey) -> Result<Option<Entity>, StoreError>;

    /// Look up an entity by its store-local id (parent walks).
    fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Direct children of `parent` (`None` = top level) for one item type,
    /// containers included, in store order.
    fn children(
        &self,
        parent: Option<EntityId>,
        item_type: &ItemType,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Whether any entity, of any type, lives under `id`.
    fn has_children(&self, id: EntityId) -> Result<bool, StoreError>;

    /// Create (new key) or update (existing key) an entity. Returns the stored
    /// entity with its id assigned.
    fn save(&mut self, entity: Entity) -> Result<Entity, StoreError>;

    /// Remove the entity with `key`, returning it if it existed.
    fn delete(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError>;
}

impl<T: EntityStore + ?Sized> EntityStore for &mut T {
    fn get_by_key(&self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        (**self).get_by_key(key)
    }

    fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        (**self).get_by_id(id)
    }

    fn children(
        &self,
        parent: Option<EntityId>,
        item_type: &ItemType,
    ) -> Result<Vec<Entity>, StoreError> {
        (**self).children(parent, item_type)
    }

    fn has_children(&self, id: EntityId) -> Result<bool, StoreError> {
        (**self).has_children(id)
    }

    fn save(&mut self, entity: Entity) -> Result<Entity, StoreError> {
        (**self).save(entity)
    }

    fn delete(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        (**self).delete(key)
    }
}

// ---------------------------------------------------------------------------
// 2. MemoryStore
// ---------------------------------------------------------------------------

/// Vector-backed store; entities are kept in id (insertion) order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    entities: Vec<Entity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    fn position(&self, key: &EntityKey) -> Option<usize> {
        self.entities.iter().position(|e| e.key == *key)
    }

    fn find_id(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Reject parents that are missing or that sit below the entity itself.
    fn check_parent(&self, entity: &Entity, existing: Option<EntityId>) -> Result<(), StoreError> {
        let Some(parent) = entity.parent else {
            return Ok(());
        };
        let mut cursor = Some(parent);
        let mut hops = 0usize;
        while let Some(id) = cursor {
            if Some(id) == existing {
                return Err(StoreError::Cycle {
                    key: entity.key,
                    parent,
                });
            }
            let Some(current) = self.find_id(id) else {
                return Err(StoreError::ParentNotFound {
                    name: entity.name.clone(),
                    parent: id,
                });
            };
            cursor = current.parent;
            hops += 1;
            if hops > self.entities.len() {
                return Err(StoreError::Cycle {
                    key: entity.key,
                    parent,
                });
            }
        }
        Ok(())
    }
}

impl EntityStore for MemoryStore {
    fn get_by_key(&self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        Ok(self.position(key).map(|i| self.entities[i].clone()))
    }

    fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.find_id(id).cloned())
    }

    fn children(
        &self,
        parent: Option<EntityId>,
        item_type: &ItemType,
    ) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .entities
            .iter()
            .filter(|e| e.parent == parent && e.item_type == *item_type)
            .cloned()
            .collect())
    }

    fn has_children(&self, id: EntityId) -> Result<bool, StoreError> {
        Ok(self.entities.iter().any(|e| e.parent == Some(id)))
    }

    fn save(&mut self, mut entity: Entity) -> Result<Entity, StoreError> {
        match self.position(&entity.key) {
            Some(index) => {
                let id = self.entities[index].id;
                self.check_parent(&entity, Some(id))?;
                entity.id = id;
                self.entities[index] = entity.clone();
            }
            None => {
                self.check_parent(&entity, None)?;
                self.next_id += 1;
                entity.id = EntityId(self.next_id);
                self.entities.push(entity.clone());
            }
        }
        Ok(entity)
    }

    fn delete(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        let Some(index) = self.position(key) else {
            return Ok(None);
        };
        let id = self.entities[index].id;
        if self.has_children(id)? {
            return Err(StoreError::HasChildren { key: *key });
        }
        Ok(Some(self.entities.remove(index)))
    }
}

// ---------------------------------------------------------------------------
// 3. Persistence
// ---------------------------------------------------------------------------

/// Load a store from `path`; a missing file yields an empty store.
pub fn load_at(path: &Path) -> Result<MemoryStore, StoreError> {
    if !path.exists() {
        return Ok(MemoryStore::new());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| store_io(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically save a store to `path`.
///
/// Write flow: serialize → `<file>.tmp` sibling → `rename`.
pub fn save_at(path: &Path, store: &MemoryStore) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| store_io(dir, e))?;
        }
    }
    let yaml = serde_yaml::to_string(store)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, yaml).map_err(|e| store_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| store_io(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn data_type() -> ItemType {
        ItemType::from("data-type")
    }

    #[test]
    fn save_assigns_ids_in_order() {
        let mut store = MemoryStore::new();
        let a = store.save(Entity::item("A", "data-type")).unwrap();
        let b = store.save(Entity::item("B", "data-type")).unwrap();
        assert_eq!(a.id, EntityId(1));
        assert_eq!(b.id, EntityId(2));
    }

    #[test]
    fn save_existing_key_keeps_id() {
        let mut store = MemoryStore::new();
        let mut a = store.save(Entity::item("A", "data-type")).unwrap();
        a.name = "Renamed".into();
        a.id = EntityId(99);
        let saved = store.save(a).unwrap();
        assert_eq!(saved.id, EntityId(1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_id(EntityId(1)).unwrap().unwrap().name, "Renamed");
    }

    #[test]
    fn children_filters_by_parent_and_type() {
        let mut store = MemoryStore::new();
        let folder = store.save(Entity::container("Folder", "data-type")).unwrap();
        store
            .save(Entity::item("Inside", "data-type").with_parent(folder.id))
            .unwrap();
        store.save(Entity::item("Other", "media-type")).unwrap();

        let top = store.children(None, &data_type()).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "Folder");

        let inside = store.children(Some(folder.id), &data_type()).unwrap();
        assert_eq!(inside.len(), 1);
        assert!(store.has_children(folder.id).unwrap());
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut store = MemoryStore::new();
        let err = store
            .save(Entity::item("Orphan", "data-type").with_parent(EntityId(42)))
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound { .. }));
    }

    #[test]
    fn moving_under_own_descendant_is_a_cycle() {
        let mut store = MemoryStore::new();
        let outer = store.save(Entity::container("Outer", "data-type")).unwrap();
        let inner = store
            .save(Entity::container("Inner", "data-type").with_parent(outer.id))
            .unwrap();
        let err = store.save(outer.with_parent(inner.id)).unwrap_err();
        assert!(matches!(err, StoreError::Cycle { .. }));
    }

    #[test]
    fn delete_refuses_non_empty_container() {
        let mut store = MemoryStore::new();
        let folder = store.save(Entity::container("Folder", "data-type")).unwrap();
        store
            .save(Entity::item("Inside", "data-type").with_parent(folder.id))
            .unwrap();
        let err = store.delete(&folder.key).unwrap_err();
        assert!(matches!(err, StoreError::HasChildren { .. }));
    }

    #[test]
    fn delete_missing_key_is_none() {
        let mut store = MemoryStore::new();
        assert!(store.delete(&EntityKey::new()).unwrap().is_none());
    }

    #[test]
    fn persistence_roundtrip_and_tmp_cleanup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.yaml");
        let mut store = MemoryStore::new();
        store.save(Entity::item("A", "data-type").with_field("editor", "textbox")).unwrap();

        save_at(&path, &store).unwrap();
        assert!(!tmp.path().join("nested").join("store.yaml.tmp").exists());

        let loaded = load_at(&path).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(&tmp.path().join("absent.yaml")).unwrap();
        assert!(store.is_empty());
    }
}
