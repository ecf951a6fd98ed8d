//! Entity → relative path mapping.
//!
//! An entity's path is the safe-name join of its ancestor chain:
//! `resolve(e) == resolve(parent(e)) / safe_name(e.name)`, and a root entity
//! resolves to `safe_name(e.name)` alone.

use std::path::PathBuf;

use canopy_core::{Entity, EntityStore};

use crate::error::SyncError;

/// Characters replaced by `_` in addition to ASCII control characters.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows refuses as file stems.
const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Filesystem-safe slug for a display name.
///
/// Deterministic and idempotent: `safe_name(&safe_name(x)) == safe_name(x)`.
pub fn safe_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        return "_".to_string();
    }

    // Suffix the stem so the result no longer starts with a device name.
    let (stem, rest) = match trimmed.split_once('.') {
        Some((stem, rest)) => (stem, Some(rest)),
        None => (trimmed, None),
    };
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
        return match rest {
            Some(rest) => format!("{stem}_.{rest}"),
            None => format!("{stem}_"),
        };
    }
    trimmed.to_string()
}

/// Resolves entity paths against the store with a bounded ancestor walk.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver {
    max_depth: usize,
}

impl PathResolver {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Relative path of `entity` (no extension), root first.
    ///
    /// Fails with [`SyncError::DepthExceeded`] when the chain is longer than
    /// the bound, which also catches parent cycles in a corrupt store.
    pub fn resolve<S: EntityStore + ?Sized>(
        &self,
        entity: &Entity,
        store: &S,
    ) -> Result<PathBuf, SyncError> {
        let mut names = vec![safe_name(&entity.name)];
        let mut cursor = entity.parent;

        while let Some(parent_id) = cursor {
            if names.len() > self.max_depth {
                return Err(SyncError::DepthExceeded {
                    key: entity.key,
                    max: self.max_depth,
                });
            }
            match store.get_by_id(parent_id)? {
                Some(parent) => {
                    names.push(safe_name(&parent.name));
                    cursor = parent.parent;
                }
                None => {
                    tracing::warn!(
                        entity = %entity.key,
                        parent = %parent_id,
                        "parent missing from store; treating entity as root",
                    );
                    cursor = None;
                }
            }
        }

        Ok(names.iter().rev().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{EntityId, EntityKey, ItemType, MemoryStore, StoreError};
    use rstest::rstest;

    #[rstest]
    #[case("Foo", "Foo")]
    #[case("  Foo Bar  ", "Foo Bar")]
    #[case("a/b\\c", "a_b_c")]
    #[case("what?*", "what__")]
    #[case("..", "_")]
    #[case("", "_")]
    #[case(".hidden.", "hidden")]
    #[case("con", "con_")]
    #[case("NUL.txt", "NUL_.txt")]
    #[case("con.x.y", "con_.x.y")]
    #[case("tab\there", "tab_here")]
    #[case("Über", "Über")]
    fn safe_name_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(safe_name(input), expected);
    }

    #[rstest]
    #[case("a/b")]
    #[case(" .. ")]
    #[case("con")]
    #[case("lpt1.log")]
    #[case("NUL.txt")]
    #[case("con.x")]
    #[case("COM1")]
    #[case("x<>y")]
    fn safe_name_is_idempotent(#[case] input: &str) {
        let once = safe_name(input);
        assert_eq!(safe_name(&once), once);
    }

    #[test]
    fn root_entity_resolves_to_own_name() {
        let mut store = MemoryStore::new();
        let foo = store.save(Entity::item("Foo", "data-type")).unwrap();
        let path = PathResolver::new(100).resolve(&foo, &store).unwrap();
        assert_eq!(path, PathBuf::from("Foo"));
    }

    #[test]
    fn nested_entity_joins_parent_path() {
        let mut store = MemoryStore::new();
        let outer = store.save(Entity::container("Outer", "data-type")).unwrap();
        let inner = store
            .save(Entity::container("In:ner", "data-type").with_parent(outer.id))
            .unwrap();
        let leaf = store
            .save(Entity::item("Leaf", "data-type").with_parent(inner.id))
            .unwrap();

        let resolver = PathResolver::new(100);
        let parent_path = resolver.resolve(&inner, &store).unwrap();
        let leaf_path = resolver.resolve(&leaf, &store).unwrap();
        assert_eq!(leaf_path, parent_path.join("Leaf"));
        assert_eq!(leaf_path, PathBuf::from("Outer").join("In_ner").join("Leaf"));
    }

    /// Store whose parent links form a loop, which `MemoryStore` refuses.
    struct LoopStore;

    impl EntityStore for LoopStore {
        fn get_by_key(&self, _key: &EntityKey) -> Result<Option<Entity>, StoreError> {
            Ok(None)
        }

        fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
            let mut e = Entity::container(format!("c{id}"), "data-type");
            e.id = id;
            e.parent = Some(EntityId(if id.0 == 1 { 2 } else { 1 }));
            Ok(Some(e))
        }

        fn children(
            &self,
            _parent: Option<EntityId>,
            _item_type: &ItemType,
        ) -> Result<Vec<Entity>, StoreError> {
            Ok(vec![])
        }

        fn has_children(&self, _id: EntityId) -> Result<bool, StoreError> {
            Ok(true)
        }

        fn save(&mut self, entity: Entity) -> Result<Entity, StoreError> {
            Ok(entity)
        }

        fn delete(&mut self, _key: &EntityKey) -> Result<Option<Entity>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn ancestor_cycle_exceeds_depth_bound() {
        let leaf = Entity::item("Leaf", "data-type").with_parent(EntityId(1));
        let err = PathResolver::new(10).resolve(&leaf, &LoopStore).unwrap_err();
        assert!(matches!(err, SyncError::DepthExceeded { max: 10, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_parent_falls_back_to_root() {
        let store = MemoryStore::new();
        let leaf = Entity::item("Leaf", "data-type").with_parent(EntityId(5));
        let path = PathResolver::new(100).resolve(&leaf, &store).unwrap();
        assert_eq!(path, PathBuf::from("Leaf"));
    }
}
