//! Roundtrip serialisation tests for `canopy-core` types.
//!
//! Each `#[case]` is isolated; no shared state.

use canopy_core::{
    store::{self, EntityStore},
    Entity, EntityId, EntityKey, EntityKind, Link, MemoryStore,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minimal_store() -> MemoryStore {
    MemoryStore::new()
}

fn nested_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let folder = store
        .save(Entity::container("Editors", "data-type"))
        .expect("save folder");
    let target = store
        .save(Entity::item("Colour Picker", "data-type").with_parent(folder.id))
        .expect("save target");
    store
        .save(
            Entity::item("Theme", "data-type")
                .with_parent(folder.id)
                .with_field("editor", "dropdown")
                .with_reference("palette", Link::Resolved(target.id))
                .with_reference("fallback", Link::Pending(EntityKey::new())),
        )
        .expect("save referencing item");
    store
}

fn unicode_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .save(
            Entity::item("データ型 / тип: <>&\"'", "data-type")
                .with_field("説明", "日本語・한국어・العربية"),
        )
        .expect("save unicode item");
    store
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("minimal", minimal_store())]
#[case("nested", nested_store())]
#[case("unicode_strings", unicode_store())]
fn store_roundtrip(#[case] label: &str, #[case] original: MemoryStore) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("store.yaml");
    store::save_at(&path, &original).unwrap_or_else(|e| panic!("[{label}] save failed: {e}"));
    let back = store::load_at(&path).unwrap_or_else(|e| panic!("[{label}] load failed: {e}"));
    assert_eq!(original.len(), back.len(), "[{label}] entity count");
    for (orig, got) in original.iter().zip(back.iter()) {
        assert_eq!(orig, got, "[{label}] entity");
    }
}

#[rstest]
#[case(EntityKind::Container)]
#[case(EntityKind::Item)]
fn kind_roundtrip(#[case] kind: EntityKind) {
    let yaml = serde_yaml::to_string(&kind).expect("serialize");
    let back: EntityKind = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(kind, back);
}

#[rstest]
#[case(Link::Resolved(EntityId(12)))]
#[case(Link::Pending(EntityKey::new()))]
fn link_roundtrip(#[case] link: Link) {
    let yaml = serde_yaml::to_string(&link).expect("serialize");
    let back: Link = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(link, back);
}
