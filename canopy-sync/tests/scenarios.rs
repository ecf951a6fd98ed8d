use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use canopy_core::{
    ChangeType, Entity, EntityKey, EntityStore, FailureKind, HandlerSettings, ItemType, Link,
    MemoryStore, SyncSettings,
};
use canopy_sync::{
    export_run, import_run, safe_name, AutoExportGate, EventBridge, PathResolver, RecordCodec,
    StoreObserver, SyncEngine, SyncScope, SyncTally, UPDATE_SKIPPED,
};
use filetime::{set_file_mtime, FileTime};
use rstest::rstest;
use tempfile::TempDir;

type Engine = SyncEngine<MemoryStore, RecordCodec>;

fn settings() -> SyncSettings {
    SyncSettings {
        handlers: vec![HandlerSettings {
            item_type: ItemType::from("data-type"),
            folder: "types".into(),
        }],
        ..SyncSettings::default()
    }
}

fn engine_at(root: &TempDir, store: MemoryStore) -> Engine {
    SyncEngine::new(store, RecordCodec::new("data-type"), root.path(), &settings()).expect("engine")
}

fn config(root: &TempDir, parts: &[&str]) -> PathBuf {
    let mut path = root.path().join("types");
    for part in parts {
        path.push(part);
    }
    path
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_root_entity_exports_to_category_file() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let foo = engine
        .store_mut()
        .save(Entity::item("Foo", "data-type"))
        .expect("save");

    let action = engine.export_one(&foo);
    assert!(action.success, "{action:?}");
    assert_eq!(action.file_path, Some(config(&root, &["Foo.config"])));
    assert!(config(&root, &["Foo.config"]).is_file());
}

#[test]
fn scenario_b_delete_archives_file() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let foo = engine
        .store_mut()
        .save(Entity::item("Foo", "data-type"))
        .expect("save");
    engine.export_one(&foo);

    let action = engine.delete_item(&foo.key);
    assert!(action.success);
    assert_eq!(action.change, ChangeType::Delete);
    assert!(!config(&root, &["Foo.config"]).exists());

    let archived: Vec<_> = fs::read_dir(root.path().join(".archive"))
        .expect("archive dir")
        .map(|e| e.expect("entry").path().join("types").join("Foo.config"))
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].is_file(), "archived copy must survive");
}

#[test]
fn scenario_c_forward_reference_bound_by_post_import() {
    let root = TempDir::new().expect("root");
    let target_key = EntityKey::new();

    // Export "Theme" pointing at a target only the exporting store knows.
    let mut exporter = engine_at(&root, MemoryStore::new());
    exporter
        .store_mut()
        .save(
            Entity::item("Theme", "data-type").with_reference("source", Link::Pending(target_key)),
        )
        .expect("save");
    export_run(&mut exporter, SyncScope::All).expect("export");

    let mut engine = engine_at(&root, MemoryStore::new());
    let first = vec![engine
        .import_file(&config(&root, &["Theme.config"]), false)
        .into_action()];
    assert!(first[0].success);
    let theme_key = first[0].key.expect("key");
    let theme = engine.store().get_by_key(&theme_key).unwrap().unwrap();
    assert_eq!(theme.references["source"], Link::Pending(target_key));

    let target = engine
        .store_mut()
        .save(Entity::item("Source", "data-type").with_key(target_key))
        .expect("save target");

    let second = engine.process_post_import(&first);
    assert_eq!(second.len(), 1);
    assert!(second[0].success);
    assert_eq!(second[0].change, ChangeType::Update);
    let theme = engine.store().get_by_key(&theme_key).unwrap().unwrap();
    assert_eq!(theme.references["source"], Link::Resolved(target.id));

    let again = engine.process_post_import(&first);
    assert!(again.iter().all(|a| a.change == ChangeType::NoChange), "{again:?}");
}

#[test]
fn scenario_d_deleting_last_child_prunes_container_folder() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let folder = engine
        .store_mut()
        .save(Entity::container("Folder", "data-type"))
        .expect("save folder");
    let child = engine
        .store_mut()
        .save(Entity::item("Only", "data-type").with_parent(folder.id))
        .expect("save child");
    engine.export_all().expect("export");
    assert!(config(&root, &["Folder", "Only.config"]).is_file());

    let action = engine.delete_item(&child.key);
    assert!(action.success);
    assert!(!config(&root, &["Folder"]).exists(), "empty folder must be pruned");
    assert!(config(&root, &["Folder.config"]).is_file());

    let action = engine.delete_item(&folder.key);
    assert!(action.success);
    assert!(!config(&root, &["Folder.config"]).exists());
}

#[test]
fn pruning_empty_container_spares_same_named_sibling() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let full = engine
        .store_mut()
        .save(Entity::container("Foo", "data-type"))
        .expect("save");
    engine
        .store_mut()
        .save(Entity::container("Foo", "data-type"))
        .expect("save empty twin");
    engine
        .store_mut()
        .save(Entity::item("Live", "data-type").with_parent(full.id))
        .expect("save child");
    engine.export_all().expect("export");
    let live = config(&root, &["Foo", "Live.config"]);
    assert!(live.is_file());

    engine.clean_empty_containers(None).expect("clean");
    assert!(live.is_file(), "live child of the sibling must stay");
}

#[test]
fn deleting_item_spares_same_named_container_folder() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let folder = engine
        .store_mut()
        .save(Entity::container("Foo", "data-type"))
        .expect("save");
    engine
        .store_mut()
        .save(Entity::item("Live", "data-type").with_parent(folder.id))
        .expect("save child");
    let item = engine
        .store_mut()
        .save(Entity::item("Foo", "data-type"))
        .expect("save item");
    engine.export_all().expect("export");

    let action = engine.delete_item(&item.key);
    assert!(action.success, "{action:?}");
    assert!(config(&root, &["Foo", "Live.config"]).is_file());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn export_is_idempotent_and_leaves_mtime_alone() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    engine
        .store_mut()
        .save(Entity::item("Foo", "data-type").with_field("editor", "textbox"))
        .expect("save");
    engine.export_all().expect("first export");

    let path = config(&root, &["Foo.config"]);
    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(24 * 60 * 60));
    set_file_mtime(&path, old).expect("set mtime");
    let before = FileTime::from_last_modification_time(&fs::metadata(&path).expect("meta"));
    let bytes = fs::read(&path).expect("read");

    let actions = engine.export_all().expect("second export");
    assert!(actions.iter().all(|a| a.change == ChangeType::NoChange));
    assert_eq!(fs::read(&path).expect("read"), bytes);
    let after = FileTime::from_last_modification_time(&fs::metadata(&path).expect("meta"));
    assert_eq!(after, before, "unchanged export must not rewrite the file");

    assert_eq!(engine.report(&path).change, ChangeType::NoChange);
}

#[test]
fn renamed_and_moved_entities_leave_one_file_per_key() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let a = engine
        .store_mut()
        .save(Entity::container("A", "data-type"))
        .expect("save");
    let b = engine
        .store_mut()
        .save(Entity::container("B", "data-type"))
        .expect("save");
    let mut item = engine
        .store_mut()
        .save(Entity::item("Item", "data-type").with_parent(a.id))
        .expect("save");
    engine.export_all().expect("export");

    item.name = "Renamed".into();
    item.parent = Some(b.id);
    engine.store_mut().save(item.clone()).expect("move");
    engine.export_all().expect("re-export");

    let records = engine.files().scan("types").expect("scan");
    let for_key: Vec<_> = records.iter().filter(|r| r.key == item.key).collect();
    assert_eq!(for_key.len(), 1);
    assert_eq!(for_key[0].path, config(&root, &["B", "Renamed.config"]));
}

#[test]
fn force_controls_overwrite_of_divergent_entity() {
    let root = TempDir::new().expect("root");
    let mut engine = engine_at(&root, MemoryStore::new());
    let mut foo = engine
        .store_mut()
        .save(Entity::item("Foo", "data-type").with_field("editor", "textbox"))
        .expect("save");
    let path = engine.export_one(&foo).file_path.expect("path");

    foo.fields.insert("editor".into(), "rte".into());
    engine.store_mut().save(foo.clone()).expect("edit store");

    let skipped = engine.import_file(&path, false);
    assert!(!skipped.success);
    assert_eq!(skipped.change, ChangeType::Update);
    assert_eq!(skipped.failure, Some(FailureKind::ConflictNotForced));
    assert_eq!(skipped.message.as_deref(), Some(UPDATE_SKIPPED));
    assert_eq!(
        engine.store().get_by_key(&foo.key).unwrap().unwrap().fields["editor"],
        "rte"
    );

    let forced = engine.import_file(&path, true);
    assert!(forced.success);
    assert_eq!(
        engine.store().get_by_key(&foo.key).unwrap().unwrap().fields["editor"],
        "textbox"
    );
}

#[rstest]
#[case::root(&[])]
#[case::nested(&["Outer"])]
#[case::deep(&["Outer", "Mid:dle", "Inner"])]
fn path_invariant_holds(#[case] ancestors: &[&str]) {
    let mut store = MemoryStore::new();
    let mut parent = None;
    for name in ancestors {
        let mut container = Entity::container(*name, "data-type");
        container.parent = parent;
        parent = Some(store.save(container).expect("save").id);
    }
    let mut leaf = Entity::item("Leaf?", "data-type");
    leaf.parent = parent;
    let leaf = store.save(leaf).expect("save");

    let resolver = PathResolver::new(100);
    let path = resolver.resolve(&leaf, &store).expect("resolve");
    let expected: PathBuf = ancestors
        .iter()
        .map(|n| safe_name(n))
        .chain(std::iter::once(safe_name("Leaf?")))
        .collect();
    assert_eq!(path, expected);
}

#[test]
fn export_then_import_round_trips_into_fresh_store() {
    let root = TempDir::new().expect("root");
    let mut exporter = engine_at(&root, MemoryStore::new());
    let folder = exporter
        .store_mut()
        .save(Entity::container("Folder", "data-type"))
        .expect("save");
    let target = exporter
        .store_mut()
        .save(Entity::item("Target", "data-type"))
        .expect("save");
    let item = exporter
        .store_mut()
        .save(
            Entity::item("Item", "data-type")
                .with_parent(folder.id)
                .with_field("editor", "textbox")
                .with_reference("source", Link::Resolved(target.id)),
        )
        .expect("save");
    export_run(&mut exporter, SyncScope::All).expect("export");

    let mut importer = engine_at(&root, MemoryStore::new());
    let report = import_run(&mut importer, &AutoExportGate::new(), false).expect("import");
    let tally = SyncTally::from_actions(&report.first_pass);
    assert_eq!(tally.created, 3);
    assert_eq!(tally.failed, 0);

    let imported = importer.store().get_by_key(&item.key).unwrap().unwrap();
    assert_eq!(imported.name, item.name);
    assert_eq!(imported.fields, item.fields);
    let Link::Resolved(id) = imported.references["source"] else {
        panic!("reference should be bound");
    };
    assert_eq!(importer.store().get_by_id(id).unwrap().unwrap().key, target.key);

    // Re-exporting the imported store reproduces the same files.
    let actions = importer.export_all().expect("re-export");
    assert!(actions.iter().all(|a| a.change == ChangeType::NoChange), "{actions:?}");
}

#[test]
fn bulk_import_does_not_trigger_auto_export() {
    let root = TempDir::new().expect("root");
    let mut exporter = engine_at(&root, MemoryStore::new());
    exporter
        .store_mut()
        .save(Entity::item("Foo", "data-type"))
        .expect("save");
    export_run(&mut exporter, SyncScope::All).expect("export");

    let gate = AutoExportGate::new();
    let mut bridge = EventBridge::new(engine_at(&root, MemoryStore::new()), gate.clone());
    let report = import_run(bridge.engine_mut(), &gate, false).expect("import");
    assert!(!gate.is_suppressed());

    // The host would notify during the import; while suppressed nothing runs.
    let imported: Vec<Entity> = bridge.engine().store().iter().cloned().collect();
    let guard = gate.suppress();
    assert!(bridge.on_saved(&imported).is_empty());
    drop(guard);
    assert_eq!(report.first_pass.len(), 1);
    assert_eq!(bridge.on_saved(&imported)[0].change, ChangeType::NoChange);
}
