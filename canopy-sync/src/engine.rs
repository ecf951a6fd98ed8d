//! Reconciliation engine for one item type.
//!
//! [`SyncEngine`] owns the store handle and the codec for its item type and
//! drives export, import, report and delete through the [`FileStore`]. Every
//! per-item failure comes back as a [`SyncAction`] or [`SyncAttempt`]; only
//! fatal conditions (see [`SyncError::is_fatal`]) abort a bulk walk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use canopy_core::{
    ChangeType, Entity, EntityId, EntityKey, EntityStore, FailureKind, SyncAction, SyncAttempt,
    SyncSettings,
};

use crate::codec::{Codec, SerializedNode};
use crate::diff::unified_diff;
use crate::error::SyncError;
use crate::file_store::{FileStore, WriteResult};
use crate::path::{safe_name, PathResolver};
use crate::tracker::{ChangeTracker, TrackedKind};

/// Cooperative cancellation flag, checked once per walk or import iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SyncEngine<S: EntityStore, C: Codec> {
    store: S,
    codec: C,
    files: FileStore,
    tracker: ChangeTracker,
    resolver: PathResolver,
    category: String,
    cancel: CancelToken,
}

impl<S: EntityStore, C: Codec> SyncEngine<S, C> {
    /// Build an engine rooted at `root`.
    ///
    /// The category folder is the handler folder configured for the codec's
    /// item type, or the safe name of the type itself.
    pub fn new(
        store: S,
        codec: C,
        root: impl Into<PathBuf>,
        settings: &SyncSettings,
    ) -> Result<Self, SyncError> {
        settings.validate()?;
        let root = root.into();
        let category = settings
            .folder_for(codec.item_type())
            .map(str::to_string)
            .unwrap_or_else(|| safe_name(&codec.item_type().0));
        let tracker = ChangeTracker::load_at(&root)?;

        Ok(Self {
            store,
            codec,
            files: FileStore::new(root, settings),
            tracker,
            resolver: PathResolver::new(settings.max_depth),
            category,
            cancel: CancelToken::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn root(&self) -> &Path {
        self.files.root()
    }

    /// Handle that cancels walks on this engine from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Canonical file path for `entity`.
    pub fn file_path_for(&self, entity: &Entity) -> Result<PathBuf, SyncError> {
        let entity_path = self.resolver.resolve(entity, &self.store)?;
        self.files
            .save_path(&self.category, &entity_path, &safe_name(&entity.name))
    }

    fn failed(&self, name: impl Into<String>, err: &SyncError) -> SyncAction {
        tracing::warn!(item_type = %self.codec.item_type(), error = %err, "sync action failed");
        SyncAction::fail(name, self.codec.item_type().clone(), err.kind(), err.to_string())
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Export every entity of this item type.
    pub fn export_all(&mut self) -> Result<Vec<SyncAction>, SyncError> {
        self.export_from(None)
    }

    /// Pre-order export of the subtree under `root` (the whole tree for
    /// `None`, the entity and its descendants otherwise), followed by an
    /// orphan sweep for every exported key.
    pub fn export_from(&mut self, root: Option<EntityId>) -> Result<Vec<SyncAction>, SyncError> {
        let item_type = self.codec.item_type().clone();
        let max = self.resolver.max_depth();

        let mut stack: Vec<(Entity, usize)> = Vec::new();
        match root {
            None => {
                let top = self.store.children(None, &item_type)?;
                stack.extend(top.into_iter().rev().map(|e| (e, 1)));
            }
            Some(id) => match self.store.get_by_id(id)? {
                Some(entity) => stack.push((entity, 1)),
                None => {
                    tracing::warn!(id = %id, "export root not in store; nothing to export");
                }
            },
        }

        let mut actions = Vec::new();
        let mut canonical = HashMap::new();
        while let Some((entity, depth)) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled {
                    completed: actions.len(),
                });
            }
            if depth > max {
                return Err(SyncError::DepthExceeded {
                    key: entity.key,
                    max,
                });
            }

            match self.export_entity(&entity) {
                Ok((action, path)) => {
                    canonical.insert(entity.key, path);
                    actions.push(action);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => actions.push(self.failed(&entity.name, &err).with_key(entity.key)),
            }

            let children = self.store.children(Some(entity.id), &item_type)?;
            stack.extend(children.into_iter().rev().map(|e| (e, depth + 1)));
        }

        self.files.sweep_orphans(&self.category, &canonical)?;
        tracing::info!(category = %self.category, exported = actions.len(), "export finished");
        Ok(actions)
    }

    /// Serialize and write a single entity. Never fails; errors become a
    /// failed action.
    pub fn export_one(&mut self, entity: &Entity) -> SyncAction {
        match self.export_entity(entity) {
            Ok((action, _)) => action,
            Err(err) => self.failed(&entity.name, &err).with_key(entity.key),
        }
    }

    fn export_entity(&self, entity: &Entity) -> Result<(SyncAction, PathBuf), SyncError> {
        let node = self.codec.serialize(entity, &self.store)?;
        let path = self.file_path_for(entity)?;
        let existed = path.exists();
        let change = match self.files.save_node(&node, &path)? {
            WriteResult::Unchanged { .. } => ChangeType::NoChange,
            WriteResult::Written { .. } if existed => ChangeType::Update,
            WriteResult::Written { .. } => ChangeType::Create,
        };
        let action = SyncAction::ok(&entity.name, entity.item_type.clone(), change)
            .with_key(entity.key)
            .with_file(&path);
        Ok((action, path))
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Apply one node file to the store.
    pub fn import_file(&mut self, path: &Path, force: bool) -> SyncAttempt {
        self.import_path(path, force, false)
    }

    fn import_path(&mut self, path: &Path, force: bool, second_pass: bool) -> SyncAttempt {
        let node = match self.files.load_node(path) {
            Ok(node) => node,
            Err(err) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::warn!(path = %path.display(), error = %err, "import failed");
                return SyncAttempt::fail(name, self.codec.item_type().clone(), err.kind(), err.to_string())
                    .with_file(path);
            }
        };
        self.import_node(&node, path, force, second_pass)
    }

    fn import_node(
        &mut self,
        node: &SerializedNode,
        path: &Path,
        force: bool,
        second_pass: bool,
    ) -> SyncAttempt {
        let attempt = self
            .codec
            .deserialize(node, &mut self.store, force, second_pass)
            .with_file(path);

        let applied = matches!(attempt.change, ChangeType::Create | ChangeType::Update)
            && attempt.entity.is_some()
            && attempt.failure != Some(FailureKind::ConflictNotForced);
        if applied {
            tracing::info!(key = %node.key, name = %node.name, change = %attempt.change, second_pass, "imported");
            if let Err(err) = self.tracker.remove_actions(&node.key) {
                tracing::warn!(key = %node.key, error = %err, "could not clear tracked actions");
            }
        } else if !attempt.success {
            tracing::debug!(key = %node.key, message = ?attempt.message, "import not applied");
        }
        attempt
    }

    /// Second pass over the successful first-pass actions of this item type.
    ///
    /// Binds references whose targets now exist. Running it again on the same
    /// input reports `NoChange` for every item.
    pub fn process_post_import(&mut self, actions: &[SyncAction]) -> Vec<SyncAction> {
        let item_type = self.codec.item_type().clone();
        let files: Vec<PathBuf> = actions
            .iter()
            .filter(|a| a.success && a.item_type == item_type)
            .filter_map(|a| a.file_path.clone())
            .collect();

        files
            .iter()
            .map(|path| self.import_path(path, false, true).into_action())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Report
    // -----------------------------------------------------------------------

    /// What importing `path` would change. Read-only.
    pub fn report(&self, path: &Path) -> SyncAction {
        match self.try_report(path) {
            Ok(action) => action,
            Err(err) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.failed(name, &err).with_file(path)
            }
        }
    }

    fn try_report(&self, path: &Path) -> Result<SyncAction, SyncError> {
        let node = self.files.load_node(path)?;
        let change = self.codec.is_update(&node, &self.store)?;
        let mut action = SyncAction::ok(&node.name, node.item_type.clone(), change)
            .with_key(node.key)
            .with_file(path);

        if change > ChangeType::NoChange {
            action.details = self.codec.get_changes(&node, &self.store)?;
            let current = match self.store.get_by_key(&node.key)? {
                Some(entity) => self.codec.serialize(&entity, &self.store)?.to_yaml()?,
                None => String::new(),
            };
            let relative = path.strip_prefix(self.files.root()).unwrap_or(path);
            action.diff = unified_diff(relative, &current, &node.to_yaml()?);
        }
        Ok(action)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete the entity with `key` from the store and retire its files.
    pub fn delete_item(&mut self, key: &EntityKey) -> SyncAction {
        let entity = match self.store.get_by_key(key) {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                let err = SyncError::EntityNotFound { key: *key };
                return self.failed(key.to_string(), &err).with_key(*key);
            }
            Err(err) => return self.failed(key.to_string(), &err.into()).with_key(*key),
        };
        if let Err(err) = self.store.delete(key) {
            return self.failed(&entity.name, &err.into()).with_key(*key);
        }
        tracing::info!(key = %key, name = %entity.name, "deleted from store");
        self.retire(&entity)
    }

    /// Archive the files of an entity already gone from the store, record
    /// the delete, and prune containers left empty.
    pub fn retire(&mut self, entity: &Entity) -> SyncAction {
        match self.try_retire(entity) {
            Ok(path) => SyncAction::ok(&entity.name, entity.item_type.clone(), ChangeType::Delete)
                .with_key(entity.key)
                .with_file(path),
            Err(err) => self.failed(&entity.name, &err).with_key(entity.key),
        }
    }

    fn try_retire(&mut self, entity: &Entity) -> Result<PathBuf, SyncError> {
        if entity.item_type != *self.codec.item_type() {
            return Err(SyncError::Validation {
                name: entity.name.clone(),
                reason: format!(
                    "type '{}' does not match handler type '{}'",
                    entity.item_type,
                    self.codec.item_type()
                ),
            });
        }

        let entity_path = self.resolver.resolve(entity, &self.store)?;
        let file = self
            .files
            .save_path(&self.category, &entity_path, &safe_name(&entity.name))?;
        let store = &self.store;
        self.files.archive_relative_file(&self.category, &entity_path, &|k| {
            key_is_live(store, k)
        })?;
        // Stray copies of the same key elsewhere in the tree.
        self.files
            .manage_orphan_files(&self.category, &entity.key, &file)?;

        self.tracker.add_action(TrackedKind::Delete, entity)?;
        self.clean_empty_containers(None)?;
        tracing::info!(key = %entity.key, path = %file.display(), "retired");
        Ok(file)
    }

    /// Prune container folders under `root` that the store says are empty,
    /// deepest first, then remove file-less directories from disk.
    ///
    /// Files of live entities are never moved, even when a same-named
    /// sibling shares the folder. Returns archive targets and removed folders.
    pub fn clean_empty_containers(
        &mut self,
        root: Option<EntityId>,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let item_type = self.codec.item_type().clone();
        let max = self.resolver.max_depth();

        let containers = |store: &S, parent: Option<EntityId>| -> Result<Vec<Entity>, SyncError> {
            Ok(store
                .children(parent, &item_type)?
                .into_iter()
                .filter(Entity::is_container)
                .collect())
        };

        // (container, depth, children already pushed)
        let mut stack: Vec<(Entity, usize, bool)> = containers(&self.store, root)?
            .into_iter()
            .rev()
            .map(|c| (c, 1, false))
            .collect();

        let mut pruned = Vec::new();
        while let Some((container, depth, expanded)) = stack.pop() {
            if depth > max {
                return Err(SyncError::DepthExceeded {
                    key: container.key,
                    max,
                });
            }
            if !expanded {
                let nested = containers(&self.store, Some(container.id))?;
                stack.push((container, depth, true));
                stack.extend(nested.into_iter().rev().map(|c| (c, depth + 1, false)));
                continue;
            }

            if !self.store.has_children(container.id)? {
                let folder = self.resolver.resolve(&container, &self.store)?;
                let store = &self.store;
                let done = self
                    .files
                    .prune_folder(&self.category, &folder, &|k| key_is_live(store, k))?;
                if !done.is_empty() {
                    tracing::info!(container = %container.name, count = done.len(), "pruned empty container");
                }
                pruned.extend(done);
            }
        }

        pruned.extend(self.files.prune_empty_dirs(&self.category)?);
        Ok(pruned)
    }

    /// Archive files for `key` at any path other than `current`; records a
    /// rename when something moved.
    pub fn manage_orphans(
        &mut self,
        key: &EntityKey,
        current: &Path,
    ) -> Result<Vec<PathBuf>, SyncError> {
        let archived = self
            .files
            .manage_orphan_files(&self.category, key, current)?;
        if !archived.is_empty() {
            if let Some(entity) = self.store.get_by_key(key)? {
                self.tracker.add_action(TrackedKind::Rename, &entity)?;
            }
        }
        Ok(archived)
    }
}

/// Whether `key` still names a store entity. Lookup errors count as live so
/// that nothing is archived on a guess.
fn key_is_live<S: EntityStore>(store: &S, key: &EntityKey) -> bool {
    !matches!(store.get_by_key(key), Ok(None))
}
