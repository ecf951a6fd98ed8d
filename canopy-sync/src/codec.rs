//! Serialized node format and the per-item-type codec contract.
//!
//! A [`SerializedNode`] is the on-disk YAML form of one entity. Parent and
//! reference links are written as target keys, never store ids, so a file
//! tree exported on one machine can be applied to another store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use canopy_core::{
    ChangeType, Entity, EntityId, EntityKey, EntityKind, EntityStore, FieldChange, ItemType, Link,
    SyncAttempt,
};

use crate::error::SyncError;

/// Message carried by an import that found a divergent entity without `force`.
pub const UPDATE_SKIPPED: &str = "update available, skipped";

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// On-disk representation of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub key: EntityKey,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityKey>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, EntityKey>,
}

impl SerializedNode {
    pub fn to_yaml(&self) -> Result<String, SyncError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a node read from `path`; the path only annotates the error.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, SyncError> {
        serde_yaml::from_str(text).map_err(|e| SyncError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Converts entities of one item type to and from [`SerializedNode`]s.
pub trait Codec {
    /// The item type this codec handles; containers share it.
    fn item_type(&self) -> &ItemType;

    /// Render `entity` as a node. Pure: the store is only read to turn ids
    /// into keys.
    fn serialize(&self, entity: &Entity, store: &dyn EntityStore)
        -> Result<SerializedNode, SyncError>;

    /// Apply `node` to the store.
    ///
    /// A divergent existing entity is only overwritten when `force` or
    /// `second_pass` is set. Never returns an error; failures are carried in
    /// the attempt.
    fn deserialize(
        &self,
        node: &SerializedNode,
        store: &mut dyn EntityStore,
        force: bool,
        second_pass: bool,
    ) -> SyncAttempt;

    /// What a forced import of `node` would do. Read-only.
    fn is_update(
        &self,
        node: &SerializedNode,
        store: &dyn EntityStore,
    ) -> Result<ChangeType, SyncError>;

    /// Field-level differences behind [`Codec::is_update`]; empty on `NoChange`.
    fn get_changes(
        &self,
        node: &SerializedNode,
        store: &dyn EntityStore,
    ) -> Result<Vec<FieldChange>, SyncError>;
}

// ---------------------------------------------------------------------------
// RecordCodec
// ---------------------------------------------------------------------------

/// Codec for generic records: name, kind, string fields and reference links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCodec {
    item_type: ItemType,
}

/// Entity as it would be stored after applying a node.
struct Projection {
    candidate: Entity,
    existing: Option<Entity>,
    unresolved: Vec<EntityKey>,
}

impl Projection {
    fn change(&self) -> ChangeType {
        match &self.existing {
            None => ChangeType::Create,
            Some(existing) if *existing == self.candidate => ChangeType::NoChange,
            Some(_) => ChangeType::Update,
        }
    }
}

impl RecordCodec {
    pub fn new(item_type: impl Into<ItemType>) -> Self {
        Self {
            item_type: item_type.into(),
        }
    }

    fn validate(&self, node: &SerializedNode, store: &dyn EntityStore) -> Result<(), SyncError> {
        let invalid = |reason: String| SyncError::Validation {
            name: node.name.clone(),
            reason,
        };

        if node.item_type != self.item_type {
            return Err(invalid(format!(
                "type '{}' does not match handler type '{}'",
                node.item_type, self.item_type
            )));
        }
        if node.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if node.parent == Some(node.key) {
            return Err(invalid("entity is its own parent".to_string()));
        }
        if node.kind == EntityKind::Item {
            if let Some(existing) = store.get_by_key(&node.key)? {
                if existing.is_container() && store.has_children(existing.id)? {
                    return Err(invalid(
                        "container with children cannot become an item".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn project(
        &self,
        node: &SerializedNode,
        store: &dyn EntityStore,
    ) -> Result<Projection, SyncError> {
        let existing = store.get_by_key(&node.key)?;
        let mut unresolved = Vec::new();

        let parent = match node.parent {
            None => None,
            Some(parent_key) => match store.get_by_key(&parent_key)? {
                Some(parent) => Some(parent.id),
                None => {
                    unresolved.push(parent_key);
                    None
                }
            },
        };

        let mut references = BTreeMap::new();
        for (field, target) in &node.references {
            let link = match store.get_by_key(target)? {
                Some(found) => Link::Resolved(found.id),
                None => {
                    unresolved.push(*target);
                    Link::Pending(*target)
                }
            };
            references.insert(field.clone(), link);
        }

        let candidate = Entity {
            id: existing.as_ref().map_or(EntityId(0), |e| e.id),
            key: node.key,
            parent,
            name: node.name.clone(),
            kind: node.kind,
            item_type: node.item_type.clone(),
            fields: node.fields.clone(),
            references,
        };

        Ok(Projection {
            candidate,
            existing,
            unresolved,
        })
    }
}

impl Codec for RecordCodec {
    fn item_type(&self) -> &ItemType {
        &self.item_type
    }

    fn serialize(
        &self,
        entity: &Entity,
        store: &dyn EntityStore,
    ) -> Result<SerializedNode, SyncError> {
        if entity.item_type != self.item_type {
            return Err(SyncError::Validation {
                name: entity.name.clone(),
                reason: format!(
                    "type '{}' does not match handler type '{}'",
                    entity.item_type, self.item_type
                ),
            });
        }

        let parent = match entity.parent {
            None => None,
            Some(id) => {
                let found = store.get_by_id(id)?.map(|p| p.key);
                if found.is_none() {
                    tracing::warn!(entity = %entity.key, parent = %id, "parent missing; writing as root");
                }
                found
            }
        };

        let mut references = BTreeMap::new();
        for (field, link) in &entity.references {
            match link {
                Link::Pending(key) => {
                    references.insert(field.clone(), *key);
                }
                Link::Resolved(id) => match store.get_by_id(*id)? {
                    Some(target) => {
                        references.insert(field.clone(), target.key);
                    }
                    None => {
                        tracing::warn!(
                            entity = %entity.key,
                            field = %field,
                            target = %id,
                            "reference target missing; dropped from node",
                        );
                    }
                },
            }
        }

        Ok(SerializedNode {
            key: entity.key,
            name: entity.name.clone(),
            item_type: entity.item_type.clone(),
            kind: entity.kind,
            parent,
            fields: entity.fields.clone(),
            references,
        })
    }

    fn deserialize(
        &self,
        node: &SerializedNode,
        store: &mut dyn EntityStore,
        force: bool,
        second_pass: bool,
    ) -> SyncAttempt {
        let name = node.name.clone();
        let item_type = node.item_type.clone();
        let fail = |err: SyncError| {
            SyncAttempt::fail(&name, item_type.clone(), err.kind(), err.to_string())
        };

        if let Err(err) = self.validate(node, store) {
            return fail(err);
        }
        let projection = match self.project(node, store) {
            Ok(p) => p,
            Err(err) => return fail(err),
        };

        let change = projection.change();
        let Projection {
            candidate,
            existing,
            unresolved,
        } = projection;

        let entity = match change {
            ChangeType::NoChange => existing,
            ChangeType::Update if !force && !second_pass => {
                tracing::debug!(key = %node.key, name = %node.name, "divergent entity, import not forced");
                let mut attempt = fail(SyncError::ConflictNotForced { name: name.clone() });
                attempt.change = ChangeType::Update;
                attempt.entity = existing;
                return attempt;
            }
            _ => match store.save(candidate) {
                Ok(saved) => Some(saved),
                Err(err) => return fail(err.into()),
            },
        };

        let mut attempt = SyncAttempt::succeed(&name, item_type, change, entity);
        if second_pass && !unresolved.is_empty() {
            let err = SyncError::DependencyUnresolved {
                name: name.clone(),
                keys: unresolved.clone(),
            };
            attempt.success = false;
            attempt.failure = Some(err.kind());
            attempt.message = Some(err.to_string());
        }
        attempt.unresolved = unresolved;
        attempt
    }

    fn is_update(
        &self,
        node: &SerializedNode,
        store: &dyn EntityStore,
    ) -> Result<ChangeType, SyncError> {
        self.validate(node, store)?;
        Ok(self.project(node, store)?.change())
    }

    fn get_changes(
        &self,
        node: &SerializedNode,
        store: &dyn EntityStore,
    ) -> Result<Vec<FieldChange>, SyncError> {
        self.validate(node, store)?;
        let projection = self.project(node, store)?;
        if projection.change() == ChangeType::NoChange {
            return Ok(Vec::new());
        }

        let new = &projection.candidate;
        let old = projection.existing.as_ref();
        let mut changes = Vec::new();

        let old_name = old.map(|e| e.name.clone());
        if old_name.as_deref() != Some(new.name.as_str()) {
            changes.push(FieldChange::new("name", old_name, Some(new.name.clone())));
        }

        let old_parent = match old {
            Some(e) => describe_parent(e.parent, store)?,
            None => None,
        };
        let new_parent = match (new.parent, node.parent) {
            (None, Some(pending)) => Some(format!("{pending} (pending)")),
            (parent, _) => describe_parent(parent, store)?,
        };
        if old_parent != new_parent {
            changes.push(FieldChange::new("parent", old_parent, new_parent));
        }

        if old.map(|e| e.kind) != Some(new.kind) {
            changes.push(FieldChange::new(
                "kind",
                old.map(|e| e.kind.to_string()),
                Some(new.kind.to_string()),
            ));
        }

        let empty_fields = BTreeMap::new();
        let old_fields = old.map_or(&empty_fields, |e| &e.fields);
        let names: BTreeSet<&String> = old_fields.keys().chain(new.fields.keys()).collect();
        for field in names {
            let before = old_fields.get(field);
            let after = new.fields.get(field);
            if before != after {
                changes.push(FieldChange::new(
                    format!("fields.{field}"),
                    before.cloned(),
                    after.cloned(),
                ));
            }
        }

        let empty_refs = BTreeMap::new();
        let old_refs = old.map_or(&empty_refs, |e| &e.references);
        let names: BTreeSet<&String> = old_refs.keys().chain(new.references.keys()).collect();
        for field in names {
            let before = old_refs.get(field);
            let after = new.references.get(field);
            if before != after {
                changes.push(FieldChange::new(
                    format!("references.{field}"),
                    before.map(|l| describe_link(l, store)).transpose()?,
                    after.map(|l| describe_link(l, store)).transpose()?,
                ));
            }
        }

        Ok(changes)
    }
}

fn describe_parent(
    parent: Option<EntityId>,
    store: &dyn EntityStore,
) -> Result<Option<String>, SyncError> {
    match parent {
        None => Ok(None),
        Some(id) => Ok(Some(describe_link(&Link::Resolved(id), store)?)),
    }
}

fn describe_link(link: &Link, store: &dyn EntityStore) -> Result<String, SyncError> {
    Ok(match link {
        Link::Pending(key) => format!("{key} (pending)"),
        Link::Resolved(id) => match store.get_by_id(*id)? {
            Some(target) => target.key.to_string(),
            None => format!("#{id}"),
        },
    })
}
