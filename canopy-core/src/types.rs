//! Domain types for Canopy.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable via serde so the CLI can persist the store and
//! emit JSON reports.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Globally unique, machine-independent identity of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub Uuid);

impl EntityKey {
    /// A fresh random key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for EntityKey {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

impl FromStr for EntityKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Store-local numeric identity. `EntityId(0)` means "not yet assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag shared by an item type and the containers that group it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemType(pub String);

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ItemType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether an entity groups other entities or is a leaf record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Container,
    #[default]
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Container => write!(f, "container"),
            EntityKind::Item => write!(f, "item"),
        }
    }
}

/// Value of a reference field held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "target", rename_all = "lowercase")]
pub enum Link {
    /// Bound to an entity present in the store.
    Resolved(EntityId),
    /// Target key not yet present; bound later by a second import pass.
    Pending(EntityKey),
}

/// Classification of what an operation did (or would do) to an entity.
///
/// Ordered so that `change > ChangeType::NoChange` means "something changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NoChange,
    Create,
    Update,
    Delete,
    Fail,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::NoChange => write!(f, "no change"),
            ChangeType::Create => write!(f, "create"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::Delete => write!(f, "delete"),
            ChangeType::Fail => write!(f, "fail"),
        }
    }
}

/// Why a sync operation failed for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Validation,
    ConflictNotForced,
    Io,
    DependencyUnresolved,
    Configuration,
    Store,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::NotFound => "not found",
            FailureKind::Validation => "validation failure",
            FailureKind::ConflictNotForced => "conflict (not forced)",
            FailureKind::Io => "I/O failure",
            FailureKind::DependencyUnresolved => "dependency unresolved",
            FailureKind::Configuration => "configuration error",
            FailureKind::Store => "store error",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A record held by the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub key: EntityKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    pub item_type: ItemType,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub references: BTreeMap<String, Link>,
}

impl Entity {
    fn new(name: impl Into<String>, item_type: impl Into<ItemType>, kind: EntityKind) -> Self {
        Self {
            id: EntityId(0),
            key: EntityKey::new(),
            parent: None,
            name: name.into(),
            kind,
            item_type: item_type.into(),
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// A new, unsaved leaf record with a random key.
    pub fn item(name: impl Into<String>, item_type: impl Into<ItemType>) -> Self {
        Self::new(name, item_type, EntityKind::Item)
    }

    /// A new, unsaved container with a random key.
    pub fn container(name: impl Into<String>, item_type: impl Into<ItemType>) -> Self {
        Self::new(name, item_type, EntityKind::Container)
    }

    pub fn with_key(mut self, key: EntityKey) -> Self {
        self.key = key;
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, link: Link) -> Self {
        self.references.insert(name.into(), link);
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind == EntityKind::Container
    }

    /// Keys of reference targets that have not been bound yet.
    pub fn pending_references(&self) -> Vec<EntityKey> {
        self.references
            .values()
            .filter_map(|link| match link {
                Link::Pending(key) => Some(*key),
                Link::Resolved(_) => None,
            })
            .collect()
    }
}

/// One field-level difference between a serialized node and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old: Option<String>, new: Option<String>) -> Self {
        Self {
            field: field.into(),
            old,
            new,
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self.old.as_deref().unwrap_or("(none)");
        let new = self.new.as_deref().unwrap_or("(none)");
        write!(f, "{}: {old} -> {new}", self.field)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Structured outcome of an export / import / delete / report operation.
///
/// Never persisted; returned to callers and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    pub success: bool,
    pub item_type: ItemType,
    pub change: ChangeType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl SyncAction {
    /// A successful action.
    pub fn ok(name: impl Into<String>, item_type: ItemType, change: ChangeType) -> Self {
        Self {
            success: true,
            item_type,
            change,
            name: name.into(),
            key: None,
            file_path: None,
            message: None,
            failure: None,
            details: Vec::new(),
            diff: None,
        }
    }

    /// A failed action. `change` is always [`ChangeType::Fail`].
    pub fn fail(
        name: impl Into<String>,
        item_type: ItemType,
        failure: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            change: ChangeType::Fail,
            failure: Some(failure),
            message: Some(message.into()),
            ..Self::ok(name, item_type, ChangeType::Fail)
        }
    }

    pub fn with_key(mut self, key: EntityKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outcome of applying a serialized node to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAttempt {
    pub success: bool,
    pub change: ChangeType,
    pub name: String,
    pub item_type: ItemType,
    pub entity: Option<Entity>,
    pub file_path: Option<PathBuf>,
    pub message: Option<String>,
    pub failure: Option<FailureKind>,
    /// Reference targets still missing after the apply.
    pub unresolved: Vec<EntityKey>,
}

impl SyncAttempt {
    pub fn succeed(
        name: impl Into<String>,
        item_type: ItemType,
        change: ChangeType,
        entity: Option<Entity>,
    ) -> Self {
        Self {
            success: true,
            change,
            name: name.into(),
            item_type,
            entity,
            file_path: None,
            message: None,
            failure: None,
            unresolved: Vec::new(),
        }
    }

    pub fn fail(
        name: impl Into<String>,
        item_type: ItemType,
        failure: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            change: ChangeType::Fail,
            name: name.into(),
            item_type,
            entity: None,
            file_path: None,
            message: Some(message.into()),
            failure: Some(failure),
            unresolved: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn into_action(self) -> SyncAction {
        SyncAction {
            success: self.success,
            item_type: self.item_type,
            change: self.change,
            name: self.name,
            key: self.entity.as_ref().map(|e| e.key),
            file_path: self.file_path,
            message: self.message,
            failure: self.failure,
            details: Vec::new(),
            diff: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ItemType::from("data-type").to_string(), "data-type");
        assert_eq!(EntityId(7).to_string(), "7");
        let key: EntityKey = "6F1C2A8E-0000-4000-8000-000000000001".parse().unwrap();
        assert_eq!(key.to_string(), "6f1c2a8e-0000-4000-8000-000000000001");
    }

    #[test]
    fn change_type_ordering_puts_no_change_first() {
        assert!(ChangeType::Create > ChangeType::NoChange);
        assert!(ChangeType::Update > ChangeType::NoChange);
        assert!(ChangeType::Fail > ChangeType::Delete);
    }

    #[test]
    fn failed_action_is_marked_fail() {
        let action = SyncAction::fail("Foo", "data-type".into(), FailureKind::NotFound, "missing");
        assert!(!action.success);
        assert_eq!(action.change, ChangeType::Fail);
        assert_eq!(action.failure, Some(FailureKind::NotFound));
        assert_eq!(action.message.as_deref(), Some("missing"));
    }

    #[test]
    fn entity_serde_roundtrip() {
        let target = EntityKey::new();
        let entity = Entity::item("Foo", "data-type")
            .with_field("editor", "textbox")
            .with_reference("source", Link::Pending(target))
            .with_reference("fallback", Link::Resolved(EntityId(3)));
        let yaml = serde_yaml::to_string(&entity).expect("serialize");
        let back: Entity = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(entity, back);
        assert_eq!(back.pending_references(), vec![target]);
    }

    #[test]
    fn attempt_into_action_carries_key() {
        let entity = Entity::item("Foo", "data-type");
        let key = entity.key;
        let action = SyncAttempt::succeed("Foo", "data-type".into(), ChangeType::Create, Some(entity))
            .with_file("/tmp/Foo.config")
            .into_action();
        assert_eq!(action.key, Some(key));
        assert_eq!(action.change, ChangeType::Create);
        assert_eq!(action.file_path, Some(PathBuf::from("/tmp/Foo.config")));
    }
}
