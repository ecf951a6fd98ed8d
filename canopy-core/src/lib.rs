//! Canopy core library: entity model, store contract, settings, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, entities and sync outcome records
//! - [`store`]: the [`EntityStore`] contract and the YAML-backed [`MemoryStore`]
//! - [`settings`]: [`SyncSettings`] load / save / validate
//! - [`error`]: [`StoreError`], [`SettingsError`]

pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use error::{SettingsError, StoreError};
pub use settings::{HandlerSettings, SyncSettings};
pub use store::{EntityStore, MemoryStore};
pub use types::{
    ChangeType, Entity, EntityId, EntityKey, EntityKind, FailureKind, FieldChange, ItemType,
    Link, SyncAction, SyncAttempt,
};
