//! Error types for canopy-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityId, EntityKey};

/// Errors raised by an [`EntityStore`](crate::store::EntityStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure while loading or saving a persisted store.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path.
    #[error("failed to parse store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The entity's parent id does not exist in the store.
    #[error("parent {parent} of '{name}' does not exist")]
    ParentNotFound { name: String, parent: EntityId },

    /// Deleting a container that still has children.
    #[error("container {key} still has children")]
    HasChildren { key: EntityKey },

    /// Assigning a parent would make the entity its own ancestor.
    #[error("moving {key} under {parent} would create a cycle")]
    Cycle { key: EntityKey, parent: EntityId },
}

/// Errors raised while loading or validating [`SyncSettings`](crate::settings::SyncSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A setting holds a value the engine cannot work with.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn settings_io(path: impl Into<PathBuf>, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.into(),
        source,
    }
}
