//! Error types for canopy-sync.

use std::path::PathBuf;

use thiserror::Error;

use canopy_core::{EntityKey, FailureKind, SettingsError, StoreError};

use crate::codec::UPDATE_SKIPPED;

/// All errors that can arise from sync operations.
///
/// Per-item errors are folded into `SyncAction`s by the engine; only
/// [`SyncError::is_fatal`] errors abort a bulk run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A serialized file does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// No entity with this key exists in the store.
    #[error("entity {key} not found")]
    EntityNotFound { key: EntityKey },

    /// A serialized file is not a valid YAML node.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A node parsed but its content cannot be applied.
    #[error("invalid node '{name}': {reason}")]
    Validation { name: String, reason: String },

    /// The stored entity differs and the import was not forced.
    ///
    /// Displays as [`UPDATE_SKIPPED`], the message hosts match on.
    #[error("{}", UPDATE_SKIPPED)]
    ConflictNotForced { name: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// References still missing after the second import pass.
    #[error("'{name}' references missing entities: {}", join_keys(.keys))]
    DependencyUnresolved { name: String, keys: Vec<EntityKey> },

    /// Ancestor chain or hierarchy walk deeper than the configured bound.
    #[error("hierarchy under {key} is deeper than {max} levels")]
    DepthExceeded { key: EntityKey, max: usize },

    /// A computed destination escapes the sync root.
    #[error("path {path} resolves outside the sync root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// An error from the store collaborator.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error from the settings document.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// YAML serialization error while rendering a node.
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error in the change tracker file.
    #[error("change tracker JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled between items.
    #[error("cancelled after {completed} item(s)")]
    Cancelled { completed: usize },
}

impl SyncError {
    /// Taxonomy bucket reported on a failed `SyncAction`.
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::FileNotFound { .. } | SyncError::EntityNotFound { .. } => {
                FailureKind::NotFound
            }
            SyncError::Parse { .. } | SyncError::Validation { .. } | SyncError::Yaml(_) => {
                FailureKind::Validation
            }
            SyncError::ConflictNotForced { .. } => FailureKind::ConflictNotForced,
            SyncError::Io { .. } | SyncError::Json(_) => FailureKind::Io,
            SyncError::DependencyUnresolved { .. } => FailureKind::DependencyUnresolved,
            SyncError::DepthExceeded { .. }
            | SyncError::OutsideRoot { .. }
            | SyncError::Settings(_) => FailureKind::Configuration,
            SyncError::Store(_) => FailureKind::Store,
            SyncError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Whether this error invalidates a whole bulk run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::DepthExceeded { .. }
                | SyncError::OutsideRoot { .. }
                | SyncError::Settings(_)
                | SyncError::Cancelled { .. }
        )
    }
}

fn join_keys(keys: &[EntityKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_and_root_errors_are_fatal_configuration() {
        let depth = SyncError::DepthExceeded {
            key: EntityKey::new(),
            max: 100,
        };
        assert!(depth.is_fatal());
        assert_eq!(depth.kind(), FailureKind::Configuration);

        let outside = SyncError::OutsideRoot {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/srv/sync"),
        };
        assert!(outside.is_fatal());
    }

    #[test]
    fn per_item_errors_are_not_fatal() {
        let missing = SyncError::FileNotFound {
            path: PathBuf::from("DataTypes/Foo.config"),
        };
        assert!(!missing.is_fatal());
        assert_eq!(missing.kind(), FailureKind::NotFound);

        let conflict = SyncError::ConflictNotForced { name: "Foo".into() };
        assert_eq!(conflict.kind(), FailureKind::ConflictNotForced);
        assert_eq!(conflict.to_string(), UPDATE_SKIPPED);
    }

    #[test]
    fn unresolved_message_lists_keys() {
        let key = EntityKey::new();
        let err = SyncError::DependencyUnresolved {
            name: "Theme".into(),
            keys: vec![key],
        };
        assert!(err.to_string().contains(&key.to_string()));
    }
}
