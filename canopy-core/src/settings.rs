//! Sync settings, stored as `<sync root>/canopy.yaml`.
//!
//! # API pattern
//!
//! Every function takes the sync root explicitly (`load_at(root)`,
//! `save_at(root, …)`) so tests can point them at a `TempDir`. A missing file yields [`SyncSettings::default`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{settings_io, SettingsError};
use crate::types::ItemType;

/// File name of the settings document inside the sync root.
pub const SETTINGS_FILE: &str = "canopy.yaml";

/// Default depth bound for ancestor chains and hierarchy walks.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Per item type: which category folder its files live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSettings {
    pub item_type: ItemType,
    pub folder: String,
}

/// Root settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub version: u32,
    /// File extension for serialized entities, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Folder (under the sync root) that receives archived files.
    #[serde(default = "default_archive_folder")]
    pub archive_folder: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Whether store saves are exported immediately through the event bridge.
    #[serde(default = "default_export_on_save")]
    pub export_on_save: bool,
    #[serde(default)]
    pub handlers: Vec<HandlerSettings>,
}

fn default_extension() -> String {
    "config".to_string()
}

fn default_archive_folder() -> String {
    ".archive".to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_export_on_save() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            version: 1,
            extension: default_extension(),
            archive_folder: default_archive_folder(),
            max_depth: DEFAULT_MAX_DEPTH,
            export_on_save: true,
            handlers: vec![HandlerSettings {
                item_type: ItemType::from("data-type"),
                folder: "DataTypes".to_string(),
            }],
        }
    }
}

impl SyncSettings {
    /// Configured category folder for `item_type`, if any.
    pub fn folder_for(&self, item_type: &ItemType) -> Option<&str> {
        self.handlers
            .iter()
            .find(|h| h.item_type == *item_type)
            .map(|h| h.folder.as_str())
    }

    /// Check every value the engine relies on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.extension.is_empty()
            || self.extension.contains('.')
            || self.extension.contains('/')
            || self.extension.contains('\\')
        {
            return Err(SettingsError::Invalid {
                field: "extension",
                reason: format!("'{}' must be a bare, non-empty extension", self.extension),
            });
        }
        if self.max_depth == 0 {
            return Err(SettingsError::Invalid {
                field: "max_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !is_single_component(&self.archive_folder) {
            return Err(SettingsError::Invalid {
                field: "archive_folder",
                reason: format!("'{}' must be a single folder name", self.archive_folder),
            });
        }

        let mut seen = HashSet::new();
        for handler in &self.handlers {
            if !is_single_component(&handler.folder) {
                return Err(SettingsError::Invalid {
                    field: "handlers.folder",
                    reason: format!("'{}' must be a single folder name", handler.folder),
                });
            }
            if handler.folder == self.archive_folder {
                return Err(SettingsError::Invalid {
                    field: "handlers.folder",
                    reason: format!("'{}' collides with the archive folder", handler.folder),
                });
            }
            if !seen.insert(handler.folder.as_str()) {
                return Err(SettingsError::Invalid {
                    field: "handlers.folder",
                    reason: format!("'{}' is used by more than one handler", handler.folder),
                });
            }
        }
        Ok(())
    }
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// `<root>/canopy.yaml`. Pure, no I/O.
pub fn settings_path_at(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

/// Load and validate settings; defaults when the file is absent.
pub fn load_at(root: &Path) -> Result<SyncSettings, SettingsError> {
    let path = settings_path_at(root);
    if !path.exists() {
        return Ok(SyncSettings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| settings_io(&path, e))?;
    let settings: SyncSettings =
        serde_yaml::from_str(&contents).map_err(|e| SettingsError::Parse { path, source: e })?;
    settings.validate()?;
    Ok(settings)
}

/// Validate, then atomically write settings to `<root>/canopy.yaml`.
pub fn save_at(root: &Path, settings: &SyncSettings) -> Result<(), SettingsError> {
    settings.validate()?;
    std::fs::create_dir_all(root).map_err(|e| settings_io(root, e))?;
    let path = settings_path_at(root);
    let tmp = root.join(format!("{SETTINGS_FILE}.tmp"));
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| settings_io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| settings_io(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_missing() {
        let tmp = TempDir::new().unwrap();
        let settings = load_at(tmp.path()).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.max_depth, 100);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            settings_path_at(tmp.path()),
            "version: 1\nhandlers:\n  - item_type: media-type\n    folder: MediaTypes\n",
        )
        .unwrap();
        let settings = load_at(tmp.path()).unwrap();
        assert_eq!(settings.extension, "config");
        assert_eq!(settings.archive_folder, ".archive");
        assert_eq!(
            settings.folder_for(&ItemType::from("media-type")),
            Some("MediaTypes")
        );
        assert_eq!(settings.folder_for(&ItemType::from("data-type")), None);
    }

    #[test]
    fn nested_folder_is_invalid() {
        let mut settings = SyncSettings::default();
        settings.handlers[0].folder = "a/b".into();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "handlers.folder", .. })
        ));
    }

    #[test]
    fn archive_collision_is_invalid() {
        let mut settings = SyncSettings::default();
        settings.handlers[0].folder = settings.archive_folder.clone();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_depth_is_invalid() {
        let settings = SyncSettings {
            max_depth: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let settings = SyncSettings {
            extension: "yaml".into(),
            ..SyncSettings::default()
        };
        save_at(tmp.path(), &settings).unwrap();
        assert!(!tmp.path().join("canopy.yaml.tmp").exists());
        assert_eq!(load_at(tmp.path()).unwrap(), settings);
    }
}
