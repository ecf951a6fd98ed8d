//! Change tracker: persisted deletes and renames.
//!
//! A delete on one machine only archives files there. The tracker records
//! it in `<root>/canopy-actions.json` so an import of the same tree on another
//! machine can replay it. Writes use the same atomic `.tmp` + rename pattern as
//! the rest of the crate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canopy_core::{ChangeType, Entity, EntityKey, ItemType, SyncAction};

use crate::error::{io_err, SyncError};

/// File name of the tracker document inside the sync root.
pub const TRACKER_FILE: &str = "canopy-actions.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedKind {
    Delete,
    Rename,
}

/// One recorded delete or rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAction {
    pub action: TrackedKind,
    pub key: EntityKey,
    pub name: String,
    pub item_type: ItemType,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(default)]
    actions: Vec<TrackedAction>,
}

#[derive(Debug)]
pub struct ChangeTracker {
    path: PathBuf,
    actions: Vec<TrackedAction>,
}

/// `<root>/canopy-actions.json`
pub fn tracker_path_at(root: &Path) -> PathBuf {
    root.join(TRACKER_FILE)
}

impl ChangeTracker {
    /// Load the tracker for `root`; empty when the file does not exist.
    pub fn load_at(root: &Path) -> Result<Self, SyncError> {
        let path = tracker_path_at(root);
        if !path.exists() {
            return Ok(Self {
                path,
                actions: Vec::new(),
            });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let file: TrackerFile = serde_json::from_str(&contents)?;
        Ok(Self {
            path,
            actions: file.actions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn actions(&self) -> &[TrackedAction] {
        &self.actions
    }

    /// Record `action` for `entity`, replacing an older record of the same
    /// kind for the same key.
    pub fn add_action(&mut self, action: TrackedKind, entity: &Entity) -> Result<(), SyncError> {
        self.actions
            .retain(|a| !(a.key == entity.key && a.action == action));
        self.actions.push(TrackedAction {
            action,
            key: entity.key,
            name: entity.name.clone(),
            item_type: entity.item_type.clone(),
            at: Utc::now(),
        });
        self.save()
    }

    /// Forget everything recorded for `key`. Returns how many records went.
    pub fn remove_actions(&mut self, key: &EntityKey) -> Result<usize, SyncError> {
        let before = self.actions.len();
        self.actions.retain(|a| a.key != *key);
        let removed = before - self.actions.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Deletes recorded for `item_type`, oldest first.
    pub fn pending_deletes(&self, item_type: &ItemType) -> Vec<&TrackedAction> {
        self.actions
            .iter()
            .filter(|a| a.action == TrackedKind::Delete && a.item_type == *item_type)
            .collect()
    }

    fn save(&self) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(&TrackerFile {
            actions: self.actions.clone(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Counts over the actions of a bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTally {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl SyncTally {
    pub fn from_actions(actions: &[SyncAction]) -> Self {
        let mut tally = Self::default();
        for action in actions {
            tally.total += 1;
            if !action.success {
                tally.failed += 1;
                continue;
            }
            match action.change {
                ChangeType::Create => tally.created += 1,
                ChangeType::Update => tally.updated += 1,
                ChangeType::Delete => tally.deleted += 1,
                ChangeType::NoChange => tally.unchanged += 1,
                ChangeType::Fail => tally.failed += 1,
            }
        }
        tally
    }

    /// Actions that changed something.
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}
