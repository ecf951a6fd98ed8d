pub mod clean;
pub mod delete;
pub mod entity;
pub mod export;
pub mod import;
pub mod init;
pub mod report;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use canopy_core::{settings, store, ChangeType, ItemType, MemoryStore, SyncAction, SyncSettings};
use canopy_sync::{RecordCodec, SyncEngine, SyncTally};

/// Default store file name inside the sync root.
pub const STORE_FILE: &str = ".canopy-store.yaml";

pub type Engine = SyncEngine<MemoryStore, RecordCodec>;

/// Sync root, store location and item type shared by every command.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub store_path: PathBuf,
    pub item_type: ItemType,
    pub settings: SyncSettings,
}

impl Workspace {
    pub fn open(root: &Path, store: Option<&Path>, item_type: &str) -> Result<Self> {
        let settings = settings::load_at(root)
            .with_context(|| format!("failed to load settings under '{}'", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            store_path: store
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.join(STORE_FILE)),
            item_type: ItemType::from(item_type),
            settings,
        })
    }

    pub fn load_store(&self) -> Result<MemoryStore> {
        store::load_at(&self.store_path)
            .with_context(|| format!("failed to load store '{}'", self.store_path.display()))
    }

    pub fn save_store(&self, store: &MemoryStore) -> Result<()> {
        store::save_at(&self.store_path, store)
            .with_context(|| format!("failed to save store '{}'", self.store_path.display()))
    }

    /// Engine over the persisted store for this workspace's item type.
    pub fn engine(&self) -> Result<Engine> {
        let store = self.load_store()?;
        SyncEngine::new(
            store,
            RecordCodec::new(self.item_type.clone()),
            self.root.clone(),
            &self.settings,
        )
        .with_context(|| format!("failed to open sync root '{}'", self.root.display()))
    }
}

/// One line per action, path relative to `root` when possible.
pub fn print_actions(root: &Path, actions: &[SyncAction]) {
    for action in actions {
        let target = action
            .file_path
            .as_deref()
            .map(|p| p.strip_prefix(root).unwrap_or(p).display().to_string())
            .unwrap_or_else(|| action.name.clone());

        if !action.success {
            let message = action.message.as_deref().unwrap_or("failed");
            println!("  {}  {}: {}", "✗".red(), target, message);
            continue;
        }
        match action.change {
            ChangeType::Create | ChangeType::Update => {
                println!("  {}  {} ({})", "✎".green(), target, action.change)
            }
            ChangeType::Delete => println!("  {}  {}", "⌫".yellow(), target),
            ChangeType::NoChange | ChangeType::Fail => println!("  ·  {target}"),
        }
    }
}

pub fn print_tally(verb: &str, tally: &SyncTally) {
    let mark = if tally.failed > 0 {
        "!".yellow().bold().to_string()
    } else {
        "✓".green().bold().to_string()
    };
    println!(
        "{mark} {verb}: {} created, {} updated, {} deleted, {} unchanged, {} failed",
        tally.created, tally.updated, tally.deleted, tally.unchanged, tally.failed
    );
}
