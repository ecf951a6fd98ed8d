//! `canopy init [--folder NAME] [--no-export-on-save]`

use anyhow::{Context, Result};
use clap::Args;

use canopy_core::{settings, HandlerSettings, MemoryStore};
use canopy_sync::safe_name;

use super::Workspace;

/// Write canopy.yaml (keeping any existing values) and an empty store.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Category folder for the item type. Defaults to the existing handler's
    /// folder, or a safe form of the type name.
    #[arg(long)]
    pub folder: Option<String>,

    /// Disable immediate export of entity edits.
    #[arg(long)]
    pub no_export_on_save: bool,
}

impl InitArgs {
    pub fn run(self, mut ws: Workspace) -> Result<()> {
        let item_type = ws.item_type.clone();
        match ws
            .settings
            .handlers
            .iter_mut()
            .find(|h| h.item_type == item_type)
        {
            Some(handler) => {
                if let Some(folder) = self.folder {
                    handler.folder = folder;
                }
            }
            None => ws.settings.handlers.push(HandlerSettings {
                folder: self.folder.unwrap_or_else(|| safe_name(&item_type.0)),
                item_type: item_type.clone(),
            }),
        }
        if self.no_export_on_save {
            ws.settings.export_on_save = false;
        }

        settings::save_at(&ws.root, &ws.settings)
            .with_context(|| format!("failed to write settings under '{}'", ws.root.display()))?;
        if !ws.store_path.exists() {
            ws.save_store(&MemoryStore::new())?;
        }

        let folder = ws
            .settings
            .folder_for(&item_type)
            .map(str::to_string)
            .unwrap_or_else(|| safe_name(&item_type.0));
        let category = ws.root.join(&folder);
        std::fs::create_dir_all(&category)
            .with_context(|| format!("failed to create '{}'", category.display()))?;

        println!("✓ Initialized sync root '{}'", ws.root.display());
        println!("  {item_type} → {folder}/");
        println!("  Store: {}", ws.store_path.display());
        Ok(())
    }
}
