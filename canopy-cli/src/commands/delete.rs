//! `canopy delete <KEY>`: remove an entity and archive its file.

use anyhow::{bail, Result};
use clap::Args;

use canopy_core::EntityKey;

use super::{print_actions, Workspace};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Key of the entity to delete.
    pub key: EntityKey,
}

impl DeleteArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let mut engine = ws.engine()?;
        let action = engine.delete_item(&self.key);
        ws.save_store(engine.store())?;

        print_actions(&ws.root, std::slice::from_ref(&action));
        if !action.success {
            bail!(
                "delete of {} failed: {}",
                self.key,
                action.message.as_deref().unwrap_or("unknown error")
            );
        }
        println!("✓ Deleted '{}'", action.name);
        Ok(())
    }
}
