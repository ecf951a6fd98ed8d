//! `canopy export [--under KEY]`: write store entities to the file tree.

use anyhow::{Context, Result};
use clap::Args;

use canopy_core::{EntityKey, EntityStore};
use canopy_sync::{export_run, SyncScope, SyncTally};

use super::{print_actions, print_tally, Workspace};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Export only this entity and its descendants.
    #[arg(long, value_name = "KEY")]
    pub under: Option<EntityKey>,
}

impl ExportArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let mut engine = ws.engine()?;

        let scope = match self.under {
            None => SyncScope::All,
            Some(key) => {
                let entity = engine
                    .store()
                    .get_by_key(&key)
                    .context("failed to read store")?
                    .with_context(|| format!("no entity with key {key}"))?;
                SyncScope::Under(entity.id)
            }
        };

        let actions = export_run(&mut engine, scope).context("export failed")?;
        print_actions(&ws.root, &actions);
        print_tally("export", &SyncTally::from_actions(&actions));
        Ok(())
    }
}
